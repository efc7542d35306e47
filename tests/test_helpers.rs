// File: tests/test_helpers.rs

use std::sync::Arc;

use dispute_service::DisputeService;
use ledger_service::LedgerService;
use offer_service::OfferService;
use trade_service::TradeService;

// The full engine wired over in-memory repositories, the way the demo
// binary wires it over real storage.
pub struct EscrowStack {
    pub ledger: Arc<LedgerService>,
    pub offers: Arc<OfferService>,
    pub trades: Arc<TradeService>,
    pub disputes: Arc<DisputeService>,
}

pub fn build_stack() -> EscrowStack {
    let ledger = Arc::new(LedgerService::new());
    let offers = Arc::new(OfferService::in_memory(ledger.clone()));
    let trades = Arc::new(TradeService::in_memory(offers.clone(), ledger.clone()));
    let disputes = Arc::new(DisputeService::in_memory(trades.clone()));

    EscrowStack {
        ledger,
        offers,
        trades,
        disputes,
    }
}
