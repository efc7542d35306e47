//! Escrow engine runner
//!
//! Wires the service crates together and, with `--demo`, walks a full
//! offer -> trade -> release lifecycle against in-memory repositories.

use std::sync::Arc;

use clap::Parser;
use common::db::{init_db_pool, run_migrations};
use common::model::actor::Actor;
use common::model::dispute::{DisputeOutcome, TradeAction};
use common::model::offer::OfferLimits;
use common::model::LEDGER_ASSET;
use dispute_service::DisputeService;
use dotenv::dotenv;
use ledger_service::LedgerService;
use offer_service::OfferService;
use rust_decimal_macros::dec;
use trade_service::TradeService;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Run the demo lifecycle against in-memory storage
    #[clap(short, long)]
    demo: bool,

    /// Apply pending database migrations and exit
    #[clap(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing with debug level if DEBUG=1 in .env
    let env_debug = std::env::var("DEBUG").unwrap_or_else(|_| "0".to_string());
    let log_level = if env_debug == "1" { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .parse("ledger_service=debug,offer_service=debug,trade_service=debug,dispute_service=debug")
        .unwrap();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        info!("Tracing initialized");
    }

    if args.migrate {
        let pool = init_db_pool().await?;
        run_migrations(&pool).await?;
        info!("Database migrations applied");
    }

    if args.demo {
        run_demo().await?;
    } else if !args.migrate {
        info!("Nothing to do; pass --demo to run the demo lifecycle");
    }

    Ok(())
}

/// Walk the whole trade lifecycle once: fund, offer, accept, mark paid,
/// release, and a dispute settled by arbitration.
async fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting escrow engine demo");

    let ledger = Arc::new(LedgerService::new());
    let offers = Arc::new(OfferService::in_memory(ledger.clone()));
    let trades = Arc::new(TradeService::in_memory(offers.clone(), ledger.clone()));
    let disputes = Arc::new(DisputeService::in_memory(trades.clone()));

    let admin = Actor::new_admin(1);
    let alice = Actor::new(100);
    let bob = Actor::new(200);
    let carol = Actor::new(300);

    ledger.set_fee_rate(admin, dec!(2)).await?;
    ledger.fund(alice.id, dec!(60), None).await?;
    info!("Alice funded with 60 {}", LEDGER_ASSET);

    let offer = offers
        .create_offer(
            alice,
            "SELL",
            LEDGER_ASSET,
            "USD",
            dec!(10),
            dec!(50),
            OfferLimits::none(),
        )
        .await?;
    info!(
        "Alice's SELL offer open; her usable balance is now {}",
        ledger.usable_balance(alice.id).await?
    );

    let trade = trades.accept_offer(bob, offer.id, dec!(20)).await?;
    info!("Bob accepted 20 units, trade {} pending", trade.id);

    let trade = trades.mark_paid(bob, trade.id, Some("wire ref 42".to_string())).await?;
    info!("Bob marked paid at {:?}", trade.paid_at);

    let trade = trades.release(alice, trade.id).await?;
    info!(
        "Alice released: fee {:?}, Bob's balance {}",
        trade.fee_amount,
        ledger.balance(bob.id).await?.available
    );

    // A second taker pays but the seller goes silent; arbitration steps in
    let trade = trades.accept_offer(carol, offer.id, dec!(10)).await?;
    let trade = trades
        .mark_paid(carol, trade.id, Some("wire ref 43".to_string()))
        .await?;

    let dispute = disputes
        .open_dispute(carol, trade.id, "paid but nothing released".to_string())
        .await?;
    info!("Carol opened dispute {} on trade {}", dispute.id, trade.id);

    disputes
        .resolve_dispute(
            admin,
            dispute.id,
            DisputeOutcome::Resolved,
            Some("payment reference verified".to_string()),
            TradeAction::Release,
        )
        .await?;
    info!(
        "Arbitration released trade {}; Carol's balance {}",
        trade.id,
        ledger.balance(carol.id).await?.available
    );

    Ok(())
}
