//! Simulated end-to-end order flow.
//!
//! Runs the whole coordination core in one process: in-memory store, fresh
//! key ceremony, local signers, and mock chain/rate collaborators. Useful
//! for demos and smoke-testing an installation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use bridge_audit::{AuditChain, Verification};
use bridge_engine::{
    ChainClient, CreateOrderRequest, EngineConfig, LifecycleController, RateSource,
};
use bridge_signing::{LocalSigner, SignerClient, SigningConfig, SigningCoordinator, TrustedDealer};
use bridge_storage::{BridgeStore, MemoryStore};
use bridge_types::{Chain, Direction, OrderEvent, OrderId, TxRef};

struct SimulatedChain;

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn allocate_deposit_address(
        &self,
        chain: Chain,
        order_id: &OrderId,
    ) -> bridge_engine::Result<String> {
        Ok(format!("sim_{}_{}", chain.as_str().to_lowercase(), order_id))
    }

    async fn broadcast(&self, chain: Chain, signed_tx: &[u8]) -> bridge_engine::Result<TxRef> {
        Ok(TxRef(format!(
            "sim_{}_broadcast_{}",
            chain.as_str().to_lowercase(),
            signed_tx.len()
        )))
    }
}

struct SimulatedRates;

#[async_trait]
impl RateSource for SimulatedRates {
    async fn rate(&self, direction: Direction) -> bridge_engine::Result<Decimal> {
        // A fixed demo book; real deployments wire in a market source.
        let rate = match (direction.source, direction.dest) {
            (Chain::Xmr, Chain::Ton) => "52.1",
            (Chain::Xmr, Chain::Btc) => "0.0023",
            (Chain::Btc, Chain::Xmr) => "434.7",
            _ => "1.0",
        };
        Ok(rate.parse().unwrap_or(Decimal::ONE))
    }
}

fn demo_address(chain: Chain) -> String {
    match chain {
        Chain::Xmr => format!("4{}", "A".repeat(94)),
        Chain::Btc => "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_string(),
        Chain::Ton => format!("EQ{}", "B".repeat(46)),
        Chain::Sol => "1".repeat(32),
        Chain::Eth | Chain::Arb | Chain::Base | Chain::Usdc | Chain::Usdt => {
            format!("0x{}", "a".repeat(40))
        }
    }
}

pub async fn run(source: &str, dest: &str, amount: &str) -> Result<()> {
    let source: Chain = source.parse()?;
    let dest: Chain = dest.parse()?;
    let amount: Decimal = amount.parse()?;
    let config = EngineConfig::load()?;

    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(AuditChain::new());

    info!("running key ceremony");
    let output = TrustedDealer::run(config.signing.threshold, config.signing.total_signers)?;
    let record = TrustedDealer::record(
        dest,
        config.signing.threshold,
        config.signing.total_signers,
        &output,
    );
    store.insert_ceremony(&record).await?;
    let signers: Vec<Arc<dyn SignerClient>> = output
        .key_packages
        .into_iter()
        .map(|(index, kp)| Arc::new(LocalSigner::new(index, kp)) as Arc<dyn SignerClient>)
        .collect();
    let coordinator = Arc::new(SigningCoordinator::new(
        Arc::clone(&store) as Arc<dyn BridgeStore>,
        Arc::clone(&audit),
        signers,
        SigningConfig::default(),
    ));

    let controller = LifecycleController::new(
        Arc::clone(&store) as Arc<dyn BridgeStore>,
        Arc::clone(&audit),
        Arc::new(SimulatedChain),
        Arc::new(SimulatedRates),
        coordinator,
        config,
    );

    let order = controller
        .create_order(CreateOrderRequest {
            source,
            dest,
            amount,
            dest_address: demo_address(dest),
            slippage: Decimal::ONE,
        })
        .await?;
    println!("order {} created ({} -> {})", order.order_id, source, dest);
    println!(
        "  deposit {} {} to {}",
        order.from_amount,
        source,
        order.deposit_address.as_deref().unwrap_or("?")
    );
    println!("  will receive {} {} (min {})", order.to_amount, dest, order.min_received);

    // Simulated deposit and confirmations.
    controller
        .advance(
            &order.order_id,
            OrderEvent::DepositDetected {
                tx_ref: TxRef(format!("sim_{}_deposit", source.as_str().to_lowercase())),
                amount: order.from_amount,
            },
        )
        .await?;
    println!("deposit detected");
    controller
        .advance(
            &order.order_id,
            OrderEvent::ConfirmationUpdate {
                count: order.confirmations_required,
            },
        )
        .await?;
    println!("deposit confirmed ({} confirmations)", order.confirmations_required);

    let order = controller.process_withdrawal(&order.order_id).await?;
    println!(
        "withdrawal signed and broadcast: {}",
        order
            .status
            .withdrawal_tx()
            .map(|t| t.0.as_str())
            .unwrap_or("(failed)")
    );

    controller
        .advance(&order.order_id, OrderEvent::WithdrawalConfirmed)
        .await?;
    let done = controller.get_order(&order.order_id).await?;
    println!("order {} finished in state {}", done.order_id, done.kind());

    match controller.verify_audit_chain(None).await? {
        Verification::Valid => {
            println!("audit chain valid ({} entries)", audit.len().await)
        }
        Verification::FirstInvalid(seq) => {
            println!("audit chain INVALID at sequence {seq}")
        }
    }
    Ok(())
}
