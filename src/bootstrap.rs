//! Process startup: wires configuration, the durable history store, the
//! `OrderHistoryService` actor, and the `MatcherDispatcher` into a single
//! ready handle — load config, open storage, spawn long-lived services,
//! hand back a handle for the transport layer to drive.
//!
//! This crate has no binary of its own: a host process calls [`start`] and
//! then serves requests against the returned [`MatcherDispatcher`] over
//! whatever transport it chooses.

use crate::config::AppConfig;
use crate::dispatcher::MatcherDispatcher;
use crate::history::{self, store::HistoryStore};
use crate::settlement::SettlementClient;
use crate::signing::{MatcherSigner, PublicKey, SignatureVerifier};
use crate::validator::OrderValidator;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the process-wide `tracing` subscriber: an `EnvFilter` read
/// from `RUST_LOG` falling back to a crate-scoped debug default, plus a
/// `fmt` layer. A host
/// embedding this crate may call this once at startup, or install its own
/// subscriber instead — this crate never initializes one implicitly.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matcher_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Loads [`AppConfig`], opens the sqlite history store, spawns the
/// `OrderHistoryService` actor, and bootstraps the dispatcher — spawning a
/// controller for every predefined and previously-known pair along the way.
///
/// `settlement`, `verifier`, and `signer` are supplied by the host process:
/// the chain client and the matcher's signing wallet are external
/// collaborators this crate never constructs itself.
pub async fn start(
    settlement: Arc<dyn SettlementClient>,
    verifier: Arc<dyn SignatureVerifier>,
    signer: Arc<dyn MatcherSigner>,
    matcher_public_key: PublicKey,
) -> anyhow::Result<MatcherDispatcher> {
    let config = AppConfig::load()?;
    start_with_config(config, settlement, verifier, signer, matcher_public_key).await
}

/// As [`start`], but with an already-loaded [`AppConfig`] — the path tests
/// and embedding hosts use to avoid `AppConfig::load`'s environment lookup.
pub async fn start_with_config(
    config: AppConfig,
    settlement: Arc<dyn SettlementClient>,
    verifier: Arc<dyn SignatureVerifier>,
    signer: Arc<dyn MatcherSigner>,
    matcher_public_key: PublicKey,
) -> anyhow::Result<MatcherDispatcher> {
    tokio::fs::create_dir_all(&config.journal_data_dir).await?;
    tokio::fs::create_dir_all(&config.snapshots_data_dir).await?;

    let db_path = config
        .order_history_file
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("order_history_file path is not valid UTF-8"))?;
    let store = Arc::new(HistoryStore::open(db_path).await?);

    let validator = Arc::new(OrderValidator::new(verifier.clone(), settlement.clone(), config.clone()));
    let history_handle = history::spawn(store, validator, settlement.clone(), config.clone());

    info!(pairs = config.predefined_pairs.len(), "starting matcher dispatcher");
    let dispatcher =
        MatcherDispatcher::bootstrap(config, history_handle, settlement, verifier, signer, matcher_public_key)
            .await?;

    Ok(dispatcher)
}
