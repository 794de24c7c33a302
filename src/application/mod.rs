//! Application layer: the services that reconcile local records with the
//! ledger.
//!
//! Every service receives its collaborators as shared trait objects and its
//! settings from an explicit [`ServiceConfig`]; there is no global state.

pub mod access;
pub mod batch;
pub mod cancel;
pub mod interest;
pub mod orchestrator;
pub mod projection;
pub mod scheduler;
pub mod settlement;

use crate::config::ServiceConfig;
use crate::domain::ports::{
    AccrualStoreRef, AuthVerifierRef, AverageBalanceSourceRef, CacheRef, LedgerGatewayRef,
    RateTableRef, TransactionStoreRef,
};
use batch::BatchCoordinator;
use interest::InterestEngine;
use orchestrator::TransactionOrchestrator;
use projection::Projection;
use settlement::SettlementPath;
use std::sync::Arc;

/// External collaborators the services depend on.
#[derive(Clone)]
pub struct Collaborators {
    pub transactions: TransactionStoreRef,
    pub accruals: AccrualStoreRef,
    pub rates: RateTableRef,
    pub gateway: LedgerGatewayRef,
    pub auth: AuthVerifierRef,
    pub balances: AverageBalanceSourceRef,
    pub cache: CacheRef,
}

pub struct Services {
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub batch: BatchCoordinator,
    pub interest: Arc<InterestEngine>,
}

impl Services {
    pub fn build(collaborators: Collaborators, config: &ServiceConfig) -> Self {
        let projection = Projection::new(
            collaborators.cache,
            config.cache.ttl(),
            config.cache.stats_ttl(),
        );
        let settlement = SettlementPath::new(
            collaborators.gateway.clone(),
            config.gateway.settle_timeout(),
            config.gateway.finalize_attempts,
        );

        let orchestrator = Arc::new(TransactionOrchestrator::new(
            collaborators.transactions,
            collaborators.gateway,
            collaborators.auth.clone(),
            projection.clone(),
            settlement.clone(),
            config.gateway.balance_timeout(),
        ));
        let interest = Arc::new(InterestEngine::new(
            collaborators.accruals,
            collaborators.rates,
            collaborators.balances,
            collaborators.auth,
            projection,
            settlement,
            config.interest.clone(),
        ));

        Self {
            batch: BatchCoordinator::new(orchestrator.clone()),
            orchestrator,
            interest,
        }
    }
}
