use super::cancel::CancelToken;
use super::orchestrator::{TransactionOrchestrator, TransactionOutcome};
use crate::domain::transaction::TransactionRequest;
use crate::error::ServiceError;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct BatchSuccess {
    /// Position of the request in the submitted batch.
    pub index: usize,
    pub outcome: TransactionOutcome,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub request: TransactionRequest,
    pub error: ServiceError,
}

/// Per-item results of a batch. Items never roll each other back, so
/// `success_count + failure_count == total` always holds.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub successes: Vec<BatchSuccess>,
    pub failures: Vec<BatchFailure>,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

pub struct BatchCoordinator {
    orchestrator: Arc<TransactionOrchestrator>,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<TransactionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Runs each request through the orchestrator, one after another.
    ///
    /// After `cancel` fires, requests not yet started are reported as
    /// `Cancelled` failures without being attempted.
    pub async fn process_batch(
        &self,
        requests: Vec<TransactionRequest>,
        cancel: &CancelToken,
    ) -> BatchReport {
        let mut report = BatchReport {
            total: requests.len(),
            ..BatchReport::default()
        };

        for (index, request) in requests.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.failures.push(BatchFailure {
                    index,
                    request,
                    error: ServiceError::Cancelled,
                });
                continue;
            }
            match self
                .orchestrator
                .process_transaction(request.clone(), cancel)
                .await
            {
                Ok(outcome) => report.successes.push(BatchSuccess { index, outcome }),
                Err(error) => report.failures.push(BatchFailure {
                    index,
                    request,
                    error,
                }),
            }
        }

        report.success_count = report.successes.len();
        report.failure_count = report.failures.len();
        info!(
            total = report.total,
            succeeded = report.success_count,
            failed = report.failure_count,
            "Batch processed"
        );
        report
    }
}
