/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Concurrent fan-out of one proposal to a set of endorsing targets.
//!
//! [ProposalDispatcher::send] spawns one task per target and waits for all of them. A target that
//! fails, times out or panics does not affect its siblings, and there is no retry. The responses
//! come back in target order, with a combined error naming every failed target.
//!
//! There is no deadline spanning the whole fan-out. A caller who needs one wraps `send` in
//! [tokio::time::timeout]: dropping the future aborts every submission still in flight.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;

use crate::builder::TransactionProposal;
use crate::error::{EndorsementFailures, TargetError, TransportError, ValidationError};
use crate::processor::{ProposalProcessor, TransactionProposalResponse};

/// Outcome of a fan-out. `responses` holds one entry per target that answered, in target order;
/// `failures` one entry per target that did not.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub responses: Vec<TransactionProposalResponse>,
    pub failures: EndorsementFailures,
}

impl DispatchResult {
    /// The combined error, if at least one target failed.
    pub fn error(&self) -> Option<EndorsementFailures> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.clone())
        }
    }

    pub fn into_parts(self) -> (Vec<TransactionProposalResponse>, Option<EndorsementFailures>) {
        let error = if self.failures.is_empty() {
            None
        } else {
            Some(self.failures)
        };
        (self.responses, error)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProposalDispatcher;

impl ProposalDispatcher {
    pub fn new() -> Self {
        ProposalDispatcher
    }

    /// Submit `proposal` to every target concurrently and wait for all of them.
    ///
    /// An empty target set is rejected before anything is spawned.
    pub async fn send(
        &self,
        proposal: &TransactionProposal,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<DispatchResult, ValidationError> {
        if targets.is_empty() {
            return Err(ValidationError::MissingTargets);
        }

        let proposal = Arc::new(proposal.clone());
        let mut tasks = JoinSet::new();
        for (index, target) in targets.iter().enumerate() {
            let target = Arc::clone(target);
            let proposal = Arc::clone(&proposal);
            tasks.spawn(async move {
                log::debug!("Submitting proposal {} to {}", proposal.txn_id(), target.name());
                let submission = target.process_transaction_proposal(&proposal);
                let result = match AssertUnwindSafe(submission).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic);
                        log::error!("Submission to {} panicked: {}", target.name(), reason);
                        Err(TransportError::Aborted {
                            target: target.name().to_string(),
                            reason,
                        })
                    }
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<TransactionProposalResponse, TransportError>>> =
            vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                // the slot stays empty and is reported below
                Err(e) => log::error!("Dispatch task of proposal {} failed: {}", proposal.txn_id(), e),
            }
        }

        let mut responses = Vec::with_capacity(targets.len());
        let mut failures = EndorsementFailures::default();
        for (slot, target) in slots.into_iter().zip(targets) {
            let result = slot.unwrap_or_else(|| {
                Err(TransportError::Aborted {
                    target: target.name().to_string(),
                    reason: "dispatch task did not complete".to_string(),
                })
            });
            match result {
                Ok(response) => {
                    log::debug!(
                        "Received response from {} with status {}",
                        target.name(),
                        response.status
                    );
                    responses.push(response)
                }
                Err(error) => {
                    log::warn!("Proposal {} failed on {}: {}", proposal.txn_id(), target.name(), error);
                    failures.failures.push(TargetError {
                        target: target.name().to_string(),
                        error,
                    });
                }
            }
        }

        log::info!(
            "Proposal {}: {}/{} endorsement responses collected",
            proposal.txn_id(),
            responses.len(),
            targets.len()
        );
        Ok(DispatchResult {
            responses,
            failures,
        })
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
