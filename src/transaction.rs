/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Assembly of endorsed transactions and their submission to the ordering service.
//!
//! [create_transaction] packs a proposal and the endorsements collected for it into a signed
//! [Envelope]. The envelope is handed to an [Orderer], the boundary to the ordering service, which
//! sequences it into a block. What happens after that is out of reach of this crate.

use async_trait::async_trait;
use prost::Message;

use crate::builder::TransactionProposal;
use crate::error::{EndorsementFailures, Error, TargetError, TransportError, ValidationError};
use crate::identity::SigningIdentity;
use crate::messages::{
    ChaincodeActionPayload, ChaincodeEndorsedAction, ChaincodeProposalPayload, Envelope, Payload,
    Transaction, TransactionAction,
};
use crate::processor::TransactionProposalResponse;

/// Client of one ordering service node.
///
/// Macro `async_trait` has to be added for implementing this trait, Example:
///
/// ```no_run
/// struct MyOrderer {}
///
/// #[async_trait]
/// impl Orderer for MyOrderer {
///     fn url(&self) -> &str {
///         "grpcs://orderer.example.com:7050"
///     }
///
///     async fn send_broadcast(&self, envelope: &Envelope) -> Result<(), TransportError> {
///         // ... broadcast the envelope
///     }
/// }
/// ```
#[async_trait]
pub trait Orderer: Send + Sync + 'static {
    fn url(&self) -> &str;

    /// Submit `envelope` for ordering. `Ok` means the orderer accepted it.
    async fn send_broadcast(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// Build the envelope of an endorsed transaction, signed by `identity`.
///
/// The simulation results are taken from the first successful response and every successful
/// response contributes its endorsement. Responses should have passed
/// [ResponseValidator](crate::validator::ResponseValidator) first, so that the results agree.
pub fn create_transaction(
    identity: &SigningIdentity,
    proposal: &TransactionProposal,
    responses: &[TransactionProposalResponse],
) -> Result<Envelope, Error> {
    let endorsed: Vec<_> = responses
        .iter()
        .filter(|r| r.is_success())
        .filter_map(|r| r.proposal_response.as_ref())
        .collect();
    let first = endorsed
        .first()
        .ok_or(ValidationError::NoSuccessfulResponses)?;

    // transient data never reaches the ledger
    let chaincode_proposal_payload = ChaincodeProposalPayload {
        input: proposal.payload().input.clone(),
        transient_map: Default::default(),
    };
    let action_payload = ChaincodeActionPayload {
        chaincode_proposal_payload: chaincode_proposal_payload.encode_to_vec(),
        action: Some(ChaincodeEndorsedAction {
            proposal_response_payload: first.payload.clone(),
            endorsements: endorsed
                .iter()
                .filter_map(|r| r.endorsement.clone())
                .collect(),
        }),
    };
    let transaction = Transaction {
        actions: vec![TransactionAction {
            header: proposal.header().signature_header.clone(),
            payload: action_payload.encode_to_vec(),
        }],
    };
    let payload = Payload {
        header: Some(proposal.header().clone()),
        data: transaction.encode_to_vec(),
    }
    .encode_to_vec();
    let signature = identity.sign(&payload)?;

    log::debug!(
        "Assembled transaction {} with {} endorsement(s)",
        proposal.txn_id(),
        endorsed.len()
    );
    Ok(Envelope { payload, signature })
}

/// Submit `envelope` to `orderers` in turn until one accepts it. Returns the URL of the orderer
/// which accepted, or every failure if none did.
pub async fn broadcast(
    orderers: &[std::sync::Arc<dyn Orderer>],
    envelope: &Envelope,
) -> Result<String, Error> {
    let mut failures = EndorsementFailures::default();
    for orderer in orderers {
        match orderer.send_broadcast(envelope).await {
            Ok(()) => {
                log::info!("Transaction submitted to orderer {}", orderer.url());
                return Ok(orderer.url().to_string());
            }
            Err(error) => {
                log::warn!("Orderer {} failed: {}", orderer.url(), error);
                failures.failures.push(TargetError {
                    target: orderer.url().to_string(),
                    error,
                });
            }
        }
    }
    Err(Error::Ordering(failures))
}
