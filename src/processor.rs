/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [ProposalProcessor] is the capability through which a proposal is submitted to an endorser.
//!
//! A [Peer](crate::peer::Peer) is the network implementation, but anything that can turn a signed
//! proposal into a response can be a target, which is how the dispatcher is tested without a
//! network.
//!
//! Macro `async_trait` has to be added for implementing this trait, Example:
//!
//! ```no_run
//! struct MyEndorser {}
//!
//! #[async_trait]
//! impl ProposalProcessor for MyEndorser {
//!     fn name(&self) -> &str {
//!         "my-endorser"
//!     }
//!
//!     async fn process_transaction_proposal(
//!         &self,
//!         proposal: &TransactionProposal,
//!     ) -> Result<TransactionProposalResponse, TransportError> {
//!         // ... submit proposal.signed_proposal()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::builder::TransactionProposal;
use crate::constants::STATUS_OK;
use crate::conversions;
use crate::error::{Error, TransportError};
use crate::messages::{Endorsement, ProposalResponse, ProposalResponsePayload};

#[async_trait]
pub trait ProposalProcessor: Send + Sync + 'static {
    /// Identity of the target used in responses and error reports.
    fn name(&self) -> &str;

    /// Submit `proposal` and wait for the endorser's answer. A response with a non-200 status is
    /// still `Ok`: it is the endorser's decision, not a transport failure.
    async fn process_transaction_proposal(
        &self,
        proposal: &TransactionProposal,
    ) -> Result<TransactionProposalResponse, TransportError>;
}

/// The answer of one endorser to a proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionProposalResponse {
    /// name of the target which answered
    pub endorser: String,

    /// status reported by the endorser, 200 on success
    pub status: i32,

    /// the full response as received on the wire
    pub proposal_response: Option<ProposalResponse>,
}

impl TransactionProposalResponse {
    pub fn new(endorser: impl Into<String>, proposal_response: ProposalResponse) -> Self {
        let status = proposal_response
            .response
            .as_ref()
            .map(|r| r.status)
            .unwrap_or_default();
        Self {
            endorser: endorser.into(),
            status,
            proposal_response: Some(proposal_response),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn endorsement(&self) -> Option<&Endorsement> {
        self.proposal_response
            .as_ref()
            .and_then(|r| r.endorsement.as_ref())
    }

    /// Serialized identity of the endorser as it signed the response.
    pub fn endorser_identity(&self) -> Option<&[u8]> {
        self.endorsement().map(|e| e.endorser.as_slice())
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.endorsement().map(|e| e.signature.as_slice())
    }

    /// Encoded `ProposalResponsePayload`; its bytes are what endorsers must agree on.
    pub fn payload(&self) -> Option<&[u8]> {
        self.proposal_response.as_ref().map(|r| r.payload.as_slice())
    }

    /// Message returned by the chaincode or the endorser alongside the status.
    pub fn message(&self) -> Option<&str> {
        self.proposal_response
            .as_ref()
            .and_then(|r| r.response.as_ref())
            .map(|r| r.message.as_str())
    }

    /// Payload returned by the chaincode, e.g. the result of a query.
    pub fn chaincode_payload(&self) -> Option<&[u8]> {
        self.proposal_response
            .as_ref()
            .and_then(|r| r.response.as_ref())
            .map(|r| r.payload.as_slice())
    }

    pub fn decode_payload(&self) -> Result<Option<ProposalResponsePayload>, Error> {
        self.proposal_response
            .as_ref()
            .map(conversions::response_payload)
            .transpose()
    }
}
