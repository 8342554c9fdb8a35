/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! This module defines the data conversion and hashing functions that are used throughout the
//! fabric_endorser library.
//!
//! The following are implemented:
//!     - transaction id derivation from a nonce and the creator identity
//!     - the proposal hash which endorsers embed in their responses
//!     - fingerprints of simulation results, for error reporting
//!     - mapping of [tonic::Status] into [TransportError]
//!     - decoding helpers for proposal responses

use prost::Message;
use sha2::{Digest, Sha256};

use crate::error::{Error, TransportError};
use crate::messages::{
    ChaincodeProposalPayload, Header, Proposal, ProposalResponse, ProposalResponsePayload,
    SignedProposal,
};

/// Transaction id: lowercase hex of SHA-256(nonce || creator).
pub fn transaction_id(nonce: &[u8], creator: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the channel header, the signature header and the chaincode proposal payload with
/// its transient map removed. Transient data never reaches the ledger, so it is not part of what
/// endorsers sign over.
pub fn proposal_hash(header: &Header, payload: &ChaincodeProposalPayload) -> Vec<u8> {
    let without_transient = ChaincodeProposalPayload {
        input: payload.input.clone(),
        transient_map: Default::default(),
    };
    let mut hasher = Sha256::new();
    hasher.update(&header.channel_header);
    hasher.update(&header.signature_header);
    hasher.update(without_transient.encode_to_vec());
    hasher.finalize().to_vec()
}

/// The proposal hash as an endorser derives it from the signed proposal it received.
pub fn signed_proposal_hash(signed_proposal: &SignedProposal) -> Result<Vec<u8>, Error> {
    let proposal = Proposal::decode(signed_proposal.proposal_bytes.as_slice())
        .map_err(|e| Error::decode("Proposal", e))?;
    let header =
        Header::decode(proposal.header.as_slice()).map_err(|e| Error::decode("Header", e))?;
    let payload = ChaincodeProposalPayload::decode(proposal.payload.as_slice())
        .map_err(|e| Error::decode("ChaincodeProposalPayload", e))?;
    Ok(proposal_hash(&header, &payload))
}

/// Short printable digest of arbitrary bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Message an endorser signs: the response payload followed by the endorser identity.
pub fn endorsement_message(payload: &[u8], endorser: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + endorser.len());
    message.extend_from_slice(payload);
    message.extend_from_slice(endorser);
    message
}

/// Convert a gRPC [tonic::Status] returned by `target` into [TransportError].
pub fn status_error(target: &str, status: tonic::Status) -> TransportError {
    TransportError::Status {
        target: target.to_string(),
        code: format!("{:?}", status.code()),
        message: status.message().to_string(),
    }
}

/// Decode the `ProposalResponsePayload` carried by a proposal response.
pub fn response_payload(response: &ProposalResponse) -> Result<ProposalResponsePayload, Error> {
    ProposalResponsePayload::decode(response.payload.as_slice())
        .map_err(|e| Error::decode("ProposalResponsePayload", e))
}
