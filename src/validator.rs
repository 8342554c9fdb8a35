/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structural and cross-response checks of collected endorsements.
//!
//! Only responses with status 200 are checked. Each must carry an endorsement by a serialized
//! identity, with a DER encoded signature, and a payload echoing the hash of the proposal that was
//! sent. If an [EndorsementVerifier] is set, the signature is verified as well. Finally all successful responses must agree byte for byte
//! on their payload, which holds the simulation results.
//!
//! Responses with any other status are rejections by the endorser and pass through unchecked.
//! Endorsement policies are not evaluated here.

use std::sync::Arc;

use crate::builder::TransactionProposal;
use crate::conversions;
use crate::error::ConsistencyError;
use crate::identity::{self, EndorsementVerifier};
use crate::processor::TransactionProposalResponse;

#[derive(Clone, Default)]
pub struct ResponseValidator {
    verifier: Option<Arc<dyn EndorsementVerifier>>,
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verifier(mut self, verifier: Arc<dyn EndorsementVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn has_verifier(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn validate(
        &self,
        proposal: &TransactionProposal,
        responses: &[TransactionProposalResponse],
    ) -> Result<(), ConsistencyError> {
        let mut reference: Option<&TransactionProposalResponse> = None;

        for response in responses.iter().filter(|r| r.is_success()) {
            let result = self.check(proposal, response).and_then(|_| match reference {
                Some(first) => same_results(first, response),
                None => {
                    reference = Some(response);
                    Ok(())
                }
            });
            if let Err(e) = result {
                log::warn!("Proposal {}: {}", proposal.txn_id(), e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn check(
        &self,
        proposal: &TransactionProposal,
        response: &TransactionProposalResponse,
    ) -> Result<(), ConsistencyError> {
        let endorser = || response.endorser.clone();

        let proposal_response = response
            .proposal_response
            .as_ref()
            .ok_or_else(|| ConsistencyError::MissingProposalResponse { endorser: endorser() })?;
        let endorsement = proposal_response
            .endorsement
            .as_ref()
            .filter(|e| !e.signature.is_empty())
            .ok_or_else(|| ConsistencyError::MissingEndorsement { endorser: endorser() })?;

        let payload = conversions::response_payload(proposal_response).map_err(|e| {
            ConsistencyError::MalformedPayload {
                endorser: endorser(),
                reason: e.to_string(),
            }
        })?;
        if payload.proposal_hash != proposal.proposal_hash() {
            return Err(ConsistencyError::ProposalHashMismatch {
                endorser: endorser(),
                expected: hex::encode(proposal.proposal_hash()),
                found: hex::encode(&payload.proposal_hash),
            });
        }

        if identity::msp_id_of(&endorsement.endorser).map_or(true, |msp_id| msp_id.is_empty()) {
            return Err(ConsistencyError::MalformedEndorsement {
                endorser: endorser(),
                reason: "endorser is not a serialized identity".to_string(),
            });
        }
        identity::check_signature_encoding(&endorsement.signature).map_err(|reason| {
            ConsistencyError::MalformedEndorsement {
                endorser: endorser(),
                reason: format!("signature is not DER encoded: {}", reason),
            }
        })?;

        if let Some(verifier) = &self.verifier {
            let message = conversions::endorsement_message(&proposal_response.payload, &endorsement.endorser);
            if !verifier.verify(&endorsement.endorser, &message, &endorsement.signature) {
                return Err(ConsistencyError::SignatureMismatch { endorser: endorser() });
            }
        }
        Ok(())
    }
}

fn same_results(
    reference: &TransactionProposalResponse,
    response: &TransactionProposalResponse,
) -> Result<(), ConsistencyError> {
    let expected = reference.payload().unwrap_or_default();
    let found = response.payload().unwrap_or_default();
    if expected == found {
        Ok(())
    } else {
        Err(ConsistencyError::PayloadMismatch {
            endorser: response.endorser.clone(),
            reference: reference.endorser.clone(),
            expected: conversions::fingerprint(expected),
            found: conversions::fingerprint(found),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use prost::Message;

    use super::*;
    use crate::builder::{ProposalBuilder, ProposalKind, ProposalRequest};
    use crate::identity::tests::test_identity;
    use crate::identity::{KnownEndorsers, SigningIdentity};
    use crate::messages::{Endorsement, ProposalResponse, ProposalResponsePayload, Response};

    /// A status 200 response endorsing `proposal` with simulation `results`, signed by `endorser`.
    pub(crate) fn endorse(
        name: &str,
        endorser: &SigningIdentity,
        proposal_hash: &[u8],
        results: &[u8],
    ) -> TransactionProposalResponse {
        let payload = ProposalResponsePayload {
            proposal_hash: proposal_hash.to_vec(),
            extension: results.to_vec(),
        }
        .encode_to_vec();
        let identity = endorser.serialize();
        let signature = endorser
            .sign(&conversions::endorsement_message(&payload, &identity))
            .unwrap();
        TransactionProposalResponse::new(
            name,
            ProposalResponse {
                version: 1,
                response: Some(Response {
                    status: 200,
                    ..Default::default()
                }),
                payload,
                endorsement: Some(Endorsement {
                    endorser: identity,
                    signature,
                }),
                ..Default::default()
            },
        )
    }

    fn proposal() -> TransactionProposal {
        ProposalBuilder::new("testChannel", Arc::new(test_identity("Org1MSP", 1)))
            .build(ProposalKind::Invoke, ProposalRequest::new("mycc").set_fcn("move"))
            .unwrap()
    }

    #[test]
    fn test_consistent_responses() {
        let proposal = proposal();
        let peer0 = test_identity("Org1MSP", 10);
        let peer1 = test_identity("Org2MSP", 11);
        let responses = vec![
            endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset"),
            endorse("peer1", &peer1, proposal.proposal_hash(), b"rwset"),
        ];
        let verifier = KnownEndorsers::new().from_identity(&peer0).from_identity(&peer1);

        assert!(ResponseValidator::new().validate(&proposal, &responses).is_ok());
        assert!(ResponseValidator::new()
            .set_verifier(Arc::new(verifier))
            .validate(&proposal, &responses)
            .is_ok());
    }

    #[test]
    fn test_disagreeing_results() {
        let proposal = proposal();
        let peer0 = test_identity("Org1MSP", 10);
        let peer1 = test_identity("Org2MSP", 11);
        let responses = vec![
            endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset"),
            endorse("peer1", &peer1, proposal.proposal_hash(), b"other rwset"),
        ];

        match ResponseValidator::new().validate(&proposal, &responses) {
            Err(ConsistencyError::PayloadMismatch {
                endorser,
                reference,
                expected,
                found,
            }) => {
                assert_eq!(endorser, "peer1");
                assert_eq!(reference, "peer0");
                assert_ne!(expected, found);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_response_for_other_proposal() {
        let proposal = proposal();
        let other = proposal_for_other_call();
        let responses = vec![endorse("peer0", &test_identity("Org1MSP", 10), other.proposal_hash(), b"rwset")];

        assert!(matches!(
            ResponseValidator::new().validate(&proposal, &responses),
            Err(ConsistencyError::ProposalHashMismatch { .. })
        ));
    }

    fn proposal_for_other_call() -> TransactionProposal {
        ProposalBuilder::new("otherChannel", Arc::new(test_identity("Org1MSP", 1)))
            .build(ProposalKind::Invoke, ProposalRequest::new("mycc").set_fcn("move"))
            .unwrap()
    }

    #[test]
    fn test_forged_signature() {
        let proposal = proposal();
        let peer0 = test_identity("Org1MSP", 10);
        let mut response = endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset");
        // signed by someone else
        let forger = test_identity("Org1MSP", 12);
        if let Some(endorsement) = response.proposal_response.as_mut().and_then(|r| r.endorsement.as_mut()) {
            endorsement.signature = forger.sign(b"anything").unwrap();
        }

        let validator = ResponseValidator::new().set_verifier(Arc::new(KnownEndorsers::new().from_identity(&peer0)));
        assert_eq!(
            validator.validate(&proposal, &[response]),
            Err(ConsistencyError::SignatureMismatch {
                endorser: "peer0".to_string()
            })
        );
    }

    #[test]
    fn test_structural_errors() {
        let proposal = proposal();
        let peer0 = test_identity("Org1MSP", 10);

        let mut unsigned = endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset");
        if let Some(r) = unsigned.proposal_response.as_mut() {
            r.endorsement = None;
        }
        assert!(matches!(
            ResponseValidator::new().validate(&proposal, &[unsigned]),
            Err(ConsistencyError::MissingEndorsement { .. })
        ));

        let mut garbled = endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset");
        if let Some(r) = garbled.proposal_response.as_mut() {
            r.payload = vec![0xff, 0xff, 0xff];
        }
        assert!(matches!(
            ResponseValidator::new().validate(&proposal, &[garbled]),
            Err(ConsistencyError::MalformedPayload { .. })
        ));

        let empty = TransactionProposalResponse {
            endorser: "peer0".to_string(),
            status: 200,
            proposal_response: None,
        };
        assert!(matches!(
            ResponseValidator::new().validate(&proposal, &[empty]),
            Err(ConsistencyError::MissingProposalResponse { .. })
        ));
    }

    #[test]
    fn test_malformed_endorsements() {
        let proposal = proposal();
        let peer0 = test_identity("Org1MSP", 10);

        let mut anonymous = endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset");
        if let Some(endorsement) = anonymous.proposal_response.as_mut().and_then(|r| r.endorsement.as_mut()) {
            endorsement.endorser = b"not an identity".to_vec();
        }
        assert!(matches!(
            ResponseValidator::new().validate(&proposal, &[anonymous]),
            Err(ConsistencyError::MalformedEndorsement { .. })
        ));

        let mut scribbled = endorse("peer0", &peer0, proposal.proposal_hash(), b"rwset");
        if let Some(endorsement) = scribbled.proposal_response.as_mut().and_then(|r| r.endorsement.as_mut()) {
            endorsement.signature = b"x".to_vec();
        }
        match ResponseValidator::new().validate(&proposal, &[scribbled]) {
            Err(ConsistencyError::MalformedEndorsement { endorser, reason }) => {
                assert_eq!(endorser, "peer0");
                assert!(reason.starts_with("signature is not DER encoded"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_rejections_pass_through() {
        let proposal = proposal();
        let rejected = TransactionProposalResponse {
            endorser: "example.com".to_string(),
            status: 99,
            proposal_response: None,
        };
        let endorsed = endorse("peer0", &test_identity("Org1MSP", 10), proposal.proposal_hash(), b"rwset");
        assert!(ResponseValidator::new().validate(&proposal, &[rejected.clone()]).is_ok());
        assert!(ResponseValidator::new().validate(&proposal, &[rejected, endorsed]).is_ok());
    }
}
