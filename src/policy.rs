/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Endorsement policies and private data collection configurations.
//!
//! Policies are only encoded here, never evaluated: whether a set of endorsements satisfies a
//! policy is decided by the validation tier of the network.
//!
//! ```no_run
//! // "Org1MSP.member AND (Org2MSP.member OR Org3MSP.member)"
//! let policy = EndorsementPolicy::and(vec![
//!     EndorsementPolicy::signed_by_msp_member("Org1MSP"),
//!     EndorsementPolicy::signed_by_any_member(&["Org2MSP", "Org3MSP"]),
//! ]);
//! ```

use prost::Message;

use crate::error::ValidationError;
use crate::messages::{
    collection_config, collection_policy_config, signature_policy, CollectionConfig,
    CollectionConfigPackage, CollectionPolicyConfig, MspPrincipal, MspRole, NOutOf,
    SignaturePolicy, SignaturePolicyEnvelope, StaticCollectionConfig,
};

const ROLE_CLASSIFICATION: i32 = 0;
const MEMBER_ROLE: i32 = 0;

/// Boolean expression over membership identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndorsementPolicy {
    /// A signature from any member of the named MSP.
    SignedBy(String),
    /// At least `n` of the sub-policies.
    NOutOf(u32, Vec<EndorsementPolicy>),
}

impl EndorsementPolicy {
    pub fn signed_by_msp_member(msp_id: impl Into<String>) -> Self {
        EndorsementPolicy::SignedBy(msp_id.into())
    }

    /// One signature from a member of any of the MSPs.
    pub fn signed_by_any_member(msp_ids: &[&str]) -> Self {
        EndorsementPolicy::NOutOf(
            1,
            msp_ids.iter().map(|id| Self::signed_by_msp_member(*id)).collect(),
        )
    }

    pub fn and(policies: Vec<EndorsementPolicy>) -> Self {
        EndorsementPolicy::NOutOf(policies.len() as u32, policies)
    }

    pub fn or(policies: Vec<EndorsementPolicy>) -> Self {
        EndorsementPolicy::NOutOf(1, policies)
    }

    pub fn n_out_of(n: u32, policies: Vec<EndorsementPolicy>) -> Self {
        EndorsementPolicy::NOutOf(n, policies)
    }

    /// Membership identifiers named by this policy, each once, in order of first appearance.
    pub fn msp_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_msp_ids(&mut ids);
        ids
    }

    fn collect_msp_ids(&self, ids: &mut Vec<String>) {
        match self {
            EndorsementPolicy::SignedBy(id) => {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            EndorsementPolicy::NOutOf(_, rules) => {
                rules.iter().for_each(|rule| rule.collect_msp_ids(ids));
            }
        }
    }

    /// Encode to a `SignaturePolicyEnvelope`: every distinct MSP becomes one MEMBER principal,
    /// and `SignedBy` rules reference principals by index.
    pub fn to_envelope(&self) -> SignaturePolicyEnvelope {
        let ids = self.msp_ids();
        let identities = ids
            .iter()
            .map(|id| MspPrincipal {
                principal_classification: ROLE_CLASSIFICATION,
                principal: MspRole {
                    msp_identifier: id.clone(),
                    role: MEMBER_ROLE,
                }
                .encode_to_vec(),
            })
            .collect();

        SignaturePolicyEnvelope {
            version: 0,
            rule: Some(self.to_rule(&ids)),
            identities,
        }
    }

    fn to_rule(&self, ids: &[String]) -> SignaturePolicy {
        let rule = match self {
            EndorsementPolicy::SignedBy(id) => {
                let index = ids.iter().position(|i| i == id).unwrap_or_default();
                signature_policy::Type::SignedBy(index as i32)
            }
            EndorsementPolicy::NOutOf(n, rules) => signature_policy::Type::NOutOf(NOutOf {
                n: *n as i32,
                rules: rules.iter().map(|r| r.to_rule(ids)).collect(),
            }),
        };
        SignaturePolicy { r#type: Some(rule) }
    }
}

/// Private data collection definition attached to instantiate and upgrade proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateDataCollectionConfig {
    pub name: String,
    /// minimum number of peers the private data must be distributed to at endorsement
    pub required_peer_count: i32,
    /// maximum number of peers the private data is distributed to
    pub maximum_peer_count: i32,
    /// blocks after which the private data is purged, 0 keeps it forever
    pub block_to_live: u64,
    /// organizations allowed to hold the private data
    pub member_orgs_policy: EndorsementPolicy,
}

impl PrivateDataCollectionConfig {
    pub fn new(
        name: impl Into<String>,
        required_peer_count: i32,
        maximum_peer_count: i32,
        member_orgs_policy: EndorsementPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            required_peer_count,
            maximum_peer_count,
            block_to_live: 0,
            member_orgs_policy,
        }
    }

    pub fn set_block_to_live(mut self, block_to_live: u64) -> Self {
        self.block_to_live = block_to_live;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidCollection {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("name is required"));
        }
        if self.required_peer_count < 0 || self.maximum_peer_count < 0 {
            return Err(invalid("peer counts must not be negative"));
        }
        if self.required_peer_count > self.maximum_peer_count {
            return Err(invalid("requiredPeerCount exceeds maximumPeerCount"));
        }
        Ok(())
    }

    pub fn to_message(&self) -> CollectionConfig {
        CollectionConfig {
            payload: Some(collection_config::Payload::StaticCollectionConfig(
                StaticCollectionConfig {
                    name: self.name.clone(),
                    member_orgs_policy: Some(CollectionPolicyConfig {
                        payload: Some(collection_policy_config::Payload::SignaturePolicy(
                            self.member_orgs_policy.to_envelope(),
                        )),
                    }),
                    required_peer_count: self.required_peer_count,
                    maximum_peer_count: self.maximum_peer_count,
                    block_to_live: self.block_to_live,
                },
            )),
        }
    }
}

/// Encode collections as a `CollectionConfigPackage`.
pub fn collection_package(collections: &[PrivateDataCollectionConfig]) -> CollectionConfigPackage {
    CollectionConfigPackage {
        config: collections.iter().map(|c| c.to_message()).collect(),
    }
}
