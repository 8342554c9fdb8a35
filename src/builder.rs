/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Construction of signed transaction proposals.
//!
//! [ProposalBuilder] validates a [ProposalRequest] for a [ProposalKind], then encodes and signs it
//! into a [TransactionProposal]. Validation stops at the first missing field, in this order:
//! 1. chaincode name
//! 2. chaincode path (install, instantiate, upgrade)
//! 3. chaincode version (install, instantiate, upgrade)
//! 4. endorsement policy (instantiate, upgrade)
//! 5. private data collections (instantiate, upgrade)
//! 6. function name (invoke)
//!
//! Lifecycle operations (install, instantiate, upgrade) are invocations of the lifecycle system
//! chaincode which carry a `ChaincodeDeploymentSpec`. Building does no network I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use prost::Message;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::{
    ENDORSER_TRANSACTION, ESCC, GOLANG_CHAINCODE, LSCC, LSCC_DEPLOY, LSCC_INSTALL, LSCC_UPGRADE,
    NONCE_SIZE, VSCC,
};
use crate::conversions;
use crate::error::{Error, ValidationError};
use crate::identity::SigningIdentity;
use crate::messages::{
    ChaincodeDeploymentSpec, ChaincodeHeaderExtension, ChaincodeId, ChaincodeInput,
    ChaincodeInvocationSpec, ChaincodeProposalPayload, ChaincodeSpec, ChannelHeader, Header,
    Proposal, SignatureHeader, SignedProposal, Timestamp,
};
use crate::policy::{collection_package, EndorsementPolicy, PrivateDataCollectionConfig};

/// The operation a proposal asks endorsers to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalKind {
    Install,
    Instantiate,
    Upgrade,
    Invoke,
}

impl ProposalKind {
    fn requires_path(&self) -> bool {
        !matches!(self, ProposalKind::Invoke)
    }

    fn requires_version(&self) -> bool {
        !matches!(self, ProposalKind::Invoke)
    }

    fn requires_policy(&self) -> bool {
        matches!(self, ProposalKind::Instantiate | ProposalKind::Upgrade)
    }
}

/// Parameters of a chaincode operation.
#[derive(Debug, Clone, Default)]
pub struct ProposalRequest {
    pub chaincode_name: String,
    pub chaincode_version: String,
    pub chaincode_path: String,

    /// function to invoke, only used by invoke proposals
    pub fcn: String,

    pub args: Vec<Vec<u8>>,

    /// data passed to the chaincode which is not recorded on the ledger
    pub transient_map: HashMap<String, Vec<u8>>,

    pub policy: Option<EndorsementPolicy>,

    pub collections: Vec<PrivateDataCollectionConfig>,

    /// chaincode package, only used by install proposals
    pub code_package: Vec<u8>,
}

impl ProposalRequest {
    pub fn new(chaincode_name: impl Into<String>) -> Self {
        Self {
            chaincode_name: chaincode_name.into(),
            ..Default::default()
        }
    }

    pub fn set_version(mut self, version: impl Into<String>) -> Self {
        self.chaincode_version = version.into();
        self
    }

    pub fn set_path(mut self, path: impl Into<String>) -> Self {
        self.chaincode_path = path.into();
        self
    }

    pub fn set_fcn(mut self, fcn: impl Into<String>) -> Self {
        self.fcn = fcn.into();
        self
    }

    pub fn set_args(mut self, args: Vec<Vec<u8>>) -> Self {
        self.args = args;
        self
    }

    pub fn set_transient_map(mut self, transient_map: HashMap<String, Vec<u8>>) -> Self {
        self.transient_map = transient_map;
        self
    }

    pub fn set_policy(mut self, policy: Option<EndorsementPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_collections(mut self, collections: Vec<PrivateDataCollectionConfig>) -> Self {
        self.collections = collections;
        self
    }

    pub fn set_code_package(mut self, code_package: Vec<u8>) -> Self {
        self.code_package = code_package;
        self
    }

    /// Check the request for `kind`, reporting the first violated field only.
    pub fn validate(&self, kind: ProposalKind) -> Result<(), ValidationError> {
        if self.chaincode_name.is_empty() {
            return Err(ValidationError::ChaincodeNameRequired);
        }
        if kind.requires_path() && self.chaincode_path.is_empty() {
            return Err(ValidationError::ChaincodePathRequired);
        }
        if kind.requires_version() && self.chaincode_version.is_empty() {
            return Err(ValidationError::ChaincodeVersionRequired);
        }
        if kind.requires_policy() {
            if self.policy.is_none() {
                return Err(ValidationError::ChaincodePolicyRequired);
            }
            for collection in &self.collections {
                collection.validate()?;
            }
        }
        if kind == ProposalKind::Invoke && self.fcn.is_empty() {
            return Err(ValidationError::FunctionRequired);
        }
        Ok(())
    }
}

/// Transaction identifier bound to the nonce and creator it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionId {
    id: String,
    nonce: Vec<u8>,
    creator: Vec<u8>,
}

impl TransactionId {
    /// Derive a transaction id from a fresh random nonce.
    pub fn new(creator: Vec<u8>) -> Self {
        let mut nonce = vec![0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        Self::from_parts(nonce, creator)
    }

    pub fn from_parts(nonce: Vec<u8>, creator: Vec<u8>) -> Self {
        Self {
            id: conversions::transaction_id(&nonce, &creator),
            nonce,
            creator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn creator(&self) -> &[u8] {
        &self.creator
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A signed proposal. Only [ProposalBuilder] creates one, and it cannot be modified afterwards,
/// so it can be shared read-only by every concurrent submission.
#[derive(Debug, Clone)]
pub struct TransactionProposal {
    txn_id: TransactionId,
    kind: ProposalKind,
    channel_id: String,
    request: ProposalRequest,
    header: Header,
    payload: ChaincodeProposalPayload,
    signed_proposal: SignedProposal,
    proposal_hash: Vec<u8>,
}

impl TransactionProposal {
    pub fn txn_id(&self) -> &TransactionId {
        &self.txn_id
    }

    pub fn kind(&self) -> ProposalKind {
        self.kind
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn chaincode_name(&self) -> &str {
        &self.request.chaincode_name
    }

    pub fn chaincode_version(&self) -> &str {
        &self.request.chaincode_version
    }

    pub fn chaincode_path(&self) -> &str {
        &self.request.chaincode_path
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.request.args
    }

    pub fn transient_map(&self) -> &HashMap<String, Vec<u8>> {
        &self.request.transient_map
    }

    pub fn policy(&self) -> Option<&EndorsementPolicy> {
        self.request.policy.as_ref()
    }

    pub fn collections(&self) -> &[PrivateDataCollectionConfig] {
        &self.request.collections
    }

    /// Serialized identity of the requester.
    pub fn creator(&self) -> &[u8] {
        self.txn_id.creator()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &ChaincodeProposalPayload {
        &self.payload
    }

    /// The message submitted to endorsers.
    pub fn signed_proposal(&self) -> &SignedProposal {
        &self.signed_proposal
    }

    pub fn signature(&self) -> &[u8] {
        &self.signed_proposal.signature
    }

    /// Hash every endorser must echo back in its response payload.
    pub fn proposal_hash(&self) -> &[u8] {
        &self.proposal_hash
    }
}

/// Builds proposals for one channel on behalf of one identity.
#[derive(Debug, Clone)]
pub struct ProposalBuilder {
    channel_id: String,
    identity: Arc<SigningIdentity>,
}

impl ProposalBuilder {
    pub fn new(channel_id: impl Into<String>, identity: Arc<SigningIdentity>) -> Self {
        Self {
            channel_id: channel_id.into(),
            identity,
        }
    }

    pub fn identity(&self) -> &Arc<SigningIdentity> {
        &self.identity
    }

    pub fn build(
        &self,
        kind: ProposalKind,
        request: ProposalRequest,
    ) -> Result<TransactionProposal, Error> {
        request.validate(kind)?;

        // installs are not bound to a channel
        let channel_id = match kind {
            ProposalKind::Install => String::new(),
            _ => self.channel_id.clone(),
        };

        let txn_id = TransactionId::new(self.identity.serialize());
        let (chaincode_id, invocation) = invocation_spec(kind, &channel_id, &request);

        let channel_header = ChannelHeader {
            r#type: ENDORSER_TRANSACTION,
            version: 0,
            timestamp: Some(Timestamp::now()),
            channel_id: channel_id.clone(),
            tx_id: txn_id.id().to_string(),
            epoch: 0,
            extension: ChaincodeHeaderExtension {
                chaincode_id: Some(chaincode_id),
            }
            .encode_to_vec(),
            tls_cert_hash: Vec::new(),
        };
        let signature_header = SignatureHeader {
            creator: txn_id.creator().to_vec(),
            nonce: txn_id.nonce().to_vec(),
        };
        let header = Header {
            channel_header: channel_header.encode_to_vec(),
            signature_header: signature_header.encode_to_vec(),
        };
        let payload = ChaincodeProposalPayload {
            input: invocation.encode_to_vec(),
            transient_map: request.transient_map.clone(),
        };

        let proposal_bytes = Proposal {
            header: header.encode_to_vec(),
            payload: payload.encode_to_vec(),
            extension: Vec::new(),
        }
        .encode_to_vec();
        let signature = self.identity.sign(&proposal_bytes)?;
        let proposal_hash = conversions::proposal_hash(&header, &payload);

        log::debug!(
            "Built {:?} proposal (txid: {}, chaincode: {}, channel: {})",
            kind,
            txn_id,
            request.chaincode_name,
            channel_id
        );

        Ok(TransactionProposal {
            txn_id,
            kind,
            channel_id,
            request,
            header,
            payload,
            signed_proposal: SignedProposal {
                proposal_bytes,
                signature,
            },
            proposal_hash,
        })
    }
}

/// Returns the chaincode addressed by the proposal header and the invocation sent to it.
fn invocation_spec(
    kind: ProposalKind,
    channel_id: &str,
    request: &ProposalRequest,
) -> (ChaincodeId, ChaincodeInvocationSpec) {
    let (chaincode_id, args) = match kind {
        ProposalKind::Invoke => {
            let mut args = Vec::with_capacity(request.args.len() + 1);
            args.push(request.fcn.as_bytes().to_vec());
            args.extend(request.args.iter().cloned());
            let chaincode_id = ChaincodeId {
                name: request.chaincode_name.clone(),
                ..Default::default()
            };
            (chaincode_id, args)
        }
        ProposalKind::Install => {
            let deployment = deployment_spec(request, Vec::new(), request.code_package.clone());
            let args = vec![LSCC_INSTALL.as_bytes().to_vec(), deployment.encode_to_vec()];
            (lscc_id(), args)
        }
        ProposalKind::Instantiate | ProposalKind::Upgrade => {
            let operation = if kind == ProposalKind::Instantiate {
                LSCC_DEPLOY
            } else {
                LSCC_UPGRADE
            };
            let deployment = deployment_spec(request, request.args.clone(), Vec::new());
            let policy = request
                .policy
                .as_ref()
                .map(|p| p.to_envelope().encode_to_vec())
                .unwrap_or_default();
            let mut args = vec![
                operation.as_bytes().to_vec(),
                channel_id.as_bytes().to_vec(),
                deployment.encode_to_vec(),
                policy,
                ESCC.as_bytes().to_vec(),
                VSCC.as_bytes().to_vec(),
            ];
            if !request.collections.is_empty() {
                args.push(collection_package(&request.collections).encode_to_vec());
            }
            (lscc_id(), args)
        }
    };

    let invocation = ChaincodeInvocationSpec {
        chaincode_spec: Some(ChaincodeSpec {
            r#type: GOLANG_CHAINCODE,
            chaincode_id: Some(chaincode_id.clone()),
            input: Some(ChaincodeInput {
                args,
                decorations: HashMap::new(),
            }),
            timeout: 0,
        }),
    };
    (chaincode_id, invocation)
}

fn deployment_spec(
    request: &ProposalRequest,
    args: Vec<Vec<u8>>,
    code_package: Vec<u8>,
) -> ChaincodeDeploymentSpec {
    ChaincodeDeploymentSpec {
        chaincode_spec: Some(ChaincodeSpec {
            r#type: GOLANG_CHAINCODE,
            chaincode_id: Some(ChaincodeId {
                path: request.chaincode_path.clone(),
                name: request.chaincode_name.clone(),
                version: request.chaincode_version.clone(),
            }),
            input: Some(ChaincodeInput {
                args,
                decorations: HashMap::new(),
            }),
            timeout: 0,
        }),
        code_package,
    }
}

fn lscc_id() -> ChaincodeId {
    ChaincodeId {
        name: LSCC.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::test_identity;
    use crate::messages::{CollectionConfigPackage, SerializedIdentity};

    fn builder() -> ProposalBuilder {
        ProposalBuilder::new("testChannel", Arc::new(test_identity("Org1MSP", 7)))
    }

    fn deploy_request() -> ProposalRequest {
        ProposalRequest::new("qscc")
            .set_path("test")
            .set_version("1")
            .set_policy(Some(EndorsementPolicy::signed_by_msp_member("Org1MSP")))
    }

    fn decode_invocation(proposal: &TransactionProposal) -> ChaincodeInvocationSpec {
        let decoded = Proposal::decode(proposal.signed_proposal().proposal_bytes.as_slice()).unwrap();
        let payload = ChaincodeProposalPayload::decode(decoded.payload.as_slice()).unwrap();
        ChaincodeInvocationSpec::decode(payload.input.as_slice()).unwrap()
    }

    fn invocation_args(proposal: &TransactionProposal) -> Vec<Vec<u8>> {
        decode_invocation(proposal)
            .chaincode_spec
            .unwrap()
            .input
            .unwrap()
            .args
    }

    #[test]
    fn test_validation_order() {
        let kinds = [ProposalKind::Instantiate, ProposalKind::Upgrade];
        for kind in kinds {
            let request = ProposalRequest::new("");
            assert_eq!(request.validate(kind), Err(ValidationError::ChaincodeNameRequired));

            let request = ProposalRequest::new("qscc");
            assert_eq!(request.validate(kind), Err(ValidationError::ChaincodePathRequired));

            let request = request.set_path("test");
            assert_eq!(request.validate(kind), Err(ValidationError::ChaincodeVersionRequired));

            let request = request.set_version("1");
            assert_eq!(request.validate(kind), Err(ValidationError::ChaincodePolicyRequired));

            let request = request.set_policy(Some(EndorsementPolicy::signed_by_msp_member("Org1MSP")));
            assert_eq!(request.validate(kind), Ok(()));
        }
    }

    #[test]
    fn test_first_violation_wins() {
        // everything is missing, only the name is reported
        let request = ProposalRequest::default();
        assert_eq!(
            request.validate(ProposalKind::Instantiate),
            Err(ValidationError::ChaincodeNameRequired)
        );
        assert!(matches!(
            builder().build(ProposalKind::Instantiate, request),
            Err(Error::Validation(ValidationError::ChaincodeNameRequired))
        ));
    }

    #[test]
    fn test_install_and_invoke_validation() {
        let install = ProposalRequest::new("mycc").set_path("github.com/mycc");
        assert_eq!(
            install.validate(ProposalKind::Install),
            Err(ValidationError::ChaincodeVersionRequired)
        );
        // install does not need a policy
        assert_eq!(install.set_version("1").validate(ProposalKind::Install), Ok(()));

        let invoke = ProposalRequest::new("mycc");
        assert_eq!(invoke.validate(ProposalKind::Invoke), Err(ValidationError::FunctionRequired));
        assert_eq!(invoke.set_fcn("move").validate(ProposalKind::Invoke), Ok(()));
    }

    #[test]
    fn test_invalid_collection_is_validation_error() {
        let collection = PrivateDataCollectionConfig::new(
            "somecollection",
            4,
            3,
            EndorsementPolicy::signed_by_msp_member("Org1MSP"),
        );
        let request = deploy_request().set_collections(vec![collection]);
        assert!(matches!(
            request.validate(ProposalKind::Instantiate),
            Err(ValidationError::InvalidCollection { .. })
        ));
    }

    #[test]
    fn test_transaction_id_is_bound_to_nonce_and_creator() {
        let proposal = builder().build(ProposalKind::Instantiate, deploy_request()).unwrap();
        let txn_id = proposal.txn_id();
        assert_eq!(txn_id.nonce().len(), NONCE_SIZE);
        assert_eq!(txn_id.id(), conversions::transaction_id(txn_id.nonce(), txn_id.creator()));

        let creator = SerializedIdentity::decode(proposal.creator()).unwrap();
        assert_eq!(creator.mspid, "Org1MSP");

        let signature_header = SignatureHeader::decode(proposal.header().signature_header.as_slice()).unwrap();
        assert_eq!(signature_header.nonce, txn_id.nonce());
        let channel_header = ChannelHeader::decode(proposal.header().channel_header.as_slice()).unwrap();
        assert_eq!(channel_header.tx_id, txn_id.id());
        assert_eq!(channel_header.channel_id, "testChannel");
        assert_eq!(channel_header.r#type, ENDORSER_TRANSACTION);
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let builder = builder();
        let first = builder.build(ProposalKind::Instantiate, deploy_request()).unwrap();
        let second = builder.build(ProposalKind::Instantiate, deploy_request()).unwrap();
        assert_ne!(first.txn_id().nonce(), second.txn_id().nonce());
        assert_ne!(first.txn_id().id(), second.txn_id().id());
    }

    #[test]
    fn test_proposal_is_signed_by_requester() {
        let builder = builder();
        let proposal = builder.build(ProposalKind::Upgrade, deploy_request().set_version("2")).unwrap();
        assert!(builder.identity().public_key().verify(
            &proposal.signed_proposal().proposal_bytes,
            proposal.signature()
        ));
    }

    #[test]
    fn test_proposal_hash_round_trip() {
        let proposal = builder().build(ProposalKind::Instantiate, deploy_request()).unwrap();
        let endorser_side = conversions::signed_proposal_hash(proposal.signed_proposal()).unwrap();
        assert_eq!(endorser_side, proposal.proposal_hash());
    }

    #[test]
    fn test_instantiate_lscc_args() {
        let request = deploy_request().set_args(vec![b"init".to_vec(), b"a".to_vec()]);
        let proposal = builder().build(ProposalKind::Instantiate, request).unwrap();

        let invocation = decode_invocation(&proposal);
        let spec = invocation.chaincode_spec.unwrap();
        assert_eq!(spec.chaincode_id.unwrap().name, LSCC);

        let args = spec.input.unwrap().args;
        assert_eq!(args.len(), 6);
        assert_eq!(args[0], LSCC_DEPLOY.as_bytes());
        assert_eq!(args[1], b"testChannel");
        assert_eq!(args[4], ESCC.as_bytes());
        assert_eq!(args[5], VSCC.as_bytes());

        let deployment = ChaincodeDeploymentSpec::decode(args[2].as_slice()).unwrap();
        let deployment_spec = deployment.chaincode_spec.unwrap();
        let chaincode_id = deployment_spec.chaincode_id.unwrap();
        assert_eq!(chaincode_id.name, "qscc");
        assert_eq!(chaincode_id.path, "test");
        assert_eq!(chaincode_id.version, "1");
        assert_eq!(deployment_spec.input.unwrap().args, vec![b"init".to_vec(), b"a".to_vec()]);

        let policy = crate::messages::SignaturePolicyEnvelope::decode(args[3].as_slice()).unwrap();
        assert_eq!(policy, EndorsementPolicy::signed_by_msp_member("Org1MSP").to_envelope());
    }

    #[test]
    fn test_upgrade_uses_upgrade_operation() {
        let proposal = builder().build(ProposalKind::Upgrade, deploy_request().set_version("2")).unwrap();
        assert_eq!(invocation_args(&proposal)[0], LSCC_UPGRADE.as_bytes());
    }

    #[test]
    fn test_collections_are_carried_unmodified() {
        let collection = PrivateDataCollectionConfig::new(
            "somecollection",
            1,
            3,
            EndorsementPolicy::signed_by_any_member(&["Org1MSP", "Org2MSP"]),
        );
        let request = deploy_request().set_collections(vec![collection.clone()]);
        let proposal = builder().build(ProposalKind::Instantiate, request).unwrap();

        assert_eq!(proposal.collections(), &[collection.clone()]);
        let args = invocation_args(&proposal);
        assert_eq!(args.len(), 7);
        let package = CollectionConfigPackage::decode(args[6].as_slice()).unwrap();
        assert_eq!(package, collection_package(&[collection]));
    }

    #[test]
    fn test_install_has_no_channel() {
        let request = ProposalRequest::new("mycc")
            .set_path("github.com/mycc")
            .set_version("1")
            .set_code_package(b"package".to_vec());
        let proposal = builder().build(ProposalKind::Install, request).unwrap();
        assert_eq!(proposal.channel_id(), "");

        let args = invocation_args(&proposal);
        assert_eq!(args[0], LSCC_INSTALL.as_bytes());
        let deployment = ChaincodeDeploymentSpec::decode(args[1].as_slice()).unwrap();
        assert_eq!(deployment.code_package, b"package".to_vec());
    }

    #[test]
    fn test_invoke_args_and_transient_data() {
        let mut transient_map = HashMap::new();
        transient_map.insert("secret".to_string(), b"value".to_vec());
        let request = ProposalRequest::new("mycc")
            .set_fcn("move")
            .set_args(vec![b"a".to_vec(), b"b".to_vec()])
            .set_transient_map(transient_map.clone());
        let proposal = builder().build(ProposalKind::Invoke, request).unwrap();

        let invocation = decode_invocation(&proposal);
        let spec = invocation.chaincode_spec.unwrap();
        assert_eq!(spec.chaincode_id.unwrap().name, "mycc");
        assert_eq!(
            spec.input.unwrap().args,
            vec![b"move".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(proposal.payload().transient_map, transient_map);
        assert_eq!(proposal.transient_map(), &transient_map);
    }
}
