/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Channel] is the entry point for chaincode operations on one channel.
//!
//! Every send operation goes through the same stages:
//! 1. Validating: required fields are checked in a fixed order. A violation returns the error
//!    with no responses, before anything touches the network.
//! 2. Building: the proposal is encoded and signed ([ProposalBuilder]).
//! 3. Dispatching: the proposal is sent to every target concurrently ([ProposalDispatcher]). An
//!    empty target set is rejected here, still before any network activity.
//! 4. Validated or Failed: responses are checked ([ResponseValidator]) and returned as an
//!    [AggregatedResult]. Failed targets or inconsistent responses set [AggregatedResult::error],
//!    but the responses that were collected are returned as well.
//!
//! Peers and orderers are added with `&mut self`, while sends take `&self`. Membership can thus
//! only change while no send is in flight.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::builder::{ProposalBuilder, ProposalKind, ProposalRequest, TransactionId, TransactionProposal};
use crate::dispatcher::ProposalDispatcher;
use crate::error::{Error, ValidationError};
use crate::events::{EventRegistry, Registration};
use crate::identity::{EndorsementVerifier, SigningIdentity};
use crate::messages::{ChaincodeEvent, Envelope};
use crate::processor::{ProposalProcessor, TransactionProposalResponse};
use crate::transaction::{self, Orderer};
use crate::validator::ResponseValidator;

/// Result of a send operation which got past validation.
#[derive(Debug)]
pub struct AggregatedResult {
    /// one response per target that answered, in target order
    pub responses: Vec<TransactionProposalResponse>,

    pub txn_id: TransactionId,

    /// the proposal that was sent, needed to assemble the transaction
    pub proposal: TransactionProposal,

    /// failed targets or inconsistent responses
    pub error: Option<Error>,
}

impl AggregatedResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Responses with status 200.
    pub fn successful_responses(&self) -> impl Iterator<Item = &TransactionProposalResponse> {
        self.responses.iter().filter(|r| r.is_success())
    }

    /// Discard the partial responses if the call failed.
    pub fn into_result(self) -> Result<(TransactionProposal, Vec<TransactionProposalResponse>), Error> {
        match self.error {
            Some(error) => Err(error),
            None => Ok((self.proposal, self.responses)),
        }
    }
}

/// Build, dispatch and validate, shared by [Channel] and [Client](crate::client::Client).
#[derive(Clone)]
pub(crate) struct ProposalPipeline {
    builder: ProposalBuilder,
    dispatcher: ProposalDispatcher,
    validator: ResponseValidator,
}

impl ProposalPipeline {
    pub(crate) fn new(channel_id: &str, identity: Arc<SigningIdentity>) -> Self {
        Self {
            builder: ProposalBuilder::new(channel_id, identity),
            dispatcher: ProposalDispatcher::new(),
            validator: ResponseValidator::new(),
        }
    }

    pub(crate) fn set_verifier(&mut self, verifier: Arc<dyn EndorsementVerifier>) {
        self.validator = ResponseValidator::new().set_verifier(verifier);
    }

    pub(crate) async fn send(
        &self,
        kind: ProposalKind,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<AggregatedResult, Error> {
        let proposal = self.builder.build(kind, request)?;
        let (responses, failures) = self.dispatcher.send(&proposal, targets).await?.into_parts();

        // an untrustworthy answer outweighs an unreachable peer
        let error = match self.validator.validate(&proposal, &responses) {
            Err(inconsistent) => Some(Error::Consistency(inconsistent)),
            Ok(()) => failures.map(Error::Endorsement),
        };

        Ok(AggregatedResult {
            responses,
            txn_id: proposal.txn_id().clone(),
            proposal,
            error,
        })
    }

    /// Invoke without submitting: every target must endorse and answer with status 200. Returns
    /// the chaincode payloads in target order.
    pub(crate) async fn query(
        &self,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<Vec<Vec<u8>>, Error> {
        let (_, responses) = self.send(ProposalKind::Invoke, request, targets).await?.into_result()?;
        responses
            .into_iter()
            .map(|response| {
                if !response.is_success() {
                    return Err(Error::Rejected {
                        status: response.status,
                        message: response.message().unwrap_or_default().to_string(),
                        endorser: response.endorser,
                    });
                }
                Ok(response.chaincode_payload().unwrap_or_default().to_vec())
            })
            .collect()
    }

    pub(crate) fn validator(&self) -> &ResponseValidator {
        &self.validator
    }

    pub(crate) fn identity(&self) -> &SigningIdentity {
        self.builder.identity()
    }
}

pub struct Channel {
    name: String,
    pipeline: ProposalPipeline,
    peers: Vec<Arc<dyn ProposalProcessor>>,
    orderers: Vec<Arc<dyn Orderer>>,
    events: EventRegistry,
}

impl Channel {
    pub fn new(name: impl Into<String>, identity: Arc<SigningIdentity>) -> Self {
        let name = name.into();
        Self {
            pipeline: ProposalPipeline::new(&name, identity),
            name,
            peers: Vec::new(),
            orderers: Vec::new(),
            events: EventRegistry::new(),
        }
    }

    /// Verify endorsement signatures of successful responses with `verifier`.
    pub fn set_verifier(mut self, verifier: Arc<dyn EndorsementVerifier>) -> Self {
        self.pipeline.set_verifier(verifier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_peer(&mut self, peer: Arc<dyn ProposalProcessor>) {
        log::debug!("Channel {}: added peer {}", self.name, peer.name());
        self.peers.push(peer);
    }

    pub fn remove_peer(&mut self, name: &str) -> Option<Arc<dyn ProposalProcessor>> {
        let index = self.peers.iter().position(|p| p.name() == name)?;
        Some(self.peers.remove(index))
    }

    /// Peers of the channel, in the order they were added.
    pub fn peers(&self) -> &[Arc<dyn ProposalProcessor>] {
        &self.peers
    }

    pub fn add_orderer(&mut self, orderer: Arc<dyn Orderer>) {
        log::debug!("Channel {}: added orderer {}", self.name, orderer.url());
        self.orderers.push(orderer);
    }

    pub fn orderers(&self) -> &[Arc<dyn Orderer>] {
        &self.orderers
    }

    /// Ask `targets` to endorse the instantiation of an installed chaincode on this channel.
    pub async fn send_instantiate_proposal(
        &self,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<AggregatedResult, Error> {
        self.pipeline.send(ProposalKind::Instantiate, request, targets).await
    }

    /// Ask `targets` to endorse the upgrade of an instantiated chaincode to a newly installed
    /// version.
    pub async fn send_upgrade_proposal(
        &self,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<AggregatedResult, Error> {
        self.pipeline.send(ProposalKind::Upgrade, request, targets).await
    }

    /// Ask `targets` to endorse a chaincode invocation.
    pub async fn send_transaction_proposal(
        &self,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<AggregatedResult, Error> {
        self.pipeline.send(ProposalKind::Invoke, request, targets).await
    }

    /// Evaluate a chaincode function without submitting a transaction. Returns the chaincode
    /// payload of every target, in target order.
    ///
    /// Unlike the send operations, any failure fails the whole query, including a target
    /// answering with a status other than 200.
    pub async fn query(
        &self,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<Vec<Vec<u8>>, Error> {
        self.pipeline.query(request, targets).await
    }

    /// Assemble the signed envelope of an endorsed proposal without submitting it.
    pub fn create_transaction(
        &self,
        proposal: &TransactionProposal,
        responses: &[TransactionProposalResponse],
    ) -> Result<Envelope, Error> {
        transaction::create_transaction(self.pipeline.identity(), proposal, responses)
    }

    /// Check the endorsements, assemble the transaction and submit it to the channel's orderers,
    /// one after another until one accepts it. Returns the URL of the accepting orderer.
    pub async fn send_transaction(
        &self,
        proposal: &TransactionProposal,
        responses: &[TransactionProposalResponse],
    ) -> Result<String, Error> {
        if self.orderers.is_empty() {
            return Err(ValidationError::MissingOrderers(self.name.clone()).into());
        }
        self.pipeline.validator().validate(proposal, responses)?;
        let envelope = self.create_transaction(proposal, responses)?;
        transaction::broadcast(&self.orderers, &envelope).await
    }

    /// Deliver committed events of `chaincode_id` whose name matches `event_filter` to `sink`.
    pub async fn register_chaincode_event(
        &self,
        sink: mpsc::Sender<ChaincodeEvent>,
        chaincode_id: impl Into<String>,
        event_filter: impl Into<String>,
    ) -> Result<Registration, Error> {
        self.events.register(sink, chaincode_id, event_filter).await
    }

    pub async fn unregister_chaincode_event(&self, registration: &Registration) -> Result<(), Error> {
        self.events.unregister(registration).await
    }

    /// The registry fed by the component observing committed blocks.
    pub fn event_registry(&self) -> &EventRegistry {
        &self.events
    }
}
