/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Client] holds the identity of the requester and the channels it works with.
//!
//! Chaincode installation and the queries of a peer's installed chaincodes and joined channels are
//! not bound to a channel, so they are [Client] operations.
//!
//! Example:
//!
//! ```no_run
//! let mut client = Client::new(identity);
//! let channel = client.new_channel("mychannel")?;
//! channel.add_peer(peer.clone());
//!
//! let installed = client
//!     .install_chaincode(ProposalRequest::new("mycc").set_path("github.com/mycc").set_version("1"), &[peer])
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use prost::Message;

use crate::builder::{ProposalKind, ProposalRequest};
use crate::channel::{AggregatedResult, Channel, ProposalPipeline};
use crate::constants::{CSCC, CSCC_GET_CHANNELS, LSCC, LSCC_GET_INSTALLED_CHAINCODES};
use crate::error::{Error, ValidationError};
use crate::identity::{EndorsementVerifier, SigningIdentity};
use crate::messages::{ChaincodeQueryResponse, ChannelQueryResponse};
use crate::processor::ProposalProcessor;

pub struct Client {
    identity: Arc<SigningIdentity>,
    verifier: Option<Arc<dyn EndorsementVerifier>>,
    /// proposals outside of any channel
    system: ProposalPipeline,
    channels: HashMap<String, Channel>,
}

impl Client {
    pub fn new(identity: Arc<SigningIdentity>) -> Self {
        Self {
            system: ProposalPipeline::new("", identity.clone()),
            identity,
            verifier: None,
            channels: HashMap::new(),
        }
    }

    /// Verify endorsement signatures with `verifier`, for installs, queries and channels created
    /// afterwards.
    pub fn set_verifier(mut self, verifier: Arc<dyn EndorsementVerifier>) -> Self {
        self.system.set_verifier(verifier.clone());
        self.verifier = Some(verifier);
        self
    }

    pub fn identity(&self) -> &Arc<SigningIdentity> {
        &self.identity
    }

    /// Create an empty channel named `name`. Names are unique within a client.
    pub fn new_channel(&mut self, name: &str) -> Result<&mut Channel, Error> {
        if self.channels.contains_key(name) {
            return Err(ValidationError::ChannelExists(name.to_string()).into());
        }

        let mut channel = Channel::new(name, self.identity.clone());
        if let Some(verifier) = &self.verifier {
            channel = channel.set_verifier(verifier.clone());
        }
        log::debug!("Created channel {}", name);
        Ok(self.channels.entry(name.to_string()).or_insert(channel))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    /// Names of the channels of this client, in no particular order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|name| name.as_str())
    }

    /// Ask `targets` to install the chaincode package of `request`.
    pub async fn install_chaincode(
        &self,
        request: ProposalRequest,
        targets: &[Arc<dyn ProposalProcessor>],
    ) -> Result<AggregatedResult, Error> {
        self.system.send(ProposalKind::Install, request, targets).await
    }

    /// Chaincodes installed on `target`.
    pub async fn query_installed_chaincodes(
        &self,
        target: Arc<dyn ProposalProcessor>,
    ) -> Result<ChaincodeQueryResponse, Error> {
        let request = ProposalRequest::new(LSCC).set_fcn(LSCC_GET_INSTALLED_CHAINCODES);
        let payload = self.query_peer(request, target).await?;
        ChaincodeQueryResponse::decode(payload.as_slice()).map_err(|e| Error::decode("ChaincodeQueryResponse", e))
    }

    /// Channels `target` has joined.
    pub async fn query_channels(&self, target: Arc<dyn ProposalProcessor>) -> Result<ChannelQueryResponse, Error> {
        let request = ProposalRequest::new(CSCC).set_fcn(CSCC_GET_CHANNELS);
        let payload = self.query_peer(request, target).await?;
        ChannelQueryResponse::decode(payload.as_slice()).map_err(|e| Error::decode("ChannelQueryResponse", e))
    }

    async fn query_peer(&self, request: ProposalRequest, target: Arc<dyn ProposalProcessor>) -> Result<Vec<u8>, Error> {
        let payloads = self.system.query(request, &[target]).await?;
        Ok(payloads.into_iter().next().unwrap_or_default())
    }
}
