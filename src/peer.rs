/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Connection to one endorsing peer.
//!
//! To connect to a peer, the users start with an empty [PeerBuilder] and pass in a [PeerConfig],
//! which carries the peer URL, TLS material, keepalive parameters and the dial policy. Building the
//! [PeerBuilder] validates the configuration once and returns a [Peer]. Every setting is fixed from
//! then on; changing one means building a new [Peer].
//!
//! Example:
//!
//! ```no_run
//! // 1. Define the configurations
//! let config = PeerConfig::new("grpcs://peer0.org1.example.com:7051")
//!     .set_msp_id("Org1MSP")
//!     .set_tls_ca_certificate(ca_pem);
//!
//! // 2. Build the instance of Peer
//! let peer = PeerBuilder::new()
//!     .configuration(config)
//!     .build()?;
//!
//! // 3. Submit proposals, concurrently if needed
//! let response = peer.process_transaction_proposal(&proposal).await?;
//! ```
//!
//! The transport connection is dialed on the first submission and then shared by every later one.
//! A [Peer] holds no per-request state, so concurrent submissions through `&Peer` are safe.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use crate::builder::TransactionProposal;
use crate::config::{to_address, DialPolicy, PeerConfig};
use crate::constants::{BLOCKING_DIAL_RETRY_INTERVAL, PROCESS_PROPOSAL_PATH};
use crate::conversions;
use crate::error::{ConfigError, Error, TransportError};
use crate::messages::{ProposalResponse, SignedProposal};
use crate::processor::{ProposalProcessor, TransactionProposalResponse};

/// The builder struct for constructing a [Peer].
#[derive(Default)]
pub struct PeerBuilder {
    /// Configurations of the peer
    pub config: Option<PeerConfig>,
}

impl PeerBuilder {
    pub fn new() -> PeerBuilder {
        PeerBuilder { config: None }
    }

    pub fn configuration(mut self, config: PeerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Validates the configuration and prepares the endpoint. No connection is made yet.
    pub fn build(self) -> Result<Peer, Error> {
        let config = self.config.ok_or_else(|| ConfigError::InvalidUrl {
            url: String::new(),
            reason: "no peer configuration provided".to_string(),
        })?;
        config.validate()?;
        let endpoint = endpoint(&config)?;

        log::debug!(
            "Configured peer {} (msp: {}, tls: {}, dial: {:?})",
            config.url,
            config.msp_id,
            config.is_tls_enabled(),
            config.dial_policy
        );

        Ok(Peer {
            config,
            endpoint,
            channel: OnceCell::new(),
        })
    }
}

fn endpoint(config: &PeerConfig) -> Result<Endpoint, ConfigError> {
    let invalid_url = |reason: String| ConfigError::InvalidUrl {
        url: config.url.clone(),
        reason,
    };

    let mut endpoint = Endpoint::from_shared(config.endpoint_url())
        .map_err(|e| invalid_url(e.to_string()))?
        .connect_timeout(config.dial_policy.timeout())
        .keep_alive_timeout(config.keep_alive.timeout)
        .keep_alive_while_idle(config.keep_alive.permit_without_stream);
    if let Some(interval) = config.keep_alive.interval {
        endpoint = endpoint.http2_keep_alive_interval(interval);
    }

    if config.is_tls_enabled() {
        let mut tls = ClientTlsConfig::new();
        if let Some(pem) = &config.tls_ca_certificate {
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        let server_name = match &config.server_name_override {
            Some(name) => name.clone(),
            None => host_of(to_address(&config.url)).to_string(),
        };
        endpoint = endpoint
            .tls_config(tls.domain_name(server_name))
            .map_err(|e| ConfigError::InvalidTls {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(endpoint)
}

/// Host part of `host:port`.
fn host_of(address: &str) -> &str {
    match address.rfind(':') {
        Some(index) => &address[..index],
        None => address,
    }
}

/// A reusable connection to one endorsing peer.
pub struct Peer {
    config: PeerConfig,
    endpoint: Endpoint,
    /// established on first use under the dial policy
    channel: OnceCell<Channel>,
}

impl Peer {
    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn msp_id(&self) -> &str {
        &self.config.msp_id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.channel.initialized()
    }

    /// Dial the peer now instead of on the first submission.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.channel().await.map(|_| ())
    }

    async fn channel(&self) -> Result<Channel, TransportError> {
        let channel = self.channel.get_or_try_init(|| self.dial()).await?;
        Ok(channel.clone())
    }

    async fn dial(&self) -> Result<Channel, TransportError> {
        match self.config.dial_policy {
            DialPolicy::FailFast { timeout } => {
                match tokio::time::timeout(timeout, self.endpoint.connect()).await {
                    Ok(Ok(channel)) => Ok(channel),
                    Ok(Err(e)) => Err(TransportError::Dial {
                        target: self.config.url.clone(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(TransportError::Timeout {
                        target: self.config.url.clone(),
                        after: timeout,
                    }),
                }
            }
            DialPolicy::Blocking { timeout } => {
                let deadline = Instant::now() + timeout;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, self.endpoint.connect()).await {
                        Ok(Ok(channel)) => return Ok(channel),
                        Ok(Err(e)) => {
                            log::debug!("Dial to {} failed, retrying: {}", self.config.url, e);
                        }
                        Err(_) => {}
                    }
                    if Instant::now() + BLOCKING_DIAL_RETRY_INTERVAL >= deadline {
                        return Err(TransportError::Timeout {
                            target: self.config.url.clone(),
                            after: timeout,
                        });
                    }
                    tokio::time::sleep(BLOCKING_DIAL_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn process_proposal(
        &self,
        channel: Channel,
        signed_proposal: SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|e| TransportError::NotReady {
            target: self.config.url.clone(),
            reason: e.to_string(),
        })?;

        let codec = tonic::codec::ProstCodec::<SignedProposal, ProposalResponse>::default();
        let path = PathAndQuery::from_static(PROCESS_PROPOSAL_PATH);
        let response = grpc
            .unary(tonic::Request::new(signed_proposal), path, codec)
            .await
            .map_err(|status| conversions::status_error(&self.config.url, status))?;
        Ok(response.into_inner())
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("url", &self.config.url)
            .field("msp_id", &self.config.msp_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl ProposalProcessor for Peer {
    fn name(&self) -> &str {
        &self.config.url
    }

    async fn process_transaction_proposal(
        &self,
        proposal: &TransactionProposal,
    ) -> Result<TransactionProposalResponse, TransportError> {
        let channel = self.channel().await?;
        let request_timeout = self.config.request_timeout;
        let signed_proposal = proposal.signed_proposal().clone();

        match tokio::time::timeout(request_timeout, self.process_proposal(channel, signed_proposal)).await {
            Ok(Ok(response)) => Ok(TransactionProposalResponse::new(self.config.url.clone(), response)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout {
                target: self.config.url.clone(),
                after: request_timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::builder::{ProposalBuilder, ProposalKind, ProposalRequest};
    use crate::identity::tests::test_identity;

    // nothing listens on port 1
    const CLOSED_PORT_URL: &str = "grpc://127.0.0.1:1";

    fn invoke_proposal() -> TransactionProposal {
        ProposalBuilder::new("testChannel", Arc::new(test_identity("Org1MSP", 1)))
            .build(ProposalKind::Invoke, ProposalRequest::new("mycc").set_fcn("query"))
            .unwrap()
    }

    #[test]
    fn test_build_requires_configuration() {
        assert!(matches!(
            PeerBuilder::new().build(),
            Err(Error::Config(ConfigError::InvalidUrl { .. }))
        ));
    }

    #[test]
    fn test_tls_without_certificate_fails_at_build() {
        let result = PeerBuilder::new()
            .configuration(PeerConfig::new("grpcs://peer0.org1.example.com:7051"))
            .build();
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::TlsCertificateRequired { .. }))
        ));

        // no protocol means TLS as well
        let result = PeerBuilder::new()
            .configuration(PeerConfig::new("peer0.org1.example.com:7051"))
            .build();
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::TlsCertificateRequired { .. }))
        ));
    }

    #[test]
    fn test_invalid_url_fails_at_build() {
        let result = PeerBuilder::new().configuration(PeerConfig::new("grpc://")).build();
        assert!(matches!(result, Err(Error::Config(ConfigError::InvalidUrl { .. }))));

        let result = PeerBuilder::new()
            .configuration(PeerConfig::new("grpc://peer 0:7051"))
            .build();
        assert!(matches!(result, Err(Error::Config(ConfigError::InvalidUrl { .. }))));
    }

    #[test]
    fn test_build_does_not_connect() {
        let peer = PeerBuilder::new()
            .configuration(PeerConfig::new(CLOSED_PORT_URL).set_msp_id("Org1MSP"))
            .build()
            .unwrap();
        assert_eq!(peer.url(), CLOSED_PORT_URL);
        assert_eq!(peer.name(), CLOSED_PORT_URL);
        assert_eq!(peer.msp_id(), "Org1MSP");
        assert!(!peer.is_connected());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("peer0.org1.example.com:7051"), "peer0.org1.example.com");
        assert_eq!(host_of("peer0"), "peer0");
    }

    #[tokio::test]
    async fn test_fail_fast_dial_reports_unreachable_peer() {
        let peer = PeerBuilder::new()
            .configuration(PeerConfig::new(CLOSED_PORT_URL).set_dial_policy(DialPolicy::FailFast {
                timeout: Duration::from_secs(2),
            }))
            .build()
            .unwrap();

        let result = peer.process_transaction_proposal(&invoke_proposal()).await;
        match result {
            Err(TransportError::Dial { target, .. }) => assert_eq!(target, CLOSED_PORT_URL),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn test_blocking_dial_gives_up_at_deadline() {
        let timeout = Duration::from_millis(600);
        let peer = PeerBuilder::new()
            .configuration(PeerConfig::new(CLOSED_PORT_URL).set_dial_policy(DialPolicy::Blocking { timeout }))
            .build()
            .unwrap();

        let started = std::time::Instant::now();
        let result = peer.connect().await;
        match result {
            Err(TransportError::Timeout { target, after }) => {
                assert_eq!(target, CLOSED_PORT_URL);
                assert_eq!(after, timeout);
            }
            other => panic!("unexpected result {:?}", other),
        }
        // retried rather than failing on the first refused dial
        assert!(started.elapsed() >= BLOCKING_DIAL_RETRY_INTERVAL);
    }
}
