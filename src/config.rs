/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration parameters of a peer connection provided by the library user.
//!
//! Example:
//!
//! ```no_run
//! let config = PeerConfig::new("grpcs://peer0.org1.example.com:7051")
//!     .set_msp_id("Org1MSP")
//!     .set_tls_ca_certificate(ca_pem)
//!     .set_server_name_override("peer0.org1.example.com")
//!     .set_dial_policy(DialPolicy::Blocking { timeout: Duration::from_secs(10) });
//! ```
//!
//! A protocol ending in `s` (`grpcs://`, `https://`, in any case) declares TLS and any other
//! protocol (`grpc://`, `http://`) declares plaintext. A URL without a protocol uses TLS unless
//! `allow_insecure` is set.

use std::time::Duration;

use crate::constants::{
    BLOCKING_DIAL_TIMEOUT, FAIL_FAST_DIAL_TIMEOUT, KEEP_ALIVE_TIMEOUT, REQUEST_TIMEOUT,
};
use crate::error::ConfigError;

/// How a connection to a peer is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPolicy {
    /// Dial once and surface an unreachable peer immediately.
    FailFast { timeout: Duration },
    /// Keep dialing until the peer is reachable or `timeout` elapses.
    Blocking { timeout: Duration },
}

impl DialPolicy {
    /// Blocking dial with the default timeout.
    pub fn blocking() -> Self {
        DialPolicy::Blocking {
            timeout: BLOCKING_DIAL_TIMEOUT,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            DialPolicy::FailFast { timeout } | DialPolicy::Blocking { timeout } => *timeout,
        }
    }
}

impl Default for DialPolicy {
    fn default() -> Self {
        DialPolicy::FailFast {
            timeout: FAIL_FAST_DIAL_TIMEOUT,
        }
    }
}

/// HTTP/2 keepalive parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Interval of keepalive pings. `None` disables pings.
    pub interval: Option<Duration>,
    /// How long to wait for a ping acknowledgement before the connection is closed.
    pub timeout: Duration,
    /// Send pings even when there is no outstanding request.
    pub permit_without_stream: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: None,
            timeout: KEEP_ALIVE_TIMEOUT,
            permit_without_stream: false,
        }
    }
}

/// Configuration of a connection to one endorsing peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// peer URL, `grpcs://host:port`, `grpc://host:port` or `host:port`
    pub url: String,

    /// membership identifier of the organization operating the peer
    pub msp_id: String,

    /// host name expected in the peer's TLS certificate, if it differs from the URL host
    pub server_name_override: Option<String>,

    /// allow plaintext for URLs without protocol
    pub allow_insecure: bool,

    /// PEM encoded CA certificate used to verify the peer
    pub tls_ca_certificate: Option<Vec<u8>>,

    pub keep_alive: KeepAliveConfig,

    pub dial_policy: DialPolicy,

    /// upper bound on a single proposal round trip once connected
    pub request_timeout: Duration,
}

impl PeerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            msp_id: String::new(),
            server_name_override: None,
            allow_insecure: false,
            tls_ca_certificate: None,
            keep_alive: KeepAliveConfig::default(),
            dial_policy: DialPolicy::default(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn set_msp_id(mut self, msp_id: impl Into<String>) -> Self {
        self.msp_id = msp_id.into();
        self
    }

    pub fn set_server_name_override(mut self, server_name: impl Into<String>) -> Self {
        self.server_name_override = Some(server_name.into());
        self
    }

    pub fn set_allow_insecure(mut self, allow_insecure: bool) -> Self {
        self.allow_insecure = allow_insecure;
        self
    }

    pub fn set_tls_ca_certificate(mut self, pem: Vec<u8>) -> Self {
        self.tls_ca_certificate = Some(pem);
        self
    }

    pub fn set_keep_alive(mut self, keep_alive: KeepAliveConfig) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn set_dial_policy(mut self, dial_policy: DialPolicy) -> Self {
        self.dial_policy = dial_policy;
        self
    }

    pub fn set_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn is_tls_enabled(&self) -> bool {
        match self.url.find("://") {
            Some(index) => self.url[..index].to_ascii_lowercase().ends_with('s'),
            None => !self.allow_insecure,
        }
    }

    /// URL understood by the HTTP/2 transport.
    pub fn endpoint_url(&self) -> String {
        let address = to_address(&self.url);
        if self.is_tls_enabled() {
            format!("https://{}", address)
        } else {
            format!("http://{}", address)
        }
    }

    /// Check the configuration once, before any connection is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = to_address(&self.url);
        if address.is_empty() {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "missing host".to_string(),
            });
        }
        if self.is_tls_enabled() && self.tls_ca_certificate.is_none() {
            return Err(ConfigError::TlsCertificateRequired {
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

/// Returns whether `url` carries an explicit protocol.
pub fn has_protocol(url: &str) -> bool {
    url.contains("://")
}

/// Strip the protocol off `url`, leaving `host:port`.
pub fn to_address(url: &str) -> &str {
    match url.find("://") {
        Some(index) => &url[index + 3..],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_test_config() {
        let test_config = PeerConfig::new("grpcs://peer0:7051");
        assert_eq!(test_config.url, "grpcs://peer0:7051");
        assert_eq!(test_config.msp_id, "");
        assert!(test_config.server_name_override.is_none());
        assert!(!test_config.allow_insecure);
        assert!(test_config.tls_ca_certificate.is_none());
        assert_eq!(test_config.keep_alive, KeepAliveConfig::default());
        assert_eq!(test_config.dial_policy, DialPolicy::FailFast { timeout: FAIL_FAST_DIAL_TIMEOUT });
        assert_eq!(test_config.request_timeout, REQUEST_TIMEOUT);
    }

    #[test]
    fn test_set_msp_id() {
        let test_config = PeerConfig::new("peer0:7051").set_msp_id("Org1MSP");
        assert_eq!(test_config.msp_id, "Org1MSP");
    }

    #[test]
    fn test_set_dial_policy() {
        let policy = DialPolicy::blocking();
        let test_config = PeerConfig::new("peer0:7051").set_dial_policy(policy);
        assert_eq!(test_config.dial_policy, policy);
        assert_eq!(test_config.dial_policy.timeout(), BLOCKING_DIAL_TIMEOUT);
    }

    #[test]
    fn test_set_keep_alive() {
        let keep_alive = KeepAliveConfig {
            interval: Some(Duration::from_secs(5)),
            timeout: Duration::from_secs(2),
            permit_without_stream: true,
        };
        let test_config = PeerConfig::new("peer0:7051").set_keep_alive(keep_alive);
        assert_eq!(test_config.keep_alive, keep_alive);
    }

    #[test]
    fn test_tls_detection() {
        assert!(PeerConfig::new("grpcs://peer0:7051").is_tls_enabled());
        assert!(!PeerConfig::new("grpc://peer0:7051").is_tls_enabled());
        assert!(PeerConfig::new("peer0:7051").is_tls_enabled());
        assert!(!PeerConfig::new("peer0:7051").set_allow_insecure(true).is_tls_enabled());
        // an explicit protocol wins over allow_insecure
        assert!(PeerConfig::new("grpcs://peer0:7051").set_allow_insecure(true).is_tls_enabled());
        assert!(!PeerConfig::new("grpc://peer0:7051").set_allow_insecure(false).is_tls_enabled());

        assert!(PeerConfig::new("https://peer0:7051").is_tls_enabled());
        assert!(PeerConfig::new("GRPCS://peer0:7051").is_tls_enabled());
        assert!(!PeerConfig::new("http://peer0:7051").is_tls_enabled());
        assert!(!PeerConfig::new("HTTP://peer0:7051").is_tls_enabled());
        assert_eq!(PeerConfig::new("http://peer0:7051").endpoint_url(), "http://peer0:7051");
        assert!(PeerConfig::new("http://peer0:7051").validate().is_ok());
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(PeerConfig::new("grpcs://peer0:7051").endpoint_url(), "https://peer0:7051");
        assert_eq!(PeerConfig::new("grpc://peer0:7051").endpoint_url(), "http://peer0:7051");
        assert_eq!(
            PeerConfig::new("peer0:7051").set_allow_insecure(true).endpoint_url(),
            "http://peer0:7051"
        );
        assert!(has_protocol("grpc://peer0:7051"));
        assert!(!has_protocol("peer0:7051"));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            PeerConfig::new("grpcs://peer0:7051").validate(),
            Err(ConfigError::TlsCertificateRequired { .. })
        ));
        assert!(PeerConfig::new("grpcs://peer0:7051")
            .set_tls_ca_certificate(b"pem".to_vec())
            .validate()
            .is_ok());
        assert!(PeerConfig::new("grpc://peer0:7051").validate().is_ok());
        assert!(matches!(
            PeerConfig::new("grpc://").validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
