/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Error types returned by fabric_endorser.
//!
//! Every failure is tagged with an [ErrorKind] so that callers can tell an unreachable peer
//! ([ErrorKind::Transport]) apart from a peer that answered with something untrustworthy
//! ([ErrorKind::Consistency]) without matching on message strings.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Category of an [Error].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Transport,
    Endorsement,
    Consistency,
    Signing,
    Encoding,
    Ordering,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One or more targets failed during a dispatch. Responses from the other targets are
    /// returned alongside this error.
    #[error(transparent)]
    Endorsement(#[from] EndorsementFailures),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    /// An endorser answered with a status other than 200 where a result was required.
    #[error("{endorser} rejected the proposal with status {status}: {message}")]
    Rejected {
        endorser: String,
        status: i32,
        message: String,
    },

    /// Every orderer refused or failed the envelope.
    #[error("failed to submit transaction to any orderer: {0}")]
    Ordering(EndorsementFailures),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Config(_) => ErrorKind::Configuration,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Endorsement(_) | Error::Rejected { .. } => ErrorKind::Endorsement,
            Error::Consistency(_) => ErrorKind::Consistency,
            Error::Signing(_) => ErrorKind::Signing,
            Error::Decode { .. } => ErrorKind::Encoding,
            Error::Ordering(_) => ErrorKind::Ordering,
        }
    }

    pub(crate) fn decode(what: &'static str, source: prost::DecodeError) -> Self {
        Error::Decode { what, source }
    }
}

/// Input errors detected before any network activity. The messages of the required-field
/// variants are part of the public contract and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("chaincodeName is required")]
    ChaincodeNameRequired,

    #[error("chaincodePath is required")]
    ChaincodePathRequired,

    #[error("chaincodeVersion is required")]
    ChaincodeVersionRequired,

    #[error("chaincodePolicy is required")]
    ChaincodePolicyRequired,

    #[error("missing peer objects for chaincode proposal")]
    MissingTargets,

    #[error("fcn is required")]
    FunctionRequired,

    #[error("invalid collection config '{name}': {reason}")]
    InvalidCollection { name: String, reason: String },

    #[error("channel {0} already exists")]
    ChannelExists(String),

    #[error("no successful proposal responses to build a transaction from")]
    NoSuccessfulResponses,

    #[error("no orderers are configured for channel {0}")]
    MissingOrderers(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TLS is enabled for {url} but no CA certificate was provided")]
    TlsCertificateRequired { url: String },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid TLS configuration for {url}: {reason}")]
    InvalidTls { url: String, reason: String },

    #[error("invalid event pattern '{pattern}': {source}")]
    InvalidEventPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("registration {0} is not registered")]
    UnknownRegistration(u64),
}

/// Failure talking to a single target.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {target}: {reason}")]
    Dial { target: String, reason: String },

    #[error("request to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("{target} returned gRPC status {code}: {message}")]
    Status {
        target: String,
        code: String,
        message: String,
    },

    #[error("{target} is not ready: {reason}")]
    NotReady { target: String, reason: String },

    /// The submission to this target panicked or was aborted before it finished.
    #[error("submission to {target} did not complete: {reason}")]
    Aborted { target: String, reason: String },
}

impl TransportError {
    pub fn target(&self) -> &str {
        match self {
            TransportError::Dial { target, .. }
            | TransportError::Timeout { target, .. }
            | TransportError::Status { target, .. }
            | TransportError::NotReady { target, .. }
            | TransportError::Aborted { target, .. } => target,
        }
    }
}

/// A response was received but cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("successful response from {endorser} carries no proposal response")]
    MissingProposalResponse { endorser: String },

    #[error("response from {endorser} carries no endorsement")]
    MissingEndorsement { endorser: String },

    #[error("response from {endorser} has a malformed payload: {reason}")]
    MalformedPayload { endorser: String, reason: String },

    #[error("response from {endorser} has a malformed endorsement: {reason}")]
    MalformedEndorsement { endorser: String, reason: String },

    #[error("response from {endorser} is for a different proposal (hash {found}, expected {expected})")]
    ProposalHashMismatch {
        endorser: String,
        expected: String,
        found: String,
    },

    #[error("endorsement signature from {endorser} does not verify")]
    SignatureMismatch { endorser: String },

    #[error("simulation results from {endorser} ({found}) disagree with {reference} ({expected})")]
    PayloadMismatch {
        endorser: String,
        reference: String,
        expected: String,
        found: String,
    },
}

impl ConsistencyError {
    pub fn endorser(&self) -> &str {
        match self {
            ConsistencyError::MissingProposalResponse { endorser }
            | ConsistencyError::MissingEndorsement { endorser }
            | ConsistencyError::MalformedPayload { endorser, .. }
            | ConsistencyError::MalformedEndorsement { endorser, .. }
            | ConsistencyError::ProposalHashMismatch { endorser, .. }
            | ConsistencyError::SignatureMismatch { endorser }
            | ConsistencyError::PayloadMismatch { endorser, .. } => endorser,
        }
    }
}

/// The failure of one target in a fan-out.
#[derive(Debug, Clone)]
pub struct TargetError {
    pub target: String,
    pub error: TransportError,
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

/// Combined error of a fan-out: one entry per failed target, in target order.
#[derive(Debug, Clone, Default)]
pub struct EndorsementFailures {
    pub failures: Vec<TargetError>,
}

impl EndorsementFailures {
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.target.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for EndorsementFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} target(s) failed: [", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for EndorsementFailures {}
