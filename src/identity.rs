/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identities which sign proposals and verify endorsements.
//!
//! A [SigningIdentity] is the requester: its serialized form (membership identifier plus
//! certificate) is the `creator` of every proposal it builds, and its keypair signs the proposal.
//! Endorsement signatures are checked through the [EndorsementVerifier] trait, which is the
//! boundary to the membership service. [KnownEndorsers] is a map-based implementation.

use std::collections::HashMap;
use std::fmt;

use libp2p::identity::{ecdsa, Keypair, PublicKey};
use p256::ecdsa::Signature;
use prost::Message;

use crate::error::{ConfigError, Error};
use crate::messages::SerializedIdentity;

/// The identity of the requester. Immutable once constructed.
#[derive(Clone)]
pub struct SigningIdentity {
    msp_id: String,
    certificate: Vec<u8>,
    keypair: Keypair,
}

impl SigningIdentity {
    pub fn new(msp_id: impl Into<String>, certificate: Vec<u8>, keypair: Keypair) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate,
            keypair,
        }
    }

    /// Create an identity from a raw 32 byte P-256 secret scalar.
    pub fn from_ecdsa_secret(
        msp_id: impl Into<String>,
        certificate: Vec<u8>,
        secret: &[u8],
    ) -> Result<Self, Error> {
        let secret = ecdsa::SecretKey::try_from_bytes(secret)
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        let keypair: Keypair = ecdsa::Keypair::from(secret).into();
        Ok(Self::new(msp_id, certificate, keypair))
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    /// Encoded `SerializedIdentity`, used as the creator of proposals and transactions.
    pub fn serialize(&self) -> Vec<u8> {
        SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.certificate.clone(),
        }
        .encode_to_vec()
    }

    /// DER encoded ECDSA signature over `msg`, with S in the lower half of the curve order.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        let der = self
            .keypair
            .sign(msg)
            .map_err(|e| Error::Signing(e.to_string()))?;
        to_low_s(&der)
    }
}

// Peers reject signatures whose S is above half the curve order.
fn to_low_s(der: &[u8]) -> Result<Vec<u8>, Error> {
    let signature = Signature::from_der(der).map_err(|e| Error::Signing(e.to_string()))?;
    let signature = signature.normalize_s().unwrap_or(signature);
    Ok(signature.to_der().as_bytes().to_vec())
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("msp_id", &self.msp_id)
            .finish_non_exhaustive()
    }
}

/// Verifies that `signature` was produced by `endorser` (an encoded `SerializedIdentity`)
/// over `message`.
pub trait EndorsementVerifier: Send + Sync + 'static {
    fn verify(&self, endorser: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// [EndorsementVerifier] backed by a fixed set of endorser public keys.
///
/// Endorsers that are not known never verify.
#[derive(Default, Clone)]
pub struct KnownEndorsers {
    keys: HashMap<Vec<u8>, PublicKey>,
}

impl KnownEndorsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `insert` trusts `public_key` for the endorser whose serialized identity is `endorser`.
    pub fn insert(mut self, endorser: Vec<u8>, public_key: PublicKey) -> Self {
        self.keys.insert(endorser, public_key);
        self
    }

    pub fn from_identity(self, identity: &SigningIdentity) -> Self {
        self.insert(identity.serialize(), identity.public_key())
    }
}

impl EndorsementVerifier for KnownEndorsers {
    fn verify(&self, endorser: &[u8], message: &[u8], signature: &[u8]) -> bool {
        self.keys
            .get(endorser)
            .map(|key| key.verify(message, signature))
            .unwrap_or(false)
    }
}

/// Decode the membership identifier of an encoded `SerializedIdentity`, for logging and error
/// reporting.
pub fn msp_id_of(serialized: &[u8]) -> Option<String> {
    SerializedIdentity::decode(serialized).ok().map(|id| id.mspid)
}

/// Check that `signature` is a DER encoded P-256 ECDSA signature, without verifying it.
pub fn check_signature_encoding(signature: &[u8]) -> Result<(), String> {
    Signature::from_der(signature).map(|_| ()).map_err(|e| e.to_string())
}
