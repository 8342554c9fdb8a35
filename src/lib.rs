/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Client-side endorsement for permissioned ledger networks: chaincode proposals are built and
//! signed, sent concurrently to endorsing peers, and the collected endorsements are checked and
//! assembled into transactions for the ordering service.
//!
//! ## Endorsing a chaincode operation
//!
//! ```no_run
//! use fabric_endorser::{Client, PeerBuilder, PeerConfig, ProposalRequest, SigningIdentity};
//!
//! // 1. Create the requester identity and a client.
//! let identity = SigningIdentity::from_ecdsa_secret("Org1MSP", certificate_pem, &secret_key)?;
//! let mut client = Client::new(Arc::new(identity));
//!
//! // 2. Connect to the endorsing peers.
//! let peer: Arc<dyn ProposalProcessor> = Arc::new(
//!     PeerBuilder::new()
//!         .configuration(PeerConfig::new("grpcs://peer0.org1.example.com:7051").set_tls_ca_certificate(ca_pem))
//!         .build()?,
//! );
//!
//! // 3. Create a channel and send a proposal.
//! let channel = client.new_channel("mychannel")?;
//! channel.add_peer(peer.clone());
//! let result = channel
//!     .send_transaction_proposal(ProposalRequest::new("mycc").set_fcn("move"), channel.peers())
//!     .await?;
//!
//! // 4. Submit the endorsed transaction.
//! let (proposal, responses) = result.into_result()?;
//! channel.send_transaction(&proposal, &responses).await?;
//! ```

pub mod builder;
pub use builder::{ProposalBuilder, ProposalKind, ProposalRequest, TransactionId, TransactionProposal};

pub mod channel;
pub use channel::{AggregatedResult, Channel};

pub mod client;
pub use client::Client;

pub mod config;
pub use config::{DialPolicy, KeepAliveConfig, PeerConfig};

pub mod constants;

pub mod conversions;

pub mod dispatcher;
pub use dispatcher::{DispatchResult, ProposalDispatcher};

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod events;
pub use events::{EventRegistry, Registration};

pub mod identity;
pub use identity::{EndorsementVerifier, KnownEndorsers, SigningIdentity};

pub mod messages;

pub mod peer;
pub use peer::{Peer, PeerBuilder};

pub mod policy;
pub use policy::{EndorsementPolicy, PrivateDataCollectionConfig};

pub mod processor;
pub use processor::{ProposalProcessor, TransactionProposalResponse};

pub mod transaction;
pub use transaction::Orderer;

pub mod validator;
pub use validator::ResponseValidator;
