/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines useful constants which are used in fabric_endorser.
//!
use std::time::Duration;

// Default peer connection configuration
pub const FAIL_FAST_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
pub const BLOCKING_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const BLOCKING_DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(250);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(20);

// Endorser gRPC service
pub const PROCESS_PROPOSAL_PATH: &str = "/protos.Endorser/ProcessProposal";

// Proposal construction
pub const NONCE_SIZE: usize = 24;
pub const ENDORSER_TRANSACTION: i32 = 3;
pub const GOLANG_CHAINCODE: i32 = 1;

// Lifecycle system chaincode
pub const LSCC: &str = "lscc";
pub const LSCC_INSTALL: &str = "install";
pub const LSCC_DEPLOY: &str = "deploy";
pub const LSCC_UPGRADE: &str = "upgrade";
pub const LSCC_GET_INSTALLED_CHAINCODES: &str = "getinstalledchaincodes";
pub const ESCC: &str = "escc";
pub const VSCC: &str = "vscc";

// Configuration system chaincode
pub const CSCC: &str = "cscc";
pub const CSCC_GET_CHANNELS: &str = "GetChannels";

// Endorser response status
pub const STATUS_OK: i32 = 200;

// Buffer size of the event sink handed out by convenience constructors
pub const EVENT_SINK_BUFFER_SIZE: usize = 10;
