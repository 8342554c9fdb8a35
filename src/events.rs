/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registry of chaincode event subscriptions.
//!
//! A subscription pairs a chaincode id and a regular expression over event names with a sink.
//! The component which observes committed blocks calls [EventRegistry::publish] for every chaincode
//! event, and the registry forwards the event to each matching sink. Delivery happens after commit,
//! never at proposal-response time.
//!
//! [EventRegistry::unregister] removes the entry under the same lock that [EventRegistry::publish]
//! holds while delivering, so once it returns the sink receives nothing more.
//!
//! ### Example
//!
//! ```no_run
//! let (registration, mut events) = registry.subscribe("mycc", "^transfer.*").await?;
//! while let Some(event) = events.recv().await {
//!     // ... handle event
//! }
//! registry.unregister(&registration).await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use crate::constants::EVENT_SINK_BUFFER_SIZE;
use crate::error::{ConfigError, Error};
use crate::messages::ChaincodeEvent;

/// Handle of one subscription, used to cancel it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    id: u64,
    chaincode_id: String,
    event_filter: String,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn chaincode_id(&self) -> &str {
        &self.chaincode_id
    }

    pub fn event_filter(&self) -> &str {
        &self.event_filter
    }
}

struct Subscription {
    id: u64,
    chaincode_id: String,
    event_filter: Regex,
    sink: mpsc::Sender<ChaincodeEvent>,
}

impl Subscription {
    fn matches(&self, event: &ChaincodeEvent) -> bool {
        self.chaincode_id == event.chaincode_id && self.event_filter.is_match(&event.event_name)
    }
}

#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver events of `chaincode_id` whose name matches `event_filter` to `sink`.
    pub async fn register(
        &self,
        sink: mpsc::Sender<ChaincodeEvent>,
        chaincode_id: impl Into<String>,
        event_filter: impl Into<String>,
    ) -> Result<Registration, Error> {
        let chaincode_id = chaincode_id.into();
        let event_filter = event_filter.into();
        let pattern = Regex::new(&event_filter).map_err(|source| ConfigError::InvalidEventPattern {
            pattern: event_filter.clone(),
            source,
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().await.push(Subscription {
            id,
            chaincode_id: chaincode_id.clone(),
            event_filter: pattern,
            sink,
        });
        log::debug!(
            "Registered chaincode event listener {} (chaincode: {}, filter: {})",
            id,
            chaincode_id,
            event_filter
        );

        Ok(Registration {
            id,
            chaincode_id,
            event_filter,
        })
    }

    /// [EventRegistry::register] with a fresh bounded sink, returning its receiving end.
    pub async fn subscribe(
        &self,
        chaincode_id: impl Into<String>,
        event_filter: impl Into<String>,
    ) -> Result<(Registration, mpsc::Receiver<ChaincodeEvent>), Error> {
        let (sink, receiver) = mpsc::channel(EVENT_SINK_BUFFER_SIZE);
        let registration = self.register(sink, chaincode_id, event_filter).await?;
        Ok((registration, receiver))
    }

    pub async fn unregister(&self, registration: &Registration) -> Result<(), Error> {
        let mut subscriptions = self.subscriptions.lock().await;
        let index = subscriptions
            .iter()
            .position(|s| s.id == registration.id)
            .ok_or(ConfigError::UnknownRegistration(registration.id))?;
        subscriptions.remove(index);
        log::debug!("Unregistered chaincode event listener {}", registration.id);
        Ok(())
    }

    /// Forward `event` to every matching subscription without waiting on any sink. Returns the
    /// number of sinks the event was delivered to.
    pub async fn publish(&self, event: &ChaincodeEvent) -> usize {
        let subscriptions = self.subscriptions.lock().await;
        let mut delivered = 0;
        for subscription in subscriptions.iter().filter(|s| s.matches(event)) {
            match subscription.sink.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => log::warn!(
                    "Listener {} is full, dropped event {} of transaction {}",
                    subscription.id,
                    event.event_name,
                    event.tx_id
                ),
                Err(TrySendError::Closed(_)) => log::warn!(
                    "Listener {} is closed, dropped event {} of transaction {}",
                    subscription.id,
                    event.event_name,
                    event.tx_id
                ),
            }
        }
        delivered
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn event(chaincode_id: &str, event_name: &str) -> ChaincodeEvent {
        ChaincodeEvent {
            chaincode_id: chaincode_id.to_string(),
            tx_id: "txid".to_string(),
            event_name: event_name.to_string(),
            payload: b"payload".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_delivery_by_chaincode_and_pattern() {
        let registry = EventRegistry::new();
        let (_, mut transfers) = registry.subscribe("mycc", "^transfer").await.unwrap();
        let (_, mut everything) = registry.subscribe("mycc", ".*").await.unwrap();

        assert_eq!(registry.publish(&event("mycc", "transfer")).await, 2);
        assert_eq!(registry.publish(&event("mycc", "approve")).await, 1);
        assert_eq!(registry.publish(&event("othercc", "transfer")).await, 0);

        assert_eq!(transfers.recv().await.unwrap().event_name, "transfer");
        assert!(transfers.try_recv().is_err());
        assert_eq!(everything.recv().await.unwrap().event_name, "transfer");
        assert_eq!(everything.recv().await.unwrap().event_name, "approve");
        assert!(everything.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let registry = EventRegistry::new();
        let (sink, _receiver) = mpsc::channel(1);
        let result = registry.register(sink, "mycc", "(unclosed").await;
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidEventPattern { .. }))
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_no_delivery_after_unregister() {
        let registry = EventRegistry::new();
        let (registration, mut events) = registry.subscribe("mycc", "transfer").await.unwrap();
        assert_eq!(registration.chaincode_id(), "mycc");
        assert_eq!(registration.event_filter(), "transfer");

        registry.unregister(&registration).await.unwrap();
        assert_eq!(registry.publish(&event("mycc", "transfer")).await, 0);
        assert!(events.try_recv().is_err());

        // a second cancellation of the same handle is an error
        assert!(matches!(
            registry.unregister(&registration).await,
            Err(Error::Config(ConfigError::UnknownRegistration(_)))
        ));
    }

    #[tokio::test]
    async fn test_registrations_are_unique() {
        let registry = EventRegistry::new();
        let (first, _a) = registry.subscribe("mycc", "x").await.unwrap();
        let (second, _b) = registry.subscribe("mycc", "x").await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_ne!(first, second);

        registry.unregister(&first).await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_full_or_closed_sinks_do_not_block() {
        let registry = EventRegistry::new();
        let (full_sink, _full) = mpsc::channel(1);
        let (closed_sink, closed) = mpsc::channel(1);
        drop(closed);
        registry.register(full_sink, "mycc", ".*").await.unwrap();
        registry.register(closed_sink, "mycc", ".*").await.unwrap();

        assert_eq!(registry.publish(&event("mycc", "a")).await, 1);
        // the full sink drops the event instead of waiting
        assert_eq!(registry.publish(&event("mycc", "b")).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_publish_and_unregister() {
        let registry = Arc::new(EventRegistry::new());
        let (registration, mut events) = registry.subscribe("mycc", ".*").await.unwrap();

        let publisher = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    registry.publish(&event("mycc", "tick")).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        tokio::task::yield_now().await;
        registry.unregister(&registration).await.unwrap();

        // drain what was delivered before unregistering, then nothing more may arrive
        while events.try_recv().is_ok() {}
        publisher.await.unwrap();
        assert!(events.try_recv().is_err());
    }
}
