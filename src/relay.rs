//! Broadcast relay: fans every message out to every attached endpoint.
//!
//! The relay is an explicitly owned tokio task. Attach requests and messages
//! share a single inbox, so the relay sees them on one sequential timeline
//! and fans each message out before looking at the next event. Messages are
//! forwarded unmodified to all current attachments, the sender included.
//! Endpoints whose receiver has gone away are pruned the next time a
//! delivery to them fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::levels::{Envelope, Payload, SenderId};

#[derive(Debug, Error, PartialEq)]
pub enum RelayError {
    #[error("relay has shut down")]
    Closed,
}

/// Events consumed by the relay task.
pub(crate) enum RelayEvent {
    Attach {
        id: SenderId,
        endpoint: mpsc::UnboundedSender<Envelope>,
    },
    Message(Envelope),
    Census(oneshot::Sender<usize>),
    Shutdown,
}

/// Owner of a running relay. Dropping it shuts the relay down.
pub struct Relay {
    handle: RelayHandle,
    task: Option<JoinHandle<()>>,
}

impl Relay {
    /// Start a relay task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (inbox, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(events));
        info!("Relay started");
        Self {
            handle: RelayHandle {
                inbox,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            task: Some(task),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Stop the relay and wait for it to finish. Attached receivers see the
    /// end of their stream.
    pub async fn shutdown(mut self) {
        let _ = self.handle.inbox.send(RelayEvent::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.inbox.send(RelayEvent::Shutdown);
        }
    }
}

/// Cheap, cloneable access to a relay.
#[derive(Clone)]
pub struct RelayHandle {
    inbox: mpsc::UnboundedSender<RelayEvent>,
    next_id: Arc<AtomicU64>,
}

impl RelayHandle {
    /// Register a new endpoint. Attachers are neither validated nor deduplicated.
    pub fn attach(&self) -> Result<Attachment, RelayError> {
        let id = SenderId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (endpoint, inbound) = mpsc::unbounded_channel();
        self.inbox
            .send(RelayEvent::Attach { id, endpoint })
            .map_err(|_| RelayError::Closed)?;
        Ok(Attachment {
            publisher: Publisher {
                id,
                inbox: self.inbox.clone(),
            },
            subscription: Subscription { id, inbound },
        })
    }

    /// Number of attachments still registered. Endpoints leave only when a
    /// delivery to them fails, so a dropped receiver is counted until then.
    pub async fn attachment_count(&self) -> Result<usize, RelayError> {
        let (reply, count) = oneshot::channel();
        self.inbox
            .send(RelayEvent::Census(reply))
            .map_err(|_| RelayError::Closed)?;
        count.await.map_err(|_| RelayError::Closed)
    }
}

/// A bidirectional channel to the relay.
pub struct Attachment {
    publisher: Publisher,
    subscription: Subscription,
}

impl Attachment {
    pub(crate) fn from_parts(publisher: Publisher, subscription: Subscription) -> Self {
        Self {
            publisher,
            subscription,
        }
    }

    pub fn id(&self) -> SenderId {
        self.publisher.id
    }

    pub fn publish(&self, payload: Payload) -> Result<(), RelayError> {
        self.publisher.publish(payload)
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.subscription.recv().await
    }

    /// Separate the sending and receiving halves. Dropping the subscription
    /// detaches the endpoint from fan-out while the publisher keeps working.
    pub fn split(self) -> (Publisher, Subscription) {
        (self.publisher, self.subscription)
    }
}

/// Sending half of an attachment.
#[derive(Clone)]
pub struct Publisher {
    id: SenderId,
    inbox: mpsc::UnboundedSender<RelayEvent>,
}

impl Publisher {
    pub(crate) fn new(id: SenderId, inbox: mpsc::UnboundedSender<RelayEvent>) -> Self {
        Self { id, inbox }
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    /// Non-blocking send.
    pub fn publish(&self, payload: Payload) -> Result<(), RelayError> {
        self.inbox
            .send(RelayEvent::Message(Envelope {
                sender: self.id,
                payload,
            }))
            .map_err(|_| RelayError::Closed)
    }
}

/// Receiving half of an attachment.
pub struct Subscription {
    id: SenderId,
    inbound: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub(crate) fn new(id: SenderId, inbound: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { id, inbound }
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }
}

struct Endpoint {
    id: SenderId,
    tx: mpsc::UnboundedSender<Envelope>,
}

async fn run(mut events: mpsc::UnboundedReceiver<RelayEvent>) {
    let mut endpoints: Vec<Endpoint> = Vec::new();

    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Attach { id, endpoint } => {
                debug!("Endpoint {} attached", id);
                endpoints.push(Endpoint { id, tx: endpoint });
            }
            RelayEvent::Message(envelope) => {
                trace!("Fanning out message from {}", envelope.sender);
                fan_out(&mut endpoints, envelope);
            }
            RelayEvent::Census(reply) => {
                let _ = reply.send(endpoints.len());
            }
            RelayEvent::Shutdown => break,
        }
    }

    info!("Relay stopped with {} endpoints attached", endpoints.len());
}

fn fan_out(endpoints: &mut Vec<Endpoint>, envelope: Envelope) {
    endpoints.retain(|ep| match ep.tx.send(envelope) {
        Ok(()) => true,
        Err(_) => {
            debug!("Endpoint {} detached", ep.id);
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::LevelSummary;
    use std::time::Duration;
    use tokio::time::timeout;

    const STEP: Duration = Duration::from_secs(1);

    fn levels(instant: f32) -> Payload {
        Payload::Levels(LevelSummary::new(instant, instant - 3.0, instant + 1.0))
    }

    #[tokio::test]
    async fn every_attachment_receives_an_identical_copy() {
        let relay = Relay::spawn();
        let handle = relay.handle();
        let mut attachments: Vec<Attachment> = (0..4).map(|_| handle.attach().unwrap()).collect();

        let sender = attachments[2].id();
        attachments[2].publish(levels(-6.0)).unwrap();

        for attachment in attachments.iter_mut() {
            let envelope = timeout(STEP, attachment.recv()).await.unwrap().unwrap();
            assert_eq!(envelope.sender, sender);
            assert_eq!(envelope.payload, levels(-6.0));
        }
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn sender_receives_its_own_message_back() {
        // Self-echo is the observed behavior and is kept deliberately.
        let relay = Relay::spawn();
        let mut only = relay.handle().attach().unwrap();
        only.publish(Payload::Silence).unwrap();

        let echo = timeout(STEP, only.recv()).await.unwrap().unwrap();
        assert_eq!(echo.sender, only.id());
        assert_eq!(echo.payload, Payload::Silence);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn detached_endpoint_misses_later_messages_without_errors() {
        let relay = Relay::spawn();
        let handle = relay.handle();
        let mut a = handle.attach().unwrap();
        let b = handle.attach().unwrap();
        let mut c = handle.attach().unwrap();
        assert_eq!(handle.attachment_count().await.unwrap(), 3);

        drop(b);
        // Still counted until a delivery to it fails.
        assert_eq!(handle.attachment_count().await.unwrap(), 3);
        a.publish(levels(-12.0)).unwrap();

        for attachment in [&mut a, &mut c] {
            let envelope = timeout(STEP, attachment.recv()).await.unwrap().unwrap();
            assert_eq!(envelope.payload, levels(-12.0));
        }
        assert_eq!(handle.attachment_count().await.unwrap(), 2);

        // The relay keeps working for the remaining endpoints.
        c.publish(levels(-1.0)).unwrap();
        assert_eq!(timeout(STEP, a.recv()).await.unwrap().unwrap().payload, levels(-1.0));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn order_is_preserved_per_sender() {
        let relay = Relay::spawn();
        let handle = relay.handle();
        let producer = handle.attach().unwrap();
        let mut viewer = handle.attach().unwrap();

        for i in 0..50 {
            producer.publish(levels(-(i as f32))).unwrap();
        }
        for i in 0..50 {
            let envelope = timeout(STEP, viewer.recv()).await.unwrap().unwrap();
            assert_eq!(envelope.payload, levels(-(i as f32)));
        }
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn publisher_without_subscription_is_pruned_but_can_still_send() {
        let relay = Relay::spawn();
        let handle = relay.handle();
        let (publisher, subscription) = handle.attach().unwrap().split();
        drop(subscription);
        let mut viewer = handle.attach().unwrap();

        publisher.publish(levels(-20.0)).unwrap();
        let envelope = timeout(STEP, viewer.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.sender, publisher.id());
        assert_eq!(handle.attachment_count().await.unwrap(), 1);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_ends_every_stream() {
        let relay = Relay::spawn();
        let handle = relay.handle();
        let mut viewer = handle.attach().unwrap();
        relay.shutdown().await;

        assert_eq!(timeout(STEP, viewer.recv()).await.unwrap(), None);
        assert_eq!(viewer.publish(Payload::Silence), Err(RelayError::Closed));
        assert!(handle.attach().is_err());
    }

    #[tokio::test]
    async fn relays_are_isolated_from_each_other() {
        let first = Relay::spawn();
        let second = Relay::spawn();
        let a = first.handle().attach().unwrap();
        let mut b = second.handle().attach().unwrap();

        a.publish(levels(0.0)).unwrap();
        assert!(timeout(Duration::from_millis(50), b.recv()).await.is_err());
        first.shutdown().await;
        second.shutdown().await;
    }
}
