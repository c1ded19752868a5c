// Stream registries shared between the session (writer) and the data
// receive worker (reader)
use crate::stream::{ReceiverParams, SenderParams};
use corelink_core::StreamId;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Per-receiver data handler, invoked on the data receive worker
pub trait ReceiverHandler: Send + Sync {
    fn on_message(&self, stream_id: StreamId, header: &[u8], payload: &[u8]);
}

impl<F> ReceiverHandler for F
where
    F: Fn(StreamId, &[u8], &[u8]) + Send + Sync,
{
    fn on_message(&self, stream_id: StreamId, header: &[u8], payload: &[u8]) {
        self(stream_id, header, payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderStream {
    pub params: SenderParams,
    pub stream_id: StreamId,
    pub port: Option<u16>,
    pub mtu: Option<u32>,
}

#[derive(Clone)]
pub struct ReceiverStream {
    pub params: ReceiverParams,
    pub stream_id: StreamId,
    pub port: Option<u16>,
    pub subscribed: HashSet<StreamId>,
    handler: Arc<dyn ReceiverHandler>,
}

impl ReceiverStream {
    pub fn new(
        params: ReceiverParams,
        stream_id: StreamId,
        port: Option<u16>,
        subscribed: HashSet<StreamId>,
        handler: Arc<dyn ReceiverHandler>,
    ) -> Self {
        ReceiverStream {
            params,
            stream_id,
            port,
            subscribed,
            handler,
        }
    }
}

impl fmt::Debug for ReceiverStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverStream")
            .field("params", &self.params)
            .field("stream_id", &self.stream_id)
            .field("port", &self.port)
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    senders: Vec<SenderStream>,
    receivers: Vec<ReceiverStream>,
    allowed: HashSet<StreamId>,
}

/// Known sender/receiver descriptors and the stream ids this session may
/// receive from. Entries live until the session is dropped.
#[derive(Default)]
pub struct StreamRegistry {
    inner: RwLock<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sender(&self, sender: SenderStream) {
        self.inner.write().senders.push(sender);
    }

    pub fn add_receiver(&self, receiver: ReceiverStream) {
        self.inner.write().receivers.push(receiver);
    }

    pub fn allow(&self, ids: &[StreamId]) {
        self.inner.write().allowed.extend(ids.iter().copied());
    }

    /// Remove ids from the allowed set and from every receiver's
    /// subscriptions
    pub fn revoke(&self, ids: &[StreamId]) {
        let mut inner = self.inner.write();
        for id in ids {
            inner.allowed.remove(id);
        }
        for receiver in inner.receivers.iter_mut() {
            for id in ids {
                receiver.subscribed.remove(id);
            }
        }
    }

    /// Add ids to the subscriptions of every receiver registered under
    /// `receiver_id`
    pub fn subscribe_receiver(&self, receiver_id: StreamId, ids: &[StreamId]) {
        let mut inner = self.inner.write();
        for receiver in inner.receivers.iter_mut().filter(|r| r.stream_id == receiver_id) {
            receiver.subscribed.extend(ids.iter().copied());
        }
    }

    pub fn is_allowed(&self, id: StreamId) -> bool {
        self.inner.read().allowed.contains(&id)
    }

    pub fn allowed_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.inner.read().allowed.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn sender_ids(&self) -> Vec<StreamId> {
        self.inner.read().senders.iter().map(|s| s.stream_id).collect()
    }

    pub fn receiver_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.inner.read().receivers.iter().map(|r| r.stream_id).collect();
        ids.dedup();
        ids
    }

    pub fn senders(&self) -> Vec<SenderStream> {
        self.inner.read().senders.clone()
    }

    pub fn receivers(&self) -> Vec<ReceiverStream> {
        self.inner.read().receivers.clone()
    }

    pub fn sender(&self, id: StreamId) -> Option<SenderStream> {
        self.inner.read().senders.iter().find(|s| s.stream_id == id).cloned()
    }

    /// Handlers of every receiver subscribed to `id`; empty when `id` is not
    /// allowed
    pub fn handlers_for(&self, id: StreamId) -> Vec<Arc<dyn ReceiverHandler>> {
        let inner = self.inner.read();
        if !inner.allowed.contains(&id) {
            return Vec::new();
        }
        inner
            .receivers
            .iter()
            .filter(|r| r.subscribed.contains(&id))
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }

    /// Fan a payload out to every matching receiver. Handlers run after the
    /// lock is released so they may call back into the session.
    pub fn dispatch(&self, id: StreamId, header: &[u8], payload: &[u8]) -> usize {
        let handlers = self.handlers_for(id);
        for handler in &handlers {
            handler.on_message(id, header, payload);
        }
        handlers.len()
    }
}
