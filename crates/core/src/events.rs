//! Client events and listener registration.
//!
//! Listeners subscribe per [`EventKind`]. The client queues events while it
//! holds its state lock and dispatches them after releasing it, so a listener
//! may call back into the client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use url::Url;

use crate::protocol::{MediaDescription, RtspMessage};

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Control connection established.
    Connected,
    /// A request was written to the wire.
    RequestSent(RtspMessage),
    /// A response was matched to a request.
    ResponseReceived {
        request: RtspMessage,
        response: RtspMessage,
    },
    /// Control connection closed and session state cleared.
    Disconnected,
    /// PLAY succeeded, for one media or (`None`) the whole session.
    Playing(Option<MediaDescription>),
    /// Playback ended, for one media or the whole session.
    Stopped(Option<MediaDescription>),
    /// PAUSE succeeded, for one media or the whole session.
    Paused(Option<MediaDescription>),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::RequestSent(_) => EventKind::RequestSent,
            ClientEvent::ResponseReceived { .. } => EventKind::ResponseReceived,
            ClientEvent::Disconnected => EventKind::Disconnected,
            ClientEvent::Playing(_) => EventKind::Playing,
            ClientEvent::Stopped(_) => EventKind::Stopped,
            ClientEvent::Paused(_) => EventKind::Paused,
        }
    }
}

/// Discriminant of [`ClientEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    RequestSent,
    ResponseReceived,
    Disconnected,
    Playing,
    Stopped,
    Paused,
}

/// The client an event came from.
#[derive(Debug, Clone)]
pub struct EventSource {
    pub location: Url,
    pub session_id: Option<String>,
}

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&EventSource, &ClientEvent) + Send + Sync>;

/// Listener lists keyed by event kind.
#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&EventSource, &ClientEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Call every listener registered for the event's kind.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside the callback.
    pub fn dispatch(&self, source: &EventSource, event: &ClientEvent) {
        let snapshot: Vec<Listener> = match self.listeners.read().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
            None => return,
        };
        for listener in snapshot {
            listener(source, event);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .listeners
            .read()
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("EventHub").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn source() -> EventSource {
        EventSource {
            location: Url::parse("rtsp://127.0.0.1/live").unwrap(),
            session_id: None,
        }
    }

    #[test]
    fn dispatches_only_to_matching_kind() {
        let hub = EventHub::new();
        let playing = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));

        let p = playing.clone();
        hub.subscribe(EventKind::Playing, move |_, _| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let s = stopped.clone();
        hub.subscribe(EventKind::Stopped, move |_, _| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        hub.dispatch(&source(), &ClientEvent::Playing(None));
        hub.dispatch(&source(), &ClientEvent::Playing(None));
        hub.dispatch(&source(), &ClientEvent::Connected);

        assert_eq!(playing.load(Ordering::SeqCst), 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = hub.subscribe(EventKind::Connected, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        hub.dispatch(&source(), &ClientEvent::Connected);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.dispatch(&source(), &ClientEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_subscribe_during_dispatch() {
        let hub = Arc::new(EventHub::new());
        let inner = hub.clone();
        hub.subscribe(EventKind::Disconnected, move |_, _| {
            inner.subscribe(EventKind::Connected, |_, _| {});
        });
        hub.dispatch(&source(), &ClientEvent::Disconnected);
    }
}
