//! Handler registry and channel-filter policy.
use log::{debug, error, trace};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::message::{InboundMessage, MessageKind};
use super::session::SessionHandle;
use crate::logutil::truncate_for_log;

/// Callback invoked for each accepted message. The handle may be used to reply.
pub type Handler = Arc<dyn Fn(&InboundMessage, &SessionHandle) + Send + Sync>;

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Named channel outside the active filter.
    Filtered,
    /// Accepted, but nothing is registered for its kind.
    NoHandler,
    Deliver,
}

#[derive(Default, Clone)]
pub struct MessageRouter {
    handlers: HashMap<MessageKind, Handler>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: MessageKind, handler: Handler) {
        if self.handlers.insert(kind.clone(), handler).is_some() {
            debug!("Replaced handler for message type: {}", kind);
        } else {
            debug!("Registered handler for message type: {}", kind);
        }
    }

    pub fn handler_for(&self, kind: &MessageKind) -> Option<Handler> {
        self.handlers.get(kind).cloned()
    }

    /// Decide what happens to `msg` under `filter`.
    ///
    /// Messages whose channel name is unknown are always accepted: indices are allocated
    /// locally and need not match the radio's own channel slots.
    pub fn route(&self, msg: &InboundMessage, filter: Option<&HashSet<String>>) -> RouteDecision {
        if let (Some(filter), Some(name)) = (filter, msg.channel_name.as_deref()) {
            if !filter.contains(name) {
                trace!("Filtered message on channel '{}' ({:?})", name, filter);
                return RouteDecision::Filtered;
            }
        }
        if self.handlers.contains_key(&msg.kind) {
            RouteDecision::Deliver
        } else {
            debug!(
                "No handler for {} message from {}: {}",
                msg.kind,
                msg.sender,
                truncate_for_log(&msg.content, 60)
            );
            RouteDecision::NoHandler
        }
    }

    /// Route `msg` and, when accepted, run its handler with `session`.
    ///
    /// A panicking handler is logged and does not propagate.
    pub fn dispatch(
        &self,
        msg: &InboundMessage,
        filter: Option<&HashSet<String>>,
        session: &SessionHandle,
    ) -> RouteDecision {
        let decision = self.route(msg, filter);
        if decision == RouteDecision::Deliver {
            if let Some(handler) = self.handlers.get(&msg.kind) {
                if catch_unwind(AssertUnwindSafe(|| handler(msg, session))).is_err() {
                    error!("Handler for {} messages panicked", msg.kind);
                }
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Arc::new(|_msg: &InboundMessage, _session: &SessionHandle| {})
    }

    fn filter(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filter_applies_to_named_channels_only() {
        let mut router = MessageRouter::new();
        router.register(MessageKind::Text, noop());
        let f = filter(&["weather"]);

        let alerts = InboundMessage::text("a", "x").on_channel(Some("alerts".into()), Some(2));
        let unnamed = InboundMessage::text("a", "x").on_channel(None, Some(3));
        let weather = InboundMessage::text("a", "x").on_channel(Some("weather".into()), Some(1));

        assert_eq!(router.route(&alerts, Some(&f)), RouteDecision::Filtered);
        assert_eq!(router.route(&unnamed, Some(&f)), RouteDecision::Deliver);
        assert_eq!(router.route(&weather, Some(&f)), RouteDecision::Deliver);
        assert_eq!(router.route(&alerts, None), RouteDecision::Deliver);
    }

    #[test]
    fn dispatch_skips_filtered_messages() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let mut router = MessageRouter::new();
        router.register(
            MessageKind::Text,
            Arc::new(move |_m: &InboundMessage, _s: &SessionHandle| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let session = SessionHandle::detached();
        let f = filter(&["weather"]);
        let alerts = InboundMessage::text("a", "x").on_channel(Some("alerts".into()), Some(2));
        let weather = InboundMessage::text("a", "x").on_channel(Some("weather".into()), Some(1));

        assert_eq!(router.dispatch(&alerts, Some(&f), &session), RouteDecision::Filtered);
        assert_eq!(router.dispatch(&weather, Some(&f), &session), RouteDecision::Deliver);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_handler_is_not_an_error() {
        let router = MessageRouter::new();
        let msg = InboundMessage::text("a", "x");
        assert_eq!(router.route(&msg, None), RouteDecision::NoHandler);
    }

    #[test]
    fn last_registration_wins() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = MessageRouter::new();
        router.register(MessageKind::Text, noop());
        let h = hits.clone();
        router.register(
            MessageKind::Text,
            Arc::new(move |_m: &InboundMessage, _s: &SessionHandle| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let handler = router.handler_for(&MessageKind::Text).unwrap();
        let session = SessionHandle::detached();
        handler(&InboundMessage::text("a", "b"), &session);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
