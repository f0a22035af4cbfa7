//! Per-connection session state machine.
//!
//! ```text
//!   Connected ──join-doc──► Joined(rooms) ──close──► Disconnected
//!       └───────────────────────close────────────────────┘
//! ```
//!
//! A session is driven by exactly one connection task, so it needs no
//! locking of its own. It validates client events, feeds `send-changes`
//! into its debouncer and hands due payloads to the room router. Closing
//! cancels whatever the debouncer still holds.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::app_state::AppState;
use crate::core::error::{Error, Result};
use crate::relay::debounce::{Debouncer, SubmitOutcome};
use crate::relay::protocol::{
    ClientEvent, ConnectionId, Delta, DocId, ErrorPayload, OutboundFrame, ServerEvent,
};
use crate::relay::registry::{ConnectionRegistry, SendOutcome};
use crate::relay::rooms::RoomRouter;
use crate::system::metrics::RelayMetrics;

/// Lifecycle of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Open, member of no room
    Connected,
    /// Member of at least one room
    Joined(BTreeSet<DocId>),
    /// Closed; every further event is ignored
    Disconnected,
}

/// One client connection's view of the relay
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    debouncer: Debouncer,
    router: Arc<RoomRouter>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl Session {
    /// Register a new connection with the relay
    pub fn open(state: &Arc<AppState>) -> (Self, mpsc::Receiver<OutboundFrame>) {
        Self::new(
            Arc::clone(&state.registry),
            Arc::clone(&state.rooms),
            Arc::clone(&state.metrics),
            state.config.relay.debounce_window(),
        )
    }

    /// Register a new connection against explicit collaborators
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        metrics: Arc<RelayMetrics>,
        window: Duration,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (id, outbound) = registry.register();
        metrics.connection_opened();
        info!(conn_id = %id, "connection opened");

        let session = Self {
            id,
            state: SessionState::Connected,
            debouncer: Debouncer::new(window),
            router,
            registry,
            metrics,
        };
        (session, outbound)
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// When the pending broadcast becomes due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Decode and handle one text frame.
    ///
    /// Undecodable frames are logged and otherwise ignored.
    pub fn handle_frame(&mut self, text: &str) {
        match ClientEvent::decode(text) {
            Ok(event) => self.handle(event),
            Err(e) => warn!(conn_id = %self.id, error = %e, "ignoring undecodable frame"),
        }
    }

    /// Handle one decoded client event
    pub fn handle(&mut self, event: ClientEvent) {
        if self.state == SessionState::Disconnected {
            debug!(conn_id = %self.id, event = event.name(), "event after disconnect ignored");
            return;
        }

        match event {
            ClientEvent::JoinDoc { doc_id } => self.join(doc_id.as_deref()),
            ClientEvent::LeaveDoc { doc_id } => self.leave(doc_id.as_deref()),
            ClientEvent::SendChanges { doc_id, delta } => {
                self.send_changes(doc_id.as_deref(), delta)
            }
            ClientEvent::Unknown { event } => {
                debug!(conn_id = %self.id, event = %event, "unknown event ignored");
            }
        }
    }

    fn join(&mut self, doc_id: Option<&str>) {
        match self.router.join(&self.id, doc_id) {
            Ok(doc_id) => match &mut self.state {
                SessionState::Joined(rooms) => {
                    rooms.insert(doc_id);
                }
                state => *state = SessionState::Joined(BTreeSet::from([doc_id])),
            },
            Err(e) => self.reject("join-doc", &e, ErrorPayload::join_failed()),
        }
    }

    fn leave(&mut self, doc_id: Option<&str>) {
        match self.router.leave(&self.id, doc_id) {
            Ok(_) => {
                if let SessionState::Joined(rooms) = &mut self.state {
                    if let Some(doc_id) = doc_id {
                        rooms.remove(doc_id);
                    }
                    if rooms.is_empty() {
                        self.state = SessionState::Connected;
                    }
                }
            }
            Err(e) => self.reject("leave-doc", &e, ErrorPayload::leave_failed()),
        }
    }

    fn send_changes(&mut self, doc_id: Option<&str>, delta: Option<Delta>) {
        match self.debouncer.submit(doc_id, delta) {
            Ok(outcome) => {
                self.metrics.flow.deltas_received.inc();
                if outcome == SubmitOutcome::Coalesced {
                    self.metrics.flow.deltas_coalesced.inc();
                }
                debug!(conn_id = %self.id, ?outcome, "changes queued");
            }
            Err(e) => self.reject("send-changes", &Error::from(e), ErrorPayload::send_failed()),
        }
    }

    fn reject(&self, event: &str, cause: &Error, payload: ErrorPayload) {
        if matches!(cause, Error::Validation(_)) {
            self.metrics.flow.validation_errors.inc();
        }
        error!(conn_id = %self.id, event, error = %cause, "{}", payload.message);

        match self.registry.emit(&self.id, &ServerEvent::Error(payload)) {
            Ok(SendOutcome::Delivered) => {}
            Ok(outcome) => {
                self.metrics.flow.dropped_deliveries.inc();
                warn!(
                    conn_id = %self.id,
                    event,
                    ?outcome,
                    total_drops = self.registry.drop_count(&self.id),
                    "error event not delivered"
                );
            }
            Err(e) => warn!(conn_id = %self.id, error = %e, "failed to queue error event"),
        }
    }

    /// Broadcast the pending payload if its quiet period is over.
    ///
    /// Returns the number of members it was queued for.
    pub fn flush_due(&mut self) -> Result<usize> {
        match self.debouncer.take_due(Instant::now()) {
            Some(due) => self.router.broadcast(&self.id, due.doc_id.as_str(), &due.delta),
            None => Ok(0),
        }
    }

    /// Record a fault on the underlying channel
    pub fn transport_error(&self, cause: &dyn Display) {
        error!(conn_id = %self.id, error = %cause, "transport error");
    }

    /// Tear the session down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;

        if self.debouncer.cancel().is_some() {
            debug!(conn_id = %self.id, "pending changes discarded on disconnect");
        }
        let rooms = self.router.leave_all(&self.id);
        self.registry.unregister(&self.id);
        self.metrics.connection_closed();

        info!(conn_id = %self.id, rooms = rooms.len(), "connection closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::advance;

    const W: Duration = Duration::from_millis(500);

    struct Relay {
        registry: Arc<ConnectionRegistry>,
        router: Arc<RoomRouter>,
        metrics: Arc<RelayMetrics>,
    }

    impl Relay {
        fn new() -> Self {
            Self::with_buffer(16)
        }

        fn with_buffer(buffer: usize) -> Self {
            let registry = Arc::new(ConnectionRegistry::new(buffer));
            let metrics = Arc::new(RelayMetrics::new().unwrap());
            let router = Arc::new(RoomRouter::new(registry.clone(), metrics.clone(), true));
            Self {
                registry,
                router,
                metrics,
            }
        }

        fn connect(&self) -> (Session, mpsc::Receiver<OutboundFrame>) {
            Session::new(
                self.registry.clone(),
                self.router.clone(),
                self.metrics.clone(),
                W,
            )
        }
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(ServerEvent::decode(&frame).unwrap());
        }
        events
    }

    fn join(doc: &str) -> ClientEvent {
        ClientEvent::JoinDoc {
            doc_id: Some(doc.to_string()),
        }
    }

    fn send(doc: &str, delta: serde_json::Value) -> ClientEvent {
        ClientEvent::SendChanges {
            doc_id: Some(doc.to_string()),
            delta: Some(delta),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_transitions_state() {
        let relay = Relay::new();
        let (mut a, mut rx_a) = relay.connect();
        assert_eq!(a.state(), &SessionState::Connected);

        a.handle(join("doc1"));
        a.handle(join("doc2"));
        match a.state() {
            SessionState::Joined(rooms) => assert_eq!(rooms.len(), 2),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(drain(&mut rx_a).len(), 2);

        a.handle(ClientEvent::LeaveDoc {
            doc_id: Some("doc1".to_string()),
        });
        a.handle(ClientEvent::LeaveDoc {
            doc_id: Some("doc2".to_string()),
        });
        assert_eq!(a.state(), &SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_events_emit_error_messages() {
        let relay = Relay::new();
        let (mut a, mut rx_a) = relay.connect();

        a.handle(ClientEvent::JoinDoc { doc_id: None });
        a.handle(ClientEvent::LeaveDoc { doc_id: None });
        a.handle(ClientEvent::SendChanges {
            doc_id: Some("doc1".to_string()),
            delta: None,
        });

        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerEvent::Error(ErrorPayload::join_failed()),
                ServerEvent::Error(ErrorPayload::leave_failed()),
                ServerEvent::Error(ErrorPayload::send_failed()),
            ]
        );
        assert_eq!(a.state(), &SessionState::Connected);
        assert_eq!(relay.metrics.flow.validation_errors.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_lost_on_full_queue_is_counted() {
        let relay = Relay::with_buffer(1);
        let (mut a, mut rx_a) = relay.connect();

        a.handle(ClientEvent::JoinDoc { doc_id: None });
        a.handle(ClientEvent::JoinDoc { doc_id: None });

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::Error(ErrorPayload::join_failed())]
        );
        assert_eq!(relay.registry.drop_count(&a.id()), 1);
        assert_eq!(relay.metrics.flow.dropped_deliveries.get(), 1);
        assert_eq!(relay.metrics.flow.validation_errors.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_broadcasts_last_delta_after_quiet_period() {
        let relay = Relay::new();
        let (mut a, mut rx_a) = relay.connect();
        let (mut b, mut rx_b) = relay.connect();
        a.handle(join("doc1"));
        b.handle(join("doc1"));
        drain(&mut rx_a);
        drain(&mut rx_b);

        a.handle(send("doc1", json!("x1")));
        advance(Duration::from_millis(100)).await;
        a.handle(send("doc1", json!("x2")));
        advance(Duration::from_millis(100)).await;
        a.handle(send("doc1", json!("x3")));

        advance(W - Duration::from_millis(1)).await;
        assert_eq!(a.flush_due().unwrap(), 0);
        assert!(drain(&mut rx_b).is_empty());

        advance(Duration::from_millis(1)).await;
        assert_eq!(a.flush_due().unwrap(), 1);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveChanges(json!("x3"))]);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(relay.metrics.flow.deltas_received.get(), 3);
        assert_eq!(relay.metrics.flow.deltas_coalesced.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_joining_still_broadcasts() {
        let relay = Relay::new();
        let (mut a, _rx_a) = relay.connect();
        let (mut b, mut rx_b) = relay.connect();
        b.handle(join("doc1"));
        drain(&mut rx_b);

        a.handle(send("doc1", json!({"ops": []})));
        advance(W).await;
        assert_eq!(a.flush_due().unwrap(), 1);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveChanges(json!({"ops": []}))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_and_releases_rooms() {
        let relay = Relay::new();
        let (mut a, _rx_a) = relay.connect();
        let (mut b, mut rx_b) = relay.connect();
        a.handle(join("doc1"));
        b.handle(join("doc1"));
        drain(&mut rx_b);

        a.handle(send("doc1", json!("x")));
        a.close();
        a.close();
        advance(W).await;

        assert_eq!(a.flush_due().unwrap(), 0);
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(relay.router.members("doc1"), vec![b.id()]);
        assert!(!relay.registry.contains(&a.id()));
        assert_eq!(relay.metrics.connections.closed.get(), 1);

        a.handle(join("doc2"));
        assert_eq!(a.state(), &SessionState::Disconnected);
        assert_eq!(relay.router.room_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_then_close_releases_everything() {
        let relay = Relay::new();
        let (mut a, _rx_a) = relay.connect();
        a.handle(join("doc1"));
        a.handle(send("doc1", json!("x")));

        a.transport_error(&"connection reset without closing handshake");
        a.close();

        assert_eq!(a.state(), &SessionState::Disconnected);
        assert!(a.deadline().is_none());
        assert!(relay.registry.is_empty());
        assert_eq!(relay.router.room_count(), 0);
        assert_eq!(relay.metrics.connections.active.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_session() {
        let relay = Relay::new();
        let (mut a, _rx_a) = relay.connect();
        a.handle(join("doc1"));
        let id = a.id();

        drop(a);
        assert!(!relay.registry.contains(&id));
        assert_eq!(relay.router.room_count(), 0);
        assert_eq!(relay.metrics.connections.active.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_frame_is_ignored() {
        let relay = Relay::new();
        let (mut a, mut rx_a) = relay.connect();

        a.handle_frame("{not json");
        a.handle_frame(r#"{"event":"cursor","data":1}"#);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(a.state(), &SessionState::Connected);
    }
}
