//! Room routing: document id → member connections.
//!
//! The router owns membership outright and is the only place it changes.
//! Fan-out goes to every member of the target room except the origin; the
//! frame is encoded once and shared between recipients.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::relay::protocol::{require_delta, ConnectionId, Delta, DocId, ServerEvent};
use crate::relay::registry::{ConnectionRegistry, SendOutcome};
use crate::system::metrics::RelayMetrics;

/// Maps document identifiers to the connections subscribed to them
pub struct RoomRouter {
    rooms: RwLock<HashMap<DocId, HashSet<ConnectionId>>>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    reclaim_empty: bool,
}

impl RoomRouter {
    /// Create a router delivering through `registry`
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        reclaim_empty: bool,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            registry,
            metrics,
            reclaim_empty,
        }
    }

    /// Add a connection to a room and acknowledge it with `joined`.
    ///
    /// Joining a room twice is a no-op apart from the second acknowledgment.
    /// A missing or empty `doc_id` adds nothing and returns a validation error.
    pub fn join(&self, conn: &ConnectionId, doc_id: Option<&str>) -> Result<DocId> {
        let doc_id = match DocId::parse(doc_id) {
            Ok(doc_id) => doc_id,
            Err(e) => {
                self.metrics.flow.join_failures.inc();
                return Err(e.into());
            }
        };

        let newly_joined = self
            .rooms
            .write()
            .entry(doc_id.clone())
            .or_default()
            .insert(*conn);

        self.metrics.flow.joins.inc();
        info!(conn_id = %conn, doc_id = %doc_id, newly_joined, "connection joined document");

        if self.registry.emit(conn, &ServerEvent::joined(&doc_id))? != SendOutcome::Delivered {
            warn!(conn_id = %conn, doc_id = %doc_id, "join acknowledgment not delivered");
        }

        Ok(doc_id)
    }

    /// Remove a connection from a room and acknowledge it with `left`.
    ///
    /// Returns whether the connection was a member.
    pub fn leave(&self, conn: &ConnectionId, doc_id: Option<&str>) -> Result<bool> {
        let doc_id = DocId::parse(doc_id)?;
        let was_member = self.remove_member(conn, &doc_id);

        info!(conn_id = %conn, doc_id = %doc_id, was_member, "connection left document");
        self.registry.emit(conn, &ServerEvent::left(&doc_id))?;

        Ok(was_member)
    }

    /// Remove a connection from every room it belongs to
    pub fn leave_all(&self, conn: &ConnectionId) -> Vec<DocId> {
        let mut rooms = self.rooms.write();
        let mut left = Vec::new();

        for (doc_id, members) in rooms.iter_mut() {
            if members.remove(conn) {
                left.push(doc_id.clone());
            }
        }

        if self.reclaim_empty {
            rooms.retain(|_, members| !members.is_empty());
        }

        debug!(conn_id = %conn, rooms = left.len(), "connection released from rooms");
        left
    }

    /// Deliver `delta` as `receive-changes` to every other member of `doc_id`.
    ///
    /// Returns the number of members the frame was queued for. An unknown or
    /// empty room is a silent no-op.
    pub fn broadcast(&self, origin: &ConnectionId, doc_id: &str, delta: &Delta) -> Result<usize> {
        let doc_id = DocId::parse(Some(doc_id))?;
        let delta = require_delta(Some(delta))?;

        let recipients: Vec<ConnectionId> = match self.rooms.read().get(&doc_id) {
            Some(members) => members.iter().filter(|id| *id != origin).copied().collect(),
            None => Vec::new(),
        };

        if recipients.is_empty() {
            debug!(conn_id = %origin, doc_id = %doc_id, "no other members to receive changes");
            return Ok(0);
        }

        let frame = ServerEvent::ReceiveChanges(delta.clone()).encode()?;
        let mut delivered = 0usize;

        for recipient in &recipients {
            match self.registry.send(recipient, Arc::clone(&frame)) {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::Dropped => {
                    self.metrics.flow.dropped_deliveries.inc();
                    warn!(
                        conn_id = %recipient,
                        doc_id = %doc_id,
                        total_drops = self.registry.drop_count(recipient),
                        "outbound queue full, changes dropped"
                    );
                }
                SendOutcome::Closed => {
                    self.metrics.flow.dropped_deliveries.inc();
                    debug!(conn_id = %recipient, doc_id = %doc_id, "recipient already closed");
                }
            }
        }

        self.metrics.flow.broadcasts.inc();
        self.metrics.flow.deliveries.inc_by(delivered as u64);
        info!(
            conn_id = %origin,
            doc_id = %doc_id,
            recipients = recipients.len(),
            delivered,
            "broadcast changes"
        );

        Ok(delivered)
    }

    /// Current members of a room
    pub fn members(&self, doc_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .get(doc_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check whether a connection belongs to a room
    pub fn is_member(&self, conn: &ConnectionId, doc_id: &str) -> bool {
        self.rooms
            .read()
            .get(doc_id)
            .is_some_and(|members| members.contains(conn))
    }

    /// Rooms a connection currently belongs to
    pub fn rooms_of(&self, conn: &ConnectionId) -> Vec<DocId> {
        self.rooms
            .read()
            .iter()
            .filter(|(_, members)| members.contains(conn))
            .map(|(doc_id, _)| doc_id.clone())
            .collect()
    }

    /// Number of rooms currently tracked, including retained empty ones
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    fn remove_member(&self, conn: &ConnectionId, doc_id: &DocId) -> bool {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(doc_id) else {
            return false;
        };

        let removed = members.remove(conn);
        if self.reclaim_empty && members.is_empty() {
            rooms.remove(doc_id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{Error, ValidationError};
    use crate::relay::protocol::{OutboundFrame, ServerEvent};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup(reclaim_empty: bool) -> (RoomRouter, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        (
            RoomRouter::new(registry.clone(), metrics, reclaim_empty),
            registry,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(ServerEvent::decode(&frame).unwrap());
        }
        events
    }

    #[test]
    fn test_join_acknowledges_and_adds_member() {
        let (router, registry) = setup(true);
        let (a, mut rx_a) = registry.register();

        let doc_id = router.join(&a, Some("doc1")).unwrap();
        assert_eq!(doc_id.as_str(), "doc1");
        assert!(router.is_member(&a, "doc1"));
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::Joined("Successfully joined doc: doc1".to_string())]
        );
    }

    #[test]
    fn test_join_is_idempotent() {
        let (router, registry) = setup(true);
        let (a, _rx) = registry.register();

        router.join(&a, Some("doc1")).unwrap();
        router.join(&a, Some("doc1")).unwrap();
        assert_eq!(router.members("doc1"), vec![a]);
        assert_eq!(router.room_count(), 1);
    }

    #[test]
    fn test_join_without_doc_id_adds_nothing() {
        let (router, registry) = setup(true);
        let (a, mut rx_a) = registry.register();

        for input in [None, Some("")] {
            let err = router.join(&a, input).unwrap_err();
            assert!(matches!(err, Error::Validation(ValidationError::MissingDocId)));
        }
        assert_eq!(router.room_count(), 0);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender_and_other_rooms() {
        let (router, registry) = setup(true);
        let (a, mut rx_a) = registry.register();
        let (b, mut rx_b) = registry.register();
        let (c, mut rx_c) = registry.register();

        router.join(&a, Some("doc1")).unwrap();
        router.join(&b, Some("doc1")).unwrap();
        router.join(&c, Some("doc2")).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let delivered = router.broadcast(&a, "doc1", &json!("x")).unwrap();
        assert_eq!(delivered, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveChanges(json!("x"))]);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_broadcast_to_sender_only_room_delivers_nothing() {
        let (router, registry) = setup(true);
        let (a, mut rx_a) = registry.register();
        router.join(&a, Some("doc1")).unwrap();
        router.join(&a, Some("doc1")).unwrap();
        drain(&mut rx_a);

        assert_eq!(router.broadcast(&a, "doc1", &json!({"k": 1})).unwrap(), 0);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_broadcast_to_unknown_room_is_noop() {
        let (router, registry) = setup(true);
        let (a, _rx) = registry.register();
        assert_eq!(router.broadcast(&a, "nowhere", &json!(1)).unwrap(), 0);
    }

    #[test]
    fn test_broadcast_validates_inputs() {
        let (router, registry) = setup(true);
        let (a, _rx) = registry.register();

        assert!(matches!(
            router.broadcast(&a, "", &json!(1)),
            Err(Error::Validation(ValidationError::MissingDocId))
        ));
        assert!(matches!(
            router.broadcast(&a, "doc1", &serde_json::Value::Null),
            Err(Error::Validation(ValidationError::MissingDelta))
        ));
    }

    #[test]
    fn test_leave_all_reclaims_empty_rooms() {
        let (router, registry) = setup(true);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();

        router.join(&a, Some("doc1")).unwrap();
        router.join(&a, Some("doc2")).unwrap();
        router.join(&b, Some("doc2")).unwrap();

        let mut left = router.leave_all(&a);
        left.sort();
        assert_eq!(left.len(), 2);
        assert!(router.rooms_of(&a).is_empty());
        assert_eq!(router.room_count(), 1);
        assert_eq!(router.members("doc2"), vec![b]);
    }

    #[test]
    fn test_leave_all_retains_empty_rooms_when_configured() {
        let (router, registry) = setup(false);
        let (a, _rx) = registry.register();

        router.join(&a, Some("doc1")).unwrap();
        router.leave_all(&a);
        assert_eq!(router.room_count(), 1);
        assert!(router.members("doc1").is_empty());
    }

    #[test]
    fn test_leave_single_room() {
        let (router, registry) = setup(true);
        let (a, mut rx_a) = registry.register();

        router.join(&a, Some("doc1")).unwrap();
        drain(&mut rx_a);

        assert!(router.leave(&a, Some("doc1")).unwrap());
        assert!(!router.leave(&a, Some("doc1")).unwrap());
        assert_eq!(router.room_count(), 0);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerEvent::Left("Successfully left doc: doc1".to_string()),
                ServerEvent::Left("Successfully left doc: doc1".to_string()),
            ]
        );
    }
}
