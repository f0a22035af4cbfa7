//! Realtime change relay
//!
//! Connections join document rooms and submit deltas. Each connection
//! debounces its own submissions and, once a burst goes quiet, the latest
//! delta is fanned out to every other member of the target room.

pub mod debounce;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod session;

pub use debounce::{Debouncer, PendingBroadcast, SubmitOutcome};
pub use protocol::{ClientEvent, ConnectionId, Delta, DocId, ErrorPayload, ServerEvent};
pub use registry::{ConnectionRegistry, SendOutcome};
pub use rooms::RoomRouter;
pub use session::{Session, SessionState};
