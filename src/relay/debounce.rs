//! Per-connection trailing-edge debouncer.
//!
//! ```text
//!            submit                    submit (deadline reset, payload replaced)
//!   Idle ───────────────► Pending ◄──────────┐
//!    ▲                      │  └─────────────┘
//!    └──────────────────────┘
//!        deadline reached: payload handed out for broadcast
//! ```
//!
//! The debouncer owns no timer task. The connection loop waits on
//! [`Debouncer::expired`] alongside its socket and calls
//! [`Debouncer::take_due`] when it fires, so dropping the debouncer is all it
//! takes to cancel a pending broadcast.
//!
//! Time is `tokio::time::Instant`, so tests can pause and advance the clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::core::error::ValidationError;
use crate::relay::protocol::{Delta, DocId};

/// Latest accepted submission awaiting the quiet period
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBroadcast {
    /// Room the delta targets
    pub doc_id: DocId,
    /// Opaque change payload
    pub delta: Delta,
}

/// What an accepted submission did to the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Started a new burst
    Scheduled,
    /// Replaced the payload of an ongoing burst
    Coalesced,
}

#[derive(Debug)]
enum DebounceState {
    Idle,
    Pending {
        payload: PendingBroadcast,
        deadline: Instant,
    },
}

/// Coalesces bursts of submissions into one emission after `window` of quiet
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
}

/// Resolve at `deadline`, or never when there is none
pub async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Debouncer {
    /// Create an idle debouncer
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
        }
    }

    /// Configured quiet period
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept a submission, (re)starting the quiet period.
    ///
    /// Missing input is rejected without touching the current state.
    pub fn submit(
        &mut self,
        doc_id: Option<&str>,
        delta: Option<Delta>,
    ) -> Result<SubmitOutcome, ValidationError> {
        let doc_id = DocId::parse(doc_id)?;
        let delta = match delta {
            Some(delta) if !delta.is_null() => delta,
            _ => return Err(ValidationError::MissingDelta),
        };

        let outcome = match self.state {
            DebounceState::Idle => SubmitOutcome::Scheduled,
            DebounceState::Pending { .. } => SubmitOutcome::Coalesced,
        };

        self.state = DebounceState::Pending {
            payload: PendingBroadcast { doc_id, delta },
            deadline: Instant::now() + self.window,
        };

        Ok(outcome)
    }

    /// True while a payload is waiting for the quiet period to end
    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    /// When the pending payload becomes due
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            DebounceState::Pending { deadline, .. } => Some(*deadline),
            DebounceState::Idle => None,
        }
    }

    /// The payload that would be broadcast if the burst ended now
    pub fn pending(&self) -> Option<&PendingBroadcast> {
        match &self.state {
            DebounceState::Pending { payload, .. } => Some(payload),
            DebounceState::Idle => None,
        }
    }

    /// Future resolving when the current deadline passes.
    ///
    /// It does not borrow the debouncer; a later submit needs a fresh call.
    pub fn expired(&self) -> impl Future<Output = ()> {
        wait_for(self.deadline())
    }

    /// Return to idle and hand out the payload if its deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Option<PendingBroadcast> {
        match self.state {
            DebounceState::Pending { deadline, .. } if deadline <= now => self.cancel(),
            _ => None,
        }
    }

    /// Return to idle, discarding any pending payload
    pub fn cancel(&mut self) -> Option<PendingBroadcast> {
        match std::mem::replace(&mut self.state, DebounceState::Idle) {
            DebounceState::Pending { payload, .. } => Some(payload),
            DebounceState::Idle => None,
        }
    }
}
