//! Neighbor delivery - getting one value to one neighbor.
//!
//! A [`Delivery`] is a small state machine driven by [`Delivery::run`]:
//!
//! ```text
//! Reliable:        Pending ──ack──▶ Acked
//!                     │
//!                     └──deadline──▶ Abandoned
//!
//! Fire-and-forget: Pending ──send──▶ Sent
//! ```
//!
//! In reliable mode each attempt sends a `broadcast` request and waits up to
//! `attempt_timeout` for `broadcast_ok`. A failed attempt is followed by a
//! fixed `backoff` pause. Once `deadline` has elapsed since the delivery
//! started, the neighbor is given up on. Abandonment is not an error: the
//! value may still reach that neighbor through another path in the topology.

use std::fmt;
use std::time::Duration;

use rumor_store::Value;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{NodeId, Payload};
use crate::transport::Transport;

/// Retry policy for reliable delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Overall time budget for one neighbor, measured from the first attempt.
    pub deadline: Duration,

    /// Pause between a failed attempt and the next one.
    pub backoff: Duration,

    /// How long a single attempt waits for its acknowledgment.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            backoff: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Set the overall delivery deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the pause between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the per-attempt acknowledgment timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }
}

/// How gossip reaches a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Retry until acknowledged or the policy's deadline elapses.
    Reliable(RetryPolicy),
    /// Send once, expect nothing back. A lost message is never resent.
    FireAndForget,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        Self::Reliable(RetryPolicy::default())
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable(_) => write!(f, "reliable"),
            Self::FireAndForget => write!(f, "fire-and-forget"),
        }
    }
}

/// State of a neighbor delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Not yet acknowledged; attempts may still be made.
    Pending,
    /// The neighbor acknowledged the value.
    Acked,
    /// The deadline elapsed without an acknowledgment.
    Abandoned,
    /// Sent once in fire-and-forget mode.
    Sent,
}

impl DeliveryState {
    /// Whether no further attempts will be made.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Acked => write!(f, "Acked"),
            Self::Abandoned => write!(f, "Abandoned"),
            Self::Sent => write!(f, "Sent"),
        }
    }
}

/// Outcome of a finished delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub neighbor: NodeId,
    pub value: Value,
    pub state: DeliveryState,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Delivery of one value to one neighbor.
#[derive(Debug)]
pub struct Delivery {
    neighbor: NodeId,
    value: Value,
    mode: DeliveryMode,
    state: DeliveryState,
    attempts: u32,
    started_at: Instant,
}

impl Delivery {
    /// Create a pending delivery. The deadline clock starts now.
    #[must_use]
    pub fn new(neighbor: NodeId, value: Value, mode: DeliveryMode) -> Self {
        Self {
            neighbor,
            value,
            mode,
            state: DeliveryState::Pending,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> DeliveryState {
        self.state
    }

    /// Get the number of send attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Get elapsed time since the delivery was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get remaining time until the deadline, if the mode has one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        match self.mode {
            DeliveryMode::Reliable(policy) => Some(policy.deadline.saturating_sub(self.elapsed())),
            DeliveryMode::FireAndForget => None,
        }
    }

    /// Check if the deadline has passed.
    #[must_use]
    pub fn has_timed_out(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Drive the delivery to a terminal state.
    pub async fn run<T: Transport + ?Sized>(mut self, transport: &T) -> DeliveryReport {
        match self.mode {
            DeliveryMode::Reliable(policy) => self.run_reliable(transport, policy).await,
            DeliveryMode::FireAndForget => self.run_once(transport).await,
        }
        self.report()
    }

    async fn run_once<T: Transport + ?Sized>(&mut self, transport: &T) {
        self.attempts = 1;
        let payload = Payload::Broadcast { message: self.value };
        match transport.send(&self.neighbor, payload).await {
            Ok(()) => self.state = DeliveryState::Sent,
            Err(e) => {
                warn!(neighbor = %self.neighbor, value = self.value, error = %e, "Gossip send failed");
                self.state = DeliveryState::Abandoned;
            }
        }
    }

    async fn run_reliable<T: Transport + ?Sized>(&mut self, transport: &T, policy: RetryPolicy) {
        loop {
            let Some(remaining) = self.remaining().filter(|r| !r.is_zero()) else {
                self.abandon();
                return;
            };

            self.attempts += 1;
            let wait = policy.attempt_timeout.min(remaining);
            let request = transport.rpc(&self.neighbor, Payload::Broadcast { message: self.value });

            match timeout(wait, request).await {
                Ok(Ok(reply)) => match check_ack(&self.neighbor, reply) {
                    Ok(()) => {
                        self.state = DeliveryState::Acked;
                        debug!(
                            neighbor = %self.neighbor,
                            value = self.value,
                            attempts = self.attempts,
                            "Gossip acknowledged"
                        );
                        return;
                    }
                    Err(e) => debug!(neighbor = %self.neighbor, error = %e, "Gossip attempt rejected"),
                },
                Ok(Err(e)) => debug!(neighbor = %self.neighbor, error = %e, "Gossip attempt failed"),
                Err(_) => trace!(
                    neighbor = %self.neighbor,
                    value = self.value,
                    attempt = self.attempts,
                    "Gossip attempt timed out"
                ),
            }

            if let Some(remaining) = self.remaining().filter(|r| !r.is_zero()) {
                sleep(policy.backoff.min(remaining)).await;
            }
        }
    }

    fn abandon(&mut self) {
        if self.state == DeliveryState::Pending {
            warn!(
                neighbor = %self.neighbor,
                value = self.value,
                attempts = self.attempts,
                "Abandoning gossip delivery after deadline"
            );
            self.state = DeliveryState::Abandoned;
        }
    }

    fn report(&self) -> DeliveryReport {
        DeliveryReport {
            neighbor: self.neighbor.clone(),
            value: self.value,
            state: self.state,
            attempts: self.attempts,
            elapsed: self.elapsed(),
        }
    }
}

fn check_ack(neighbor: &str, reply: Payload) -> Result<()> {
    match reply {
        Payload::BroadcastOk => Ok(()),
        Payload::Error { code, text } => Err(Error::Rejected {
            dest: neighbor.to_string(),
            code,
            text,
        }),
        other => Err(Error::UnexpectedReply {
            expected: "broadcast_ok",
            actual: other.type_name().to_string(),
        }),
    }
}
