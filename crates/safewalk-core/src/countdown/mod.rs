//! Alert countdown state machine.
//!
//! ```text
//!             arm()                    tick, remaining == 0
//!   Idle ─────────────────► Armed ─────────────────────────► Firing
//!    ▲  ◄─────────────────   │ ▲                               │
//!    │       disarm()        │ │ arm() restarts from total     │
//!    │                       └─┘                               │
//!    └──────────────── firing complete (policy: idle) ◄────────┘
//! ```
//!
//! [`Countdown`] is the pure transition table. [`AlertOrchestrator`] owns one,
//! drives it from a [`Ticker`] and user or peripheral commands, and runs the
//! firing sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::alert::{AlertError, DeliveryReceipt};
use crate::config::AfterFirePolicy;
use crate::location::ResolvedLocation;

mod orchestrator;
mod ticker;

pub use orchestrator::{AlertOrchestrator, CountdownHandle, FiringPipeline};
pub use ticker::{Tick, Ticker, TICK_PERIOD};

/// Countdown service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CountdownError {
    /// The countdown task is no longer running.
    #[error("countdown service stopped")]
    ServiceStopped,
}

/// Countdown states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountdownState {
    /// Not counting; no alert pending.
    Idle,
    /// Counting down; the alert fires at zero.
    Armed,
    /// Resolving location and sending the alert.
    Firing,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not armed; the tick changed nothing.
    Ignored,
    /// Still counting, with this many seconds left.
    Counting(u32),
    /// Reached zero; the countdown is now firing.
    Expired,
}

/// What a trigger peripheral asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSignal {
    /// Start the countdown unless it is already running.
    Arm,
    /// Fire immediately.
    Panic,
}

/// Why a firing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FireCause {
    /// The countdown reached zero.
    CountdownExpired,
    /// The trigger peripheral sent a panic signal.
    PeripheralPanic,
}

/// Who armed the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArmSource {
    /// Armed when the service started.
    Startup,
    /// Armed by the user.
    User,
    /// Armed by the trigger peripheral.
    Peripheral,
    /// Re-armed after a firing.
    Rearm,
}

/// Terminal outcome of one firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertOutcome {
    /// The gateway accepted the message.
    Sent {
        /// Delivery details.
        receipt: DeliveryReceipt,
    },
    /// No contacts configured; nothing was sent.
    NoRecipients,
    /// The gateway reported cancellation.
    Cancelled,
    /// Delivery failed.
    Failed {
        /// Failure description.
        reason: String,
    },
}

impl AlertOutcome {
    /// Whether the alert reached the gateway successfully.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

impl From<Result<DeliveryReceipt, AlertError>> for AlertOutcome {
    fn from(result: Result<DeliveryReceipt, AlertError>) -> Self {
        match result {
            Ok(receipt) => Self::Sent { receipt },
            Err(AlertError::NoRecipients) => Self::NoRecipients,
            Err(AlertError::DeliveryCancelled) => Self::Cancelled,
            Err(AlertError::DeliveryFailed { reason }) => Self::Failed { reason },
            Err(err @ AlertError::Store(_)) => Self::Failed {
                reason: err.to_string(),
            },
        }
    }
}

/// Record of one firing, reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FiringReport {
    /// When the firing started.
    pub fired_at: DateTime<Utc>,
    /// What caused it.
    pub cause: FireCause,
    /// Location included in the alert, if any.
    pub location: Option<ResolvedLocation>,
    /// Why no location was included, if resolution failed.
    pub location_error: Option<String>,
    /// Delivery outcome.
    pub outcome: AlertOutcome,
}

/// Notifications published by the countdown service.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// The countdown (re)started from its total.
    Armed {
        /// Who armed it.
        source: ArmSource,
    },
    /// The countdown was disarmed.
    Disarmed,
    /// A firing began.
    FiringStarted {
        /// What caused it.
        cause: FireCause,
    },
    /// A firing finished.
    FiringCompleted(FiringReport),
}

/// Read-only projection of the countdown for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CountdownSnapshot {
    /// Current state.
    pub state: CountdownState,
    /// Seconds left before firing.
    #[schema(example = 30)]
    pub remaining_seconds: u32,
    /// Countdown length.
    #[schema(example = 30)]
    pub total_seconds: u32,
    /// Most recent firing, if any.
    pub last_firing: Option<FiringReport>,
}

/// The countdown transition table.
///
/// `remaining_seconds` only decreases while armed and only resets to
/// `total_seconds` on an explicit (re)arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    state: CountdownState,
    remaining_seconds: u32,
    total_seconds: u32,
}

impl Countdown {
    /// A new, idle countdown.
    #[must_use]
    pub const fn new(total_seconds: u32) -> Self {
        Self {
            state: CountdownState::Idle,
            remaining_seconds: total_seconds,
            total_seconds,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CountdownState {
        self.state
    }

    /// Seconds left.
    #[must_use]
    pub const fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Countdown length.
    #[must_use]
    pub const fn total_seconds(&self) -> u32 {
        self.total_seconds
    }

    /// Enter `Armed` with a full countdown. Re-arming while armed restarts it.
    ///
    /// Returns `false` (and changes nothing) while firing.
    pub fn arm(&mut self) -> bool {
        if self.state == CountdownState::Firing {
            return false;
        }
        self.state = CountdownState::Armed;
        self.remaining_seconds = self.total_seconds;
        true
    }

    /// Leave `Armed` for `Idle`. Returns `false` as a no-op in any other state.
    pub fn disarm(&mut self) -> bool {
        if self.state != CountdownState::Armed {
            return false;
        }
        self.state = CountdownState::Idle;
        true
    }

    /// Apply one elapsed second.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != CountdownState::Armed {
            return TickOutcome::Ignored;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.state = CountdownState::Firing;
            TickOutcome::Expired
        } else {
            TickOutcome::Counting(self.remaining_seconds)
        }
    }

    /// Enter `Firing` immediately. Returns `false` if already firing.
    pub fn fire_now(&mut self) -> bool {
        if self.state == CountdownState::Firing {
            return false;
        }
        self.state = CountdownState::Firing;
        true
    }

    /// Leave `Firing` according to `policy`.
    pub fn finish_firing(&mut self, policy: AfterFirePolicy) {
        if self.state != CountdownState::Firing {
            return;
        }
        match policy {
            AfterFirePolicy::Idle => self.state = CountdownState::Idle,
            AfterFirePolicy::Rearm => {
                self.state = CountdownState::Armed;
                self.remaining_seconds = self.total_seconds;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expire(countdown: &mut Countdown) -> usize {
        let mut expirations = 0;
        for _ in 0..countdown.total_seconds() + 5 {
            if countdown.tick() == TickOutcome::Expired {
                expirations += 1;
            }
        }
        expirations
    }

    #[test]
    fn test_new_countdown_is_idle_and_full() {
        let countdown = Countdown::new(30);
        assert_eq!(countdown.state(), CountdownState::Idle);
        assert_eq!(countdown.remaining_seconds(), 30);
    }

    #[test]
    fn test_disarm_then_rearm_resets_to_total() {
        let mut countdown = Countdown::new(30);
        assert!(countdown.arm());
        for _ in 0..15 {
            countdown.tick();
        }
        assert_eq!(countdown.remaining_seconds(), 15);

        assert!(countdown.disarm());
        assert_eq!(countdown.state(), CountdownState::Idle);
        assert_eq!(countdown.remaining_seconds(), 15);

        assert!(countdown.arm());
        assert_eq!(countdown.remaining_seconds(), 30);
    }

    #[test]
    fn test_arm_while_armed_restarts_without_accumulating() {
        let mut countdown = Countdown::new(30);
        countdown.arm();
        countdown.tick();
        countdown.tick();
        countdown.arm();
        countdown.arm();
        assert_eq!(countdown.remaining_seconds(), 30);
    }

    #[test]
    fn test_disarm_when_idle_is_noop() {
        let mut countdown = Countdown::new(30);
        assert!(!countdown.disarm());
        assert_eq!(countdown.state(), CountdownState::Idle);
    }

    #[test]
    fn test_expiry_fires_exactly_once() {
        let mut countdown = Countdown::new(3);
        countdown.arm();
        assert_eq!(countdown.tick(), TickOutcome::Counting(2));
        assert_eq!(countdown.tick(), TickOutcome::Counting(1));
        assert_eq!(countdown.tick(), TickOutcome::Expired);
        assert_eq!(countdown.state(), CountdownState::Firing);
        assert_eq!(countdown.tick(), TickOutcome::Ignored);

        let mut countdown = Countdown::new(5);
        countdown.arm();
        assert_eq!(expire(&mut countdown), 1);
    }

    #[test]
    fn test_remaining_never_increases_while_armed() {
        let mut countdown = Countdown::new(10);
        countdown.arm();
        let mut previous = countdown.remaining_seconds();
        while countdown.state() == CountdownState::Armed {
            countdown.tick();
            assert!(countdown.remaining_seconds() <= previous);
            previous = countdown.remaining_seconds();
        }
    }

    #[test]
    fn test_arm_and_disarm_refused_while_firing() {
        let mut countdown = Countdown::new(30);
        assert!(countdown.fire_now());
        assert!(!countdown.fire_now());
        assert!(!countdown.arm());
        assert!(!countdown.disarm());
        assert_eq!(countdown.state(), CountdownState::Firing);
    }

    #[test]
    fn test_finish_firing_policies() {
        let mut countdown = Countdown::new(2);
        countdown.arm();
        countdown.tick();
        countdown.tick();
        countdown.finish_firing(AfterFirePolicy::Idle);
        assert_eq!(countdown.state(), CountdownState::Idle);

        countdown.fire_now();
        countdown.finish_firing(AfterFirePolicy::Rearm);
        assert_eq!(countdown.state(), CountdownState::Armed);
        assert_eq!(countdown.remaining_seconds(), 2);
    }

    #[test]
    fn test_alert_outcome_from_result() {
        assert_eq!(
            AlertOutcome::from(Err(AlertError::NoRecipients)),
            AlertOutcome::NoRecipients
        );
        assert!(matches!(
            AlertOutcome::from(Err(AlertError::DeliveryFailed {
                reason: "x".into()
            })),
            AlertOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = CountdownSnapshot {
            state: CountdownState::Armed,
            remaining_seconds: 12,
            total_seconds: 30,
            last_firing: None,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"state\":\"ARMED\""));
        assert!(json.contains("\"remaining_seconds\":12"));
    }
}
