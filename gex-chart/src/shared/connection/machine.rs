//! Connection and degradation state machine
//!
//! Pure state: no I/O, no timers. The [`ConnectionManager`](super::ConnectionManager)
//! feeds it transport outcomes and schedules timers from the returned [`Transition`].

use crate::shared::config::RetryPolicy;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// How data is currently arriving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
pub enum ConnectionState {
    /// Live push active
    Connected,
    /// Fixed-interval pull fallback active
    Polling,
    /// Push transport lost, retry in progress
    Reconnecting,
    /// All transports exhausted, last-known-good data shown as stale
    Disconnected,
}

impl ConnectionState {
    /// Enumerated edges of the degradation graph
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected | Reconnecting | Polling, Connected)
                | (Connected, Reconnecting)
                | (Reconnecting, Reconnecting)
                | (Reconnecting, Polling)
                | (Connected | Reconnecting | Polling, Disconnected)
        )
    }

    pub fn is_degraded(self) -> bool {
        !matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// One accepted state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Failed push attempts in the current reconnect run
    pub attempt: u32,
    /// Delay until the next push attempt, if one is scheduled
    pub retry_in: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: RetryPolicy,
    poll_available: bool,
    state: ConnectionState,
    attempt: u32,
    poll_failures: u32,
}

impl ConnectionMachine {
    /// Starts in `Reconnecting` at attempt 0: the first handshake is a retry in progress.
    pub fn new(policy: RetryPolicy, poll_available: bool) -> Self {
        Self {
            policy,
            poll_available,
            state: ConnectionState::Reconnecting,
            attempt: 0,
            poll_failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn poll_failures(&self) -> u32 {
        self.poll_failures
    }

    /// The single transition gate. Rejects any edge not in the degradation graph.
    pub fn transition_to(&mut self, to: ConnectionState) -> Result<Transition, InvalidTransition> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }

        match to {
            ConnectionState::Connected => {
                self.attempt = 0;
                self.poll_failures = 0;
            }
            ConnectionState::Polling => self.poll_failures = 0,
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {}
        }
        self.state = to;

        let transition = Transition {
            from,
            to,
            attempt: self.attempt,
            retry_in: None,
        };
        if to.is_degraded() {
            warn!(%from, %to, attempt = self.attempt, "connection state changed");
        } else {
            info!(%from, %to, "connection state changed");
        }
        Ok(transition)
    }

    /// Push handshake succeeded
    pub fn push_connected(&mut self) -> Option<Transition> {
        self.apply(ConnectionState::Connected, None)
    }

    /// Push transport dropped without a local shutdown
    pub fn push_dropped(&mut self) -> Option<Transition> {
        self.attempt = 0;
        self.apply(ConnectionState::Reconnecting, Some(self.policy.delay_for(0)))
    }

    /// Push attempt failed or timed out.
    ///
    /// In `Reconnecting` this advances the backoff, falling back once the budget is
    /// spent. In `Polling` and `Disconnected` a failed background probe changes nothing.
    pub fn push_attempt_failed(&mut self) -> Option<Transition> {
        if self.state != ConnectionState::Reconnecting {
            return None;
        }

        self.attempt += 1;
        if self.attempt < self.policy.retry_budget {
            let retry_in = self.policy.delay_for(self.attempt - 1);
            return self.apply(ConnectionState::Reconnecting, Some(retry_in));
        }

        let fallback = if self.poll_available {
            ConnectionState::Polling
        } else {
            ConnectionState::Disconnected
        };
        self.apply(fallback, Some(self.policy.max_delay))
    }

    pub fn poll_succeeded(&mut self) {
        self.poll_failures = 0;
    }

    /// Poll request failed or timed out. Reaching the failure threshold moves to `Disconnected`.
    pub fn poll_failed(&mut self) -> Option<Transition> {
        if self.state != ConnectionState::Polling {
            return None;
        }

        self.poll_failures += 1;
        if self.poll_failures < self.policy.failure_threshold {
            return None;
        }
        self.apply(ConnectionState::Disconnected, Some(self.policy.max_delay))
    }

    /// Local teardown
    pub fn shutdown(&mut self) -> Option<Transition> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.apply(ConnectionState::Disconnected, None)
    }

    fn apply(&mut self, to: ConnectionState, retry_in: Option<Duration>) -> Option<Transition> {
        match self.transition_to(to) {
            Ok(transition) => Some(Transition {
                retry_in,
                ..transition
            }),
            Err(error) => {
                warn!(%error, "ignoring transition");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn machine(poll_available: bool) -> ConnectionMachine {
        ConnectionMachine::new(RetryPolicy::default(), poll_available)
    }

    #[test]
    fn test_can_transition_to() {
        struct TestCase {
            from: ConnectionState,
            to: ConnectionState,
            expected: bool,
        }

        let tests = vec![
            // TC0: direct recovery from Disconnected
            TestCase { from: Disconnected, to: Connected, expected: true },
            // TC1: unexpected drop
            TestCase { from: Connected, to: Reconnecting, expected: true },
            // TC2: failed retry
            TestCase { from: Reconnecting, to: Reconnecting, expected: true },
            // TC3: retry budget exhausted
            TestCase { from: Reconnecting, to: Polling, expected: true },
            // TC4: background push succeeds while polling
            TestCase { from: Polling, to: Connected, expected: true },
            // TC5: must pass through Reconnecting
            TestCase { from: Connected, to: Polling, expected: false },
            // TC6: polling exhausted
            TestCase { from: Polling, to: Disconnected, expected: true },
            // TC7: no self loop outside Reconnecting
            TestCase { from: Disconnected, to: Disconnected, expected: false },
            TestCase { from: Connected, to: Connected, expected: false },
            // TC9: Disconnected only recovers directly
            TestCase { from: Disconnected, to: Reconnecting, expected: false },
            TestCase { from: Disconnected, to: Polling, expected: false },
            TestCase { from: Polling, to: Reconnecting, expected: false },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.from.can_transition_to(test.to);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_transition_gate_rejects_unlisted_edges() {
        let mut machine = machine(true);
        machine.transition_to(Connected).unwrap();

        assert_eq!(
            machine.transition_to(Polling),
            Err(InvalidTransition { from: Connected, to: Polling })
        );
        assert_eq!(machine.state(), Connected);
    }

    #[test]
    fn test_three_failures_fall_back_to_polling_then_recover() {
        let mut machine = machine(true);
        assert_eq!(machine.state(), Reconnecting);

        let first = machine.push_attempt_failed().unwrap();
        assert_eq!((first.from, first.to, first.attempt), (Reconnecting, Reconnecting, 1));
        assert_eq!(first.retry_in, Some(Duration::from_secs(1)));

        let second = machine.push_attempt_failed().unwrap();
        assert_eq!(second.retry_in, Some(Duration::from_secs(2)));

        let third = machine.push_attempt_failed().unwrap();
        assert_eq!((third.from, third.to), (Reconnecting, Polling));
        assert_eq!(third.retry_in, Some(Duration::from_secs(30)));

        // Failed background probe while polling is not a transition
        assert_eq!(machine.push_attempt_failed(), None);

        let recovered = machine.push_connected().unwrap();
        assert_eq!((recovered.from, recovered.to), (Polling, Connected));
        assert_eq!(machine.attempt(), 0);
    }

    #[test]
    fn test_exhausted_without_poll_endpoint_disconnects() {
        let mut machine = machine(false);
        machine.push_attempt_failed();
        machine.push_attempt_failed();
        let last = machine.push_attempt_failed().unwrap();
        assert_eq!(last.to, Disconnected);
    }

    #[test]
    fn test_poll_failures_reach_threshold() {
        let mut machine = machine(true);
        for _ in 0..3 {
            machine.push_attempt_failed();
        }
        assert_eq!(machine.state(), Polling);

        assert_eq!(machine.poll_failed(), None);
        machine.poll_succeeded();
        assert_eq!(machine.poll_failed(), None);
        assert_eq!(machine.poll_failed(), None);
        let transition = machine.poll_failed().unwrap();
        assert_eq!((transition.from, transition.to), (Polling, Disconnected));

        // Direct recovery
        assert_eq!(machine.push_connected().map(|t| t.to), Some(Connected));
    }

    #[test]
    fn test_drop_restarts_backoff() {
        let mut machine = machine(true);
        machine.push_attempt_failed();
        machine.push_connected();

        let dropped = machine.push_dropped().unwrap();
        assert_eq!((dropped.from, dropped.to, dropped.attempt), (Connected, Reconnecting, 0));
        assert_eq!(dropped.retry_in, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_shutdown_once() {
        let mut machine = machine(true);
        assert_eq!(machine.shutdown().map(|t| t.to), Some(Disconnected));
        assert_eq!(machine.shutdown(), None);
    }
}
