//! Observable lifecycle of a sibling execution context.
//!
//! A sibling moves through `Initializing -> Ready -> Terminated` and never back.
//! `Terminated` is absorbing: once entered, every other transition is refused.
//! State lives in a `tokio::sync::watch` channel so that any number of
//! observers can wait for a state without polling.
//!
//! # Example
//!
//! ```rust
//! use sibling_common::lifecycle::{LifecycleState, LifecycleStateMachine};
//!
//! let sm = LifecycleStateMachine::new();
//! sm.transition_to_ready().unwrap();
//! assert!(sm.transition_to_terminated());
//! assert!(!sm.transition_to_terminated());
//! assert_eq!(sm.current(), LifecycleState::Terminated);
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle states of a sibling handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Creation request issued, channel not resolved yet
    Initializing,

    /// Channel resolved and inbound routing registered
    Ready,

    /// Terminated by the owner; the handle is inert
    Terminated,
}

impl LifecycleState {
    /// Returns true if messages may still be sent from this state
    pub fn accepts_messages(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated)
    }
}

/// Monotonic lifecycle state machine backed by a watch channel.
#[derive(Debug, Clone)]
pub struct LifecycleStateMachine {
    sender: Arc<watch::Sender<LifecycleState>>,
    // Keeps the channel open while no external subscriber exists
    _receiver: watch::Receiver<LifecycleState>,
}

impl LifecycleStateMachine {
    /// Create a new state machine in the Initializing state
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(LifecycleState::Initializing);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Get the current state without blocking
    pub fn current(&self) -> LifecycleState {
        *self.sender.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.sender.subscribe()
    }

    pub fn is_terminated(&self) -> bool {
        self.current().is_terminal()
    }

    /// Transition from Initializing to Ready
    pub fn transition_to_ready(&self) -> Result<(), &'static str> {
        let mut transitioned = false;
        self.sender.send_if_modified(|state| {
            if matches!(state, LifecycleState::Initializing) {
                *state = LifecycleState::Ready;
                transitioned = true;
                true
            } else {
                false
            }
        });
        if transitioned {
            Ok(())
        } else {
            Err("Can only transition to Ready from Initializing")
        }
    }

    /// Transition to Terminated from any state.
    ///
    /// Returns true only for the call that performed the transition, so
    /// callers can run their teardown exactly once.
    pub fn transition_to_terminated(&self) -> bool {
        let mut transitioned = false;
        self.sender.send_if_modified(|state| {
            if !state.is_terminal() {
                *state = LifecycleState::Terminated;
                transitioned = true;
                true
            } else {
                false
            }
        });
        transitioned
    }

    /// Wait until the handle is Ready. Fails if it terminates first.
    pub async fn wait_for_ready(&self) -> Result<(), &'static str> {
        let mut rx = self.sender.subscribe();
        loop {
            match *rx.borrow_and_update() {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::Terminated => return Err("Sibling terminated"),
                LifecycleState::Initializing => {}
            }
            if rx.changed().await.is_err() {
                return Err("State machine dropped");
            }
        }
    }
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_valid_transitions() {
        let sm = LifecycleStateMachine::new();
        assert_eq!(sm.current(), LifecycleState::Initializing);

        sm.transition_to_ready().unwrap();
        assert_eq!(sm.current(), LifecycleState::Ready);

        assert!(sm.transition_to_terminated());
        assert_eq!(sm.current(), LifecycleState::Terminated);
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let sm = LifecycleStateMachine::new();
        assert!(sm.transition_to_terminated());

        assert!(sm.transition_to_ready().is_err());
        assert!(!sm.transition_to_terminated());
        assert_eq!(sm.current(), LifecycleState::Terminated);
    }

    #[test]
    fn test_ready_only_once() {
        let sm = LifecycleStateMachine::new();
        sm.transition_to_ready().unwrap();
        assert!(sm.transition_to_ready().is_err());
    }

    #[test]
    fn test_accepts_messages() {
        assert!(LifecycleState::Initializing.accepts_messages());
        assert!(LifecycleState::Ready.accepts_messages());
        assert!(!LifecycleState::Terminated.accepts_messages());
    }

    #[tokio::test]
    async fn test_wait_for_ready_delayed() {
        let sm = LifecycleStateMachine::new();
        let sm_clone = sm.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sm_clone.transition_to_ready().unwrap();
        });

        let result = timeout(Duration::from_secs(1), sm.wait_for_ready()).await;
        assert_eq!(result.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_wait_for_ready_terminated_first() {
        let sm = LifecycleStateMachine::new();
        let sm_clone = sm.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sm_clone.transition_to_terminated();
        });

        let result = timeout(Duration::from_secs(1), sm.wait_for_ready()).await;
        assert!(result.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_sees_termination() {
        let sm = LifecycleStateMachine::new();
        let mut rx = sm.subscribe();
        sm.transition_to_terminated();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Terminated);
    }
}
