//! The per-modem power-cycle ("kick") state machine.
//!
//! A kick walks disable → low-power → enable, one asynchronous operation at a
//! time. Each phase is retried up to [`MAX_TRIES`](crate::consts::MAX_TRIES)
//! times before the whole sequence is abandoned. The state here is pure
//! bookkeeping; issuing the operations and scheduling the delays between them
//! is the event loop's job (see [`crate::supervisor`]).

use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::{
    consts::MAX_TRIES,
    proxies::{ModemProxy, PowerState},
};

#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error(transparent)]
    Dbus(#[from] zbus::Error),
    #[error("{0}")]
    Failed(String),
}

/// The control operations a kick issues against a modem.
///
/// The production implementation is the ModemManager proxy; tests substitute
/// a scripted fake.
#[async_trait]
pub trait ModemOps: Send + Sync {
    async fn disable(&self) -> Result<(), OpError>;
    async fn set_low_power(&self) -> Result<(), OpError>;
    async fn enable(&self) -> Result<(), OpError>;
}

#[async_trait]
impl ModemOps for ModemProxy<'static> {
    async fn disable(&self) -> Result<(), OpError> {
        ModemProxy::enable(self, false).await.map_err(OpError::from)
    }

    async fn set_low_power(&self) -> Result<(), OpError> {
        ModemProxy::set_power_state(self, PowerState::Low as u32)
            .await
            .map_err(OpError::from)
    }

    async fn enable(&self) -> Result<(), OpError> {
        ModemProxy::enable(self, true).await.map_err(OpError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disable,
    LowPower,
    Enable,
    Finish,
}

impl Phase {
    #[must_use]
    pub fn on_success(self) -> Phase {
        match self {
            Phase::Disable => Phase::LowPower,
            Phase::LowPower => Phase::Enable,
            Phase::Enable | Phase::Finish => Phase::Finish,
        }
    }
}

/// What the event loop should do after an operation result was absorbed.
#[derive(Debug, PartialEq, Eq)]
pub enum Next {
    /// Schedule the next step (advance or retry) after the inter-step delay.
    Schedule,
    /// Too many retries; the phase was forced to [`Phase::Finish`] and the
    /// finishing step must run immediately.
    Abort,
}

/// State of one in-progress kick. Exists only while a kick is active; its
/// absence on a modem entry is the idle condition.
#[derive(Debug)]
pub struct Recovery {
    pub phase: Phase,
    /// Retries consumed for the current phase.
    pub tries: u32,
    /// Identifies the outstanding call or timer. Completions carrying a
    /// different token are stale and must be dropped.
    pub token: u64,
    /// Abort handle for whichever task is outstanding: the in-flight
    /// operation or the scheduled step timer, never both.
    pub pending: Option<AbortHandle>,
}

impl Recovery {
    #[must_use]
    pub fn new(token: u64) -> Self {
        Self {
            phase: Phase::Disable,
            tries: 0,
            token,
            pending: None,
        }
    }

    /// Cancels the outstanding call or timer, if any.
    pub fn cancel(mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    /// Folds an operation result into the state machine.
    pub fn absorb_result(&mut self, ok: bool) -> Next {
        if ok {
            self.tries = 0;
            self.phase = self.phase.on_success();
            Next::Schedule
        } else {
            self.tries += 1;
            if self.tries > MAX_TRIES {
                self.phase = Phase::Finish;
                Next::Abort
            } else {
                Next::Schedule
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Next, Phase, Recovery};

    #[test]
    fn successful_kick_walks_phases_in_order_without_revisiting() {
        let mut recovery = Recovery::new(1);
        let mut seen = vec![recovery.phase];
        while recovery.phase != Phase::Finish {
            assert_eq!(recovery.absorb_result(true), Next::Schedule);
            assert_eq!(recovery.tries, 0);
            assert!(
                !seen.contains(&recovery.phase),
                "revisited {:?}",
                recovery.phase
            );
            seen.push(recovery.phase);
        }
        assert_eq!(
            seen,
            [Phase::Disable, Phase::LowPower, Phase::Enable, Phase::Finish]
        );
    }

    #[test]
    fn failures_retry_the_same_phase() {
        let mut recovery = Recovery::new(1);
        for expected_tries in 1..=3 {
            assert_eq!(recovery.absorb_result(false), Next::Schedule);
            assert_eq!(recovery.phase, Phase::Disable);
            assert_eq!(recovery.tries, expected_tries);
        }
    }

    #[test]
    fn fourth_consecutive_failure_aborts_instead_of_retrying() {
        let mut recovery = Recovery::new(1);
        for _ in 0..3 {
            assert_eq!(recovery.absorb_result(false), Next::Schedule);
        }
        assert_eq!(recovery.absorb_result(false), Next::Abort);
        assert_eq!(recovery.phase, Phase::Finish);
    }

    #[test]
    fn success_after_failures_resets_the_retry_budget() {
        let mut recovery = Recovery::new(1);
        recovery.absorb_result(false);
        recovery.absorb_result(false);
        assert_eq!(recovery.absorb_result(true), Next::Schedule);
        assert_eq!(recovery.phase, Phase::LowPower);
        assert_eq!(recovery.tries, 0);
    }
}
