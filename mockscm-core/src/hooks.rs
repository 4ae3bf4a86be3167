//! Fault-injection and latency hooks
//!
//! The controller does not interpret either collaborator. Callers invoke
//! [`Controller::apply_latency`] and [`Controller::check_faults`] at their
//! checkpoints (before listing heads, before and after computing a revision,
//! before fetching metadata) and propagate whatever error comes back.
//!
//! Latency waits are cancellable: a [`CancelToken`] aborts the wait with
//! [`ScmError::Cancelled`] as soon as its [`Canceller`] fires.
//!
//! [`Controller::apply_latency`]: crate::Controller::apply_latency
//! [`Controller::check_faults`]: crate::Controller::check_faults

use crate::error::{Result, ScmError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use rand::Rng;
use std::fmt;
use std::time::Duration;

// ── Cancellation ───────────────────────────────────────────────

/// Create a linked cancel handle and token
pub fn cancellation() -> (Canceller, CancelToken) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (Canceller { _signal: tx }, CancelToken { signal: rx })
}

/// Cancels every clone of its token when fired or dropped
#[derive(Debug)]
pub struct Canceller {
    _signal: Sender<()>,
}

impl Canceller {
    /// Wake all waiters; they return [`ScmError::Cancelled`]
    pub fn cancel(self) {
        drop(self);
    }
}

/// Observes a [`Canceller`]
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Receiver<()>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        Self {
            signal: crossbeam_channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block for `duration` unless cancelled first
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        if self.is_cancelled() {
            return Err(ScmError::Cancelled);
        }
        match self.signal.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(ScmError::Cancelled),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

// ── Latency ────────────────────────────────────────────────────

/// Simulated network delay
pub trait Latency: Send + Sync + fmt::Debug {
    /// Block the caller for the simulated delay.
    ///
    /// Must return [`ScmError::Cancelled`] promptly once `cancel` fires.
    fn apply(&self, cancel: &CancelToken) -> Result<()>;
}

/// No delay at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLatency;

impl Latency for NoLatency {
    fn apply(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ScmError::Cancelled);
        }
        Ok(())
    }
}

/// The same delay on every call
#[derive(Debug, Clone, Copy)]
pub struct FixedLatency(pub Duration);

impl Latency for FixedLatency {
    fn apply(&self, cancel: &CancelToken) -> Result<()> {
        cancel.sleep(self.0)
    }
}

/// Uniformly random delay in `[0, 2 * mean]`
#[derive(Debug, Clone, Copy)]
pub struct JitterLatency {
    pub mean: Duration,
}

impl Latency for JitterLatency {
    fn apply(&self, cancel: &CancelToken) -> Result<()> {
        let max = self.mean.as_micros().saturating_mul(2).min(u64::MAX as u128) as u64;
        let micros = rand::thread_rng().gen_range(0..=max);
        cancel.sleep(Duration::from_micros(micros))
    }
}

// ── Faults ─────────────────────────────────────────────────────

/// Where in an operation a fault check happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint<'a> {
    pub repository: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub revision: Option<&'a str>,
    /// True when fetching metadata actions rather than heads/revisions
    pub actions: bool,
}

/// Raises simulated failures
pub trait FaultInjector: Send + Sync {
    fn check(&self, point: &Checkpoint<'_>) -> Result<()>;
}

impl<F> FaultInjector for F
where
    F: Fn(&Checkpoint<'_>) -> Result<()> + Send + Sync,
{
    fn check(&self, point: &Checkpoint<'_>) -> Result<()> {
        self(point)
    }
}

/// Fails checkpoints whose fields match; an unset field matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultRule {
    repository: Option<String>,
    branch: Option<String>,
    revision: Option<String>,
    actions_only: bool,
    message: String,
}

impl FaultRule {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Only fire on metadata-action checkpoints
    pub fn actions_only(mut self) -> Self {
        self.actions_only = true;
        self
    }

    fn matches(&self, point: &Checkpoint<'_>) -> bool {
        fn field(rule: &Option<String>, seen: Option<&str>) -> bool {
            rule.as_deref().is_none_or(|want| seen == Some(want))
        }
        (!self.actions_only || point.actions)
            && field(&self.repository, point.repository)
            && field(&self.branch, point.branch)
            && field(&self.revision, point.revision)
    }
}

impl FaultInjector for FaultRule {
    fn check(&self, point: &Checkpoint<'_>) -> Result<()> {
        if self.matches(point) {
            tracing::warn!(?point, "injecting fault: {}", self.message);
            return Err(ScmError::Fault(self.message.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn point<'a>(repository: &'a str, branch: Option<&'a str>, actions: bool) -> Checkpoint<'a> {
        Checkpoint {
            repository: Some(repository),
            branch,
            revision: None,
            actions,
        }
    }

    #[test]
    fn test_never_token_sleeps() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        assert!(token.sleep(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_cancel_wakes_sleeper() {
        let (canceller, token) = cancellation();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let result = token.sleep(Duration::from_secs(30));
                (result, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        let (result, elapsed) = waiter.join().unwrap();
        assert!(matches!(result, Err(ScmError::Cancelled)));
        assert!(elapsed < Duration::from_secs(10));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_latency_respects_cancellation() {
        let (canceller, token) = cancellation();
        canceller.cancel();
        assert!(matches!(NoLatency.apply(&token), Err(ScmError::Cancelled)));
        assert!(matches!(
            FixedLatency(Duration::from_secs(5)).apply(&token),
            Err(ScmError::Cancelled)
        ));
        let jitter = JitterLatency {
            mean: Duration::from_secs(5),
        };
        assert!(matches!(jitter.apply(&token), Err(ScmError::Cancelled)));
    }

    #[test]
    fn test_fixed_latency_waits() {
        let start = Instant::now();
        FixedLatency(Duration::from_millis(15))
            .apply(&CancelToken::never())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_fault_rule_matching() {
        let rule = FaultRule::new("boom").repository("r").branch("master");
        assert!(rule.check(&point("r", Some("master"), false)).is_err());
        assert!(rule.check(&point("r", Some("feature"), false)).is_ok());
        assert!(rule.check(&point("r", None, false)).is_ok());
        assert!(rule.check(&point("other", Some("master"), false)).is_ok());

        let any = FaultRule::new("all");
        assert!(any.check(&point("x", None, true)).is_err());
    }

    #[test]
    fn test_fault_rule_actions_only() {
        let rule = FaultRule::new("meta").repository("r").actions_only();
        assert!(rule.check(&point("r", None, false)).is_ok());
        match rule.check(&point("r", None, true)) {
            Err(ScmError::Fault(msg)) => assert_eq!(msg, "meta"),
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_injector() {
        fn injector(p: &Checkpoint<'_>) -> Result<()> {
            if p.revision.is_some() {
                Err(ScmError::Fault("revision".into()))
            } else {
                Ok(())
            }
        }
        let mut p = point("r", None, false);
        assert!(injector.check(&p).is_ok());
        p.revision = Some("abc");
        assert!(injector.check(&p).is_err());
    }
}
