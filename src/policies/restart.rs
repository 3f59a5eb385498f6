//! # Per-child restart policies.
//!
//! [`RestartPolicy`] decides whether a child's exit triggers the supervisor's
//! [`RestartStrategy`](crate::RestartStrategy) at all.
//!
//! - [`RestartPolicy::Never`] the child runs once; any exit is final.
//! - [`RestartPolicy::OnFailure`] restart on error, panic or abort (default).
//! - [`RestartPolicy::Always`] restart on any exit, including a normal return.
//!
//! ```text
//! exit cause      │ Never │ OnFailure │ Always
//! ────────────────┼───────┼───────────┼───────
//! Normal          │  no   │    no     │  yes
//! Canceled        │  no   │    no     │  yes
//! Failed          │  no   │    yes    │  yes
//! Panicked        │  no   │    yes    │  yes
//! Aborted         │  no   │    yes    │  yes
//! Fatal           │  no   │    no     │  no
//! ```

use crate::supervisor::ExitCause;

/// Policy controlling whether a child is restarted after it exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart: the child runs once and exits permanently.
    Never,
    /// Restart only on abnormal exit (default).
    #[default]
    OnFailure,
    /// Restart on every exit except a fatal error.
    Always,
}

impl RestartPolicy {
    /// Returns true when `cause` should restart the child.
    pub fn should_restart(&self, cause: &ExitCause) -> bool {
        if cause.is_fatal() {
            return false;
        }
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => cause.is_abnormal(),
            RestartPolicy::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskError;

    #[test]
    fn policy_table() {
        let normal = ExitCause::Normal;
        let failed = ExitCause::Failed(TaskError::fail("boom"));
        let panicked = ExitCause::Panicked("boom".into());
        let fatal = ExitCause::Failed(TaskError::fatal("dead"));

        assert!(!RestartPolicy::Never.should_restart(&failed));
        assert!(!RestartPolicy::OnFailure.should_restart(&normal));
        assert!(RestartPolicy::OnFailure.should_restart(&failed));
        assert!(RestartPolicy::OnFailure.should_restart(&panicked));
        assert!(RestartPolicy::Always.should_restart(&normal));
        assert!(!RestartPolicy::Always.should_restart(&fatal));
    }
}
