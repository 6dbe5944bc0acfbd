//! Start/stop state shared by the background loops

use std::sync::{Mutex, MutexGuard};

/// Lifecycle of a background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
        }
    }
}

/// Guarded `Stopped → Starting → Running → Stopped` transitions
///
/// Each transition reports whether it happened, so double start and double
/// stop are observable without being errors at this level.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// `Stopped → Starting`; false if the loop is not stopped
    pub fn begin_start(&self) -> bool {
        let mut state = self.lock();
        if *state != LifecycleState::Stopped {
            return false;
        }
        *state = LifecycleState::Starting;
        true
    }

    /// `Starting → Running`
    pub fn mark_running(&self) {
        let mut state = self.lock();
        if *state == LifecycleState::Starting {
            *state = LifecycleState::Running;
        }
    }

    /// `Starting | Running → Stopped`; false if already stopped
    pub fn begin_stop(&self) -> bool {
        let mut state = self.lock();
        if *state == LifecycleState::Stopped {
            return false;
        }
        *state = LifecycleState::Stopped;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);

        assert!(lifecycle.begin_start());
        assert_eq!(lifecycle.state(), LifecycleState::Starting);
        assert!(!lifecycle.begin_start());

        lifecycle.mark_running();
        assert!(lifecycle.is_running());

        assert!(lifecycle.begin_stop());
        assert!(!lifecycle.begin_stop());
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_mark_running_requires_starting() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_running();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }
}
