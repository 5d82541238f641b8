use std::fmt;

/// Process-wide scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Run,
    Pause,
    Stop,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Run => write!(f, "run"),
            RunStatus::Pause => write!(f, "pause"),
            RunStatus::Stop => write!(f, "stop"),
        }
    }
}

/// Lifecycle of one request matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixLifecycle {
    /// Accepting pushes.
    #[default]
    Running,
    /// No further pushes; pending work still drains.
    Stopping,
    Stopped,
}

impl fmt::Display for MatrixLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixLifecycle::Running => write!(f, "running"),
            MatrixLifecycle::Stopping => write!(f, "stopping"),
            MatrixLifecycle::Stopped => write!(f, "stopped"),
        }
    }
}
