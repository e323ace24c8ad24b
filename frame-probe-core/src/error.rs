//! Error type shared by every probe component.
//!
//! None of these errors ever reaches the host application. Callers log them
//! and disable the affected feature.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Step of the telemetry socket setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// Creating the containing directory.
    Directory,
    /// Binding the socket path.
    Bind,
    /// Putting the socket into listening state.
    Listen,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::Bind => write!(f, "bind"),
            Self::Listen => write!(f, "listen"),
        }
    }
}

/// Failures of the probe components.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The patcher could not resolve the original entry point.
    #[error("failed to hook {class}.{method}: original entry point unresolved")]
    HookInstall {
        /// JNI class name.
        class: &'static str,
        /// Method name.
        method: &'static str,
    },
    /// The hook was already installed in this process.
    #[error("{method} is already hooked")]
    HookAlreadyInstalled {
        /// Method name.
        method: &'static str,
    },
    /// Directory, bind or listen failure of the telemetry socket.
    #[error("telemetry socket {stage} failed for {}: {source}", path.display())]
    SocketSetup {
        /// Failing step.
        stage: SetupStage,
        /// Path being prepared.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A security label could not be applied.
    #[error("failed to label {} as {label}: {reason}", path.display())]
    Labeling {
        /// Labeled path.
        path: PathBuf,
        /// Requested security context.
        label: String,
        /// Backend specific reason.
        reason: String,
    },
    /// The frame-info vector was too short or unreadable.
    #[error("frame info has {len} fields, measurement skipped")]
    MeasurementSkipped {
        /// Number of fields that were available.
        len: usize,
    },
    /// The client could not reach the telemetry socket.
    #[error("failed to connect to {}: {source}", path.display())]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The telemetry reply was not `"<pid>:<ns>\n"`.
    #[error("malformed telemetry reply {reply:?}")]
    InvalidReply {
        /// Raw reply text.
        reply: String,
    },
}
