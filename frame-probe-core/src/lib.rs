//! frame-probe-core measures per-frame render latency inside a host process
//! and serves the latest measurement over a local socket.
//!
//! # Pieces
//!
//! - [`SharedSample`] holds the last [`Sample`] and is read and written
//!   without locks.
//! - [`FrameTimeSampler`] turns the frame-info vector handed to the hooked
//!   render call into a sample.
//! - [`MethodInterceptor`] captures the original native entry point through a
//!   platform [`MethodPatcher`] and forwards every call to it.
//! - [`AccessProvisioner`] prepares the socket directory, permission bits and
//!   security labels.
//! - [`TelemetryServer`] answers every connection with `"<pid>:<ns>\n"`.
//!
//! [`ProbeContext`] ties them together for a platform adapter.
//!
//! ```no_run
//! use frame_probe_core::{ProbeConfig, ProbeContext};
//!
//! let context = ProbeContext::new(ProbeConfig::default());
//! // The adapter installs the hook before specialization...
//! // context.install_hook(&patcher, trampoline as *mut _);
//! // ...and starts the server afterwards.
//! let _ = context.start_telemetry();
//! ```
#![deny(missing_docs, clippy::unwrap_used)]

pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod provision;
pub mod sample;
pub mod sampler;
pub mod server;

pub use crate::{
    client::{query, query_raw},
    clock::{ManualClock, MonotonicClock, SystemClock},
    config::{
        FRAME_INFO_FIELDS, LISTEN_BACKLOG, LabelBackend, ProbeConfig, SYNC_AND_DRAW_FRAME,
        VSYNC_INDEX,
    },
    context::ProbeContext,
    error::{ProbeError, ProbeResult, SetupStage},
    interceptor::{HookTarget, MethodInterceptor, MethodPatcher, OriginalEntryPoint},
    provision::{AccessProvisioner, ChconLabeler, NoopLabeler, SecurityLabeler, XattrLabeler},
    sample::{Sample, SharedSample},
    sampler::{FrameInfo, FrameTimeSampler},
    server::{BoundServer, TelemetryServer},
};
