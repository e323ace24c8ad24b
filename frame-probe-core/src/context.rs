//! The per-process probe state a platform adapter drives.

use std::{ffi::c_void, sync::Arc, thread::JoinHandle};

use tracing::{error, warn};

use crate::{
    clock::{MonotonicClock, SystemClock},
    config::{ProbeConfig, SYNC_AND_DRAW_FRAME},
    error::ProbeError,
    interceptor::{MethodInterceptor, MethodPatcher},
    sample::{Sample, SharedSample},
    sampler::{FrameInfo, FrameTimeSampler},
    server::TelemetryServer,
};

/// Configuration, shared sample, sampler and interceptor of one host process.
///
/// The render thread only touches [`intercept`](Self::intercept); the
/// telemetry thread only reads the shared sample.
#[derive(Debug)]
pub struct ProbeContext<C = SystemClock> {
    config: ProbeConfig,
    sample: Arc<SharedSample>,
    sampler: FrameTimeSampler<C>,
    interceptor: MethodInterceptor,
}

impl ProbeContext<SystemClock> {
    /// Context for the calling process on `CLOCK_MONOTONIC`.
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_clock(config, SystemClock, std::process::id())
    }
}

impl<C: MonotonicClock> ProbeContext<C> {
    /// Context reading `clock` and reporting `pid`.
    pub fn with_clock(config: ProbeConfig, clock: C, pid: u32) -> Self {
        Self {
            config,
            sample: Arc::new(SharedSample::new(pid)),
            sampler: FrameTimeSampler::with_clock(clock, pid),
            interceptor: MethodInterceptor::new(SYNC_AND_DRAW_FRAME),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// The slot shared with the telemetry server.
    pub fn sample(&self) -> &Arc<SharedSample> {
        &self.sample
    }

    /// The frame-time sampler.
    pub fn sampler(&self) -> &FrameTimeSampler<C> {
        &self.sampler
    }

    /// The render-call interceptor.
    pub fn interceptor(&self) -> &MethodInterceptor {
        &self.interceptor
    }

    /// Installs the render hook. Returns whether sampling is now live.
    ///
    /// Failure leaves the host untouched; telemetry then keeps reporting the
    /// sentinel.
    pub fn install_hook(&self, patcher: &impl MethodPatcher, replacement: *mut c_void) -> bool {
        match self.interceptor.install(patcher, replacement) {
            Ok(_) => true,
            Err(err @ ProbeError::HookAlreadyInstalled { .. }) => {
                warn!("{err}");
                true
            }
            // Already logged by the interceptor.
            Err(_) => false,
        }
    }

    /// Samples one render call and forwards it.
    pub fn intercept<F, R>(&self, frame_info: &F, forward: impl FnOnce() -> R) -> R
    where
        F: FrameInfo + ?Sized,
    {
        self.interceptor
            .intercept(frame_info, &self.sampler, &self.sample, forward)
    }

    /// A server publishing this context's sample.
    pub fn telemetry_server(&self) -> TelemetryServer {
        TelemetryServer::new(&self.config, Arc::clone(&self.sample))
    }

    /// Starts the telemetry thread. `None` if the thread could not be
    /// created; the failure is logged.
    pub fn start_telemetry(&self) -> Option<JoinHandle<()>> {
        match self.telemetry_server().spawn() {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("failed to spawn telemetry thread: {err}");
                None
            }
        }
    }

    /// Current content of the shared slot.
    pub fn latest(&self) -> Sample {
        self.sample.load()
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::{clock::ManualClock, interceptor::HookTarget};

    struct StaticPatcher(Option<NonNull<c_void>>);

    impl MethodPatcher for StaticPatcher {
        fn install(
            &self,
            _target: &HookTarget,
            _replacement: *mut c_void,
        ) -> Option<NonNull<c_void>> {
            self.0
        }
    }

    extern "C" fn original(value: i32) -> i32 {
        value + 1
    }

    fn context() -> ProbeContext<ManualClock> {
        ProbeContext::with_clock(ProbeConfig::default(), ManualClock::new(5_002_000_000), 1234)
    }

    #[test]
    fn reports_sentinel_until_first_frame() {
        assert_eq!(context().latest(), Sample::sentinel(1234));
    }

    #[test]
    fn install_hook_reports_outcome() {
        let failed = context();
        assert!(!failed.install_hook(&StaticPatcher(None), original as *mut c_void));
        assert!(!failed.interceptor().is_installed());

        let live = context();
        let patcher = StaticPatcher(NonNull::new(original as *mut c_void));
        assert!(live.install_hook(&patcher, original as *mut c_void));
        assert!(live.install_hook(&patcher, original as *mut c_void));
        assert!(live.interceptor().is_installed());
    }

    #[test]
    fn intercept_updates_latest() {
        let context = context();
        let status = context.intercept(&[10i64, 20, 30, 5_000_000_000][..], || 0);
        assert_eq!(status, 0);
        assert_eq!(
            context.latest(),
            Sample {
                pid: 1234,
                frame_time_ns: 2_000_000
            }
        );

        context.sampler().clock().advance(1_000_000);
        context.intercept(&[1i64, 2][..], || 0);
        assert_eq!(context.latest().frame_time_ns, 2_000_000);
    }
}
