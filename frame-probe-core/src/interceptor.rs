//! Native entry-point interception.
//!
//! The concrete patching mechanism lives in a platform adapter behind
//! [`MethodPatcher`]. This module keeps the captured original pointer and the
//! forwarding contract: every intercepted call reaches the original with the
//! same arguments and its return value goes back to the host unchanged.

use std::{ffi::c_void, fmt, mem, ptr::NonNull, sync::OnceLock};

use tracing::{error, info};

use crate::{
    clock::MonotonicClock,
    error::{ProbeError, ProbeResult},
    sample::SharedSample,
    sampler::{FrameInfo, FrameTimeSampler},
};

/// Identifies a native method in the host's resolution table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookTarget {
    /// Class in JNI slash notation.
    pub class: &'static str,
    /// Method name.
    pub method: &'static str,
    /// JNI method signature.
    pub signature: &'static str,
}

impl fmt::Display for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.method, self.signature)
    }
}

/// Platform capability that swaps a native method implementation.
pub trait MethodPatcher {
    /// Binds `replacement` to `target` and returns the previously bound entry
    /// point, or `None` if it could not be resolved.
    fn install(&self, target: &HookTarget, replacement: *mut c_void) -> Option<NonNull<c_void>>;
}

/// The entry point that was bound before the hook was installed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OriginalEntryPoint(NonNull<c_void>);

// SAFETY: the pointer is the address of immutable native code. It is never
// dereferenced as data, only called.
unsafe impl Send for OriginalEntryPoint {}
// SAFETY: see `Send`.
unsafe impl Sync for OriginalEntryPoint {}

impl OriginalEntryPoint {
    /// Wraps a non-null entry point.
    pub fn new(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    /// Raw address.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Reinterprets the address as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type whose ABI and signature match the
    /// original native method exactly.
    pub unsafe fn cast<F: Copy>(self) -> F {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());
        // SAFETY: upheld by the caller.
        unsafe { mem::transmute_copy::<*mut c_void, F>(&self.as_ptr()) }
    }
}

impl fmt::Debug for OriginalEntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginalEntryPoint({:p})", self.0)
    }
}

/// Holds the hook target and, once installed, its original entry point.
#[derive(Debug)]
pub struct MethodInterceptor {
    target: HookTarget,
    original: OnceLock<OriginalEntryPoint>,
}

impl MethodInterceptor {
    /// Creates an interceptor that has not been installed yet.
    pub const fn new(target: HookTarget) -> Self {
        Self {
            target,
            original: OnceLock::new(),
        }
    }

    /// The hooked method.
    pub fn target(&self) -> &HookTarget {
        &self.target
    }

    /// Installs `replacement` through `patcher`. Only the first successful
    /// call has any effect; there is no uninstall.
    #[tracing::instrument(
        level = "debug",
        skip(self, patcher, replacement),
        fields(target = %self.target)
    )]
    pub fn install(
        &self,
        patcher: &impl MethodPatcher,
        replacement: *mut c_void,
    ) -> ProbeResult<OriginalEntryPoint> {
        if self.original.get().is_some() {
            return Err(ProbeError::HookAlreadyInstalled {
                method: self.target.method,
            });
        }

        let Some(ptr) = patcher.install(&self.target, replacement) else {
            error!("hooking {} failed, frame sampling disabled", self.target);
            return Err(ProbeError::HookInstall {
                class: self.target.class,
                method: self.target.method,
            });
        };

        let original = OriginalEntryPoint::new(ptr);
        if self.original.set(original).is_err() {
            return Err(ProbeError::HookAlreadyInstalled {
                method: self.target.method,
            });
        }
        info!("hooked {}, original at {:p}", self.target, original.as_ptr());
        Ok(original)
    }

    /// The captured original, if installed.
    pub fn original(&self) -> Option<OriginalEntryPoint> {
        self.original.get().copied()
    }

    /// Whether the hook is live.
    pub fn is_installed(&self) -> bool {
        self.original.get().is_some()
    }

    /// Body of the replacement function: sample, then call through.
    ///
    /// `forward` must invoke the original with the untouched arguments. It is
    /// called exactly once whatever the measurement outcome, and its result
    /// is returned as is.
    pub fn intercept<C, F, R>(
        &self,
        frame_info: &F,
        sampler: &FrameTimeSampler<C>,
        slot: &SharedSample,
        forward: impl FnOnce() -> R,
    ) -> R
    where
        C: MonotonicClock,
        F: FrameInfo + ?Sized,
    {
        sampler.observe(frame_info, slot);
        forward()
    }
}
