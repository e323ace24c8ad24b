//! Frame-time measurement from the hooked call's frame-info vector.

use tracing::trace;

use crate::{
    clock::{MonotonicClock, SystemClock},
    config::{FRAME_INFO_FIELDS, VSYNC_INDEX},
    error::{ProbeError, ProbeResult},
    sample::{Sample, SharedSample},
};

/// Read access to the integer vector passed into the render call.
///
/// The adapter implements this over a JNI `long[]`; plain slices implement
/// it for host-side callers and tests.
pub trait FrameInfo {
    /// Number of elements, as reported by the caller.
    fn len(&self) -> usize;

    /// Copies the first `out.len()` elements into `out`. Returns `false` if
    /// they could not be read.
    fn read_prefix(&self, out: &mut [i64]) -> bool;

    /// Whether the vector has no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameInfo for [i64] {
    fn len(&self) -> usize {
        <[i64]>::len(self)
    }

    fn read_prefix(&self, out: &mut [i64]) -> bool {
        match self.get(..out.len()) {
            Some(prefix) => {
                out.copy_from_slice(prefix);
                true
            }
            None => false,
        }
    }
}

/// Computes `now - frame_info[VSYNC_INDEX]` for every hooked call.
#[derive(Debug)]
pub struct FrameTimeSampler<C = SystemClock> {
    clock: C,
    pid: u32,
}

impl<C: MonotonicClock> FrameTimeSampler<C> {
    /// Sampler reading `clock` and tagging samples with `pid`.
    pub fn with_clock(clock: C, pid: u32) -> Self {
        Self { clock, pid }
    }

    /// The clock this sampler reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Measures one call without touching any shared state.
    pub fn measure<F: FrameInfo + ?Sized>(&self, frame_info: &F) -> ProbeResult<Sample> {
        let len = frame_info.len();
        if len < FRAME_INFO_FIELDS {
            return Err(ProbeError::MeasurementSkipped { len });
        }

        let mut fields = [0i64; FRAME_INFO_FIELDS];
        if !frame_info.read_prefix(&mut fields) {
            return Err(ProbeError::MeasurementSkipped { len });
        }

        let now = self.clock.now_nanos();
        // Runs on the host's render thread: must not panic on overflow.
        let frame_time_ns = now.wrapping_sub(fields[VSYNC_INDEX]);
        Ok(Sample {
            pid: self.pid,
            frame_time_ns,
        })
    }

    /// Measures one call and publishes the frame time into `slot`.
    ///
    /// The returned sample carries the slot's pid. Skips leave `slot`
    /// untouched.
    pub fn observe<F: FrameInfo + ?Sized>(
        &self,
        frame_info: &F,
        slot: &SharedSample,
    ) -> Option<Sample> {
        match self.measure(frame_info) {
            Ok(Sample { frame_time_ns, .. }) => {
                slot.store(frame_time_ns);
                trace!(pid = slot.pid(), frame_time_ns, "frame measured");
                Some(Sample {
                    pid: slot.pid(),
                    frame_time_ns,
                })
            }
            Err(err) => {
                trace!("{err}");
                None
            }
        }
    }
}
