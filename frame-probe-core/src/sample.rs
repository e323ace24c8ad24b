//! The latest frame-time measurement and its lock-free slot.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicI64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// One frame-time measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Process that produced the measurement.
    pub pid: u32,
    /// Monotonic time at interception minus the vsync deadline.
    pub frame_time_ns: i64,
}

impl Sample {
    /// Value reported before any frame has been measured.
    pub const fn sentinel(pid: u32) -> Self {
        Self {
            pid,
            frame_time_ns: 0,
        }
    }

    /// Frame time in milliseconds.
    pub fn frame_time_ms(&self) -> f64 {
        self.frame_time_ns as f64 / 1_000_000.0
    }
}

/// Wire form without the trailing newline: `"<pid>:<frame_time_ns>"`.
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.frame_time_ns)
    }
}

impl FromStr for Sample {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProbeError::InvalidReply {
            reply: s.to_string(),
        };
        let line = s.strip_suffix('\n').unwrap_or(s);
        let (pid, frame_time_ns) = line.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            pid: pid.parse().map_err(|_| invalid())?,
            frame_time_ns: frame_time_ns.parse().map_err(|_| invalid())?,
        })
    }
}

/// Single-slot storage for the latest [`Sample`].
///
/// The pid is fixed at construction; the frame time is one aligned
/// word-sized atomic updated with relaxed stores. Every loaded pair therefore
/// carries this process's pid and a frame time from some completed store.
/// Readers may lag the newest frame.
#[derive(Debug)]
pub struct SharedSample {
    pid: u32,
    frame_time_ns: AtomicI64,
}

impl SharedSample {
    /// Creates the slot holding the sentinel for `pid`.
    pub const fn new(pid: u32) -> Self {
        Self {
            pid,
            frame_time_ns: AtomicI64::new(0),
        }
    }

    /// Process the slot reports for.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Last-writer-wins update of the frame time.
    pub fn store(&self, frame_time_ns: i64) {
        self.frame_time_ns.store(frame_time_ns, Ordering::Relaxed);
    }

    /// Reads the current value.
    pub fn load(&self) -> Sample {
        Sample {
            pid: self.pid,
            frame_time_ns: self.frame_time_ns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use rstest::rstest;

    use super::*;

    #[test]
    fn starts_at_sentinel() {
        let slot = SharedSample::new(42);
        assert_eq!(slot.load(), Sample::sentinel(42));
    }

    #[test]
    fn last_store_wins() {
        let slot = SharedSample::new(7);
        slot.store(10);
        slot.store(-3);
        assert_eq!(
            slot.load(),
            Sample {
                pid: 7,
                frame_time_ns: -3
            }
        );
    }

    #[test]
    fn display_is_wire_form() {
        let sample = Sample {
            pid: 1234,
            frame_time_ns: 2_000_000,
        };
        assert_eq!(sample.to_string(), "1234:2000000");
        assert_eq!(sample.frame_time_ms(), 2.0);
    }

    #[rstest]
    #[case("1234:2000000\n", 1234, 2_000_000)]
    #[case("1:0", 1, 0)]
    #[case("99:-15\n", 99, -15)]
    fn parses_reply(#[case] reply: &str, #[case] pid: u32, #[case] frame_time_ns: i64) {
        let sample: Sample = reply.parse().expect("valid reply");
        assert_eq!(sample, Sample { pid, frame_time_ns });
    }

    #[rstest]
    #[case("")]
    #[case("1234")]
    #[case("abc:10\n")]
    #[case("12:ten\n")]
    #[case("12:10\n\n")]
    fn rejects_malformed_reply(#[case] reply: &str) {
        assert!(matches!(
            reply.parse::<Sample>(),
            Err(ProbeError::InvalidReply { .. })
        ));
    }

    #[test]
    fn concurrent_reads_never_tear() {
        // Each written value carries the same 31-bit counter in both halves.
        fn encode(k: i64) -> i64 {
            (k << 32) | k
        }

        let slot = Arc::new(SharedSample::new(5));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut observed = 0usize;
                    loop {
                        let finished = done.load(Ordering::Acquire);
                        let sample = slot.load();
                        let value = sample.frame_time_ns;
                        assert_eq!(sample.pid, 5);
                        assert_eq!(value >> 32, value & 0xFFFF_FFFF, "torn read {value:#x}");
                        observed += 1;
                        if finished {
                            break observed;
                        }
                    }
                })
            })
            .collect();

        for k in 0..200_000i64 {
            slot.store(encode(k));
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            assert!(reader.join().expect("reader panicked") > 0);
        }
        assert_eq!(slot.load().frame_time_ns, encode(199_999));
    }
}
