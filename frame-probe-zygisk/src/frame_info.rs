//! [`FrameInfo`] over the `long[]` the renderer passes to the hooked call.

use frame_probe_core::FrameInfo;
use jni::{
    JNIEnv,
    objects::JLongArray,
    sys::{self, jlongArray},
};

/// Borrowed view of a JNI `long[]` for the duration of one native call.
///
/// Any JNI failure reads as an empty or unreadable vector so the sampler
/// skips the frame; a pending Java exception is cleared first so the
/// original call runs with a clean environment.
pub struct JniFrameInfo<'local> {
    env: Option<JNIEnv<'local>>,
    array: JLongArray<'local>,
}

impl<'local> JniFrameInfo<'local> {
    /// Wraps the raw arguments of the native call.
    ///
    /// # Safety
    ///
    /// `env` must be the calling thread's `JNIEnv` or null, and `array` a
    /// local reference valid for `'local` or null.
    pub unsafe fn from_raw(env: *mut sys::JNIEnv, array: jlongArray) -> Self {
        // SAFETY: upheld by the caller.
        unsafe {
            Self {
                env: JNIEnv::from_raw(env).ok(),
                array: JLongArray::from_raw(array),
            }
        }
    }

    fn clear_exception(env: &JNIEnv<'local>) {
        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_clear();
        }
    }
}

impl FrameInfo for JniFrameInfo<'_> {
    fn len(&self) -> usize {
        let Some(env) = &self.env else {
            return 0;
        };
        if self.array.is_null() {
            return 0;
        }
        match env.get_array_length(&self.array) {
            Ok(len) => usize::try_from(len).unwrap_or(0),
            Err(_) => {
                Self::clear_exception(env);
                0
            }
        }
    }

    fn read_prefix(&self, out: &mut [i64]) -> bool {
        let Some(env) = &self.env else {
            return false;
        };
        match env.get_long_array_region(&self.array, 0, out) {
            Ok(()) => true,
            Err(_) => {
                Self::clear_exception(env);
                false
            }
        }
    }
}
