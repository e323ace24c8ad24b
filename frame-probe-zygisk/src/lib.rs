//! Zygisk module that samples per-frame render latency in app processes.
//!
//! The loader calls [`zygisk_module_entry`] in every forked child. Before
//! specialization the module hooks `HardwareRenderer.nSyncAndDrawFrame`;
//! afterwards it starts the telemetry thread. Every render call then passes
//! through [`sync_and_draw_frame`], which records the frame time and forwards
//! to the original.
#![deny(missing_docs, clippy::unwrap_used)]

pub mod abi;
pub mod frame_info;
pub mod logging;

use std::{
    ffi::c_void,
    sync::{Arc, OnceLock},
};

use frame_probe_core::{ProbeConfig, ProbeContext};
use jni::{
    JNIEnv,
    objects::JString,
    sys::{self, jclass, jint, jlong, jlongArray},
};
use tracing::{debug, error, info, warn};

use crate::{
    abi::{ApiTable, AppSpecializeArgs, ModuleAbi, ZygiskApi, ZygiskModule},
    frame_info::JniFrameInfo,
};

/// Native signature of `nSyncAndDrawFrame(J[JI)I`.
pub type SyncAndDrawFrameFn =
    unsafe extern "system" fn(*mut sys::JNIEnv, jclass, jlong, jlongArray, jint) -> jint;

/// `SYNC_OK` of the renderer's sync result bit set.
const SYNC_OK: jint = 0;

/// Probe state of this process. The trampoline is a bare native function and
/// reaches its context only through here.
static CONTEXT: OnceLock<Arc<ProbeContext>> = OnceLock::new();

fn context() -> &'static Arc<ProbeContext> {
    CONTEXT.get_or_init(|| Arc::new(ProbeContext::new(ProbeConfig::default())))
}

/// Replacement for `HardwareRenderer.nSyncAndDrawFrame`.
///
/// # Safety
///
/// Called by the runtime with the arguments of the original native method.
pub unsafe extern "system" fn sync_and_draw_frame(
    env: *mut sys::JNIEnv,
    clazz: jclass,
    proxy: jlong,
    frame_info: jlongArray,
    size: jint,
) -> jint {
    // Only reachable once the hook has been installed, which sets both.
    let Some(context) = CONTEXT.get() else {
        return SYNC_OK;
    };
    let Some(original) = context.interceptor().original() else {
        return SYNC_OK;
    };

    // SAFETY: `original` was read back from this method's registration slot.
    let original: SyncAndDrawFrameFn = unsafe { original.cast() };
    // SAFETY: both come straight from the runtime for this call.
    let view = unsafe { JniFrameInfo::from_raw(env, frame_info) };

    context.intercept(&view, || {
        // SAFETY: same arguments, same thread, same native signature.
        unsafe { original(env, clazz, proxy, frame_info, size) }
    })
}

struct FrameProbeModule {
    api: ZygiskApi,
}

impl FrameProbeModule {
    fn on_load(api: ZygiskApi) -> Self {
        debug!("frame probe loaded");
        Self { api }
    }

    fn process_name(&self, args: &AppSpecializeArgs) -> Option<String> {
        if args.nice_name.is_null() {
            return None;
        }
        // SAFETY: non-null fields point into the loader's argument frame.
        let raw = unsafe { *args.nice_name };
        if raw.is_null() {
            return None;
        }

        // SAFETY: the loader's env belongs to this thread; `raw` is a live
        // local reference owned by the caller.
        let mut env = unsafe { JNIEnv::from_raw(self.api.env()) }.ok()?;
        // SAFETY: see above.
        let name = unsafe { JString::from_raw(raw) };
        match env.get_string(&name) {
            Ok(name) => Some(name.into()),
            Err(err) => {
                warn!("failed to read process name: {err}");
                let _ = env.exception_clear();
                None
            }
        }
    }
}

impl ZygiskModule for FrameProbeModule {
    fn pre_app_specialize(&mut self, args: &mut AppSpecializeArgs) {
        let name = self.process_name(args);
        let context = context();
        let hooked = context.install_hook(&self.api, sync_and_draw_frame as *mut c_void);
        info!(
            process = name.as_deref().unwrap_or("<unknown>"),
            pid = context.latest().pid,
            hooked,
            "app specializing"
        );
    }

    fn post_app_specialize(&mut self, _args: &AppSpecializeArgs) {
        if context().start_telemetry().is_some() {
            info!("telemetry thread started");
        }
    }
}

/// Module entry point looked up by the Zygisk loader.
///
/// # Safety
///
/// Must only be called by the loader, with its v4 api table and the calling
/// thread's `JNIEnv`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zygisk_module_entry(table: *mut ApiTable, env: *mut sys::JNIEnv) {
    logging::init();

    // SAFETY: upheld by the caller.
    let Some(api) = (unsafe { ZygiskApi::from_raw(table, env) }) else {
        error!("zygisk handed us a null api table or env");
        return;
    };

    let module = Box::leak(Box::new(FrameProbeModule::on_load(api)));
    let abi = Box::leak(Box::new(ModuleAbi::new(module)));
    if !api.register_module(abi) {
        error!("zygisk rejected module registration");
    }
}
