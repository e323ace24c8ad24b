//! `#[repr(C)]` mirrors of the Zygisk module ABI, version 4.
//!
//! Only what this module touches is typed precisely. Argument structs are
//! mirrored up to the fields every v4 loader guarantees; they are only ever
//! handled by pointer, so the unmirrored tail is never read.

use std::{
    ffi::{CString, c_char, c_int, c_long, c_void},
    ptr::NonNull,
};

use frame_probe_core::{HookTarget, MethodPatcher};
use jni::sys::{JNIEnv, JNINativeMethod, jint, jintArray, jlong, jobjectArray, jstring};
use tracing::error;

/// ABI revision this module is built against.
pub const ZYGISK_API_VERSION: c_long = 4;

/// Function table handed to `zygisk_module_entry`.
#[repr(C)]
pub struct ApiTable {
    /// Loader private data.
    pub imp: *mut c_void,
    /// Registers the module's callbacks.
    pub register_module: Option<unsafe extern "C" fn(*mut ApiTable, *mut ModuleAbi) -> bool>,
    /// Swaps native method implementations; writes the previous entry point
    /// back into each `fnPtr`, or null when it could not be resolved.
    pub hook_jni_native_methods:
        Option<unsafe extern "C" fn(*mut JNIEnv, *const c_char, *mut JNINativeMethod, c_int)>,
    /// PLT hook registration, unused.
    pub plt_hook_register: Option<
        unsafe extern "C" fn(
            libc::dev_t,
            libc::ino_t,
            *const c_char,
            *mut c_void,
            *mut *mut c_void,
        ),
    >,
    /// Descriptor exemption, unused.
    pub exempt_fd: Option<unsafe extern "C" fn(c_int) -> bool>,
    /// PLT hook commit, unused.
    pub plt_hook_commit: Option<unsafe extern "C" fn() -> bool>,
    /// Companion connection, unused.
    pub connect_companion: Option<unsafe extern "C" fn(*mut c_void) -> c_int>,
    /// Module options, unused.
    pub set_option: Option<unsafe extern "C" fn(*mut c_void, c_int)>,
    /// Module directory descriptor, unused.
    pub get_module_dir: Option<unsafe extern "C" fn(*mut c_void) -> c_int>,
    /// Process flags, unused.
    pub get_flags: Option<unsafe extern "C" fn(*mut c_void) -> u32>,
}

/// Callbacks registered with the loader.
#[repr(C)]
pub struct ModuleAbi {
    /// Always [`ZYGISK_API_VERSION`].
    pub api_version: c_long,
    /// Passed back as the first argument of every callback.
    pub module: *mut c_void,
    /// Before an app process drops privileges.
    pub pre_app_specialize: unsafe extern "C" fn(*mut c_void, *mut AppSpecializeArgs),
    /// After an app process has been specialized.
    pub post_app_specialize: unsafe extern "C" fn(*mut c_void, *const AppSpecializeArgs),
    /// Before the system server specializes.
    pub pre_server_specialize: unsafe extern "C" fn(*mut c_void, *mut ServerSpecializeArgs),
    /// After the system server has specialized.
    pub post_server_specialize: unsafe extern "C" fn(*mut c_void, *const ServerSpecializeArgs),
}

/// Guaranteed prefix of the app specialization arguments. Every field points
/// into the loader's frame.
#[allow(missing_docs)]
#[repr(C)]
pub struct AppSpecializeArgs {
    pub uid: *mut jint,
    pub gid: *mut jint,
    pub gids: *mut jintArray,
    pub runtime_flags: *mut jint,
    pub rlimits: *mut jobjectArray,
    pub mount_external: *mut jint,
    pub se_info: *mut jstring,
    pub nice_name: *mut jstring,
    pub instruction_set: *mut jstring,
    pub app_data_dir: *mut jstring,
}

/// Guaranteed prefix of the system server specialization arguments.
#[allow(missing_docs)]
#[repr(C)]
pub struct ServerSpecializeArgs {
    pub uid: *mut jint,
    pub gid: *mut jint,
    pub gids: *mut jintArray,
    pub runtime_flags: *mut jint,
    pub permitted_capabilities: *mut jlong,
    pub effective_capabilities: *mut jlong,
}

/// Lifecycle callbacks of a Zygisk module.
pub trait ZygiskModule: 'static {
    /// Runs in the forked child before it becomes an app.
    fn pre_app_specialize(&mut self, _args: &mut AppSpecializeArgs) {}

    /// Runs once the app process is fully specialized.
    fn post_app_specialize(&mut self, _args: &AppSpecializeArgs) {}

    /// Runs before the system server specializes.
    fn pre_server_specialize(&mut self, _args: &mut ServerSpecializeArgs) {}

    /// Runs after the system server has specialized.
    fn post_server_specialize(&mut self, _args: &ServerSpecializeArgs) {}
}

impl ModuleAbi {
    /// Callback table dispatching to `module`.
    pub fn new<M: ZygiskModule>(module: &'static mut M) -> Self {
        Self {
            api_version: ZYGISK_API_VERSION,
            module: (module as *mut M).cast(),
            pre_app_specialize: pre_app_specialize::<M>,
            post_app_specialize: post_app_specialize::<M>,
            pre_server_specialize: pre_server_specialize::<M>,
            post_server_specialize: post_server_specialize::<M>,
        }
    }
}

// The loader calls these from a single thread with the `module` pointer
// registered in `ModuleAbi::new` and valid argument structs.

unsafe extern "C" fn pre_app_specialize<M: ZygiskModule>(
    module: *mut c_void,
    args: *mut AppSpecializeArgs,
) {
    // SAFETY: see above.
    if let (Some(module), Some(args)) = unsafe { (module.cast::<M>().as_mut(), args.as_mut()) } {
        module.pre_app_specialize(args);
    }
}

unsafe extern "C" fn post_app_specialize<M: ZygiskModule>(
    module: *mut c_void,
    args: *const AppSpecializeArgs,
) {
    // SAFETY: see above.
    if let (Some(module), Some(args)) = unsafe { (module.cast::<M>().as_mut(), args.as_ref()) } {
        module.post_app_specialize(args);
    }
}

unsafe extern "C" fn pre_server_specialize<M: ZygiskModule>(
    module: *mut c_void,
    args: *mut ServerSpecializeArgs,
) {
    // SAFETY: see above.
    if let (Some(module), Some(args)) = unsafe { (module.cast::<M>().as_mut(), args.as_mut()) } {
        module.pre_server_specialize(args);
    }
}

unsafe extern "C" fn post_server_specialize<M: ZygiskModule>(
    module: *mut c_void,
    args: *const ServerSpecializeArgs,
) {
    // SAFETY: see above.
    if let (Some(module), Some(args)) = unsafe { (module.cast::<M>().as_mut(), args.as_ref()) } {
        module.post_server_specialize(args);
    }
}

/// Safe handle over the loader's [`ApiTable`] and the zygote `JNIEnv`.
#[derive(Debug, Clone, Copy)]
pub struct ZygiskApi {
    table: NonNull<ApiTable>,
    env: *mut JNIEnv,
}

impl ZygiskApi {
    /// Wraps the arguments of `zygisk_module_entry`.
    ///
    /// # Safety
    ///
    /// `table` must point to a live v4 api table and `env` must be the
    /// calling thread's `JNIEnv`. Both must outlive the returned handle.
    pub unsafe fn from_raw(table: *mut ApiTable, env: *mut JNIEnv) -> Option<Self> {
        Some(Self {
            table: NonNull::new(table)?,
            env: NonNull::new(env)?.as_ptr(),
        })
    }

    /// The `JNIEnv` of the thread that loaded the module.
    pub fn env(&self) -> *mut JNIEnv {
        self.env
    }

    fn table(&self) -> &ApiTable {
        // SAFETY: guaranteed live by `from_raw`.
        unsafe { self.table.as_ref() }
    }

    /// Hands `abi` to the loader. Both must stay alive for the life of the
    /// process.
    pub fn register_module(&self, abi: &'static mut ModuleAbi) -> bool {
        let Some(register) = self.table().register_module else {
            error!("loader table has no registerModule");
            return false;
        };
        // SAFETY: the table pointer came from the loader and `abi` is leaked.
        unsafe { register(self.table.as_ptr(), abi) }
    }
}

impl MethodPatcher for ZygiskApi {
    fn install(&self, target: &HookTarget, replacement: *mut c_void) -> Option<NonNull<c_void>> {
        let hook = self.table().hook_jni_native_methods?;
        let class = CString::new(target.class).ok()?;
        let name = CString::new(target.method).ok()?;
        let signature = CString::new(target.signature).ok()?;

        let mut methods = [JNINativeMethod {
            name: name.as_ptr().cast_mut(),
            signature: signature.as_ptr().cast_mut(),
            fnPtr: replacement,
        }];
        // SAFETY: every pointer stays valid for the duration of the call and
        // `methods` holds exactly one entry.
        unsafe {
            hook(
                self.env,
                class.as_ptr(),
                methods.as_mut_ptr(),
                methods.len() as c_int,
            );
        }
        NonNull::new(methods[0].fnPtr)
    }
}
