//! Filesystem preparation for cross-privilege access to the telemetry socket.
//!
//! ## Ordering
//!
//! 1. [`AccessProvisioner::prepare_directory`] before the socket is bound.
//! 2. [`AccessProvisioner::secure_socket`] after bind has created the entry;
//!    labeling a path that does not exist yet fails.
//!
//! Only directory creation is fatal. Permission bits and labels are applied
//! best-effort: a failure is logged and merely risks a client being refused
//! later.

use std::{
    ffi::{CString, OsStr},
    fs::{self, DirBuilder, Permissions},
    io,
    os::unix::{
        ffi::OsStrExt,
        fs::{DirBuilderExt, PermissionsExt},
    },
    path::Path,
};

use tracing::{debug, warn};

use crate::{
    config::ProbeConfig,
    error::{ProbeError, ProbeResult, SetupStage},
};

/// Applies a mandatory-access-control label to a filesystem entry.
pub trait SecurityLabeler: Send + Sync {
    /// Labels `path` with `label`.
    fn apply(&self, path: &Path, label: &str) -> ProbeResult<()>;
}

/// Labels through the `chcon` utility.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChconLabeler;

impl SecurityLabeler for ChconLabeler {
    fn apply(&self, path: &Path, label: &str) -> ProbeResult<()> {
        let labeling_error = |reason: String| ProbeError::Labeling {
            path: path.to_path_buf(),
            label: label.to_string(),
            reason,
        };

        let output = duct::cmd("chcon", [OsStr::new(label), path.as_os_str()])
            .stdout_null()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|err| labeling_error(format!("failed to run chcon: {err}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(labeling_error(format!(
                "chcon exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Labels by writing the `security.selinux` extended attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct XattrLabeler;

const SELINUX_XATTR: &[u8] = b"security.selinux\0";

impl SecurityLabeler for XattrLabeler {
    fn apply(&self, path: &Path, label: &str) -> ProbeResult<()> {
        let labeling_error = |reason: String| ProbeError::Labeling {
            path: path.to_path_buf(),
            label: label.to_string(),
            reason,
        };

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| labeling_error("path contains a NUL byte".to_string()))?;
        let c_label = CString::new(label)
            .map_err(|_| labeling_error("label contains a NUL byte".to_string()))?;
        let value = c_label.as_bytes_with_nul();

        // SAFETY: both strings are NUL-terminated and outlive the call; the
        // value pointer and length describe `value` exactly.
        let ret = unsafe {
            libc::lsetxattr(
                c_path.as_ptr(),
                SELINUX_XATTR.as_ptr().cast(),
                value.as_ptr().cast(),
                value.len(),
                0,
            )
        };
        if ret == 0 {
            Ok(())
        } else {
            Err(labeling_error(io::Error::last_os_error().to_string()))
        }
    }
}

/// Leaves labels untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLabeler;

impl SecurityLabeler for NoopLabeler {
    fn apply(&self, _path: &Path, _label: &str) -> ProbeResult<()> {
        Ok(())
    }
}

/// Prepares the socket directory and entry according to a [`ProbeConfig`].
pub struct AccessProvisioner<'a> {
    config: &'a ProbeConfig,
    labeler: &'a dyn SecurityLabeler,
}

impl<'a> AccessProvisioner<'a> {
    /// Creates a provisioner for `config` applying labels with `labeler`.
    pub fn new(config: &'a ProbeConfig, labeler: &'a dyn SecurityLabeler) -> Self {
        Self { config, labeler }
    }

    /// Ensures the containing directory exists with `dir_mode` and carries
    /// the configured label. Idempotent.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(dir = %self.config.module_dir.display())
    )]
    pub fn prepare_directory(&self) -> ProbeResult<()> {
        let dir = &self.config.module_dir;
        match DirBuilder::new().mode(self.config.dir_mode).create(dir) {
            Ok(()) => debug!("created {}", dir.display()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(ProbeError::SocketSetup {
                    stage: SetupStage::Directory,
                    path: dir.clone(),
                    source,
                });
            }
        }

        // mkdir honours the umask and an existing directory keeps its old bits.
        self.set_mode(dir, self.config.dir_mode);
        self.label(dir);
        Ok(())
    }

    /// Removes a socket left behind by an earlier process so bind can
    /// succeed. A missing entry is fine.
    pub fn remove_stale_socket(&self, socket_path: &Path) -> ProbeResult<()> {
        match fs::remove_file(socket_path) {
            Ok(()) => {
                debug!("removed stale socket {}", socket_path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ProbeError::SocketSetup {
                stage: SetupStage::Bind,
                path: socket_path.to_path_buf(),
                source,
            }),
        }
    }

    /// Opens up the freshly bound socket entry: `socket_mode` plus label.
    pub fn secure_socket(&self, socket_path: &Path) {
        self.set_mode(socket_path, self.config.socket_mode);
        self.label(socket_path);
    }

    fn set_mode(&self, path: &Path, mode: u32) {
        if let Err(err) = fs::set_permissions(path, Permissions::from_mode(mode)) {
            warn!("chmod {mode:o} {} failed: {err}", path.display());
        }
    }

    fn label(&self, path: &Path) {
        if let Err(err) = self.labeler.apply(path, &self.config.security_label) {
            warn!("{err}");
        }
    }
}
