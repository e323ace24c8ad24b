//! Probe configuration and fixed host contracts.

use std::path::PathBuf;

use crate::{
    interceptor::HookTarget,
    provision::{ChconLabeler, NoopLabeler, SecurityLabeler, XattrLabeler},
};

/// The render entry point the probe hooks.
///
/// `static jint nSyncAndDrawFrame(jlong proxy, jlongArray frameInfo, jint size)`
pub const SYNC_AND_DRAW_FRAME: HookTarget = HookTarget {
    class: "android/graphics/HardwareRenderer",
    method: "nSyncAndDrawFrame",
    signature: "(J[JI)I",
};

/// Number of leading frame-info fields the sampler reads.
pub const FRAME_INFO_FIELDS: usize = 4;

/// Index of the vsync deadline inside the frame-info vector.
pub const VSYNC_INDEX: usize = 3;

/// Kernel backlog of the telemetry socket. Clients are served one at a time.
pub const LISTEN_BACKLOG: i32 = 1;

/// How security labels are applied to the socket directory and entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelBackend {
    /// Run the `chcon` utility.
    #[default]
    Chcon,
    /// Write the `security.selinux` extended attribute directly.
    Xattr,
    /// Skip labeling. Useful on hosts without mandatory access control.
    Disabled,
}

impl LabelBackend {
    /// Builds the labeler for this backend.
    pub fn labeler(self) -> Box<dyn SecurityLabeler> {
        match self {
            Self::Chcon => Box::new(ChconLabeler),
            Self::Xattr => Box::new(XattrLabeler),
            Self::Disabled => Box::new(NoopLabeler),
        }
    }
}

/// Runtime configuration of the probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Directory that contains the telemetry socket.
    pub module_dir: PathBuf,
    /// File name of the socket inside `module_dir`.
    pub socket_name: String,
    /// Permission bits of `module_dir`.
    pub dir_mode: u32,
    /// Permission bits of the socket entry.
    pub socket_mode: u32,
    /// Security context applied to the directory and the socket.
    pub security_label: String,
    /// Labeling mechanism.
    pub label_backend: LabelBackend,
}

impl ProbeConfig {
    /// Full path of the telemetry socket.
    pub fn socket_path(&self) -> PathBuf {
        self.module_dir.join(&self.socket_name)
    }
}

impl Default for ProbeConfig {
    /// Matches the layout existing consumers connect to.
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("/data/adb/modules/fas_rs_next"),
            socket_name: "zygisk.sock".to_string(),
            dir_mode: 0o700,
            socket_mode: 0o666,
            security_label: "u:object_r:adb_data_file:s0".to_string(),
            label_backend: LabelBackend::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path() {
        let config = ProbeConfig::default();
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/data/adb/modules/fas_rs_next/zygisk.sock")
        );
        assert_eq!(config.dir_mode, 0o700);
        assert_eq!(config.socket_mode, 0o666);
    }

    #[test]
    fn vsync_field_is_inside_the_read_prefix() {
        assert!(VSYNC_INDEX < FRAME_INFO_FIELDS);
    }
}
