//! Local stream-socket endpoint that reports the latest sample.
//!
//! Every accepted connection gets exactly one `"<pid>:<frame_time_ns>\n"`
//! line and is closed. Inbound data is never read. Clients are served one at
//! a time from a single thread with a kernel backlog of
//! [`LISTEN_BACKLOG`].

use std::{
    io,
    os::{
        fd::AsRawFd,
        unix::net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info, trace};

use crate::{
    config::{LISTEN_BACKLOG, ProbeConfig},
    error::{ProbeError, ProbeResult, SetupStage},
    provision::{AccessProvisioner, SecurityLabeler},
    sample::{Sample, SharedSample},
};

/// Name of the thread started by [`TelemetryServer::spawn`].
pub const TELEMETRY_THREAD_NAME: &str = "frame-probe-telemetry";

/// Unbound telemetry server.
pub struct TelemetryServer {
    config: ProbeConfig,
    sample: Arc<SharedSample>,
    labeler: Box<dyn SecurityLabeler>,
}

impl TelemetryServer {
    /// Server publishing `sample` at `config.socket_path()`, labeling with
    /// the configured backend.
    pub fn new(config: &ProbeConfig, sample: Arc<SharedSample>) -> Self {
        Self {
            config: config.clone(),
            sample,
            labeler: config.label_backend.labeler(),
        }
    }

    /// Replaces the labeler chosen from the configuration.
    pub fn with_labeler(mut self, labeler: Box<dyn SecurityLabeler>) -> Self {
        self.labeler = labeler;
        self
    }

    /// Prepares the directory, binds the socket, opens it up to other
    /// principals and starts listening.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(path = %self.config.socket_path().display())
    )]
    pub fn bind(&self) -> ProbeResult<BoundServer> {
        let provisioner = AccessProvisioner::new(&self.config, self.labeler.as_ref());
        let path = self.config.socket_path();

        provisioner.prepare_directory()?;
        provisioner.remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|source| ProbeError::SocketSetup {
            stage: SetupStage::Bind,
            path: path.clone(),
            source,
        })?;
        provisioner.secure_socket(&path);

        // std listens with a large backlog; listening again only resizes it.
        // SAFETY: the descriptor is owned by `listener` and stays open.
        let ret = unsafe { libc::listen(listener.as_raw_fd(), LISTEN_BACKLOG) };
        if ret != 0 {
            return Err(ProbeError::SocketSetup {
                stage: SetupStage::Listen,
                path,
                source: io::Error::last_os_error(),
            });
        }

        info!("telemetry listening on {}", path.display());
        Ok(BoundServer {
            listener,
            path,
            sample: Arc::clone(&self.sample),
        })
    }

    /// Binds and serves until the process exits. Returns only when setup
    /// fails, after logging the failure.
    pub fn run(self) {
        match self.bind() {
            Ok(server) => server.serve_forever(),
            Err(err) => error!("telemetry disabled: {err}"),
        }
    }

    /// Runs [`run`](Self::run) on a detached background thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(TELEMETRY_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }
}

/// A listening telemetry socket.
#[derive(Debug)]
pub struct BoundServer {
    listener: UnixListener,
    path: PathBuf,
    sample: Arc<SharedSample>,
}

impl BoundServer {
    /// Filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts one client, writes the current sample and closes the
    /// connection. Returns the sample that was sent.
    pub fn serve_one(&self) -> io::Result<Sample> {
        let (stream, _) = self.listener.accept()?;
        let sample = self.sample.load();
        send_reply(&stream, &format!("{sample}\n"))?;
        Ok(sample)
    }

    /// Serves clients forever. Failed accepts and vanished peers are logged
    /// and the loop carries on.
    pub fn serve_forever(&self) -> ! {
        loop {
            match self.serve_one() {
                Ok(sample) => trace!(%sample, "telemetry reply sent"),
                Err(err) => debug!("telemetry client dropped: {err}"),
            }
        }
    }
}

/// Writes `reply` in one call without raising `SIGPIPE` in the host.
fn send_reply(stream: &UnixStream, reply: &str) -> io::Result<()> {
    let bytes = reply.as_bytes();
    // SAFETY: the descriptor belongs to `stream`; the buffer pointer and
    // length describe `bytes`.
    let sent = unsafe {
        libc::send(
            stream.as_raw_fd(),
            bytes.as_ptr().cast(),
            bytes.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    if sent as usize != bytes.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short telemetry reply: {sent} of {} bytes", bytes.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::Read,
        os::unix::fs::{FileTypeExt, PermissionsExt},
    };

    use super::*;
    use crate::config::LabelBackend;

    fn config_in(root: &Path) -> ProbeConfig {
        ProbeConfig {
            module_dir: root.join("module"),
            label_backend: LabelBackend::Disabled,
            ..ProbeConfig::default()
        }
    }

    fn read_reply(path: &Path) -> String {
        let mut stream = UnixStream::connect(path).expect("connect");
        let mut reply = String::new();
        stream.read_to_string(&mut reply).expect("read to EOF");
        reply
    }

    #[test]
    fn replies_with_current_sample_then_closes() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        let sample = Arc::new(SharedSample::new(77));
        let server = TelemetryServer::new(&config, Arc::clone(&sample))
            .bind()
            .expect("bind");

        let path = server.path().to_path_buf();
        let client = thread::spawn(move || read_reply(&path));
        assert_eq!(server.serve_one().expect("serve"), Sample::sentinel(77));
        assert_eq!(client.join().expect("client"), "77:0\n");

        sample.store(16_666_667);
        let path = server.path().to_path_buf();
        let client = thread::spawn(move || read_reply(&path));
        server.serve_one().expect("serve");
        assert_eq!(client.join().expect("client"), "77:16666667\n");
    }

    #[test]
    fn socket_is_world_accessible() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        let server = TelemetryServer::new(&config, Arc::new(SharedSample::new(1)))
            .bind()
            .expect("bind");

        let meta = fs::metadata(server.path()).expect("metadata");
        assert!(meta.file_type().is_socket());
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);
        let dir_mode = fs::metadata(&config.module_dir)
            .expect("dir metadata")
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn stale_entry_is_replaced() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        fs::create_dir(&config.module_dir).expect("dir");
        fs::write(config.socket_path(), b"left over").expect("stale entry");

        let server = TelemetryServer::new(&config, Arc::new(SharedSample::new(1)))
            .bind()
            .expect("bind over stale entry");
        assert!(
            fs::metadata(server.path())
                .expect("metadata")
                .file_type()
                .is_socket()
        );
    }

    #[test]
    fn unreachable_directory_fails_before_bind() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = ProbeConfig {
            module_dir: root.path().join("missing").join("module"),
            ..config_in(root.path())
        };

        let err = TelemetryServer::new(&config, Arc::new(SharedSample::new(1)))
            .bind()
            .expect_err("no parent directory");
        assert!(matches!(
            err,
            ProbeError::SocketSetup {
                stage: SetupStage::Directory,
                ..
            }
        ));
    }

    #[test]
    fn peer_that_hung_up_does_not_stop_the_server() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        let server = TelemetryServer::new(&config, Arc::new(SharedSample::new(3)))
            .bind()
            .expect("bind");

        // Connect and drop before the server gets to it.
        drop(UnixStream::connect(server.path()).expect("connect"));
        let _ = server.serve_one();

        let path = server.path().to_path_buf();
        let client = thread::spawn(move || read_reply(&path));
        server.serve_one().expect("serve after dropped peer");
        assert_eq!(client.join().expect("client"), "3:0\n");
    }

    #[test]
    fn spawned_server_runs_on_named_thread() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = config_in(root.path());
        let handle = TelemetryServer::new(&config, Arc::new(SharedSample::new(11)))
            .spawn()
            .expect("spawn");
        assert_eq!(handle.thread().name(), Some(TELEMETRY_THREAD_NAME));

        let path = config.socket_path();
        let reply = (0..200)
            .find_map(|_| match UnixStream::connect(&path) {
                Ok(mut stream) => {
                    let mut reply = String::new();
                    stream.read_to_string(&mut reply).ok().map(|_| reply)
                }
                Err(_) => {
                    thread::sleep(std::time::Duration::from_millis(10));
                    None
                }
            })
            .expect("server came up");
        assert_eq!(reply, "11:0\n");
    }
}
