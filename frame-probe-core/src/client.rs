//! Consumer side of the telemetry socket.

use std::{io::Read, os::unix::net::UnixStream, path::Path, time::Duration};

use crate::{
    error::{ProbeError, ProbeResult},
    sample::Sample,
};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects to `path` and returns the reply text exactly as sent.
pub fn query_raw(path: impl AsRef<Path>) -> ProbeResult<String> {
    let path = path.as_ref();
    let connect_error = |source| ProbeError::Connect {
        path: path.to_path_buf(),
        source,
    };

    let mut stream = UnixStream::connect(path).map_err(connect_error)?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(connect_error)?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply).map_err(connect_error)?;
    Ok(reply)
}

/// Connects to `path` and parses the reply.
pub fn query(path: impl AsRef<Path>) -> ProbeResult<Sample> {
    query_raw(path)?.parse()
}
