use std::env;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use serde::de::DeserializeOwned;

use uipilot_common::process_alive;

use crate::error::ChannelError;
use crate::protocol::ControlRequest;
use crate::protocol::WireRequest;
use crate::protocol::WireResponse;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory where control sockets live. Overridable for tests via
/// `UIPILOT_SOCKET_DIR`.
pub fn socket_dir() -> PathBuf {
    if let Ok(dir) = env::var("UIPILOT_SOCKET_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }
    env::temp_dir()
}

/// Control socket path for the application with the given pid.
pub fn socket_path_for_pid(pid: u32) -> PathBuf {
    socket_dir().join(format!("uipilot-{pid}.sock"))
}

/// Synchronous client end of a control channel.
///
/// Each call opens a fresh connection, writes one request line and blocks
/// until the response line arrives. The channel itself holds no open stream,
/// so it is cheap to keep around for the lifetime of a session.
#[derive(Debug)]
pub struct ControlChannel {
    path: PathBuf,
    target_pid: Option<u32>,
    next_id: AtomicU64,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ControlChannel {
    /// Connects to the application with the given pid, polling until the
    /// host is accepting or the timeout elapses.
    pub fn connect(pid: u32, timeout: Duration) -> Result<ControlChannel, ChannelError> {
        Self::connect_with(socket_path_for_pid(pid), Some(pid), timeout)
    }

    /// Connects to an explicit socket path. No liveness checks are possible
    /// without a pid, so a dead peer surfaces as an i/o fault.
    pub fn connect_path(
        path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<ControlChannel, ChannelError> {
        Self::connect_with(path.into(), None, timeout)
    }

    fn connect_with(
        path: PathBuf,
        target_pid: Option<u32>,
        timeout: Duration,
    ) -> Result<ControlChannel, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pid) = target_pid {
                if !process_alive(pid) {
                    return Err(ChannelError::TargetExited { pid });
                }
            }

            if let Ok(stream) = UnixStream::connect(&path) {
                drop(stream);
                return Ok(ControlChannel {
                    path,
                    target_pid,
                    next_id: AtomicU64::new(1),
                    read_timeout: DEFAULT_READ_TIMEOUT,
                    write_timeout: DEFAULT_WRITE_TIMEOUT,
                });
            }

            if Instant::now() >= deadline {
                return Err(ChannelError::ConnectionTimeout {
                    path,
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(CONNECT_POLL_INTERVAL);
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the host end is currently accepting connections.
    pub fn is_listening(&self) -> bool {
        UnixStream::connect(&self.path).is_ok()
    }

    /// Sends one operation and blocks for its typed result.
    pub fn call<T: DeserializeOwned>(&self, op: ControlRequest) -> Result<T, ChannelError> {
        let mut stream = UnixStream::connect(&self.path).map_err(|e| self.fault(e))?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.write_timeout))?;

        let request = WireRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            op,
        };
        let request_json = serde_json::to_string(&request)?;

        writeln!(stream, "{request_json}").map_err(|e| self.fault(e))?;
        stream.flush().map_err(|e| self.fault(e))?;

        let mut reader = BufReader::new(&stream);
        let mut response_line = String::new();
        let read = reader.read_line(&mut response_line).map_err(|e| self.fault(e))?;
        if read == 0 {
            return Err(self.fault(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before a response arrived",
            )));
        }

        let response: WireResponse = serde_json::from_str(&response_line)?;
        if response.id != request.id {
            return Err(ChannelError::Protocol(format!(
                "response id {} does not match request id {}",
                response.id, request.id
            )));
        }

        Ok(serde_json::from_value(response.result)?)
    }

    /// Maps an i/o failure to [`ChannelError::TargetExited`] when the
    /// target process is known and gone.
    fn fault(&self, error: std::io::Error) -> ChannelError {
        if let Some(pid) = self.target_pid {
            if !process_alive(pid) {
                return ChannelError::TargetExited { pid };
            }
        }
        ChannelError::ChannelFault(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_embeds_pid() {
        let path = socket_path_for_pid(4711);
        let name = path.file_name().unwrap().to_string_lossy();
        assert_eq!(name, "uipilot-4711.sock");
    }

    #[test]
    fn test_connect_times_out_against_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uipilot-absent.sock");

        let started = Instant::now();
        let result = ControlChannel::connect_path(&path, Duration::from_millis(200));

        match result {
            Err(ChannelError::ConnectionTimeout { waited_ms, .. }) => {
                assert_eq!(waited_ms, 200);
            }
            Err(other) => panic!("expected ConnectionTimeout, got {other}"),
            Ok(_) => panic!("expected ConnectionTimeout, got a connection"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_connect_fails_fast_when_target_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let started = Instant::now();
        let result = ControlChannel::connect(pid, Duration::from_secs(30));

        match result {
            Err(ChannelError::TargetExited { pid: reported }) => assert_eq!(reported, pid),
            Err(other) => panic!("expected TargetExited, got {other}"),
            Ok(_) => panic!("expected TargetExited, got a connection"),
        }
        // Dead-pid detection must beat the 30s connect timeout.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
