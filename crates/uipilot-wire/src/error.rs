use std::path::PathBuf;

use thiserror::Error;

/// Failures raised on the driving side of a control channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("timed out connecting to control channel at {} after {waited_ms}ms", path.display())]
    ConnectionTimeout { path: PathBuf, waited_ms: u64 },

    #[error("target process {pid} exited")]
    TargetExited { pid: u32 },

    #[error("control channel i/o failure: {0}")]
    ChannelFault(#[from] std::io::Error),

    #[error("failed to spawn application: {0}")]
    Spawn(std::io::Error),

    #[error("message encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("remote operation failed: {}", messages.join("; "))]
    Remote { messages: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_timeout_display() {
        let err = ChannelError::ConnectionTimeout {
            path: PathBuf::from("/tmp/uipilot-42.sock"),
            waited_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "timed out connecting to control channel at /tmp/uipilot-42.sock after 1500ms"
        );
    }

    #[test]
    fn test_target_exited_display() {
        let err = ChannelError::TargetExited { pid: 4711 };
        assert_eq!(err.to_string(), "target process 4711 exited");
    }

    #[test]
    fn test_remote_failure_joins_messages() {
        let err = ChannelError::Remote {
            messages: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "remote operation failed: first; second"
        );
    }
}
