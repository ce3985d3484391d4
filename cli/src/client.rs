use shared::ipc::{default_socket_path, Command, IpcError, Response};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Timeout for socket operations (5 seconds)
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Reply timeout for commands that may wait for an in-flight dispatch to
/// finish. Covers the daemon's pipeline request timeout with room to spare.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(180);

/// How long to wait for the daemon's answer to `cmd`.
fn reply_timeout(cmd: &Command) -> Duration {
    match cmd {
        Command::Start | Command::Stop | Command::Toggle => LIFECYCLE_TIMEOUT,
        _ => SOCKET_TIMEOUT,
    }
}

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self::with_socket_path(default_socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub async fn send_command(&self, cmd: Command) -> Result<Response, IpcError> {
        let mut stream = match timeout(SOCKET_TIMEOUT, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Connection timeout: failed to connect to daemon at {} within {:?}",
                    self.socket_path.display(),
                    SOCKET_TIMEOUT
                );
                return Err(IpcError::Timeout);
            }
        };

        let command_json = serde_json::to_vec(&cmd)?;
        let read_timeout = reply_timeout(&cmd);

        match timeout(SOCKET_TIMEOUT, stream.write_all(&command_json)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Write timeout: failed to send command to daemon within {:?}", SOCKET_TIMEOUT);
                return Err(IpcError::Timeout);
            }
        }

        // The daemon closes the connection after answering; history replies
        // can be larger than one read.
        let mut buffer = Vec::new();
        match timeout(read_timeout, stream.read_to_end(&mut buffer)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                warn!(
                    "Read timeout: failed to receive response from daemon within {:?}",
                    read_timeout
                );
                return Err(IpcError::Timeout);
            }
        }

        let response: Response = serde_json::from_slice(&buffer)?;

        Ok(response)
    }
}
