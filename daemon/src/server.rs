use shared::ipc::{Command, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::rate_limit::CommandRateLimiter;
use crate::session::Session;

const MAX_COMMAND_BYTES: usize = 1024;

/// Unix-socket front end for the session controller. One JSON command per
/// connection, answered with one JSON response.
pub struct DaemonServer {
    socket_path: PathBuf,
    session: Session,
    rate_limiter: Arc<CommandRateLimiter>,
}

impl DaemonServer {
    pub fn new(socket_path: PathBuf, session: Session, rate_limiter: CommandRateLimiter) -> Self {
        Self {
            socket_path,
            session,
            rate_limiter: Arc::new(rate_limiter),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let socket_path = self.socket_path.clone();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        info!("Starting socket server at {}", socket_path.display());

        let listener = UnixListener::bind(&socket_path)?;
        debug!("Listener bound successfully");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _addr)) => {
                    debug!("Connection accepted");
                    let session = self.session.clone();
                    let rate_limiter = Arc::clone(&self.rate_limiter);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(session, rate_limiter, stream).await {
                            error!("Error handling connection: {}", e);
                        } else {
                            debug!("Connection handled successfully");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(&socket_path) {
            warn!("Failed to remove socket {}: {}", socket_path.display(), e);
        }

        info!("Socket server stopped");
        Ok(())
    }

    async fn handle_connection(
        session: Session,
        rate_limiter: Arc<CommandRateLimiter>,
        mut stream: UnixStream,
    ) -> anyhow::Result<()> {
        let mut buffer = vec![0u8; MAX_COMMAND_BYTES];
        let n = stream.read(&mut buffer).await?;

        if n == 0 {
            return Ok(());
        }

        buffer.truncate(n);

        let response = match serde_json::from_slice::<Command>(&buffer) {
            Ok(command) if rate_limiter.check() => {
                debug!("Received command: {:?}", command);
                Self::execute(&session, command).await
            }
            Ok(command) => {
                warn!("Rate limited command: {:?}", command);
                Response::Error("Too many commands, slow down".to_string())
            }
            Err(e) => {
                warn!("Malformed command: {}", e);
                Response::Error(format!("Malformed command: {}", e))
            }
        };

        let response_json = serde_json::to_vec(&response)?;
        stream.write_all(&response_json).await?;
        stream.shutdown().await?;

        debug!("Sent response: {:?}", response);

        Ok(())
    }

    pub async fn execute(session: &Session, command: Command) -> Response {
        match command {
            Command::Start => match session.start().await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error(e.to_string()),
            },
            Command::Stop => {
                session.stop().await;
                Response::Ok
            }
            Command::Toggle => match session.toggle().await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error(e.to_string()),
            },
            Command::Poll => Response::Snapshot(session.poll_latest()),
            Command::History => Response::History(session.history()),
            Command::ClearHistory => {
                session.clear_history();
                Response::Ok
            }
        }
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
