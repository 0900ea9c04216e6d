//! IPC Server
//!
//! This module provides a Unix socket server for IPC communication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::handler::IpcHandler;
use super::protocol::{
    decode_message, read_frame, write_frame, ErrorCode, Frame, IpcCommand, IpcResponse,
    MAX_MESSAGE_SIZE,
};
use crate::config::IpcConfig;
use crate::error::IpcError;

/// IPC server for handling control commands
pub struct IpcServer {
    /// Configuration
    config: IpcConfig,

    /// Command handler
    handler: Arc<IpcHandler>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(config: IpcConfig, handler: Arc<IpcHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    /// Run the IPC server until a shutdown signal or a `shutdown` command
    pub async fn run(&self) -> Result<(), IpcError> {
        if !self.config.enabled {
            info!("IPC server disabled");
            return Ok(());
        }

        let socket_path = &self.config.socket_path;
        let listener = bind_socket(socket_path, self.config.socket_mode)?;

        info!("IPC server listening on {:?}", socket_path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            let shutdown_tx = self.shutdown_tx.clone();
                            let max_size = self.config.max_message_size;

                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, handler, shutdown_tx, max_size).await
                                {
                                    debug!("IPC connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("IPC accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        if socket_path.exists() {
            if let Err(e) = std::fs::remove_file(socket_path) {
                warn!("Failed to remove socket {:?}: {}", socket_path, e);
            }
        }

        Ok(())
    }

    /// Get a shutdown signal sender
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Replace any stale socket file and bind a listener with `mode`
fn bind_socket(socket_path: &Path, mode: u32) -> Result<UnixListener, IpcError> {
    let creation_error = |reason: String| IpcError::SocketCreation {
        path: socket_path.display().to_string(),
        reason,
    };

    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .map_err(|e| creation_error(format!("Failed to remove existing socket: {e}")))?;
    }

    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| creation_error(format!("Failed to create parent directory: {e}")))?;
        }
    }

    let listener = UnixListener::bind(socket_path).map_err(|e| IpcError::BindError {
        path: socket_path.display().to_string(),
        reason: e.to_string(),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| creation_error(format!("Failed to set permissions: {e}")))?;
    }

    Ok(listener)
}

/// Handle a single IPC connection
async fn handle_connection(
    mut stream: UnixStream,
    handler: Arc<IpcHandler>,
    shutdown_tx: broadcast::Sender<()>,
    max_message_size: usize,
) -> Result<(), IpcError> {
    debug!("New IPC connection");

    loop {
        let body = match read_frame(&mut stream, max_message_size).await? {
            Frame::Body(body) => body,
            Frame::Closed => {
                debug!("IPC client disconnected");
                return Ok(());
            }
            // The body is not read, so the stream can't be resynchronized.
            Frame::Oversized(len) => {
                warn!(
                    "IPC message too large: {} bytes (max {})",
                    len, max_message_size
                );
                let response = IpcResponse::error(
                    ErrorCode::InvalidParameters,
                    format!("Message too large: {len} bytes"),
                );
                return write_frame(&mut stream, &response).await;
            }
        };

        let command: IpcCommand = match decode_message(&body) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Invalid IPC command: {}", e);
                let response = IpcResponse::error(
                    ErrorCode::InvalidCommand,
                    format!("Invalid command format: {e}"),
                );
                write_frame(&mut stream, &response).await?;
                continue;
            }
        };

        let is_shutdown = matches!(command, IpcCommand::Shutdown);

        let response = handler.handle(command).await;
        write_frame(&mut stream, &response).await?;

        if is_shutdown {
            info!("Shutdown requested over IPC");
            let _ = shutdown_tx.send(());
            return Ok(());
        }
    }
}

/// IPC client for connecting to the server
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Send a command and receive a response
    pub async fn send(&self, command: IpcCommand) -> Result<IpcResponse, IpcError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::ConnectionError(e.to_string()))?;

        write_frame(&mut stream, &command).await?;

        match read_frame(&mut stream, MAX_MESSAGE_SIZE).await? {
            Frame::Body(body) => {
                decode_message(&body).map_err(|e| IpcError::protocol(e.to_string()))
            }
            Frame::Oversized(len) => Err(IpcError::protocol(format!(
                "Response too large: {len} bytes"
            ))),
            Frame::Closed => Err(IpcError::ConnectionError(
                "server closed the connection without a response".into(),
            )),
        }
    }

    /// Send a ping command
    pub async fn ping(&self) -> Result<bool, IpcError> {
        let response = self.send(IpcCommand::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }
}
