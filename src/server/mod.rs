//! Pasteboard server: named pasteboards shared between client processes.
//!
//! The server listens on a Unix domain socket. Every connection gets a
//! task of its own; all of them share one [`registry::PasteboardRegistry`].
//! There is no central loop: each pasteboard guards its own state, so a
//! reader waiting on a slow owner never holds up unrelated clients.

mod callback;
mod connection;
mod generation;
mod handler;
mod pasteboard;
pub mod registry;
pub mod types;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};

use registry::{PasteboardRegistry, ServerConfig};

/// Server startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("$XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    #[error("server already running at {0}")]
    AlreadyRunning(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    MkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the server until SIGTERM or SIGINT.
///
/// `socket` overrides the default `$XDG_RUNTIME_DIR/pasteboard/server.sock`.
/// All state is in memory and lost on exit.
pub async fn run(socket: Option<PathBuf>, config: ServerConfig) -> Result<(), ServerError> {
    let socket_path = match socket {
        Some(path) => path,
        None => default_socket_path()?,
    };
    let listener = bind_socket(&socket_path).await?;
    tracing::info!(
        path = %socket_path.display(),
        callback_timeout_ms = config.callback_timeout.as_millis() as u64,
        default_history = config.default_history,
        "server listening"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    };

    serve(listener, Arc::new(PasteboardRegistry::new(config)), shutdown).await;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, path = %socket_path.display(), "failed to remove socket");
    }
    tracing::info!("server stopped");
    Ok(())
}

/// Accept connections until `shutdown` completes.
async fn serve(
    listener: UnixListener,
    registry: Arc<PasteboardRegistry>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _addr)) => connection::spawn_connection(stream, registry.clone()),
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            _ = &mut shutdown => break,
        }
    }
}

/// Serve on `path` in the background for the rest of the test.
#[cfg(test)]
pub(crate) async fn spawn_for_test(path: &Path, config: ServerConfig) {
    let listener = bind_socket(path).await.expect("bind test socket");
    let registry = Arc::new(PasteboardRegistry::new(config));
    tokio::spawn(serve(listener, registry, std::future::pending()));
}

// -- Socket setup --

/// Default socket path under `$XDG_RUNTIME_DIR`.
pub fn default_socket_path() -> Result<PathBuf, ServerError> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").map_err(|_| ServerError::NoRuntimeDir)?;
    Ok(PathBuf::from(runtime_dir)
        .join("pasteboard")
        .join("server.sock"))
}

/// Create the socket directory and bind the Unix listener.
///
/// If the path is in use, try connecting to it: an answer means another
/// server is running, silence means the socket is stale and is replaced.
async fn bind_socket(path: &Path) -> Result<UnixListener, ServerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        prepare_socket_dir(parent)?;
    }

    let bind_failed = |source: std::io::Error| ServerError::BindFailed {
        path: path.to_path_buf(),
        source,
    };
    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(ServerError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(bind_failed)?;
            UnixListener::bind(path).map_err(bind_failed)
        }
        Err(e) => Err(bind_failed(e)),
    }
}

/// Ensure the socket directory exists with mode 0700.
fn prepare_socket_dir(dir: &Path) -> Result<(), ServerError> {
    use std::os::unix::fs::PermissionsExt;

    let mkdir_failed = |source: std::io::Error| ServerError::MkdirFailed {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(mkdir_failed)?;
    }
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(mkdir_failed)
}
