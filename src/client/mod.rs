//! CLI client for pasteboard operations.
//!
//! Most commands connect, perform one or two requests, print the result
//! and exit. `offer` and `watch` stay connected and react to callbacks.

mod format;
mod server_client;

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use crate::cli::ClientAction;
use crate::ipc::codec::CodecError;
use crate::ipc::protocol::Claim;
use server_client::{Event, ServerClient};

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("$XDG_RUNTIME_DIR is not set and no --socket given")]
    NoRuntimeDir,
    #[error("server: {0}")]
    Server(String),
    #[error("{op} rejected: {reason}")]
    Rejected { op: &'static str, reason: String },
    #[error("{0}")]
    Usage(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the client command. Called from `main.rs` for `Command::Client`.
pub async fn run(socket: Option<PathBuf>, action: ClientAction) -> Result<(), ClientError> {
    let socket = match socket {
        Some(path) => path,
        None => crate::server::default_socket_path().map_err(|_| ClientError::NoRuntimeDir)?,
    };
    // Offer pins every provide-data request to the generation it declared.
    let versioned = matches!(action, ClientAction::Offer { .. });
    let mut server = ServerClient::connect(&socket, versioned).await?;

    match action {
        ClientAction::List => {
            let pasteboards = server.list_pasteboards().await?;
            format::print_pasteboards(&pasteboards);
        }
        ClientAction::Types { pasteboard } => {
            let (types, count) = server.types_and_change_count(&pasteboard).await?;
            format::print_types(&pasteboard, count, &types);
        }
        ClientAction::Get {
            pasteboard,
            type_name,
            count,
            history,
        } => {
            let current = server.pasteboard_with_name(&pasteboard).await?;
            let (count, must_be_current) = match count {
                Some(count) => (count, !history),
                None => (current, true),
            };
            let data = server
                .data_for_type(&pasteboard, &type_name, count, must_be_current)
                .await?;
            format::print_data(&type_name, count, &data)?;
        }
        ClientAction::Copy {
            pasteboard,
            type_name,
            file,
        } => {
            let (data, is_file) = match file {
                Some(path) => (server_readable_path(&path).await?, true),
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    (buf, false)
                }
            };
            let size = (!is_file).then_some(data.len());
            let count = server
                .declare_types(&pasteboard, vec![type_name.clone()], Claim::Force)
                .await?;
            server
                .set_data(&pasteboard, &type_name, data, is_file, count)
                .await?;
            format::print_copied(&pasteboard, count, size);
        }
        ClientAction::Offer {
            pasteboard,
            types,
            file,
        } => {
            if !file.is_file() {
                return Err(ClientError::Usage(format!(
                    "payload file {} not found",
                    file.display()
                )));
            }
            let count = server
                .declare_types(&pasteboard, types, Claim::Force)
                .await?;
            eprintln!("Offering {} on {pasteboard} (count {count})", file.display());
            let served = serve_offer(&mut server, &pasteboard, &file, count).await?;
            eprintln!("Ownership of {pasteboard} lost after {served} requests");
        }
        ClientAction::Watch { pasteboard } => {
            server.watch(&pasteboard).await?;
            loop {
                match server.next_event().await? {
                    Event::ChangedOwner { pasteboard: changed } if changed == pasteboard => {
                        let (types, count) = server.types_and_change_count(&pasteboard).await?;
                        format::print_changed(&pasteboard, count, &types);
                    }
                    other => tracing::debug!(?other, "ignoring event"),
                }
            }
        }
        ClientAction::History { pasteboard, depth } => {
            server.set_history(&pasteboard, depth).await?;
            println!("History depth of {pasteboard} set to {depth}");
        }
        ClientAction::Release { pasteboard } => {
            server.release_globally(&pasteboard).await?;
            println!("Released {pasteboard}");
        }
        ClientAction::Unique => {
            println!("{}", server.pasteboard_with_unique_name().await?);
        }
    }

    Ok(())
}

/// Answer provide-data requests for `pasteboard` from `payload` until
/// someone else takes ownership. Returns the number of requests served.
async fn serve_offer(
    server: &mut ServerClient,
    pasteboard: &str,
    payload: &Path,
    count: u64,
) -> Result<u32, ClientError> {
    let mut served = 0;
    loop {
        match server.next_event().await? {
            Event::ProvideData {
                pasteboard: requested,
                type_name,
                version,
            } if requested == pasteboard => {
                let data = tokio::fs::read(payload).await?;
                let old_count = version.unwrap_or(count);
                match server
                    .set_data(pasteboard, &type_name, data, false, old_count)
                    .await
                {
                    Ok(()) => served += 1,
                    // The generation moved on; a changed_owner is on its way.
                    Err(ClientError::Rejected { reason, .. }) => {
                        tracing::warn!(%type_name, old_count, %reason, "could not provide data");
                    }
                    Err(e) => return Err(e),
                }
            }
            Event::ChangedOwner {
                pasteboard: changed,
            } if changed == pasteboard => return Ok(served),
            other => tracing::debug!(?other, "ignoring event"),
        }
    }
}

/// Absolute UTF-8 path bytes, since the server resolves it, not us.
async fn server_readable_path(path: &Path) -> Result<Vec<u8>, ClientError> {
    let absolute = tokio::fs::canonicalize(path).await?;
    absolute
        .to_str()
        .map(|p| p.as_bytes().to_vec())
        .ok_or_else(|| ClientError::Usage(format!("{} is not valid UTF-8", absolute.display())))
}
