//! Per-connection task: framed I/O, handshake, request dispatch.
//!
//! Each client connection spawns a tokio task that:
//! 1. Wraps the socket in a length-prefixed MessagePack codec.
//! 2. Reads the first message (must be `Hello`) and validates it.
//! 3. Enters a select loop: handle requests, and forward whatever the
//!    core queued for this client (provide-data callbacks, ownership
//!    notices, replies from deferred reads).
//! 4. On disconnect, tells the registry to forget the client.
//!
//! `data_for_type` is the only request that can wait on another client,
//! so it runs on its own task and replies through the outbound queue.
//! Everything else is answered inline, in arrival order.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_frame};
use crate::ipc::protocol::{Message, Reply};

use super::callback::{CallbackClosed, ClientId, PasteboardCallback};
use super::generation::ChangeCount;
use super::handler::{self, Requester};
use super::registry::PasteboardRegistry;
use super::types::PasteboardType;

/// Connection-level errors.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("unexpected EOF during handshake")]
    HandshakeEof,
    #[error("first message must be Hello")]
    NotHello,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] rmp_serde::decode::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// The server-side stand-in for a connected client.
///
/// Callbacks become unsolicited messages on the connection's outbound
/// queue. Pushing never blocks; a closed queue means the connection is
/// gone.
struct ConnectionCallback {
    outbound: mpsc::UnboundedSender<Message>,
    /// Client asked for generation-pinned provide-data requests.
    versioned: bool,
}

impl ConnectionCallback {
    fn push(&self, msg: Message) -> Result<(), CallbackClosed> {
        self.outbound.send(msg).map_err(|_| CallbackClosed)
    }
}

impl PasteboardCallback for ConnectionCallback {
    fn provide_data(&self, pasteboard: &str, ty: &PasteboardType) -> Result<(), CallbackClosed> {
        self.push(Message::ProvideData {
            id: 0,
            pasteboard: pasteboard.to_string(),
            type_name: ty.to_string(),
            version: None,
        })
    }

    fn provide_data_for_version(
        &self,
        pasteboard: &str,
        ty: &PasteboardType,
        version: ChangeCount,
    ) -> Result<(), CallbackClosed> {
        if !self.versioned {
            return self.provide_data(pasteboard, ty);
        }
        self.push(Message::ProvideData {
            id: 0,
            pasteboard: pasteboard.to_string(),
            type_name: ty.to_string(),
            version: Some(version.get()),
        })
    }

    fn changed_owner(&self, pasteboard: &str) {
        let notice = Message::ChangedOwner {
            id: 0,
            pasteboard: pasteboard.to_string(),
        };
        if self.push(notice).is_err() {
            tracing::trace!(pasteboard, "changed_owner dropped, connection closed");
        }
    }
}

/// Spawn a connection handler task.
///
/// The task runs until the client disconnects or a protocol error
/// occurs. On exit the client's ownerships and subscriptions are
/// dropped.
pub fn spawn_connection(stream: UnixStream, registry: Arc<PasteboardRegistry>) {
    let client = ClientId::new();
    tracing::debug!(%client, "accepted connection");
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, client, &registry).await {
            tracing::debug!(%client, error = %e, "connection closed");
        }
        registry.client_disconnected(client);
        tracing::debug!(%client, "connection cleaned up");
    });
}

async fn handle_connection(
    stream: UnixStream,
    client: ClientId,
    registry: &Arc<PasteboardRegistry>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    // -- Handshake: first message must be Hello --
    let first_frame = framed
        .next()
        .await
        .ok_or(ConnectionError::HandshakeEof)??;

    let (ack, accepted, label, versioned) = match decode_frame(&first_frame) {
        DecodeResult::Ok(Message::Hello {
            id,
            version,
            client: label,
            versioned_callbacks,
        }) => {
            let (ack, accepted) = handler::handle_hello(id, version);
            (ack, accepted, label, versioned_callbacks)
        }
        // Valid or unknown non-hello: the client violated the protocol.
        DecodeResult::Ok(_) | DecodeResult::UnknownType(_) => {
            return Err(ConnectionError::NotHello);
        }
        DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
    };

    framed.send(ack).await?;
    if !accepted {
        return Ok(());
    }
    tracing::debug!(%client, label = ?label, versioned, "handshake complete");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let requester = Requester {
        client,
        callback: Arc::new(ConnectionCallback {
            outbound: outbound_tx.clone(),
            versioned,
        }),
    };

    // -- Main loop: requests + outbound delivery --
    loop {
        tokio::select! {
            frame = framed.next() => {
                let raw = match frame {
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => return Err(ConnectionError::Codec(e)),
                    None => return Ok(()), // Clean disconnect.
                };
                match decode_frame(&raw) {
                    DecodeResult::Ok(msg) => {
                        tracing::trace!(%client, id = msg.id(), "request received");
                        if matches!(msg, Message::DataForType { .. }) {
                            let registry = registry.clone();
                            let requester = requester.clone();
                            let outbound = outbound_tx.clone();
                            tokio::spawn(async move {
                                let response =
                                    handler::handle_message(&registry, &requester, msg).await;
                                // Connection may have closed while we waited.
                                let _ = outbound.send(response);
                            });
                        } else {
                            let response = handler::handle_message(registry, &requester, msg).await;
                            send(&mut framed, client, response).await?;
                        }
                    }
                    DecodeResult::UnknownType(envelope) => {
                        // Echo the id and keep the connection open.
                        tracing::debug!(%client, msg_type = %envelope.msg_type, "unknown message type");
                        framed.send(Reply::error(envelope.id, "unknown_type").into()).await?;
                    }
                    DecodeResult::Malformed(e) => {
                        return Err(ConnectionError::MalformedFrame(e));
                    }
                }
            }
            Some(msg) = outbound_rx.recv() => {
                send(&mut framed, client, msg).await?;
            }
        }
    }
}

/// Send one message. A reply too large for a frame is swapped for an
/// error reply with the same id; the connection stays up.
async fn send(
    framed: &mut Framed<UnixStream, FrameCodec>,
    client: ClientId,
    msg: Message,
) -> Result<(), ConnectionError> {
    let id = msg.id();
    let is_reply = matches!(msg, Message::Response(_));
    match framed.send(msg).await {
        Err(CodecError::PayloadTooLarge(size)) => {
            tracing::warn!(%client, id, size, "outbound message exceeds frame limit");
            if is_reply {
                framed
                    .send(Reply::error(id, "payload_too_large").into())
                    .await?;
            }
            Ok(())
        }
        result => Ok(result?),
    }
}
