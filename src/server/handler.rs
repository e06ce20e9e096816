//! Message dispatch and request handling.
//!
//! Translates wire requests into registry / pasteboard operations and
//! their outcomes into responses. No I/O of its own beyond reading
//! file payloads for `set_data`.

use std::sync::Arc;

use crate::ipc::protocol::{Message, PROTOCOL_VERSION, Reply, Status};

use super::callback::{ClientId, DataError, Owner, PasteboardCallback};
use super::pasteboard::{ClaimError, Pasteboard, Payload};
use super::registry::PasteboardRegistry;
use super::types::{self, PasteboardType};

/// The client a request came from: its identity plus the stand-in the
/// server calls back through.
#[derive(Clone)]
pub struct Requester {
    pub client: ClientId,
    pub callback: Arc<dyn PasteboardCallback>,
}

impl Requester {
    fn owner(&self) -> Owner {
        Owner::new(self.client, self.callback.clone())
    }
}

/// Validate a `hello`. The ack always carries id 0; the flag says
/// whether the connection may proceed.
pub fn handle_hello(id: u32, version: u32) -> (Message, bool) {
    let rejection = if id != 0 {
        Some("invalid_hello_id")
    } else if version != PROTOCOL_VERSION {
        Some("version_mismatch")
    } else {
        None
    };
    let ack = Message::HelloAck {
        id: 0,
        status: if rejection.is_some() {
            Status::Error
        } else {
            Status::Ok
        },
        error: rejection.map(String::from),
    };
    (ack, rejection.is_none())
}

/// Dispatch a post-handshake request and build its response.
///
/// Server-originated variants and a repeated `hello` get
/// `unknown_type`.
pub async fn handle_message(
    registry: &PasteboardRegistry,
    requester: &Requester,
    request: Message,
) -> Message {
    match dispatch(registry, requester, request).await {
        Ok(reply) | Err(reply) => reply.into(),
    }
}

async fn dispatch(
    registry: &PasteboardRegistry,
    requester: &Requester,
    request: Message,
) -> Result<Reply, Reply> {
    match request {
        // -- Server --
        Message::PasteboardWithName { id, name } => {
            let pb = resolve(registry, id, &name)?;
            Ok(named(id, &pb))
        }
        Message::PasteboardWithUniqueName { id } => {
            Ok(named(id, &registry.pasteboard_with_unique_name()))
        }
        Message::ListPasteboards { id } => Ok(Reply {
            pasteboards: Some(registry.list()),
            ..Reply::ok(id)
        }),

        // -- Ownership & types --
        Message::DeclareTypes {
            id,
            pasteboard,
            types,
            claim,
        } => {
            let pb = resolve(registry, id, &pasteboard)?;
            let declared = parse_types(id, types)?;
            let count = pb
                .declare_types(declared, requester.owner(), claim)
                .map_err(|e| claim_rejected(id, e))?;
            Ok(counted(id, count.get()))
        }
        Message::AddTypes {
            id,
            pasteboard,
            types,
            claim,
        } => {
            let pb = resolve(registry, id, &pasteboard)?;
            let added = parse_types(id, types)?;
            let count = pb
                .add_types(added, requester.client, claim)
                .map_err(|e| claim_rejected(id, e))?;
            Ok(counted(id, count.get()))
        }
        Message::ReleaseGlobally { id, pasteboard } => {
            resolve(registry, id, &pasteboard)?.release_globally();
            Ok(Reply::ok(id))
        }
        Message::SetHistory {
            id,
            pasteboard,
            length,
        } => {
            resolve(registry, id, &pasteboard)?.set_history(length as usize);
            Ok(Reply::ok(id))
        }

        // -- Data transfer --
        Message::SetData {
            id,
            pasteboard,
            type_name,
            data,
            is_file,
            old_count,
        } => {
            let pb = resolve(registry, id, &pasteboard)?;
            let ty = parse_type(id, type_name)?;
            let payload =
                Payload::from_wire(data, is_file).map_err(|e| Reply::error(id, e.reason()))?;
            pb.set_data(payload, ty, old_count).await.map_err(|e| {
                tracing::debug!(pasteboard = %pb.name(), error = %e, "set_data rejected");
                Reply::error(id, e.reason())
            })?;
            Ok(Reply::ok(id))
        }
        Message::DataForType {
            id,
            pasteboard,
            type_name,
            old_count,
            must_be_current,
        } => {
            let pb = resolve(registry, id, &pasteboard)?;
            let ty = parse_type(id, type_name)?;
            match pb.data_for_type(&ty, old_count, must_be_current).await {
                Ok(data) => Ok(Reply {
                    data: Some(data.to_vec()),
                    type_name: Some(ty.into()),
                    change_count: Some(old_count),
                    ..Reply::ok(id)
                }),
                Err(e) => {
                    tracing::debug!(
                        pasteboard = %pb.name(),
                        %ty,
                        change_count = old_count,
                        cause = %e,
                        "no data"
                    );
                    Err(data_rejected(id, e))
                }
            }
        }

        // -- Queries --
        Message::AvailableType {
            id,
            pasteboard,
            types,
        } => {
            let pb = resolve(registry, id, &pasteboard)?;
            let candidates = parse_types(id, types)?;
            Ok(match pb.available_type(&candidates) {
                Some((ty, count)) => Reply {
                    type_name: Some(ty.into()),
                    ..counted(id, count.get())
                },
                None => counted(id, pb.change_count().get()),
            })
        }
        Message::TypesAndChangeCount { id, pasteboard } => {
            let pb = resolve(registry, id, &pasteboard)?;
            let (declared, count) = pb.types_and_change_count();
            Ok(Reply {
                types: Some(types::to_strings(&declared)),
                ..counted(id, count.get())
            })
        }
        Message::ChangeCount { id, pasteboard } => {
            let pb = resolve(registry, id, &pasteboard)?;
            Ok(counted(id, pb.change_count().get()))
        }
        Message::Name { id, pasteboard } => {
            let pb = resolve(registry, id, &pasteboard)?;
            Ok(named(id, &pb))
        }

        // -- Notifications --
        Message::Watch { id, pasteboard } => {
            resolve(registry, id, &pasteboard)?.watch(requester.client, requester.callback.clone());
            Ok(Reply::ok(id))
        }
        Message::Unwatch { id, pasteboard } => {
            resolve(registry, id, &pasteboard)?.unwatch(requester.client);
            Ok(Reply::ok(id))
        }

        // Handshake is over; server-originated messages are never valid input.
        Message::Hello { id, .. }
        | Message::HelloAck { id, .. }
        | Message::ProvideData { id, .. }
        | Message::ChangedOwner { id, .. } => Err(Reply::error(id, "unknown_type")),
        Message::Response(reply) => Err(Reply::error(reply.id, "unknown_type")),
    }
}

// -- Helpers --

fn resolve(registry: &PasteboardRegistry, id: u32, name: &str) -> Result<Arc<Pasteboard>, Reply> {
    registry
        .pasteboard_with_name(name)
        .map_err(|e| Reply::error(id, e.reason()))
}

fn parse_types(id: u32, names: Vec<String>) -> Result<Vec<PasteboardType>, Reply> {
    types::parse_type_list(names).map_err(|_| Reply::error(id, "invalid_type"))
}

fn parse_type(id: u32, name: String) -> Result<PasteboardType, Reply> {
    PasteboardType::new(name).map_err(|_| Reply::error(id, "invalid_type"))
}

fn named(id: u32, pb: &Pasteboard) -> Reply {
    Reply {
        pasteboard: Some(pb.name().to_string()),
        ..counted(id, pb.change_count().get())
    }
}

fn counted(id: u32, change_count: u64) -> Reply {
    Reply {
        change_count: Some(change_count),
        ..Reply::ok(id)
    }
}

/// Stale rejections carry the current count so the caller can resync.
fn claim_rejected(id: u32, e: ClaimError) -> Reply {
    match e {
        ClaimError::Stale { current, .. } => Reply {
            change_count: Some(current),
            ..Reply::error(id, e.reason())
        },
        ClaimError::NotOwner => Reply::error(id, e.reason()),
    }
}

fn data_rejected(id: u32, e: DataError) -> Reply {
    match e {
        DataError::Stale { current, .. } => Reply {
            change_count: Some(current),
            ..Reply::error(id, e.reason())
        },
        _ => Reply::error(id, e.reason()),
    }
}
