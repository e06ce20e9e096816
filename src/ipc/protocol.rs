//! Wire protocol message types for pasteboard IPC.
//!
//! All messages are MessagePack-encoded maps with at minimum `type` and
//! `id` fields. Requests carry a client-chosen `id` that the matching
//! response echoes. Server-initiated callbacks (`provide_data`,
//! `changed_owner`) always use `id: 0`.

use serde::{Deserialize, Serialize};

/// All wire protocol messages.
///
/// Serialized as a tagged union on the `type` field via MessagePack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Handshake --
    #[serde(rename = "hello")]
    Hello {
        id: u32,
        version: u32,
        /// Free-form label for logs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client: Option<String>,
        /// Whether provide-data callbacks should carry the generation.
        #[serde(default)]
        versioned_callbacks: bool,
    },

    #[serde(rename = "hello_ack")]
    HelloAck {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- Server --
    #[serde(rename = "pasteboard_with_name")]
    PasteboardWithName { id: u32, name: String },

    #[serde(rename = "pasteboard_with_unique_name")]
    PasteboardWithUniqueName { id: u32 },

    #[serde(rename = "list_pasteboards")]
    ListPasteboards { id: u32 },

    // -- Ownership & types --
    #[serde(rename = "declare_types")]
    DeclareTypes {
        id: u32,
        pasteboard: String,
        types: Vec<String>,
        claim: Claim,
    },

    #[serde(rename = "add_types")]
    AddTypes {
        id: u32,
        pasteboard: String,
        types: Vec<String>,
        claim: Claim,
    },

    #[serde(rename = "release_globally")]
    ReleaseGlobally { id: u32, pasteboard: String },

    #[serde(rename = "set_history")]
    SetHistory {
        id: u32,
        pasteboard: String,
        length: u32,
    },

    // -- Data transfer --
    #[serde(rename = "set_data")]
    SetData {
        id: u32,
        pasteboard: String,
        type_name: String,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// `data` is a UTF-8 path whose contents are the payload.
        #[serde(default)]
        is_file: bool,
        old_count: u64,
    },

    #[serde(rename = "data_for_type")]
    DataForType {
        id: u32,
        pasteboard: String,
        type_name: String,
        old_count: u64,
        must_be_current: bool,
    },

    // -- Queries --
    #[serde(rename = "available_type")]
    AvailableType {
        id: u32,
        pasteboard: String,
        types: Vec<String>,
    },

    #[serde(rename = "types_and_change_count")]
    TypesAndChangeCount { id: u32, pasteboard: String },

    #[serde(rename = "change_count")]
    ChangeCount { id: u32, pasteboard: String },

    #[serde(rename = "name")]
    Name { id: u32, pasteboard: String },

    // -- Notifications --
    #[serde(rename = "watch")]
    Watch { id: u32, pasteboard: String },

    #[serde(rename = "unwatch")]
    Unwatch { id: u32, pasteboard: String },

    // -- Unsolicited callbacks (server → owner / watchers) --
    #[serde(rename = "provide_data")]
    ProvideData {
        id: u32,
        pasteboard: String,
        type_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },

    #[serde(rename = "changed_owner")]
    ChangedOwner { id: u32, pasteboard: String },

    // -- Generic response --
    #[serde(rename = "response")]
    Response(Reply),
}

/// Body of a `response` message. Unused fields are omitted on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub id: u32,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pasteboard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pasteboards: Option<Vec<PasteboardDescriptor>>,
}

impl Reply {
    pub fn ok(id: u32) -> Self {
        Self {
            id,
            status: Status::Ok,
            ..Self::default()
        }
    }

    pub fn error(id: u32, reason: &str) -> Self {
        Self {
            id,
            status: Status::Error,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

impl From<Reply> for Message {
    fn from(reply: Reply) -> Self {
        Message::Response(reply)
    }
}

/// How a `declare_types` / `add_types` caller checks the change count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Claim {
    /// Succeed only if the pasteboard is still at this count.
    Match(u64),
    /// Take the pasteboard whatever its count.
    Force,
}

/// Response status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Ok,
    Error,
}

/// Pasteboard descriptor returned in list_pasteboards responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasteboardDescriptor {
    pub name: String,
    pub change_count: u64,
    pub types: Vec<String>,
    pub has_owner: bool,
    /// Types with data cached in the current generation.
    pub cached: u32,
    pub history_depth: u32,
    /// Generations currently retained.
    pub retained: u32,
    /// Readers waiting on the owner.
    pub pending: u32,
    pub watchers: u32,
}

/// Protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Largest data value the server will cache for one type. Leaves room
/// in a frame for the `data_for_type` reply envelope.
pub const MAX_DATA_SIZE: usize = MAX_PAYLOAD_SIZE - 64 * 1024;

/// Minimal envelope for extracting `{type, id}` from unknown messages.
///
/// Used by the server as a fallback when [`Message`] deserialization
/// fails (e.g., unknown `type` tag), so the error response can echo
/// the request `id`.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: u32,
}

impl Message {
    /// Request id of any message.
    pub fn id(&self) -> u32 {
        match self {
            Message::Hello { id, .. }
            | Message::HelloAck { id, .. }
            | Message::PasteboardWithName { id, .. }
            | Message::PasteboardWithUniqueName { id }
            | Message::ListPasteboards { id }
            | Message::DeclareTypes { id, .. }
            | Message::AddTypes { id, .. }
            | Message::ReleaseGlobally { id, .. }
            | Message::SetHistory { id, .. }
            | Message::SetData { id, .. }
            | Message::DataForType { id, .. }
            | Message::AvailableType { id, .. }
            | Message::TypesAndChangeCount { id, .. }
            | Message::ChangeCount { id, .. }
            | Message::Name { id, .. }
            | Message::Watch { id, .. }
            | Message::Unwatch { id, .. }
            | Message::ProvideData { id, .. }
            | Message::ChangedOwner { id, .. } => *id,
            Message::Response(reply) => reply.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &Message) -> Message {
        let encoded = rmp_serde::to_vec_named(msg).unwrap();
        rmp_serde::from_slice(&encoded).unwrap()
    }

    #[test]
    fn hello_round_trip() {
        let msg = Message::Hello {
            id: 0,
            version: PROTOCOL_VERSION,
            client: Some("editor".into()),
            versioned_callbacks: true,
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn hello_minimal_defaults() {
        // Older clients send only id + version.
        #[derive(serde::Serialize)]
        struct Minimal {
            #[serde(rename = "type")]
            msg_type: &'static str,
            id: u32,
            version: u32,
        }
        let encoded = rmp_serde::to_vec_named(&Minimal {
            msg_type: "hello",
            id: 0,
            version: 1,
        })
        .unwrap();
        match rmp_serde::from_slice::<Message>(&encoded).unwrap() {
            Message::Hello {
                client,
                versioned_callbacks,
                ..
            } => {
                assert_eq!(client, None);
                assert!(!versioned_callbacks);
            }
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn declare_types_with_both_claims() {
        for claim in [Claim::Force, Claim::Match(7)] {
            let msg = Message::DeclareTypes {
                id: 3,
                pasteboard: "general".into(),
                types: vec!["text/plain".into(), "text/html".into()],
                claim,
            };
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn set_data_binary_fidelity() {
        let data: Vec<u8> = (0..=255).collect();
        let msg = Message::SetData {
            id: 4,
            pasteboard: "general".into(),
            type_name: "image/png".into(),
            data: data.clone(),
            is_file: false,
            old_count: 2,
        };
        match round_trip(&msg) {
            Message::SetData { data: decoded, .. } => assert_eq!(decoded, data),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn set_data_is_file_defaults_false() {
        #[derive(serde::Serialize)]
        struct NoFlag {
            #[serde(rename = "type")]
            msg_type: &'static str,
            id: u32,
            pasteboard: String,
            type_name: String,
            #[serde(with = "serde_bytes")]
            data: Vec<u8>,
            old_count: u64,
        }
        let encoded = rmp_serde::to_vec_named(&NoFlag {
            msg_type: "set_data",
            id: 5,
            pasteboard: "general".into(),
            type_name: "text/plain".into(),
            data: b"hi".to_vec(),
            old_count: 1,
        })
        .unwrap();
        match rmp_serde::from_slice::<Message>(&encoded).unwrap() {
            Message::SetData { is_file, .. } => assert!(!is_file),
            other => panic!("expected SetData, got {other:?}"),
        }
    }

    #[test]
    fn provide_data_version_optional() {
        let plain = Message::ProvideData {
            id: 0,
            pasteboard: "general".into(),
            type_name: "text/plain".into(),
            version: None,
        };
        let pinned = Message::ProvideData {
            id: 0,
            pasteboard: "general".into(),
            type_name: "text/plain".into(),
            version: Some(9),
        };
        assert_eq!(round_trip(&plain), plain);
        assert_eq!(round_trip(&pinned), pinned);
    }

    #[test]
    fn response_minimal_round_trip() {
        let msg: Message = Reply::ok(1).into();
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn response_error_round_trip() {
        let msg: Message = Reply {
            change_count: Some(4),
            ..Reply::error(2, "stale_generation")
        }
        .into();
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn response_with_data_round_trip() {
        let msg: Message = Reply {
            data: Some(b"payload".to_vec()),
            type_name: Some("text/plain".into()),
            change_count: Some(3),
            ..Reply::ok(7)
        }
        .into();
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn response_with_pasteboards_round_trip() {
        let msg: Message = Reply {
            pasteboards: Some(vec![PasteboardDescriptor {
                name: "general".into(),
                change_count: 2,
                types: vec!["text/plain".into()],
                has_owner: true,
                cached: 1,
                history_depth: 0,
                retained: 0,
                pending: 0,
                watchers: 1,
            }]),
            ..Reply::ok(8)
        }
        .into();
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn omitted_response_fields_are_absent_on_wire() {
        let encoded = rmp_serde::to_vec_named(&Message::from(Reply::ok(1))).unwrap();
        let map: std::collections::BTreeMap<String, serde::de::IgnoredAny> =
            rmp_serde::from_slice(&encoded).unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["id", "status", "type"]);
    }

    #[test]
    fn id_accessor_covers_responses() {
        assert_eq!(Message::from(Reply::ok(11)).id(), 11);
        assert_eq!(
            Message::ChangedOwner {
                id: 0,
                pasteboard: "general".into()
            }
            .id(),
            0
        );
    }

    #[test]
    fn status_serialization() {
        let ok = rmp_serde::to_vec_named(&Status::Ok).unwrap();
        assert_eq!(rmp_serde::from_slice::<Status>(&ok).unwrap(), Status::Ok);
        let err = rmp_serde::to_vec_named(&Status::Error).unwrap();
        assert_eq!(rmp_serde::from_slice::<Status>(&err).unwrap(), Status::Error);
    }
}
