//! Framed connection to the pasteboard server.
//!
//! Requests are answered strictly by `id`. Anything unsolicited that
//! arrives while a response is awaited (provide-data requests,
//! ownership notices) is queued and handed out by [`ServerClient::next_event`].

use std::collections::VecDeque;
use std::path::Path;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::LengthPrefixedCodec;
use crate::ipc::protocol::{
    Claim, Message, PROTOCOL_VERSION, PasteboardDescriptor, Reply, Status,
};

use super::ClientError;

/// Unsolicited message from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The server wants data for `type_name`. `version` is set when the
    /// connection asked for versioned callbacks.
    ProvideData {
        pasteboard: String,
        type_name: String,
        version: Option<u64>,
    },
    ChangedOwner {
        pasteboard: String,
    },
}

pub struct ServerClient {
    framed: Framed<UnixStream, LengthPrefixedCodec>,
    next_id: u32,
    events: VecDeque<Event>,
}

impl ServerClient {
    /// Connect and perform the handshake.
    pub async fn connect(socket: &Path, versioned_callbacks: bool) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|e| ClientError::Server(format!("connect {}: {e}", socket.display())))?;
        let mut framed = Framed::new(stream, LengthPrefixedCodec::new());

        framed
            .send(Message::Hello {
                id: 0,
                version: PROTOCOL_VERSION,
                client: Some(format!("pasteboardd-client/{}", std::process::id())),
                versioned_callbacks,
            })
            .await?;

        match framed.next().await {
            Some(Ok(Message::HelloAck {
                status: Status::Ok, ..
            })) => {}
            Some(Ok(Message::HelloAck {
                status: Status::Error,
                error,
                ..
            })) => {
                return Err(ClientError::Server(format!(
                    "handshake rejected: {}",
                    error.unwrap_or_default()
                )));
            }
            other => {
                return Err(ClientError::Server(format!(
                    "unexpected handshake response: {other:?}"
                )));
            }
        }

        Ok(Self {
            framed,
            next_id: 1, // 0 = Hello
            events: VecDeque::new(),
        })
    }

    /// Send a request and wait for its response, queueing callbacks
    /// that arrive in between. Error statuses become [`ClientError::Rejected`].
    async fn request(
        &mut self,
        op: &'static str,
        build: impl FnOnce(u32) -> Message,
    ) -> Result<Reply, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        self.framed.send(build(id)).await?;

        loop {
            match self.read().await? {
                Message::Response(reply) if reply.id == id => {
                    return match reply.status {
                        Status::Ok => Ok(reply),
                        Status::Error => Err(ClientError::Rejected {
                            op,
                            reason: reply.error.unwrap_or_default(),
                        }),
                    };
                }
                Message::Response(reply) => {
                    tracing::debug!(id = reply.id, "dropping response to another request");
                }
                other => self.queue(other),
            }
        }
    }

    /// Next unsolicited message, waiting for one if none is queued.
    pub async fn next_event(&mut self) -> Result<Event, ClientError> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }
            let msg = self.read().await?;
            self.queue(msg);
        }
    }

    async fn read(&mut self) -> Result<Message, ClientError> {
        match self.framed.next().await {
            Some(msg) => Ok(msg?),
            None => Err(ClientError::Server("connection closed by server".into())),
        }
    }

    fn queue(&mut self, msg: Message) {
        match msg {
            Message::ProvideData {
                pasteboard,
                type_name,
                version,
                ..
            } => self.events.push_back(Event::ProvideData {
                pasteboard,
                type_name,
                version,
            }),
            Message::ChangedOwner { pasteboard, .. } => {
                self.events.push_back(Event::ChangedOwner { pasteboard })
            }
            other => tracing::debug!(?other, "ignoring unexpected message"),
        }
    }

    // -- Operations --

    /// Resolve a pasteboard name, creating it on the server if needed.
    /// Returns its current change count.
    pub async fn pasteboard_with_name(&mut self, name: &str) -> Result<u64, ClientError> {
        let reply = self
            .request("pasteboard_with_name", |id| Message::PasteboardWithName {
                id,
                name: name.to_string(),
            })
            .await?;
        Ok(reply.change_count.unwrap_or_default())
    }

    pub async fn pasteboard_with_unique_name(&mut self) -> Result<String, ClientError> {
        let reply = self
            .request("pasteboard_with_unique_name", |id| {
                Message::PasteboardWithUniqueName { id }
            })
            .await?;
        reply
            .pasteboard
            .ok_or_else(|| ClientError::Server("unique name missing from response".into()))
    }

    pub async fn list_pasteboards(&mut self) -> Result<Vec<PasteboardDescriptor>, ClientError> {
        let reply = self
            .request("list_pasteboards", |id| Message::ListPasteboards { id })
            .await?;
        Ok(reply.pasteboards.unwrap_or_default())
    }

    /// Claim `pasteboard` with a new generation declaring `types`.
    pub async fn declare_types(
        &mut self,
        pasteboard: &str,
        types: Vec<String>,
        claim: Claim,
    ) -> Result<u64, ClientError> {
        let reply = self
            .request("declare_types", |id| Message::DeclareTypes {
                id,
                pasteboard: pasteboard.to_string(),
                types,
                claim,
            })
            .await?;
        Ok(reply.change_count.unwrap_or_default())
    }

    pub async fn types_and_change_count(
        &mut self,
        pasteboard: &str,
    ) -> Result<(Vec<String>, u64), ClientError> {
        let reply = self
            .request("types_and_change_count", |id| Message::TypesAndChangeCount {
                id,
                pasteboard: pasteboard.to_string(),
            })
            .await?;
        Ok((
            reply.types.unwrap_or_default(),
            reply.change_count.unwrap_or_default(),
        ))
    }

    /// Fetch data for `type_name` in generation `old_count`.
    pub async fn data_for_type(
        &mut self,
        pasteboard: &str,
        type_name: &str,
        old_count: u64,
        must_be_current: bool,
    ) -> Result<Vec<u8>, ClientError> {
        let reply = self
            .request("data_for_type", |id| Message::DataForType {
                id,
                pasteboard: pasteboard.to_string(),
                type_name: type_name.to_string(),
                old_count,
                must_be_current,
            })
            .await?;
        Ok(reply.data.unwrap_or_default())
    }

    /// Store data for a declared type. With `is_file`, `data` is a path
    /// the server reads.
    pub async fn set_data(
        &mut self,
        pasteboard: &str,
        type_name: &str,
        data: Vec<u8>,
        is_file: bool,
        old_count: u64,
    ) -> Result<(), ClientError> {
        self.request("set_data", |id| Message::SetData {
            id,
            pasteboard: pasteboard.to_string(),
            type_name: type_name.to_string(),
            data,
            is_file,
            old_count,
        })
        .await?;
        Ok(())
    }

    pub async fn release_globally(&mut self, pasteboard: &str) -> Result<(), ClientError> {
        self.request("release_globally", |id| Message::ReleaseGlobally {
            id,
            pasteboard: pasteboard.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn set_history(&mut self, pasteboard: &str, length: u32) -> Result<(), ClientError> {
        self.request("set_history", |id| Message::SetHistory {
            id,
            pasteboard: pasteboard.to_string(),
            length,
        })
        .await?;
        Ok(())
    }

    pub async fn watch(&mut self, pasteboard: &str) -> Result<(), ClientError> {
        self.request("watch", |id| Message::Watch {
            id,
            pasteboard: pasteboard.to_string(),
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Minimal scripted server: acks the hello, then plays `script`
    /// for each request it reads.
    async fn scripted_server(
        listener: UnixListener,
        script: impl Fn(Message) -> Vec<Message> + Send + 'static,
    ) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, LengthPrefixedCodec::new());
        let hello = framed.next().await.unwrap().unwrap();
        assert!(matches!(hello, Message::Hello { id: 0, .. }));
        framed
            .send(Message::HelloAck {
                id: 0,
                status: Status::Ok,
                error: None,
            })
            .await
            .unwrap();
        while let Some(Ok(msg)) = framed.next().await {
            for out in script(msg) {
                framed.send(out).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn callbacks_received_mid_request_are_queued() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("server.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(scripted_server(listener, |msg| {
            vec![
                Message::ChangedOwner {
                    id: 0,
                    pasteboard: "general".into(),
                },
                Message::ProvideData {
                    id: 0,
                    pasteboard: "general".into(),
                    type_name: "text/plain".into(),
                    version: Some(4),
                },
                Reply {
                    change_count: Some(4),
                    ..Reply::ok(msg.id())
                }
                .into(),
            ]
        }));

        let mut client = ServerClient::connect(&sock, true).await.unwrap();
        assert_eq!(client.pasteboard_with_name("general").await.unwrap(), 4);

        assert_eq!(
            client.next_event().await.unwrap(),
            Event::ChangedOwner {
                pasteboard: "general".into()
            }
        );
        assert_eq!(
            client.next_event().await.unwrap(),
            Event::ProvideData {
                pasteboard: "general".into(),
                type_name: "text/plain".into(),
                version: Some(4),
            }
        );
    }

    #[tokio::test]
    async fn error_status_becomes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("server.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(scripted_server(listener, |msg| {
            vec![Reply::error(msg.id(), "no_data").into()]
        }));

        let mut client = ServerClient::connect(&sock, false).await.unwrap();
        match client.data_for_type("general", "text/plain", 1, true).await {
            Err(ClientError::Rejected { op, reason }) => {
                assert_eq!(op, "data_for_type");
                assert_eq!(reason, "no_data");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("server.sock");
        let listener = UnixListener::bind(&sock).unwrap();
        tokio::spawn(scripted_server(listener, |msg| {
            vec![Reply {
                change_count: Some(u64::from(msg.id())),
                ..Reply::ok(msg.id())
            }
            .into()]
        }));

        let mut client = ServerClient::connect(&sock, false).await.unwrap();
        assert_eq!(client.pasteboard_with_name("a").await.unwrap(), 1);
        assert_eq!(client.pasteboard_with_name("b").await.unwrap(), 2);
    }
}
