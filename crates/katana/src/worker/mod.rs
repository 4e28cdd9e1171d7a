//! Worker tasks: receive request frames, run callbacks, send replies.
//!
//! Each task holds one connection to the proxy's worker endpoint and serves
//! requests in lockstep: one request in, one reply out. Every failure below
//! the connection level becomes an error reply; only cancellation and
//! connection loss end the task.

mod adapter;
mod context;
mod meta;

use std::io;
use std::str;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use katana_config::SocketEndpoint;
use katana_payload::protocol::MISSING;
use katana_payload::{CommandPayload, pack, unpack};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::frame::{FrameError, Multipart, MultipartCodec};

pub use adapter::{
    ComponentAdapter, MiddlewareAdapter, REQUEST_ACTION, RESPONSE_ACTION, Reply, RequestOutcome,
    ServiceAdapter,
};
pub use context::{ErrorCallback, WorkerContext};
pub use meta::ReplyMeta;

/// Tracing target for worker tasks.
pub(crate) const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

/// Message of replies to frames that cannot be understood.
pub const INTERNAL_FAILURE: &str = "Internal communication failed";

/// `Reply::failure(MISSING, INTERNAL_FAILURE)` in msgpack, sent when a reply
/// cannot be packed.
const PACKED_FAILURE: &[u8] = &[
    0x81, 0xad, 0x63, 0x6f, 0x6d, 0x6d, 0x61, 0x6e, 0x64, 0x5f, 0x72, 0x65,
    0x70, 0x6c, 0x79, 0x82, 0xa4, 0x6e, 0x61, 0x6d, 0x65, 0xa7, 0x4d, 0x49,
    0x53, 0x53, 0x49, 0x4e, 0x47, 0xa6, 0x72, 0x65, 0x73, 0x75, 0x6c, 0x74,
    0x81, 0xa5, 0x65, 0x72, 0x72, 0x6f, 0x72, 0x83, 0xa7, 0x6d, 0x65, 0x73,
    0x73, 0x61, 0x67, 0x65, 0xbd, 0x49, 0x6e, 0x74, 0x65, 0x72, 0x6e, 0x61,
    0x6c, 0x20, 0x63, 0x6f, 0x6d, 0x6d, 0x75, 0x6e, 0x69, 0x63, 0x61, 0x74,
    0x69, 0x6f, 0x6e, 0x20, 0x66, 0x61, 0x69, 0x6c, 0x65, 0x64, 0xa4, 0x63,
    0x6f, 0x64, 0x65, 0x00, 0xa6, 0x73, 0x74, 0x61, 0x74, 0x75, 0x73, 0xb9,
    0x35, 0x30, 0x30, 0x20, 0x49, 0x6e, 0x74, 0x65, 0x72, 0x6e, 0x61, 0x6c,
    0x20, 0x53, 0x65, 0x72, 0x76, 0x65, 0x72, 0x20, 0x45, 0x72, 0x72, 0x6f,
    0x72,
];

/// Errors ending a worker task.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect to worker endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("worker connection failed: {source}")]
    Frame {
        #[from]
        source: FrameError,
    },
    #[error("worker endpoint closed the connection")]
    Disconnected,
    #[error("worker task cancelled")]
    Cancelled,
    #[cfg(not(unix))]
    #[error("unix sockets are not supported on this platform: {endpoint}")]
    UnsupportedUnix { endpoint: String },
}

/// Decodes one request, runs it and encodes the reply.
///
/// Never fails: malformed requests and handler failures produce error
/// replies.
pub async fn process_frames(
    adapter: &dyn ComponentAdapter,
    context: &WorkerContext,
    message: Multipart,
) -> Multipart {
    let reply = match message.parts() {
        [action, command] => handle(adapter, context, action, command, None).await,
        [action, command, mappings] => {
            handle(adapter, context, action, command, Some(mappings)).await
        }
        parts => {
            warn!(
                target: WORKER_TARGET,
                parts = parts.len(),
                "malformed request frames"
            );
            Reply::failure(MISSING, INTERNAL_FAILURE)
        }
    };
    encode(reply)
}

async fn handle(
    adapter: &dyn ComponentAdapter,
    context: &WorkerContext,
    action: &Bytes,
    command: &Bytes,
    mappings: Option<&Bytes>,
) -> Reply {
    let Ok(action) = str::from_utf8(action) else {
        warn!(target: WORKER_TARGET, "action name is not UTF-8");
        return Reply::failure(MISSING, INTERNAL_FAILURE);
    };
    if let Some(mappings) = mappings {
        match unpack(mappings) {
            Ok(mappings) => context.schemas().update(mappings),
            Err(source) => {
                warn!(target: WORKER_TARGET, action, error = %source, "undecodable mappings");
                return Reply::failure(action, INTERNAL_FAILURE);
            }
        }
    }
    if !adapter.has_action(action) {
        let info = context.info();
        warn!(target: WORKER_TARGET, action, "unknown action");
        let message = format!(
            "Action does not exist in component \"{}\" ({}): \"{action}\"",
            info.name, info.version
        );
        return Reply::failure(action, &message);
    }
    let payload = match unpack(command) {
        Ok(payload) if payload.path_exists("command") => payload,
        Ok(_) => {
            warn!(target: WORKER_TARGET, action, "request carries no command");
            return Reply::failure(action, INTERNAL_FAILURE);
        }
        Err(source) => {
            warn!(target: WORKER_TARGET, action, error = %source, "undecodable command");
            return Reply::failure(action, INTERNAL_FAILURE);
        }
    };
    debug!(target: WORKER_TARGET, action, "processing command");
    adapter
        .process(context, action, CommandPayload::from_payload(payload))
        .await
}

fn encode(reply: Reply) -> Multipart {
    match pack(&reply.payload) {
        Ok(packed) => Multipart::new([reply.meta.to_frame(), Bytes::from(packed)]),
        Err(source) => {
            error!(target: WORKER_TARGET, error = %source, "cannot pack reply");
            Multipart::new([
                ReplyMeta::none().to_frame(),
                Bytes::from_static(PACKED_FAILURE),
            ])
        }
    }
}

/// One worker task bound to the proxy's worker endpoint.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    endpoint: SocketEndpoint,
    adapter: Arc<dyn ComponentAdapter>,
    context: Arc<WorkerContext>,
}

impl Worker {
    /// A task numbered `id` serving `adapter` through `endpoint`.
    #[must_use]
    pub fn new(
        id: usize,
        endpoint: SocketEndpoint,
        adapter: Arc<dyn ComponentAdapter>,
        context: Arc<WorkerContext>,
    ) -> Self {
        Self {
            id,
            endpoint,
            adapter,
            context,
        }
    }

    /// Serves requests until cancelled or disconnected.
    ///
    /// Cancellation closes the connection and returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when connecting fails or the connection
    /// breaks.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WorkerError> {
        match &self.endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|source| self.connect_error(source))?;
                self.drive(stream, &cancel).await
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    let stream = tokio::net::UnixStream::connect(path.as_std_path())
                        .await
                        .map_err(|source| self.connect_error(source))?;
                    self.drive(stream, &cancel).await
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(WorkerError::UnsupportedUnix {
                        endpoint: self.endpoint.to_string(),
                    })
                }
            }
        }
    }

    fn connect_error(&self, source: io::Error) -> WorkerError {
        WorkerError::Connect {
            endpoint: self.endpoint.to_string(),
            source,
        }
    }

    /// Serves an established connection.
    ///
    /// # Errors
    ///
    /// See [`Worker::run`].
    pub async fn drive<S>(&self, stream: S, cancel: &CancellationToken) -> Result<(), WorkerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, MultipartCodec::default());
        info!(
            target: WORKER_TARGET,
            task = self.id,
            endpoint = %self.endpoint,
            "worker task ready"
        );
        match self.serve(&mut framed, cancel).await {
            Err(WorkerError::Cancelled) => {
                if let Err(error) = framed.close().await {
                    debug!(
                        target: WORKER_TARGET,
                        task = self.id,
                        error = %error,
                        "closing worker connection failed"
                    );
                }
                info!(target: WORKER_TARGET, task = self.id, "worker task stopped");
                Ok(())
            }
            other => other,
        }
    }

    async fn serve<S>(
        &self,
        framed: &mut Framed<S, MultipartCodec>,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => return Err(WorkerError::Cancelled),
                message = framed.next() => message,
            };
            let message = message.ok_or(WorkerError::Disconnected)??;
            let exchange = async {
                let reply = process_frames(self.adapter.as_ref(), &self.context, message).await;
                framed.send(reply).await
            };
            tokio::select! {
                () = cancel.cancelled() => return Err(WorkerError::Cancelled),
                sent = exchange => sent?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Action, ComponentInfo};
    use crate::callback::{Callback, HandlerError, HandlerPool};
    use katana_payload::{ErrorPayload, Map, Payload};
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn context() -> WorkerContext {
        let info = ComponentInfo {
            name: "users".to_owned(),
            version: "1.0.0".to_owned(),
            ..ComponentInfo::default()
        };
        WorkerContext::new(info, HandlerPool::new(2))
    }

    fn adapter() -> ServiceAdapter {
        let mut adapter = ServiceAdapter::new();
        adapter.register(
            "read",
            Callback::blocking(|action: &mut Action| {
                let mut entity = Map::new();
                entity.insert("name".to_owned(), json!("ada"));
                action.set_entity(entity)?;
                Ok(())
            }),
        );
        adapter.register(
            "fail",
            Callback::blocking(|_: &mut Action| Err(HandlerError::new("boom"))),
        );
        adapter.register(
            "explode",
            Callback::cooperative(|_: &mut Action| {
                Box::pin(async {
                    tokio::task::yield_now().await;
                    explode()
                })
            }),
        );
        adapter
    }

    fn explode() -> crate::callback::HandlerResult {
        panic!("cooperative handler exploded")
    }

    fn request(action: &str) -> Multipart {
        let command = CommandPayload::new(action, "gateway", None).into_payload();
        let packed = pack(&command).expect("pack command");
        Multipart::new([Bytes::from(action.to_owned()), Bytes::from(packed)])
    }

    fn reply_result(reply: &Multipart) -> Payload {
        let packed = reply.part(1).expect("payload frame");
        let payload = unpack(packed).expect("unpack reply");
        Payload::from_map(
            payload
                .get_map("command_reply/result")
                .cloned()
                .expect("result"),
        )
    }

    fn reply_name(reply: &Multipart) -> String {
        let packed = reply.part(1).expect("payload frame");
        let payload = unpack(packed).expect("unpack reply");
        payload
            .get_str("command_reply/name")
            .map(str::to_owned)
            .unwrap_or_default()
    }

    fn error_message(result: &Payload) -> String {
        let error = result.get_map("error").cloned().expect("error");
        ErrorPayload::from_payload(Payload::from_map(error))
            .message()
            .to_owned()
    }

    #[rstest]
    #[tokio::test]
    async fn replies_carry_meta_and_payload(context: WorkerContext) {
        let reply = process_frames(&adapter(), &context, request("read")).await;
        assert_eq!(reply.len(), 2);
        assert_eq!(reply.part(0).map(Bytes::as_ref), Some(&[ReplyMeta::EMPTY][..]));
        assert_eq!(reply_name(&reply), "read");
        let result = reply_result(&reply);
        assert!(result.get_map("transport").is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn cooperative_panics_become_error_replies(context: WorkerContext) {
        let reply = tokio::spawn(async move {
            process_frames(&adapter(), &context, request("explode")).await
        })
        .await
        .expect("panic stays inside the worker task");
        assert_eq!(reply_name(&reply), "explode");
        let errors = reply_result(&reply)
            .get_opt("transport")
            .map(|value| value.to_string())
            .unwrap_or_default();
        assert!(errors.contains("handler panicked"), "errors recorded: {errors}");
    }

    #[test]
    fn packed_failure_matches_the_generic_failure_reply() {
        let fixed = unpack(PACKED_FAILURE).expect("unpack fixed reply");
        let built = Reply::failure(MISSING, INTERNAL_FAILURE).payload;
        for path in [
            "command_reply/name",
            "command_reply/result/error/message",
            "command_reply/result/error/code",
            "command_reply/result/error/status",
        ] {
            assert_eq!(fixed.get(path), built.get(path), "{path}");
        }
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_actions_are_reported(context: WorkerContext) {
        let reply = process_frames(&adapter(), &context, request("delete")).await;
        assert_eq!(
            error_message(&reply_result(&reply)),
            "Action does not exist in component \"users\" (1.0.0): \"delete\""
        );
    }

    #[rstest]
    #[case::single_part(Multipart::new([Bytes::from_static(b"read")]))]
    #[case::bad_utf8(Multipart::new([Bytes::from_static(b"\xff"), Bytes::new()]))]
    #[case::bad_command(Multipart::new([Bytes::from_static(b"read"), Bytes::from_static(b"\xc1")]))]
    #[case::no_command(Multipart::new([
        Bytes::from_static(b"read"),
        Bytes::from(pack(&json!({"meta": {}})).expect("pack")),
    ]))]
    #[tokio::test]
    async fn malformed_requests_get_generic_failures(
        context: WorkerContext,
        #[case] message: Multipart,
    ) {
        let reply = process_frames(&adapter(), &context, message).await;
        assert_eq!(error_message(&reply_result(&reply)), INTERNAL_FAILURE);
    }

    #[rstest]
    #[tokio::test]
    async fn mappings_frames_replace_the_schemas(context: WorkerContext) {
        let mappings = json!({"users": {"1.0.0": {"files": true, "actions": {"read": {}}}}});
        let mut message = request("read").into_parts();
        message.push(Bytes::from(pack(&mappings).expect("pack mappings")));
        process_frames(&adapter(), &context, Multipart::new(message)).await;

        let schema = context.schemas().service("users", "1.0.0").expect("schema");
        assert!(schema.has_file_server());
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn workers_survive_handler_failures(context: WorkerContext) {
        let (proxy, worker_side) = tokio::net::UnixStream::pair().expect("socket pair");
        let worker = Worker::new(
            0,
            SocketEndpoint::unix("/unused"),
            Arc::new(adapter()),
            Arc::new(context),
        );
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.drive(worker_side, &cancel).await })
        };

        let mut framed = Framed::new(proxy, MultipartCodec::default());
        framed.send(request("fail")).await.expect("send failing request");
        let first = framed.next().await.expect("first reply").expect("frame");
        let transport = reply_result(&first);
        let errors = transport
            .get_opt("transport")
            .map(|value| value.to_string())
            .unwrap_or_default();
        assert!(errors.contains("boom"));

        framed.send(request("read")).await.expect("send second request");
        let second = framed.next().await.expect("second reply").expect("frame");
        assert!(reply_result(&second).get_map("transport").is_some());

        cancel.cancel();
        let outcome = task.await.expect("join worker");
        assert!(outcome.is_ok());
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn closed_connections_end_the_task(context: WorkerContext) {
        let (proxy, worker_side) = tokio::net::UnixStream::pair().expect("socket pair");
        let worker = Worker::new(
            0,
            SocketEndpoint::unix("/unused"),
            Arc::new(adapter()),
            Arc::new(context),
        );
        drop(proxy);
        let error = worker
            .drive(worker_side, &CancellationToken::new())
            .await
            .expect_err("disconnected");
        assert!(matches!(error, WorkerError::Disconnected));
    }
}
