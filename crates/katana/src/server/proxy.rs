//! Relay between the front door and the worker endpoint.
//!
//! Client connections submit requests to a shared bounded queue; every worker
//! connection takes the next queued request, forwards it and hands the reply
//! back to the waiting client. Each client connection is served in lockstep.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use katana_config::SocketEndpoint;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frame::{Multipart, MultipartCodec};

use super::listener::{BoxedConnection, SocketListener};
use super::{PROXY_TARGET, ServerError};

/// Requests waiting for a worker, per proxy.
pub const QUEUE_DEPTH: usize = 1_024;

struct Job {
    request: Multipart,
    reply: oneshot::Sender<Multipart>,
}

type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Front-door proxy with its internal worker endpoint.
#[derive(Debug)]
pub struct Proxy {
    front: SocketListener,
    workers: SocketListener,
    front_endpoint: SocketEndpoint,
    worker_endpoint: SocketEndpoint,
}

impl Proxy {
    /// Binds both sockets. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when either socket cannot be bound; the front
    /// door is released again when the worker endpoint fails.
    pub fn bind(front: &SocketEndpoint, workers: &SocketEndpoint) -> Result<Self, ServerError> {
        let front = SocketListener::bind(front)?;
        let workers = match SocketListener::bind(workers) {
            Ok(listener) => listener,
            Err(error) => {
                front.cleanup();
                return Err(error);
            }
        };
        let bound = front
            .local_endpoint()
            .and_then(|front_endpoint| Ok((front_endpoint, workers.local_endpoint()?)));
        match bound {
            Ok((front_endpoint, worker_endpoint)) => Ok(Self {
                front,
                workers,
                front_endpoint,
                worker_endpoint,
            }),
            Err(error) => {
                front.cleanup();
                workers.cleanup();
                Err(error)
            }
        }
    }

    /// Address clients connect to.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.front_endpoint
    }

    /// Address worker tasks connect to.
    #[must_use]
    pub fn worker_endpoint(&self) -> &SocketEndpoint {
        &self.worker_endpoint
    }

    /// Relays requests until `cancel` fires, then removes the socket files.
    pub async fn run(self, cancel: CancellationToken) {
        let (queue, jobs) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let jobs: JobQueue = Arc::new(Mutex::new(jobs));
        let mut connections = JoinSet::new();
        info!(
            target: PROXY_TARGET,
            endpoint = %self.front_endpoint,
            workers = %self.worker_endpoint,
            "proxy relaying"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.front.accept() => match accepted {
                    Ok(connection) => {
                        connections.spawn(serve_client(connection, queue.clone(), cancel.clone()));
                    }
                    Err(error) => {
                        warn!(target: PROXY_TARGET, error = %error, "client accept failed");
                    }
                },
                accepted = self.workers.accept() => match accepted {
                    Ok(connection) => {
                        connections.spawn(serve_worker(
                            connection,
                            Arc::clone(&jobs),
                            cancel.clone(),
                        ));
                    }
                    Err(error) => {
                        warn!(target: PROXY_TARGET, error = %error, "worker accept failed");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        self.front.cleanup();
        self.workers.cleanup();
        info!(target: PROXY_TARGET, endpoint = %self.front_endpoint, "proxy stopped");
    }
}

async fn serve_client(
    connection: BoxedConnection,
    queue: mpsc::Sender<Job>,
    cancel: CancellationToken,
) {
    let mut framed = Framed::new(connection, MultipartCodec::default());
    loop {
        let request = tokio::select! {
            () = cancel.cancelled() => return,
            request = framed.next() => request,
        };
        let request = match request {
            Some(Ok(request)) => request,
            Some(Err(error)) => {
                warn!(target: PROXY_TARGET, error = %error, "dropping malformed client stream");
                return;
            }
            None => {
                debug!(target: PROXY_TARGET, "client disconnected");
                return;
            }
        };

        let (reply, response) = oneshot::channel();
        if queue.send(Job { request, reply }).await.is_err() {
            return;
        }
        let response = tokio::select! {
            () = cancel.cancelled() => return,
            response = response => response,
        };
        let Ok(response) = response else {
            warn!(
                target: PROXY_TARGET,
                "worker connection lost before replying; closing client connection"
            );
            return;
        };
        if let Err(error) = framed.send(response).await {
            debug!(target: PROXY_TARGET, error = %error, "client went away before the reply");
            return;
        }
    }
}

async fn serve_worker(connection: BoxedConnection, jobs: JobQueue, cancel: CancellationToken) {
    let mut framed = Framed::new(connection, MultipartCodec::default());
    debug!(target: PROXY_TARGET, "worker connected");
    loop {
        let job = tokio::select! {
            () = cancel.cancelled() => return,
            job = next_job(&jobs) => job,
        };
        let Some(Job { request, reply }) = job else {
            return;
        };
        if let Err(error) = framed.send(request).await {
            warn!(target: PROXY_TARGET, error = %error, "forwarding to worker failed");
            return;
        }
        let response = tokio::select! {
            () = cancel.cancelled() => return,
            response = framed.next() => response,
        };
        match response {
            Some(Ok(response)) => {
                if reply.send(response).is_err() {
                    debug!(target: PROXY_TARGET, "client left before the worker replied");
                }
            }
            Some(Err(error)) => {
                warn!(target: PROXY_TARGET, error = %error, "worker sent a malformed reply");
                return;
            }
            None => {
                debug!(target: PROXY_TARGET, "worker disconnected");
                return;
            }
        }
    }
}

async fn next_job(jobs: &JobQueue) -> Option<Job> {
    jobs.lock().await.recv().await
}
