//! Socket server that runs on each node and dispatches incoming CSI
//! requests to the Identity, Controller and Node implementations.
//!
//! All three roles share one listener.  Every accepted connection gets its
//! own task, and every request frame on a connection is handled in a task of
//! its own, so a slow mount never holds up a probe.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{Endpoint, frame_codec};
use crate::controller::CsiController;
use crate::error::{Code, CsiError};
use crate::identity::CsiIdentity;
use crate::message::{CsiMessage, Envelope};
use crate::node::CsiNode;

/// Responses queued per connection before request tasks wait on the writer.
const RESPONSE_QUEUE: usize = 64;

/// Hook notified once per served request.
pub trait RequestObserver: Send + Sync {
    fn observe(&self, method: &'static str, code: Code, elapsed: Duration);
}

struct Services {
    identity: Arc<dyn CsiIdentity>,
    controller: Arc<dyn CsiController>,
    node: Arc<dyn CsiNode>,
    observer: Option<Arc<dyn RequestObserver>>,
}

/// A CSI server binding a [`CsiIdentity`], a [`CsiController`] and a
/// [`CsiNode`] implementation to one endpoint.
pub struct CsiServer {
    services: Services,
}

impl CsiServer {
    pub fn new(
        identity: Arc<dyn CsiIdentity>,
        controller: Arc<dyn CsiController>,
        node: Arc<dyn CsiNode>,
    ) -> Self {
        Self {
            services: Services {
                identity,
                controller,
                node,
                observer: None,
            },
        }
    }

    /// Report every served request to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.services.observer = Some(observer);
        self
    }

    /// Bind `endpoint` and start serving in the background.
    ///
    /// Bind failures are returned here; everything after that is reported
    /// through [`ServerHandle::wait`].
    pub async fn start(self, endpoint: &Endpoint) -> Result<ServerHandle, CsiError> {
        let listener = Listener::bind(endpoint).await?;
        let local_addr = listener.local_addr();
        let shutdown = CancellationToken::new();
        let services = Arc::new(self.services);

        info!(%endpoint, "CSI server listening");
        let task = tokio::spawn(serve(listener, services, shutdown.clone()));
        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Handle on a running [`CsiServer`].
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), CsiError>>,
}

impl ServerHandle {
    /// Bound address for TCP endpoints.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting connections.  Requests already running finish on
    /// their own tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Block until the accept loop terminates.
    pub async fn wait(self) -> Result<(), CsiError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CsiError::internal(format!("server task failed: {e}"))),
        }
    }
}

enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

impl Listener {
    async fn bind(endpoint: &Endpoint) -> Result<Self, CsiError> {
        match endpoint {
            Endpoint::Unix(path) => {
                // A socket file left behind by a previous run would make bind fail.
                match tokio::fs::remove_file(path).await {
                    Ok(()) => debug!(path = %path.display(), "removed stale socket"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CsiError::TransportError(format!(
                            "failed to remove {}: {e}",
                            path.display()
                        )));
                    }
                }
                let listener = UnixListener::bind(path).map_err(|e| {
                    CsiError::TransportError(format!("bind {}: {e}", path.display()))
                })?;
                Ok(Self::Unix(listener, path.clone()))
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str())
                    .await
                    .map_err(|e| CsiError::TransportError(format!("bind {addr}: {e}")))?;
                Ok(Self::Tcp(listener))
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Unix(..) => None,
        }
    }
}

/// Accept connections until shutdown or a transport error.
async fn serve(
    listener: Listener,
    services: Arc<Services>,
    shutdown: CancellationToken,
) -> Result<(), CsiError> {
    let result = loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            accepted = accept(&listener) => accepted,
        };
        match accepted {
            Ok(conn) => {
                let services = Arc::clone(&services);
                tokio::spawn(async move {
                    let outcome = match conn {
                        Connection::Unix(stream) => handle_connection(stream, services).await,
                        Connection::Tcp(stream) => handle_connection(stream, services).await,
                    };
                    if let Err(e) = outcome {
                        warn!(error = %e, "CSI connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "CSI accept failed, stopping server");
                break Err(e);
            }
        }
    };

    if let Listener::Unix(_, path) = &listener
        && let Err(e) = tokio::fs::remove_file(path).await
    {
        debug!(path = %path.display(), error = %e, "socket cleanup failed");
    }
    info!("CSI server stopped");
    result
}

enum Connection {
    Unix(tokio::net::UnixStream),
    Tcp(tokio::net::TcpStream),
}

async fn accept(listener: &Listener) -> Result<Connection, CsiError> {
    match listener {
        Listener::Unix(l, _) => {
            let (stream, _) = l.accept().await.map_err(CsiError::transport)?;
            Ok(Connection::Unix(stream))
        }
        Listener::Tcp(l) => {
            let (stream, remote) = l.accept().await.map_err(CsiError::transport)?;
            debug!(%remote, "CSI connection accepted");
            Ok(Connection::Tcp(stream))
        }
    }
}

/// Read request frames off one connection, serving each on its own task.
///
/// Responses funnel through a single writer task; they go out in completion
/// order, matched to requests by envelope id.
async fn handle_connection<S>(stream: S, services: Arc<Services>) -> Result<(), CsiError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut frames = FramedRead::new(read_half, frame_codec());
    let mut sink = FramedWrite::new(write_half, frame_codec());
    let (tx, mut rx) = mpsc::channel::<Envelope>(RESPONSE_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let payload = serde_json::to_vec(&envelope).map_err(CsiError::internal)?;
            sink.send(Bytes::from(payload))
                .await
                .map_err(CsiError::transport)?;
        }
        Ok::<(), CsiError>(())
    });

    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(CsiError::transport)?;
        let envelope: Envelope = match serde_json::from_slice(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "malformed CSI request frame");
                let reply = CsiMessage::Error(CsiError::invalid_argument(format!(
                    "malformed request: {e}"
                )));
                if tx.send(Envelope::new(0, reply)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let services = Arc::clone(&services);
        let tx = tx.clone();
        tokio::spawn(async move {
            let id = envelope.id;
            let response = serve_request(&services, envelope).await;
            if tx.send(Envelope::new(id, response)).await.is_err() {
                // The caller went away; the operation itself already ran to
                // completion.
                debug!(id, "connection closed before the response was delivered");
            }
        });
    }

    drop(tx);
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(CsiError::internal(e)),
    }
}

#[instrument(skip_all, fields(id = envelope.id))]
async fn serve_request(services: &Services, envelope: Envelope) -> CsiMessage {
    let request = envelope.message;
    let Some(method) = request.method() else {
        warn!(msg = %request, "unexpected message variant received as request");
        return CsiMessage::Error(CsiError::invalid_argument(format!(
            "unexpected message: {request}"
        )));
    };

    debug!(%request, "CSI request received");
    let started = Instant::now();
    let response = dispatch(services, request).await;
    let code = match &response {
        CsiMessage::Error(e) => {
            warn!(method, code = %e.code(), error = %e, "CSI request failed");
            e.code()
        }
        ok => {
            debug!(method, response = %ok, "CSI request succeeded");
            Code::Ok
        }
    };
    if let Some(observer) = &services.observer {
        observer.observe(method, code, started.elapsed());
    }
    response
}

/// Map a [`CsiMessage`] request to the correct trait method call and wrap
/// the result in a response [`CsiMessage`].
async fn dispatch(services: &Services, request: CsiMessage) -> CsiMessage {
    let ids = &services.identity;
    let cs = &services.controller;
    let ns = &services.node;

    let result = match request {
        // --- Identity -------------------------------------------------------
        CsiMessage::GetPluginInfo => ids.get_plugin_info().await.map(CsiMessage::PluginInfoResponse),
        CsiMessage::Probe => ids.probe().await.map(CsiMessage::ProbeResult),
        CsiMessage::GetPluginCapabilities => ids
            .get_plugin_capabilities()
            .await
            .map(CsiMessage::PluginCapabilitiesResponse),

        // --- Controller -----------------------------------------------------
        CsiMessage::ControllerGetCapabilities => cs
            .get_capabilities()
            .await
            .map(CsiMessage::ControllerCapabilitiesResponse),
        CsiMessage::CreateVolume(req) => cs.create_volume(req).await.map(CsiMessage::VolumeCreated),
        CsiMessage::DeleteVolume(req) => cs.delete_volume(req).await.map(|()| CsiMessage::Ok),
        CsiMessage::ValidateVolumeCapabilities(req) => cs
            .validate_volume_capabilities(req)
            .await
            .map(CsiMessage::CapabilitiesValidated),
        CsiMessage::ControllerExpandVolume(req) => {
            cs.expand_volume(req).await.map(CsiMessage::VolumeExpanded)
        }

        // --- Node -----------------------------------------------------------
        CsiMessage::NodeStageVolume(req) => ns.stage_volume(req).await.map(|()| CsiMessage::Ok),
        CsiMessage::NodeUnstageVolume(req) => ns.unstage_volume(req).await.map(|()| CsiMessage::Ok),
        CsiMessage::NodePublishVolume(req) => ns.publish_volume(req).await.map(|()| CsiMessage::Ok),
        CsiMessage::NodeUnpublishVolume(req) => {
            ns.unpublish_volume(req).await.map(|()| CsiMessage::Ok)
        }
        CsiMessage::NodeGetVolumeStats(req) => {
            ns.get_volume_stats(req).await.map(CsiMessage::VolumeStats)
        }
        CsiMessage::NodeExpandVolume(req) => ns.expand_volume(req).await.map(CsiMessage::VolumeExpanded),
        CsiMessage::NodeGetCapabilities => ns
            .get_capabilities()
            .await
            .map(CsiMessage::NodeCapabilitiesResponse),
        CsiMessage::NodeGetInfo => ns.get_info().await.map(CsiMessage::NodeInfoResponse),

        // --- Response variants never arrive here (filtered by `method`) -----
        other => Err(CsiError::invalid_argument(format!(
            "unexpected message: {other}"
        ))),
    };

    result.unwrap_or_else(CsiMessage::Error)
}
