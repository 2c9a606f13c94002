//! Client used by orchestrator tooling and tests to issue CSI requests.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::{debug, instrument};

use super::{Endpoint, frame_codec};
use crate::error::CsiError;
use crate::message::{CsiMessage, Envelope};

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

struct Conn {
    framed: Framed<Box<dyn Io>, LengthDelimitedCodec>,
    next_id: u64,
}

/// A CSI client holding one connection to a plugin endpoint.
///
/// Requests issued through the same client are sent one at a time.
pub struct CsiClient {
    conn: Mutex<Conn>,
}

impl CsiClient {
    /// Connect to the plugin serving on `endpoint`.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, CsiError> {
        let io: Box<dyn Io> = match endpoint {
            Endpoint::Unix(path) => Box::new(
                UnixStream::connect(path)
                    .await
                    .map_err(CsiError::transport)?,
            ),
            Endpoint::Tcp(addr) => Box::new(
                TcpStream::connect(addr.as_str())
                    .await
                    .map_err(CsiError::transport)?,
            ),
        };
        debug!(%endpoint, "CSI connection established");
        Ok(Self {
            conn: Mutex::new(Conn {
                framed: Framed::new(io, frame_codec()),
                next_id: 1,
            }),
        })
    }

    /// Send a request and wait for the corresponding response message.
    ///
    /// An error reply is returned as `Ok(CsiMessage::Error(..))`; only
    /// transport failures surface as `Err`.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let mut conn = self.conn.lock().await;
        let id = conn.next_id;
        conn.next_id += 1;

        let payload = serde_json::to_vec(&Envelope::new(id, msg.clone()))
            .map_err(CsiError::internal)?;
        conn.framed
            .send(Bytes::from(payload))
            .await
            .map_err(CsiError::transport)?;

        while let Some(frame) = conn.framed.next().await {
            let frame = frame.map_err(CsiError::transport)?;
            let envelope: Envelope =
                serde_json::from_slice(&frame).map_err(CsiError::transport)?;
            if envelope.id != id {
                debug!(expected = id, got = envelope.id, "skipping unrelated response");
                continue;
            }
            debug!(response = %envelope.message, "CSI response received");
            return Ok(envelope.message);
        }
        Err(CsiError::TransportError(
            "connection closed before a response arrived".into(),
        ))
    }

    /// Like [`CsiClient::request`], but an error reply becomes `Err`.
    pub async fn call(&self, msg: CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(&msg).await? {
            CsiMessage::Error(e) => Err(e),
            other => Ok(other),
        }
    }
}
