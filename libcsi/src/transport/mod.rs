//! Socket transport for CSI messages.
//!
//! [`CsiServer`] and [`CsiClient`] exchange JSON-encoded [`Envelope`]s over a
//! Unix domain socket or TCP, one length-delimited frame per envelope.
//!
//! [`Envelope`]: crate::message::Envelope

pub mod client;
pub mod endpoint;
pub mod server;

pub use client::CsiClient;
pub use endpoint::Endpoint;
pub use server::{CsiServer, RequestObserver, ServerHandle};

use tokio_util::codec::LengthDelimitedCodec;

/// Upper bound on one encoded envelope.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}
