//! # libcsi: Container Storage Interface plumbing
//!
//! `libcsi` implements the protocol-facing half of a [Container Storage
//! Interface][csi] plugin: the data model, the three service roles as async
//! traits with baseline implementations, a capability registry, and a
//! socket transport that serves every role on one endpoint.  Storage
//! plugins implement the traits and hand them to [`CsiServer`].
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] and the protocol status [`Code`]. |
//! | [`capability`] | [`CapabilitySet`] registry built once at setup. |
//! | [`driver`] | [`CsiDriver`] descriptor shared by the baseline servers. |
//! | [`message`] | [`CsiMessage`] protocol envelope for the socket transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`transport`] | Unix/TCP client and server. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod capability;
pub mod controller;
pub mod driver;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use capability::CapabilitySet;
pub use controller::{CsiController, DefaultControllerServer};
pub use driver::CsiDriver;
pub use error::{Code, CsiError};
pub use identity::{CsiIdentity, DefaultIdentityServer};
pub use message::{CsiMessage, Envelope};
pub use node::{CsiNode, DefaultNodeServer};
pub use transport::{CsiClient, CsiServer, Endpoint, RequestObserver, ServerHandle};
pub use types::*;
