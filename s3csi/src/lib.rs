//! CSI plugin exposing S3-compatible buckets as node-local volumes.
//!
//! The controller role provisions buckets; the node role mounts them with a
//! FUSE helper at a staging path and bind-mounts that into workloads. All
//! three roles share one endpoint through [`libcsi::CsiServer`].

pub mod config;
pub mod controller;
pub mod driver;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod mount;
pub mod node;
pub mod registry;
pub mod s3;
pub mod stats;

#[cfg(test)]
mod testing;

pub use driver::{NodeUtils, S3Driver};
