//! # libblobcsi: blob storage CSI node plugin
//!
//! `libblobcsi` exposes blob storage containers as mountable volumes. It
//! resolves storage credentials from several competing sources, drives the
//! stage / publish mount lifecycle with per-volume mutual exclusion, and
//! rolls back partially completed mounts. Requests arrive over QUIC (via
//! [`quinn`]) the same way they do for other rk8s CSI plugins.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Requests, capabilities, volume stats. |
//! | [`error`] | [`CsiError`] and its [`ErrorKind`] classification. |
//! | [`volume_id`] | `<rg>#<account>#<container>#<discriminator>` parsing. |
//! | [`attributes`] | Typed volume context and request secrets. |
//! | [`credentials`] | Tiered credential resolution and secret stores. |
//! | [`namer`] | Container name normalization. |
//! | [`mount_options`] | Blobfuse option assembly. |
//! | [`locks`] | Per-volume try-lock table. |
//! | [`executor`] | Local and proxied blobfuse execution. |
//! | [`probe`] | Mount-point checks and kernel mounts. |
//! | [`driver`] | [`BlobDriver`], the node and identity services. |
//! | [`message`] | QUIC message envelopes. |
//! | [`transport`] | QUIC client/server built on `quinn`. |

pub mod attributes;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod executor;
pub mod identity;
pub mod locks;
pub mod message;
pub mod mount_options;
pub mod namer;
pub mod node;
pub mod options;
pub mod probe;
pub mod transport;
pub mod types;
pub mod volume_id;

pub use driver::BlobDriver;
pub use error::{CsiError, ErrorKind};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use options::{DriverOptions, ExecutorMode};
pub use types::*;
pub use volume_id::VolumeIdentity;
