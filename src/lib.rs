//! # vultr-csi — Container Storage Interface plugin for Vultr storage
//!
//! `vultr-csi` attaches, mounts, resizes, and detaches two classes of
//! persistent storage on virtualized compute nodes: raw block volumes
//! exposed as virtio disks, and shared filesystems exposed over virtio-fs.
//! One binary serves both deployment roles (Tokio async runtime, `tracing`
//! for observability, `thiserror` for structured errors): the Controller
//! plane speaks to the cloud inventory API, the Node plane speaks to the
//! local kernel.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `Snapshot`, capabilities, requests. |
//! | [`context`] | The publish-context schema shared by both planes. |
//! | [`error`] | [`CsiError`] enum and its CSI status-code mapping. |
//! | [`message`] | [`CsiMessage`] protocol envelope for the socket transport. |
//! | [`identity`] | [`CsiIdentity`] trait — plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait — the Controller plane surface. |
//! | [`node`] | [`CsiNode`] trait — the Node plane surface. |
//! | [`cloud`] | Cloud inventory collaborator: typed client, rate limit, retries. |
//! | [`mount`] | Mount collaborator: kernel mounts and the live mount table. |
//! | [`device`] | Device collaborator: stable by-id link discovery. |
//! | [`metadata`] | Node identity collaborator: instance id and region. |
//! | [`backend`] | The plane implementations wired from the collaborators. |
//! | [`driver`] | Role-aware composition of the three services. |
//! | [`transport`] | Unix-socket client/server carrying [`CsiMessage`] frames. |
//! | [`config`] | Runtime configuration and deployment roles. |

pub mod backend;
pub mod cloud;
pub mod config;
pub mod context;
pub mod controller;
pub mod device;
pub mod driver;
pub mod error;
pub mod identity;
pub mod message;
pub mod metadata;
pub mod mount;
pub mod node;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::CsiController;
pub use driver::Driver;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
