//! The two service planes and the shared identity surface.
//!
//! The planes communicate only through the opaque publish context and
//! shared volume identifiers: [`controller::ControllerBackend`] emits the
//! context after attach, [`node::NodeBackend`] consumes it when staging.

pub mod controller;
pub mod identity;
pub mod node;

pub use controller::{ControllerBackend, WaitPolicy};
pub use identity::IdentityService;
pub use node::NodeBackend;
