//! Pseudo-terminal endpoint.
//!
//! `PtyEndpoint` allocates the master/slave pair with `openpty(3)` and
//! exposes the slave's device path as the virtual COM port. The responder
//! talks to the master through `PtyMaster`, an `AsyncFd` wrapper over a
//! duplicate of the master descriptor.

mod endpoint;
mod master;

pub use endpoint::{PortOptions, PtyEndpoint};
