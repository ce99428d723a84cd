//! curator-common — Shared error type and the allowlisted HTTP client used by
//! every curator crate that talks to the network.

pub mod error;
pub mod sandbox;

pub use error::{CuratorError, Result};
pub use sandbox::SandboxClient;
