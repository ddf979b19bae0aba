//! The four compositing schedulers (§4.2-§4.6) built on `mg-image`'s data
//! model and `mg-transport`'s non-blocking transfer primitive.
//!
//! Each scheduler module exposes a `compose` (or `compose_with_target_k`/
//! `compose_capped`) entry point taking a participant's local [`Image`],
//! the [`ProcessGroup`] it composites within, and a [`Communicator`]; it
//! returns that participant's sub-region of the globally-blended image
//! (§2 "Control flow").

pub mod binary_swap;
pub mod config;
pub mod direct_send;
mod error;
pub mod metrics;
pub mod partition;
pub mod radix_k;
pub mod swap23;
mod tree;

pub use error::CompositeError;
pub use tree::CompositeTreeNode;

#[cfg(test)]
mod scenarios;
