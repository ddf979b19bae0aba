//! Process groups and the non-blocking transfer primitive shared by every
//! compositing scheduler.
//!
//! This crate has no notion of an "Image": it only moves opaque byte
//! payloads between ranks, tagged by [`Purpose`]. `mg-image` builds its
//! send/recv/gather contract on top of the [`Communicator`] trait defined
//! here.

mod error;
mod group;
mod thread_comm;
mod transport;

pub use error::TransportError;
pub use group::{ProcessGroup, Rank};
pub use thread_comm::make_thread_communicators;
pub use transport::{Communicator, Completion, Purpose, RequestId, RequestSet};
