use std::fmt;

/// Errors raised by the transfer primitive itself, as opposed to the
/// schedulers layered on top of it.
#[derive(Debug)]
pub enum TransportError {
    /// A receive completed with more bytes than the pre-allocated buffer
    /// declared at post time could hold.
    BufferTooSmall { max_len: usize, received: usize },
    /// A peer's channel has been torn down; the participant it named is gone.
    PeerUnreachable { rank: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::BufferTooSmall { max_len, received } => write!(
                f,
                "transfer precondition violated: receive buffer sized for {max_len} bytes got {received}"
            ),
            TransportError::PeerUnreachable { rank } => {
                write!(f, "peer rank {rank} is unreachable")
            }
        }
    }
}

impl std::error::Error for TransportError {}
