//! Debug Adapter Protocol client plumbing

pub mod protocol;
pub mod router;
pub mod transport;

pub use router::{CorrelationRouter, EventSubscription, ExecutionStatus, PendingRequest};
pub use transport::{FrameReader, FrameWriter, TransportChannel};

#[cfg(test)]
pub(crate) mod testing;
