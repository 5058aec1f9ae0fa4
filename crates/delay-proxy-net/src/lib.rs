//! Non-blocking, multiplexed TCP endpoint that speaks the delay proxy's
//! framed wire protocol.

pub mod tcp;

pub use tcp::{EndpointError, FramedEndpoint};
