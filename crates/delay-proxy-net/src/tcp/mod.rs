mod endpoint;
mod stream;

pub use endpoint::{EndpointError, FramedEndpoint};
