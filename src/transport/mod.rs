mod http_transport;
mod retry_policy;

pub use http_transport::{GenerationRequest, HttpTransport};
