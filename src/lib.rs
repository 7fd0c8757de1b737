pub mod config;
pub mod decode;
pub mod error;
pub mod observability;
pub mod stream;
pub mod transport;

pub(crate) mod json_scan;
pub mod util;
