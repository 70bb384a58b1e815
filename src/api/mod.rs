pub mod http;
#[cfg(test)]
pub mod mock;
pub mod traits;
pub mod types;

pub use http::HttpBackend;
pub use traits::ChatBackend;
pub use types::{ApiError, SendRequest, SendResponse};
