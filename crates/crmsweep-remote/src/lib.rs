//! Remote CRM access: v3 search/merge wire format and the HTTP client.

pub mod wire;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpCrmClient, RemoteError};
