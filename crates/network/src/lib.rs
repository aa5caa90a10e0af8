//! Thin async HTTP layer for talking to the VeilNote trusted encryption
//! service. Everything is JSON over HTTPS; auth and csrf headers are supplied
//! per request by the caller.
//!
//! ```rust,no_run
//! use veilnet::{Config, HttpClient};
//!
//! #[tokio::main]
//! async fn main() -> veilnet::Result<()> {
//!     let client = HttpClient::new(Config::default())?;
//!     let response = client.get("https://tes.example/health", &[]).await?;
//!     println!("status: {}", response.status());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http_client;

pub use config::{Config, DEFAULT_TIMEOUT_SECS};
pub use error::{NetError, Result};
pub use http_client::{Header, HttpClient};
