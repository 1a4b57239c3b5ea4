//! wtlab-client: WebTransport client with certificate-hash bootstrap.
//!
//! Fetches the server's certificate fingerprint over plain HTTP, pins the
//! QUIC session to it, and runs the shared channel engine once the session
//! is ready.
//!
//! # Quick Start
//!
//! ```no_run
//! use wtlab_client::{ClientConfig, WtClient};
//!
//! # async fn example() -> wtlab_core::WtResult<()> {
//! let client = WtClient::new(ClientConfig {
//!     endpoint: "https://localhost:4433".into(),
//!     ..Default::default()
//! })?;
//! client.connect().await?;
//! client.send_datagram(&[1, 2, 3]).await?;
//! client.close(None).await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod client;
pub mod connector;
pub mod lifecycle;

pub use bootstrap::{fetch_pin, fingerprint_url, FingerprintSource, HttpFingerprintSource};
pub use client::{ClientConfig, WtClient};
pub use connector::WebTransportConnector;
pub use lifecycle::{Connector, SessionLifecycle, SessionState};

pub use wtlab_core::{WtError, WtResult};
