//! Session transports accepted by the server.

pub mod webtransport;
