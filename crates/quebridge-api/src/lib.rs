// quebridge-api: Async client for the Que cloud air-conditioner API

pub mod auth;
pub mod circuit;
pub mod client;
pub mod cloud;
pub mod error;
pub mod models;
pub mod transport;

pub use auth::{StaticToken, TokenSource};
pub use circuit::{CircuitBreaker, CircuitPosition};
pub use client::{CloudClient, DEFAULT_BASE_URL};
pub use cloud::CloudApi;
pub use error::Error;
pub use models::{BearerGrant, EventPage, PairingRequest, UnitEvent, UnitSummary};
pub use transport::{ResilientTransport, TransportConfig};
