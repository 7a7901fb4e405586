//! Client-facing surface of AxioCNC: the WebSocket Session Hub and the REST
//! API, both brokering access to the per-port Controllers that
//! `axiocnc-runtime` owns.

pub mod auth;
pub mod hub;
pub mod rest;

pub use auth::AuthService;
pub use hub::SessionHub;
pub use rest::RestApi;
