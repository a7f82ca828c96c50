//! SAML 2.0 web-browser SSO authentication strategy.
//!
//! [`auth::SamlStrategy`] classifies each inbound request, hands protocol
//! work to a [`auth::SamlEngine`], and reports exactly one
//! [`auth::Outcome`] per attempt. The `saml` feature provides a samael-backed
//! engine; the `server` feature adds a small axum service provider used by the
//! `saml-strategy` binary.

pub mod auth;
pub mod config;
#[cfg(feature = "server")]
pub mod observability;
#[cfg(feature = "server")]
pub mod routes;
