//! The SAML protocol engine seam.
//!
//! The strategy never parses XML or touches key material itself. Everything
//! protocol-level goes through [`SamlEngine`], and a fresh engine is created
//! for every attempt from the merged configuration of that attempt.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AuthRequest, EngineError, Profile, SamlBody};
use crate::config::StrategyConfig;

/// Successful result of validating an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// A valid assertion for this subject.
    Authenticated(Profile),
    /// A logout message. `Some` carries an inbound logout request that must be
    /// answered; `None` means the IdP confirmed a logout we started.
    LoggedOut(Option<Profile>),
}

#[async_trait]
pub trait SamlEngine: Send + Sync {
    /// Validate a `SAMLResponse` (assertion or logout response).
    async fn validate_post_response(&self, body: &SamlBody) -> Result<Validation, EngineError>;

    /// Validate a `SAMLRequest` (IdP-initiated logout request).
    async fn validate_post_request(&self, body: &SamlBody) -> Result<Validation, EngineError>;

    /// Login request encoded for the HTTP-Redirect binding.
    async fn authorize_url(&self, request: &AuthRequest) -> Result<String, EngineError>;

    /// Login request as an auto-submitting HTML form (HTTP-POST binding).
    async fn authorize_form(&self, request: &AuthRequest) -> Result<String, EngineError>;

    /// Logout request for the request's current user.
    async fn logout_url(&self, request: &AuthRequest) -> Result<String, EngineError>;

    /// Logout response answering `logout_request`.
    async fn logout_response_url(
        &self,
        request: &AuthRequest,
        logout_request: &Profile,
    ) -> Result<String, EngineError>;

    /// Service provider metadata document.
    fn generate_service_provider_metadata(&self, decryption_cert: Option<&str>) -> String;
}

/// Creates engines bound to one configuration snapshot.
pub trait SamlEngineFactory: Send + Sync {
    fn create(&self, config: Arc<StrategyConfig>) -> Box<dyn SamlEngine>;
}
