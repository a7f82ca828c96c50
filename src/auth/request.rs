use serde::{Deserialize, Serialize};

use super::Profile;
use crate::config::SamlFallback;

/// SAML form fields of an inbound request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamlBody {
    #[serde(
        rename = "SAMLResponse",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub saml_response: Option<String>,

    #[serde(
        rename = "SAMLRequest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub saml_request: Option<String>,

    #[serde(rename = "RelayState", default, skip_serializing_if = "Option::is_none")]
    pub relay_state: Option<String>,
}

impl SamlBody {
    pub fn response(saml_response: impl Into<String>) -> Self {
        Self {
            saml_response: Some(saml_response.into()),
            ..Default::default()
        }
    }

    pub fn logout_request(saml_request: impl Into<String>) -> Self {
        Self {
            saml_request: Some(saml_request.into()),
            ..Default::default()
        }
    }

    /// The `SAMLResponse` field, treating an empty value as absent.
    pub fn saml_response(&self) -> Option<&str> {
        non_empty(&self.saml_response)
    }

    /// The `SAMLRequest` field, treating an empty value as absent.
    pub fn saml_request(&self) -> Option<&str> {
        non_empty(&self.saml_request)
    }
}

/// How an authentication attempt will be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The body carries a `SAMLResponse` (assertion or logout response).
    InboundResponse,
    /// The body carries a `SAMLRequest` (IdP-initiated logout).
    InboundLogoutRequest,
    /// No SAML message: send the configured fallback request to the IdP.
    OutboundFallback(SamlFallback),
}

impl Classification {
    pub fn as_str(&self) -> &str {
        match self {
            Classification::InboundResponse => "inbound-response",
            Classification::InboundLogoutRequest => "inbound-logout-request",
            Classification::OutboundFallback(fallback) => fallback.as_str(),
        }
    }
}

/// The parts of an HTTP request the strategy reads and writes.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Parsed form body.
    pub body: SamlBody,

    /// `RelayState` taken from the query string.
    pub query_relay_state: Option<String>,

    /// Currently authenticated user, if any. Outbound logout requests are
    /// built for this user.
    pub user: Option<Profile>,

    /// Inbound logout request recorded while answering it.
    pub logout_request: Option<Profile>,

    logged_out: bool,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_body(body: SamlBody) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: Profile) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_relay_state(mut self, relay_state: impl Into<String>) -> Self {
        self.query_relay_state = Some(relay_state.into());
        self
    }

    /// Relay state from the body, then from the query string.
    pub fn relay_state(&self) -> Option<&str> {
        non_empty(&self.body.relay_state).or_else(|| non_empty(&self.query_relay_state))
    }

    /// End the local session carried by this request.
    pub fn logout(&mut self) {
        self.user = None;
        self.logged_out = true;
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out
    }

    /// Decide how this request is handled. A response takes precedence over
    /// a logout request; with neither, the fallback applies.
    pub fn classify(&self, fallback: &SamlFallback) -> Classification {
        if self.body.saml_response().is_some() {
            Classification::InboundResponse
        } else if self.body.saml_request().is_some() {
            Classification::InboundLogoutRequest
        } else {
            Classification::OutboundFallback(fallback.clone())
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
