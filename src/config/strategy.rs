use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::{Map, Value};

use super::ConfigError;

/// Identity provider settings for the SAML strategy.
///
/// A long-lived instance is supplied when the strategy is built. Every
/// authentication attempt works on its own copy produced by [`merge`].
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    /// IdP Single Sign-On service URL (where AuthnRequests are sent).
    #[serde(default)]
    pub entry_point: String,

    /// Service Provider entity ID.
    #[serde(default)]
    pub issuer: String,

    /// Assertion Consumer Service URL (where the IdP posts its response).
    #[serde(default)]
    pub callback_url: String,

    /// Expected IdP entity ID. Inbound logout requests from another issuer are rejected.
    #[serde(default)]
    pub idp_issuer: Option<String>,

    /// IdP X.509 certificate for signature verification (PEM format).
    #[serde(default)]
    pub cert: Option<String>,

    /// SP private key used to sign redirect-binding messages (PEM format).
    #[serde(default)]
    pub private_key: Option<String>,

    /// SP signing certificate published in metadata (PEM format).
    #[serde(default)]
    pub signing_cert: Option<String>,

    /// NameID format to request.
    #[serde(default)]
    pub identifier_format: Option<String>,

    /// IdP Single Logout service URL. Falls back to `entry_point`.
    #[serde(default)]
    pub logout_url: Option<String>,

    /// SP Single Logout service URL published in metadata.
    #[serde(default)]
    pub logout_callback_url: Option<String>,

    /// Ask the IdP to re-authenticate the user.
    #[serde(default)]
    pub force_authn: bool,

    /// Requested authentication context class.
    #[serde(default)]
    pub authn_context: Option<String>,

    /// Binding used to deliver login requests to the IdP.
    #[serde(default)]
    pub authn_request_binding: AuthnRequestBinding,

    /// Hand the request to the verify function together with the profile.
    #[serde(default)]
    pub pass_req_to_callback: bool,

    /// Query parameters added to every outbound message.
    #[serde(default)]
    pub additional_params: BTreeMap<String, String>,

    /// Query parameters added to login requests only.
    #[serde(default)]
    pub additional_authorize_params: BTreeMap<String, String>,

    /// Query parameters added to logout requests only.
    #[serde(default)]
    pub additional_logout_params: BTreeMap<String, String>,
}

impl StrategyConfig {
    /// Check that every configured endpoint is an absolute URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoints = [
            ("entry_point", Some(self.entry_point.as_str())),
            ("callback_url", Some(self.callback_url.as_str())),
            ("logout_url", self.logout_url.as_deref()),
            ("logout_callback_url", self.logout_callback_url.as_deref()),
        ];

        for (name, value) in endpoints {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            url::Url::parse(value).map_err(|e| {
                ConfigError::Validation(format!("saml.{name} is not a valid URL ({value}): {e}"))
            })?;
        }

        Ok(())
    }

    /// The IdP endpoint that receives logout messages.
    pub fn logout_endpoint(&self) -> &str {
        self.logout_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.entry_point)
    }
}

// Key material must never end up in logs.
impl fmt::Debug for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyConfig")
            .field("entry_point", &self.entry_point)
            .field("issuer", &self.issuer)
            .field("callback_url", &self.callback_url)
            .field("idp_issuer", &self.idp_issuer)
            .field("cert", &self.cert.as_ref().map(|_| "<pem>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "****"))
            .field("signing_cert", &self.signing_cert.as_ref().map(|_| "<pem>"))
            .field("identifier_format", &self.identifier_format)
            .field("logout_url", &self.logout_url)
            .field("logout_callback_url", &self.logout_callback_url)
            .field("force_authn", &self.force_authn)
            .field("authn_context", &self.authn_context)
            .field("authn_request_binding", &self.authn_request_binding)
            .field("pass_req_to_callback", &self.pass_req_to_callback)
            .field("additional_params", &self.additional_params)
            .field("additional_authorize_params", &self.additional_authorize_params)
            .field("additional_logout_params", &self.additional_logout_params)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bindings and fallbacks
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP transport used to carry an outbound login request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthnRequestBinding {
    /// Deflated request in the query string of a redirect.
    #[default]
    #[serde(rename = "HTTP-Redirect")]
    HttpRedirect,
    /// Base64 request inside an auto-submitted HTML form.
    #[serde(rename = "HTTP-POST")]
    HttpPost,
}

impl AuthnRequestBinding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthnRequestBinding::HttpRedirect => "HTTP-Redirect",
            AuthnRequestBinding::HttpPost => "HTTP-POST",
        }
    }
}

/// Outbound action taken when a request carries no SAML message.
///
/// Unknown values are kept rather than rejected so the dispatcher can answer
/// them with a plain failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SamlFallback {
    #[default]
    LoginRequest,
    LogoutRequest,
    Unrecognized(String),
}

impl SamlFallback {
    pub fn as_str(&self) -> &str {
        match self {
            SamlFallback::LoginRequest => "login-request",
            SamlFallback::LogoutRequest => "logout-request",
            SamlFallback::Unrecognized(other) => other,
        }
    }
}

impl From<&str> for SamlFallback {
    fn from(value: &str) -> Self {
        match value {
            "login-request" => SamlFallback::LoginRequest,
            "logout-request" => SamlFallback::LogoutRequest,
            other => SamlFallback::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for SamlFallback {
    fn from(value: String) -> Self {
        SamlFallback::from(value.as_str())
    }
}

impl From<SamlFallback> for String {
    fn from(value: SamlFallback) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for SamlFallback {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SamlFallback::from(s))
    }
}

impl fmt::Display for SamlFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Call-time options
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call overrides of [`StrategyConfig`]. Unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub idp_issuer: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub signing_cert: Option<String>,
    #[serde(default)]
    pub identifier_format: Option<String>,
    #[serde(default)]
    pub logout_url: Option<String>,
    #[serde(default)]
    pub logout_callback_url: Option<String>,
    #[serde(default)]
    pub force_authn: Option<bool>,
    #[serde(default)]
    pub authn_context: Option<String>,
    #[serde(default)]
    pub authn_request_binding: Option<AuthnRequestBinding>,
    #[serde(default)]
    pub pass_req_to_callback: Option<bool>,
    #[serde(default)]
    pub additional_params: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub additional_authorize_params: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub additional_logout_params: Option<BTreeMap<String, String>>,
}

/// Options passed to a single `authenticate` call.
///
/// Deserializes from one flat map: `saml_fallback` plus any [`ConfigOverrides`]
/// key. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthenticateOptions {
    /// What to send to the IdP when the request carries no SAML message.
    /// Defaults to a login request.
    #[serde(default)]
    pub saml_fallback: Option<SamlFallback>,

    /// Configuration overrides for this attempt only.
    #[serde(flatten)]
    pub overrides: ConfigOverrides,
}

impl AuthenticateOptions {
    pub fn login() -> Self {
        Self::default()
    }

    pub fn logout() -> Self {
        Self::default().with_fallback(SamlFallback::LogoutRequest)
    }

    pub fn with_fallback(mut self, fallback: impl Into<SamlFallback>) -> Self {
        self.saml_fallback = Some(fallback.into());
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

// `deny_unknown_fields` does not reach through `#[serde(flatten)]`, so the
// fallback is split off by hand and the rest goes to `ConfigOverrides`.
impl<'de> Deserialize<'de> for AuthenticateOptions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        let saml_fallback = match fields.remove("saml_fallback") {
            None | Some(Value::Null) => None,
            Some(value) => Some(SamlFallback::deserialize(value).map_err(D::Error::custom)?),
        };
        let overrides =
            ConfigOverrides::deserialize(Value::Object(fields)).map_err(D::Error::custom)?;

        Ok(Self {
            saml_fallback,
            overrides,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

/// Build the configuration snapshot for one authentication attempt.
///
/// The result owns copies of everything it holds: later changes to the
/// returned value never reach `base` or `overrides`, and neither input is
/// modified. Container fields are replaced as a whole.
pub fn merge(base: &StrategyConfig, overrides: &ConfigOverrides) -> StrategyConfig {
    let mut merged = base.clone();

    overlay(&mut merged.entry_point, &overrides.entry_point);
    overlay(&mut merged.issuer, &overrides.issuer);
    overlay(&mut merged.callback_url, &overrides.callback_url);
    overlay_option(&mut merged.idp_issuer, &overrides.idp_issuer);
    overlay_option(&mut merged.cert, &overrides.cert);
    overlay_option(&mut merged.private_key, &overrides.private_key);
    overlay_option(&mut merged.signing_cert, &overrides.signing_cert);
    overlay_option(&mut merged.identifier_format, &overrides.identifier_format);
    overlay_option(&mut merged.logout_url, &overrides.logout_url);
    overlay_option(&mut merged.logout_callback_url, &overrides.logout_callback_url);
    overlay(&mut merged.force_authn, &overrides.force_authn);
    overlay_option(&mut merged.authn_context, &overrides.authn_context);
    overlay(&mut merged.authn_request_binding, &overrides.authn_request_binding);
    overlay(&mut merged.pass_req_to_callback, &overrides.pass_req_to_callback);
    overlay(&mut merged.additional_params, &overrides.additional_params);
    overlay(
        &mut merged.additional_authorize_params,
        &overrides.additional_authorize_params,
    );
    overlay(
        &mut merged.additional_logout_params,
        &overrides.additional_logout_params,
    );

    merged
}

fn overlay<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

fn overlay_option<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        target.clone_from(value);
    }
}
