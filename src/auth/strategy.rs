//! SAML authentication strategy.
//!
//! [`SamlStrategy::authenticate`] handles every leg of the browser SSO flow
//! on a single entry point:
//! - a `SAMLResponse` body is validated and, for assertions, handed to the
//!   verify function
//! - a `SAMLRequest` body is an IdP-initiated logout and is answered with a
//!   logout response
//! - anything else sends the configured fallback (login or logout request)
//!   to the IdP
//!
//! Each attempt returns exactly one [`Outcome`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use super::{
    AuthRequest, BoxError, Classification, EngineError, Outcome, Profile, SamlEngine,
    SamlEngineFactory, StrategyError, Validation,
};
use crate::config::{AuthenticateOptions, AuthnRequestBinding, SamlFallback, StrategyConfig, merge};

// ─────────────────────────────────────────────────────────────────────────────
// Verify
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a verify function.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified<U> {
    /// The local user, or `None` to refuse the login.
    pub user: Option<U>,
    /// Passed through to the outcome.
    pub info: Option<Value>,
}

impl<U> Verified<U> {
    pub fn user(user: U) -> Self {
        Self {
            user: Some(user),
            info: None,
        }
    }

    pub fn rejected(info: Option<Value>) -> Self {
        Self { user: None, info }
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }
}

/// Maps a validated SAML profile to a local user.
///
/// `request` is only provided when the strategy was built with
/// `pass_req_to_callback`.
#[async_trait]
pub trait Verify<U>: Send + Sync {
    async fn verify(
        &self,
        request: Option<&AuthRequest>,
        profile: Profile,
    ) -> Result<Verified<U>, BoxError>;
}

/// [`Verify`] implementation backed by a closure. See [`verify_fn`].
pub struct VerifyFn<F>(F);

/// Wrap a closure returning a boxed future as a [`Verify`] implementation.
///
/// ```ignore
/// let verify = verify_fn(|_request, profile: Profile| {
///     Box::pin(async move { Ok::<_, BoxError>(Verified::user(profile.name_id)) })
/// });
/// ```
pub fn verify_fn<U, F>(f: F) -> VerifyFn<F>
where
    F: for<'a> Fn(Option<&'a AuthRequest>, Profile) -> BoxFuture<'a, Result<Verified<U>, BoxError>>
        + Send
        + Sync,
{
    VerifyFn(f)
}

#[async_trait]
impl<U, F> Verify<U> for VerifyFn<F>
where
    U: Send + 'static,
    F: for<'a> Fn(Option<&'a AuthRequest>, Profile) -> BoxFuture<'a, Result<Verified<U>, BoxError>>
        + Send
        + Sync,
{
    async fn verify(
        &self,
        request: Option<&AuthRequest>,
        profile: Profile,
    ) -> Result<Verified<U>, BoxError> {
        (self.0)(request, profile).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy
// ─────────────────────────────────────────────────────────────────────────────

pub struct SamlStrategy<U> {
    options: Arc<StrategyConfig>,
    /// Configuration of the most recent attempt; used by `logout` and metadata.
    last_config: RwLock<Arc<StrategyConfig>>,
    pass_req_to_callback: bool,
    verify: Box<dyn Verify<U>>,
    engines: Arc<dyn SamlEngineFactory>,
}

impl<U: Send + 'static> SamlStrategy<U> {
    pub const NAME: &'static str = "saml";

    pub fn builder() -> SamlStrategyBuilder<U> {
        SamlStrategyBuilder::default()
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Base configuration supplied at construction.
    pub fn config(&self) -> &StrategyConfig {
        &self.options
    }

    pub fn last_config(&self) -> Arc<StrategyConfig> {
        Arc::clone(&self.last_config.read())
    }

    /// Run one authentication attempt.
    pub async fn authenticate(
        &self,
        request: &mut AuthRequest,
        options: AuthenticateOptions,
    ) -> Outcome<U> {
        let fallback = options.saml_fallback.unwrap_or_default();
        let config = Arc::new(merge(&self.options, &options.overrides));
        *self.last_config.write() = Arc::clone(&config);
        let engine = self.engines.create(Arc::clone(&config));

        let classification = request.classify(&fallback);
        tracing::debug!(
            classification = classification.as_str(),
            binding = config.authn_request_binding.as_str(),
            "Handling SAML authentication attempt"
        );

        match &classification {
            Classification::InboundResponse => {
                let validation = engine.validate_post_response(&request.body).await;
                self.on_validation(engine.as_ref(), request, &classification, validation)
                    .await
            }
            Classification::InboundLogoutRequest => {
                let validation = engine.validate_post_request(&request.body).await;
                self.on_validation(engine.as_ref(), request, &classification, validation)
                    .await
            }
            Classification::OutboundFallback(fallback) => {
                send_fallback(engine.as_ref(), &config, request, fallback).await
            }
        }
    }

    /// Build a logout request URL for the request's user, using the
    /// configuration of the most recent attempt.
    pub async fn logout(&self, request: &AuthRequest) -> Result<String, StrategyError> {
        let engine = self.engines.create(self.last_config());
        Ok(engine.logout_url(request).await?)
    }

    pub fn generate_service_provider_metadata(&self, decryption_cert: Option<&str>) -> String {
        self.engines
            .create(self.last_config())
            .generate_service_provider_metadata(decryption_cert)
    }

    async fn on_validation(
        &self,
        engine: &dyn SamlEngine,
        request: &mut AuthRequest,
        classification: &Classification,
        validation: Result<Validation, EngineError>,
    ) -> Outcome<U> {
        match validation {
            Err(err) => {
                tracing::warn!(
                    classification = classification.as_str(),
                    error = %err,
                    "SAML message rejected"
                );
                Outcome::Error(err.into())
            }
            Ok(Validation::LoggedOut(logout_request)) => {
                request.logout();
                let Some(logout_request) = logout_request else {
                    tracing::debug!("SAML logout completed");
                    return Outcome::Pass;
                };

                tracing::info!(
                    name_id = %logout_request.name_id,
                    request_id = ?logout_request.id,
                    "Answering IdP-initiated logout"
                );
                request.logout_request = Some(logout_request.clone());
                let url = engine.logout_response_url(request, &logout_request).await;
                relay(url, classification)
            }
            Ok(Validation::Authenticated(profile)) => self.run_verify(request, profile).await,
        }
    }

    async fn run_verify(&self, request: &AuthRequest, profile: Profile) -> Outcome<U> {
        let request = self.pass_req_to_callback.then_some(request);

        match self.verify.verify(request, profile).await {
            Err(err) => {
                tracing::warn!(error = %err, "SAML verify function failed");
                Outcome::Error(StrategyError::Callback(err))
            }
            Ok(Verified { user: None, info }) => {
                tracing::debug!("SAML verify function refused the profile");
                Outcome::Fail { info }
            }
            Ok(Verified {
                user: Some(user),
                info,
            }) => Outcome::Success { user, info },
        }
    }
}

async fn send_fallback<U>(
    engine: &dyn SamlEngine,
    config: &StrategyConfig,
    request: &AuthRequest,
    fallback: &SamlFallback,
) -> Outcome<U> {
    let classification = Classification::OutboundFallback(fallback.clone());

    match fallback {
        SamlFallback::LoginRequest => match config.authn_request_binding {
            AuthnRequestBinding::HttpPost => match engine.authorize_form(request).await {
                Ok(document) => Outcome::Render(document),
                Err(err) => {
                    tracing::warn!(
                        classification = classification.as_str(),
                        error = %err,
                        "Failed to build SAML login form"
                    );
                    Outcome::Error(err.into())
                }
            },
            AuthnRequestBinding::HttpRedirect => {
                relay(engine.authorize_url(request).await, &classification)
            }
        },
        SamlFallback::LogoutRequest => relay(engine.logout_url(request).await, &classification),
        SamlFallback::Unrecognized(other) => {
            tracing::debug!(fallback = %other, "Unrecognized SAML fallback");
            Outcome::Fail { info: None }
        }
    }
}

fn relay<U>(url: Result<String, EngineError>, classification: &Classification) -> Outcome<U> {
    match url {
        Ok(url) => Outcome::Redirect(url),
        Err(err) => {
            tracing::warn!(
                classification = classification.as_str(),
                error = %err,
                "Failed to build SAML redirect"
            );
            Outcome::Error(err.into())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct SamlStrategyBuilder<U> {
    config: StrategyConfig,
    verify: Option<Box<dyn Verify<U>>>,
    engines: Option<Arc<dyn SamlEngineFactory>>,
}

impl<U> Default for SamlStrategyBuilder<U> {
    fn default() -> Self {
        Self {
            config: StrategyConfig::default(),
            verify: None,
            engines: None,
        }
    }
}

impl<U: Send + 'static> SamlStrategyBuilder<U> {
    pub fn config(mut self, config: StrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn verify(mut self, verify: impl Verify<U> + 'static) -> Self {
        self.verify = Some(Box::new(verify));
        self
    }

    pub fn engine_factory(mut self, factory: impl SamlEngineFactory + 'static) -> Self {
        self.engines = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<SamlStrategy<U>, StrategyError> {
        let verify = self.verify.ok_or(StrategyError::MissingVerify)?;
        self.config.validate()?;
        let engines = match self.engines {
            Some(engines) => engines,
            None => default_engine_factory()?,
        };

        let options = Arc::new(self.config);
        Ok(SamlStrategy {
            pass_req_to_callback: options.pass_req_to_callback,
            last_config: RwLock::new(Arc::clone(&options)),
            options,
            verify,
            engines,
        })
    }
}

#[cfg(feature = "saml")]
#[allow(clippy::unnecessary_wraps)]
fn default_engine_factory() -> Result<Arc<dyn SamlEngineFactory>, StrategyError> {
    Ok(Arc::new(super::saml::SamaelEngineFactory))
}

#[cfg(not(feature = "saml"))]
fn default_engine_factory() -> Result<Arc<dyn SamlEngineFactory>, StrategyError> {
    Err(StrategyError::Configuration(
        "no SAML engine available: enable the `saml` feature or supply an engine factory".into(),
    ))
}
