use crate::config::ConfigError;

/// Error type returned by verify functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by a SAML engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The inbound message could not be decoded or parsed.
    #[error("Invalid SAML message: {0}")]
    InvalidMessage(String),

    /// The message parsed but failed signature, issuer, status or condition checks.
    #[error("SAML validation failed: {0}")]
    Validation(String),

    /// The engine's configuration cannot produce the requested message.
    #[error("SAML engine misconfigured: {0}")]
    Configuration(String),

    /// Building or encoding an outbound message failed.
    #[error("Failed to encode SAML message: {0}")]
    Encoding(String),

    /// Signing an outbound message failed.
    #[error("Failed to sign SAML message: {0}")]
    Signing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("SAML authentication strategy requires a verify function")]
    MissingVerify,

    #[error("Invalid SAML strategy configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Verify callback failed: {0}")]
    Callback(#[source] BoxError),
}

impl StrategyError {
    /// Stable machine-readable code for error responses.
    pub fn code(&self) -> &'static str {
        match self {
            StrategyError::MissingVerify | StrategyError::Configuration(_) => {
                "configuration_error"
            }
            StrategyError::Engine(EngineError::InvalidMessage(_)) => "invalid_saml_message",
            StrategyError::Engine(EngineError::Validation(_)) => "saml_validation_failed",
            StrategyError::Engine(_) => "saml_engine_error",
            StrategyError::Callback(_) => "verify_failed",
        }
    }
}

impl From<ConfigError> for StrategyError {
    fn from(err: ConfigError) -> Self {
        StrategyError::Configuration(err.to_string())
    }
}
