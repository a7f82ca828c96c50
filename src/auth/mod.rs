mod engine;
mod error;
mod outcome;
mod profile;
mod request;
#[cfg(feature = "saml")]
pub mod saml;
mod strategy;

pub use engine::{SamlEngine, SamlEngineFactory, Validation};
pub use error::{BoxError, EngineError, StrategyError};
pub use outcome::Outcome;
pub use profile::Profile;
pub use request::{AuthRequest, Classification, SamlBody};
#[cfg(feature = "saml")]
pub use saml::{SamaelEngine, SamaelEngineFactory};
pub use strategy::{SamlStrategy, SamlStrategyBuilder, Verified, Verify, VerifyFn, verify_fn};
