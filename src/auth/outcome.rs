use serde_json::Value;

use super::StrategyError;

/// Terminal signal of one authentication attempt.
#[derive(Debug)]
pub enum Outcome<U> {
    /// The verify function accepted the profile.
    Success { user: U, info: Option<Value> },
    /// Authentication was refused (verify returned no user, or the fallback
    /// was not recognized).
    Fail { info: Option<Value> },
    /// Something went wrong in the engine or the verify function.
    Error(StrategyError),
    /// Nothing to do; hand the request on.
    Pass,
    /// Send the browser to this URL.
    Redirect(String),
    /// Respond with this HTML document.
    Render(String),
}

impl<U> Outcome<U> {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Fail { .. } => "fail",
            Outcome::Error(_) => "error",
            Outcome::Pass => "pass",
            Outcome::Redirect(_) => "redirect",
            Outcome::Render(_) => "render",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}
