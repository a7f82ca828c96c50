//! Demo service provider built on [`SamlStrategy`].

mod saml;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Router,
    routing::{get, post},
};
use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    auth::{Profile, SamlStrategy},
    config::ServerConfig,
};

/// A logged-in user held in memory until `expires_at`.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: Profile,
    pub expires_at: Instant,
}

impl Session {
    pub fn new(user: Profile, ttl: Duration) -> Self {
        Self {
            user,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Shared state of the demo routes.
#[derive(Clone)]
pub struct AppState {
    pub strategy: Arc<SamlStrategy<Profile>>,
    /// In-memory sessions keyed by the ID stored in the session cookie.
    pub sessions: Arc<DashMap<Uuid, Session>>,
    pub session_cookie: Arc<str>,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(strategy: SamlStrategy<Profile>, server: &ServerConfig) -> Self {
        Self {
            strategy: Arc::new(strategy),
            sessions: Arc::new(DashMap::new()),
            session_cookie: Arc::from(server.session_cookie.as_str()),
            session_ttl: Duration::from_secs(server.session_duration_secs),
            secure_cookies: server.secure_cookies,
        }
    }

    /// Drop every expired session.
    pub fn evict_expired(&self) {
        self.sessions.retain(|_, session| !session.is_expired());
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(saml::home))
        .route("/login", get(saml::login))
        .route("/login/callback", post(saml::callback))
        .route("/logout", get(saml::logout))
        .route("/logout/callback", post(saml::callback))
        .route("/metadata", get(saml::metadata))
        .layer(tower_cookies::CookieManagerLayer::new())
        .with_state(state)
}
