use axum::{
    Form, Json,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use http::{StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use super::{AppState, Session};
use crate::{
    auth::{AuthRequest, EngineError, Outcome, Profile, SamlBody, StrategyError},
    config::AuthenticateOptions,
};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<Value>,
}

fn error_response(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    info: Option<Value>,
) -> Response {
    let body = ErrorResponse {
        error: ErrorInfo {
            code: code.into(),
            message: message.into(),
            info,
        },
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
pub(super) struct WhoAmI {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Profile>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginQuery {
    #[serde(rename = "RelayState")]
    relay_state: Option<String>,
}

/// Current session user.
pub(super) async fn home(State(state): State<AppState>, cookies: Cookies) -> Json<WhoAmI> {
    let user = session_user(&state, &cookies).map(|(_, user)| user);
    Json(WhoAmI {
        authenticated: user.is_some(),
        user,
    })
}

/// Start SP-initiated login.
#[tracing::instrument(name = "saml.login", skip_all)]
pub(super) async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<LoginQuery>,
) -> Response {
    let mut request = AuthRequest::new();
    if let Some(relay_state) = query.relay_state {
        request = request.with_relay_state(relay_state);
    }

    let outcome = state
        .strategy
        .authenticate(&mut request, AuthenticateOptions::login())
        .await;
    respond(&state, &cookies, &request, outcome)
}

/// Assertion consumer and single logout endpoint. The message in the body
/// decides which.
#[tracing::instrument(name = "saml.callback", skip_all)]
pub(super) async fn callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(body): Form<SamlBody>,
) -> Response {
    let session = session_user(&state, &cookies);
    let mut request = AuthRequest::from_body(body);
    if let Some((_, user)) = &session {
        request = request.with_user(user.clone());
    }

    let outcome = state
        .strategy
        .authenticate(&mut request, AuthenticateOptions::default())
        .await;

    if request.is_logged_out() {
        end_session(&state, &cookies, session.map(|(id, _)| id));
    }
    respond(&state, &cookies, &request, outcome)
}

/// Start SP-initiated single logout for the session user.
#[tracing::instrument(name = "saml.logout", skip_all)]
pub(super) async fn logout(State(state): State<AppState>, cookies: Cookies) -> Response {
    let Some((session_id, user)) = session_user(&state, &cookies) else {
        return Redirect::to("/").into_response();
    };

    let mut request = AuthRequest::new().with_user(user);
    let outcome = state
        .strategy
        .authenticate(&mut request, AuthenticateOptions::logout())
        .await;

    end_session(&state, &cookies, Some(session_id));
    respond(&state, &cookies, &request, outcome)
}

pub(super) async fn metadata(State(state): State<AppState>) -> Response {
    let xml = state.strategy.generate_service_provider_metadata(None);
    (
        [(header::CONTENT_TYPE, "application/samlmetadata+xml")],
        xml,
    )
        .into_response()
}

/// Turn the strategy outcome into an HTTP response.
fn respond(
    state: &AppState,
    cookies: &Cookies,
    request: &AuthRequest,
    outcome: Outcome<Profile>,
) -> Response {
    tracing::debug!(outcome = outcome.kind(), "SAML attempt finished");

    match outcome {
        Outcome::Redirect(url) => Redirect::to(&url).into_response(),
        Outcome::Render(document) => Html(document).into_response(),
        Outcome::Pass => Redirect::to("/").into_response(),
        Outcome::Fail { info } => error_response(
            StatusCode::UNAUTHORIZED,
            "authentication_failed",
            "SAML authentication was refused",
            info,
        ),
        Outcome::Error(err) => {
            let status = error_status(&err);
            if status.is_server_error() {
                tracing::error!(error = %err, code = err.code(), "SAML authentication error");
            } else {
                tracing::warn!(error = %err, code = err.code(), "SAML message rejected");
            }
            error_response(status, err.code(), err.to_string(), None)
        }
        Outcome::Success { user, .. } => {
            // A repeat login replaces the session the browser already holds.
            if let Some(previous) = cookie_session_id(state, cookies) {
                state.sessions.remove(&previous);
            }
            state.evict_expired();

            let session_id = Uuid::new_v4();
            tracing::info!(
                name_id = %user.name_id,
                session_id = %session_id,
                "SAML login succeeded"
            );
            state
                .sessions
                .insert(session_id, Session::new(user, state.session_ttl));
            cookies.add(session_cookie(state, session_id));

            let target = request
                .relay_state()
                .filter(|url| is_local_path(url))
                .unwrap_or("/");
            Redirect::to(target).into_response()
        }
    }
}

/// Inbound messages that fail to parse or validate are the client's fault.
fn error_status(err: &StrategyError) -> StatusCode {
    match err {
        StrategyError::Engine(EngineError::InvalidMessage(_)) => StatusCode::BAD_REQUEST,
        StrategyError::Engine(EngineError::Validation(_)) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_local_path(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

fn cookie_session_id(state: &AppState, cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(&state.session_cookie)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// The live session named by the cookie. Expired entries are evicted.
fn session_user(state: &AppState, cookies: &Cookies) -> Option<(Uuid, Profile)> {
    let id = cookie_session_id(state, cookies)?;
    let session = state.sessions.get(&id).map(|entry| entry.clone())?;
    if session.is_expired() {
        state.sessions.remove(&id);
        return None;
    }
    Some((id, session.user))
}

fn end_session(state: &AppState, cookies: &Cookies, session_id: Option<Uuid>) {
    if let Some(id) = session_id {
        state.sessions.remove(&id);
    }
    let removal = Cookie::build(state.session_cookie.to_string())
        .path("/")
        .max_age(CookieDuration::ZERO)
        .build();
    cookies.remove(removal);
}

fn session_cookie(state: &AppState, session_id: Uuid) -> Cookie<'static> {
    Cookie::build((state.session_cookie.to_string(), session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(state.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(
            i64::try_from(state.session_ttl.as_secs()).unwrap_or(i64::MAX),
        ))
        .build()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::{
            BoxError, SamlEngine, SamlEngineFactory, SamlStrategy, Validation, Verified,
            verify_fn,
        },
        config::{AuthnRequestBinding, ServerConfig, StrategyConfig},
        routes::build_router,
    };

    struct StubEngineFactory;

    impl SamlEngineFactory for StubEngineFactory {
        fn create(&self, config: Arc<StrategyConfig>) -> Box<dyn SamlEngine> {
            Box::new(StubEngine { config })
        }
    }

    struct StubEngine {
        config: Arc<StrategyConfig>,
    }

    #[async_trait]
    impl SamlEngine for StubEngine {
        async fn validate_post_response(&self, body: &SamlBody) -> Result<Validation, EngineError> {
            match body.saml_response() {
                Some("valid") => Ok(Validation::Authenticated(Profile::new("a@b.com"))),
                Some("refused") => Ok(Validation::Authenticated(Profile::new("nobody"))),
                Some("logged-out") => Ok(Validation::LoggedOut(None)),
                Some("garbage") => Err(EngineError::InvalidMessage("not base64".into())),
                Some("misconfigured") => Err(EngineError::Configuration("no IdP cert".into())),
                _ => Err(EngineError::Validation("bad signature".into())),
            }
        }

        async fn validate_post_request(&self, _body: &SamlBody) -> Result<Validation, EngineError> {
            let mut profile = Profile::new("a@b.com");
            profile.id = Some("_req1".into());
            Ok(Validation::LoggedOut(Some(profile)))
        }

        async fn authorize_url(&self, request: &AuthRequest) -> Result<String, EngineError> {
            Ok(format!(
                "{}?SAMLRequest=login&RelayState={}",
                self.config.entry_point,
                request.relay_state().unwrap_or_default()
            ))
        }

        async fn authorize_form(&self, _request: &AuthRequest) -> Result<String, EngineError> {
            Ok("<form id=\"saml\"></form>".into())
        }

        async fn logout_url(&self, request: &AuthRequest) -> Result<String, EngineError> {
            let user = request
                .user
                .as_ref()
                .ok_or_else(|| EngineError::Encoding("no user".into()))?;
            Ok(format!("{}?SAMLRequest=logout-{}", self.config.logout_endpoint(), user.name_id))
        }

        async fn logout_response_url(
            &self,
            _request: &AuthRequest,
            logout_request: &Profile,
        ) -> Result<String, EngineError> {
            Ok(format!(
                "{}?SAMLResponse={}",
                self.config.logout_endpoint(),
                logout_request.id.as_deref().unwrap_or_default()
            ))
        }

        fn generate_service_provider_metadata(&self, _decryption_cert: Option<&str>) -> String {
            format!("<EntityDescriptor entityID=\"{}\"/>", self.config.issuer)
        }
    }

    fn strategy_config(binding: AuthnRequestBinding) -> StrategyConfig {
        StrategyConfig {
            entry_point: "https://idp.example.com/sso".into(),
            issuer: "https://sp.example.com".into(),
            callback_url: "https://sp.example.com/login/callback".into(),
            authn_request_binding: binding,
            ..Default::default()
        }
    }

    fn test_state(binding: AuthnRequestBinding) -> AppState {
        let strategy = SamlStrategy::builder()
            .config(strategy_config(binding))
            .engine_factory(StubEngineFactory)
            .verify(verify_fn(|_request, profile: Profile| {
                Box::pin(async move {
                    if profile.name_id == "nobody" {
                        Ok::<_, BoxError>(Verified::rejected(Some(
                            serde_json::json!({"reason": "unknown user"}),
                        )))
                    } else {
                        Ok(Verified::user(profile))
                    }
                })
            }))
            .build()
            .unwrap();
        AppState::new(strategy, &ServerConfig::default())
    }

    fn callback_request(form: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/login/callback")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(form.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    fn set_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    /// Log in through the callback and return the `name=value` session cookie.
    async fn login_cookie(state: &AppState) -> String {
        let response = build_router(state.clone())
            .oneshot(callback_request("SAMLResponse=valid", None))
            .await
            .unwrap();
        let header = set_cookie(&response).unwrap();
        header.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_login_redirects_to_idp() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/login?RelayState=%2Fdashboard")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "https://idp.example.com/sso?SAMLRequest=login&RelayState=/dashboard"
        );
    }

    #[tokio::test]
    async fn test_login_with_post_binding_renders_form() {
        let app = build_router(test_state(AuthnRequestBinding::HttpPost));

        let response = app
            .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"<form id=\"saml\"></form>");
    }

    #[tokio::test]
    async fn test_metadata_returns_xml() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(Request::builder().uri("/metadata").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/samlmetadata+xml"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            &bytes[..],
            b"<EntityDescriptor entityID=\"https://sp.example.com\"/>"
        );
    }

    #[tokio::test]
    async fn test_successful_callback_sets_session_cookie() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let app = build_router(state.clone());

        let response = app
            .oneshot(callback_request(
                "SAMLResponse=valid&RelayState=%2Fprofile",
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/profile");
        let cookie = set_cookie(&response).unwrap();
        assert!(cookie.starts_with("__saml_sp_session="));
        assert!(cookie.contains("HttpOnly"));
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_callback_ignores_external_relay_state() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(callback_request(
                "SAMLResponse=valid&RelayState=%2F%2Fevil.example.com",
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn test_session_user_is_reported_on_home() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let cookie = login_cookie(&state).await;

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["user"]["name_id"], "a@b.com");
    }

    #[tokio::test]
    async fn test_home_without_session_is_anonymous() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["authenticated"], false);
        assert!(body.get("user").is_none());
    }

    #[tokio::test]
    async fn test_refused_profile_returns_401() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(callback_request("SAMLResponse=refused", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "authentication_failed");
        assert_eq!(body["error"]["info"]["reason"], "unknown user");
    }

    #[tokio::test]
    async fn test_forged_response_returns_401() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let app = build_router(state.clone());

        let response = app
            .oneshot(callback_request("SAMLResponse=forged", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "saml_validation_failed");
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_response_returns_400() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(callback_request("SAMLResponse=garbage", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "invalid_saml_message");
    }

    #[tokio::test]
    async fn test_engine_configuration_error_returns_500() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(callback_request("SAMLResponse=misconfigured", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "saml_engine_error");
    }

    #[tokio::test]
    async fn test_repeat_login_replaces_previous_session() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let cookie = login_cookie(&state).await;
        let first_id = Uuid::parse_str(cookie.split('=').nth(1).unwrap()).unwrap();

        let response = build_router(state.clone())
            .oneshot(callback_request("SAMLResponse=valid", Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(state.sessions.len(), 1);
        assert!(!state.sessions.contains_key(&first_id));
    }

    fn expired_session() -> Session {
        Session {
            user: Profile::new("old@b.com"),
            expires_at: Instant::now()
                .checked_sub(Duration::from_secs(60))
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn test_expired_session_is_ignored_and_evicted() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let id = Uuid::new_v4();
        state.sessions.insert(id, expired_session());

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::COOKIE, format!("__saml_sp_session={id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["authenticated"], false);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_login_evicts_abandoned_sessions() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        state.sessions.insert(Uuid::new_v4(), expired_session());
        state.sessions.insert(Uuid::new_v4(), expired_session());

        login_cookie(&state).await;

        assert_eq!(state.sessions.len(), 1);
        assert!(state.sessions.iter().all(|entry| !entry.is_expired()));
    }

    #[tokio::test]
    async fn test_logout_response_clears_session_and_passes() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let cookie = login_cookie(&state).await;
        assert_eq!(state.sessions.len(), 1);

        let response = build_router(state.clone())
            .oneshot(callback_request("SAMLResponse=logged-out", Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_idp_logout_request_is_answered() {
        let state = test_state(AuthnRequestBinding::HttpRedirect);
        let cookie = login_cookie(&state).await;

        let response = build_router(state.clone())
            .oneshot(callback_request("SAMLRequest=incoming", Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "https://idp.example.com/sso?SAMLResponse=_req1"
        );
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_logout_redirects_session_user_to_idp() {
        let state = test_state(AuthnRequestBinding::HttpPost);
        let cookie = login_cookie(&state).await;

        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/logout")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "https://idp.example.com/sso?SAMLRequest=logout-a@b.com"
        );
        assert!(state.sessions.is_empty());
        assert!(set_cookie(&response).unwrap().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_logout_without_session_goes_home() {
        let app = build_router(test_state(AuthnRequestBinding::HttpRedirect));

        let response = app
            .oneshot(Request::builder().uri("/logout").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
    }
}
