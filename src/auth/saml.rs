//! samael-backed SAML engine.
//!
//! Handles the protocol work behind [`SamlEngine`]:
//! - AuthnRequest generation for the HTTP-Redirect and HTTP-POST bindings
//! - Response parsing and validation against the IdP certificate
//! - LogoutRequest/LogoutResponse generation and parsing
//! - Redirect-binding signatures
//! - Service provider metadata

use std::{
    collections::BTreeMap,
    io::Write,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{SecondsFormat, Utc};
use openssl::pkey::{PKey, Private};
use regex::Regex;
use samael::{
    metadata::EntityDescriptor,
    schema::{
        Assertion, AuthnContextClassRef, AuthnContextComparison, AuthnRequest, LogoutRequest,
        RequestedAuthnContext,
    },
    service_provider::{ServiceProvider, ServiceProviderBuilder},
};
use url::{Url, form_urlencoded};
use uuid::Uuid;

use super::{
    AuthRequest, EngineError, Profile, SamlBody, SamlEngine, SamlEngineFactory, Validation,
};
use crate::config::StrategyConfig;

const EMAIL_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Creates a [`SamaelEngine`] per configuration snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamaelEngineFactory;

impl SamlEngineFactory for SamaelEngineFactory {
    fn create(&self, config: Arc<StrategyConfig>) -> Box<dyn SamlEngine> {
        Box::new(SamaelEngine::new(config))
    }
}

/// SAML engine built on samael and openssl.
pub struct SamaelEngine {
    config: Arc<StrategyConfig>,
}

impl SamaelEngine {
    pub fn new(config: Arc<StrategyConfig>) -> Self {
        Self { config }
    }

    fn idp_entity_id(&self) -> &str {
        self.config
            .idp_issuer
            .as_deref()
            .unwrap_or(&self.config.entry_point)
    }

    fn require_entry_point(&self) -> Result<&str, EngineError> {
        if self.config.entry_point.is_empty() {
            return Err(EngineError::Configuration(
                "entry_point is not configured".to_string(),
            ));
        }
        Ok(&self.config.entry_point)
    }

    /// Build an EntityDescriptor for the IdP from config.
    fn build_idp_metadata(&self) -> Result<EntityDescriptor, EngineError> {
        let key_descriptor = self
            .config
            .cert
            .as_deref()
            .map(|cert| {
                format!(
                    r#"<md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>"#,
                    strip_pem_headers(cert)
                )
            })
            .unwrap_or_default();

        let xml = format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        {}
        <md:SingleSignOnService Binding="{}" Location="{}"/>
        <md:SingleLogoutService Binding="{}" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            escape_xml(self.idp_entity_id()),
            key_descriptor,
            HTTP_REDIRECT_BINDING,
            escape_xml(&self.config.entry_point),
            HTTP_REDIRECT_BINDING,
            escape_xml(self.config.logout_endpoint()),
        );

        samael::metadata::de::from_str(&xml).map_err(|e| {
            EngineError::Configuration(format!("Failed to build IdP metadata: {}", e))
        })
    }

    fn service_provider(&self) -> Result<ServiceProvider, EngineError> {
        ServiceProviderBuilder::default()
            .entity_id(self.config.issuer.clone())
            .acs_url(self.config.callback_url.clone())
            .idp_metadata(self.build_idp_metadata()?)
            .authn_name_id_format(
                self.config
                    .identifier_format
                    .clone()
                    .unwrap_or_else(|| EMAIL_NAME_ID_FORMAT.to_string()),
            )
            .force_authn(self.config.force_authn)
            .allow_idp_initiated(true)
            .build()
            .map_err(|e| {
                EngineError::Configuration(format!("Failed to build ServiceProvider: {}", e))
            })
    }

    /// Load the SP private key, if one is configured.
    ///
    /// The private key must be in PEM format (PKCS#8 or PKCS#1).
    fn load_private_key(&self) -> Result<Option<PKey<Private>>, EngineError> {
        let Some(private_key_pem) = self
            .config
            .private_key
            .as_deref()
            .filter(|pem| !pem.is_empty())
        else {
            return Ok(None);
        };

        PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map(Some)
            .map_err(|e| {
                EngineError::Configuration(format!(
                    "Failed to parse SP private key (expected PEM format): {}",
                    e
                ))
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Login
    // ─────────────────────────────────────────────────────────────────────────

    fn build_authn_request(&self) -> Result<AuthnRequest, EngineError> {
        let entry_point = self.require_entry_point()?;
        let sp = self.service_provider()?;

        let mut authn_request = sp.make_authentication_request(entry_point).map_err(|e| {
            EngineError::Encoding(format!("Failed to create AuthnRequest: {}", e))
        })?;

        if let Some(authn_context) = &self.config.authn_context {
            authn_request.requested_authn_context = Some(RequestedAuthnContext {
                authn_context_class_refs: Some(vec![AuthnContextClassRef {
                    value: Some(authn_context.clone()),
                }]),
                authn_context_decl_refs: None,
                comparison: Some(AuthnContextComparison::Exact),
            });
        }

        Ok(authn_request)
    }

    fn build_authorize_url(&self, relay_state: &str) -> Result<String, EngineError> {
        let authn_request = self.build_authn_request()?;

        let url = match self.load_private_key()? {
            Some(private_key) => authn_request
                .signed_redirect(relay_state, private_key)
                .map_err(|e| EngineError::Signing(format!("Failed to sign AuthnRequest: {}", e)))?,
            None => authn_request.redirect(relay_state).map_err(|e| {
                EngineError::Encoding(format!("Failed to encode AuthnRequest: {}", e))
            })?,
        }
        .ok_or_else(|| EngineError::Configuration("AuthnRequest has no destination".to_string()))?;

        let mut url = Url::parse(&url.to_string())
            .map_err(|e| EngineError::Encoding(format!("Invalid AuthnRequest URL: {}", e)))?;
        self.append_additional_params(&mut url, &self.config.additional_authorize_params);

        tracing::debug!(
            entry_point = %self.config.entry_point,
            request_id = %authn_request.id,
            "Generated SAML AuthnRequest URL"
        );

        Ok(url.into())
    }

    fn authn_request_xml(&self, entry_point: &str) -> String {
        let force_authn = if self.config.force_authn {
            r#" ForceAuthn="true""#
        } else {
            ""
        };

        let name_id_policy = self
            .config
            .identifier_format
            .as_deref()
            .map(|format| {
                format!(
                    r#"<samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                    escape_xml(format)
                )
            })
            .unwrap_or_default();

        let authn_context = self
            .config
            .authn_context
            .as_deref()
            .map(|context| {
                format!(
                    r#"<samlp:RequestedAuthnContext Comparison="exact"><saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef></samlp:RequestedAuthnContext>"#,
                    escape_xml(context)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_{}" Version="2.0" IssueInstant="{}" Destination="{}" ProtocolBinding="{}" AssertionConsumerServiceURL="{}"{}><saml:Issuer>{}</saml:Issuer>{}{}</samlp:AuthnRequest>"#,
            Uuid::new_v4(),
            issue_instant(),
            escape_xml(entry_point),
            HTTP_POST_BINDING,
            escape_xml(&self.config.callback_url),
            force_authn,
            escape_xml(&self.config.issuer),
            name_id_policy,
            authn_context,
        )
    }

    fn build_authorize_form(&self, relay_state: Option<&str>) -> Result<String, EngineError> {
        let entry_point = self.require_entry_point()?;
        let encoded = STANDARD.encode(self.authn_request_xml(entry_point));

        let mut inputs = vec![("SAMLRequest".to_string(), encoded)];
        if let Some(relay_state) = relay_state {
            inputs.push(("RelayState".to_string(), relay_state.to_string()));
        }
        for (key, value) in self.additional_params(&self.config.additional_authorize_params) {
            inputs.push((key.clone(), value.clone()));
        }

        let fields = inputs
            .iter()
            .map(|(name, value)| {
                format!(
                    r#"<input type="hidden" name="{}" value="{}" />"#,
                    escape_xml(name),
                    escape_xml(value)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Redirecting to identity provider</title></head>
<body onload="document.forms[0].submit()">
<noscript><p>JavaScript is disabled. Click the button below to continue.</p></noscript>
<form method="post" action="{}">
{}
<noscript><input type="submit" value="Continue" /></noscript>
</form>
</body>
</html>"#,
            escape_xml(entry_point),
            fields
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound messages
    // ─────────────────────────────────────────────────────────────────────────

    fn validate_response(&self, encoded: &str) -> Result<Validation, EngineError> {
        let encoded = strip_whitespace(encoded);
        let xml = decode_message(&encoded)?;

        tracing::debug!(xml_len = xml.len(), "Parsing SAML response");

        if root_element(&xml).as_deref() == Some("LogoutResponse") {
            let status = status_code(&xml);
            if status.as_deref() != Some(STATUS_SUCCESS) {
                return Err(EngineError::Validation(format!(
                    "LogoutResponse status is not success: {}",
                    status.as_deref().unwrap_or("missing")
                )));
            }
            return Ok(Validation::LoggedOut(None));
        }

        let sp = self.service_provider()?;
        let assertion = sp.parse_base64_response(&encoded, None).map_err(|e| {
            EngineError::Validation(format!("SAML response validation failed: {}", e))
        })?;

        profile_from_assertion(&assertion).map(Validation::Authenticated)
    }

    fn validate_logout_request(&self, encoded: &str) -> Result<Validation, EngineError> {
        let xml = decode_message(&strip_whitespace(encoded))?;
        if root_element(&xml).as_deref() != Some("LogoutRequest") {
            return Err(EngineError::InvalidMessage(
                "SAMLRequest is not a LogoutRequest".to_string(),
            ));
        }

        let logout_request: LogoutRequest = xml.parse().map_err(|e| {
            EngineError::InvalidMessage(format!("Failed to parse LogoutRequest: {}", e))
        })?;

        let issuer = logout_request
            .issuer
            .as_ref()
            .and_then(|issuer| issuer.value.clone());
        if let Some(expected) = &self.config.idp_issuer
            && issuer.as_deref() != Some(expected.as_str())
        {
            return Err(EngineError::Validation(format!(
                "Unexpected LogoutRequest issuer: {}",
                issuer.as_deref().unwrap_or("missing")
            )));
        }

        let name_id = logout_request.name_id.as_ref().ok_or_else(|| {
            EngineError::InvalidMessage("LogoutRequest is missing NameID".to_string())
        })?;

        Ok(Validation::LoggedOut(Some(Profile {
            issuer,
            id: logout_request.id.clone(),
            name_id: name_id.value.clone(),
            name_id_format: name_id.format.clone(),
            session_index: logout_request.session_index.clone(),
            attributes: BTreeMap::new(),
        })))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logout
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a SAML LogoutRequest for `user`.
    fn build_logout_request(&self, user: &Profile, destination: &str) -> LogoutRequest {
        use samael::schema::{Issuer, NameID};

        let name_id_format = user
            .name_id_format
            .clone()
            .or_else(|| self.config.identifier_format.clone())
            .unwrap_or_else(|| EMAIL_NAME_ID_FORMAT.to_string());

        LogoutRequest {
            id: Some(format!("_logout_{}", Uuid::new_v4())),
            version: Some("2.0".to_string()),
            issue_instant: Some(Utc::now()),
            destination: Some(destination.to_string()),
            issuer: Some(Issuer {
                value: Some(self.config.issuer.clone()),
                ..Default::default()
            }),
            name_id: Some(NameID {
                value: user.name_id.clone(),
                format: Some(name_id_format),
            }),
            session_index: user.session_index.clone(),
            signature: None,
        }
    }

    fn build_logout_url(&self, request: &AuthRequest) -> Result<String, EngineError> {
        use samael::traits::ToXml;

        let user = request.user.as_ref().ok_or_else(|| {
            EngineError::Encoding("LogoutRequest requires an authenticated user".to_string())
        })?;
        let destination = self.config.logout_endpoint();
        let logout_request = self.build_logout_request(user, destination);

        let xml = logout_request.to_string().map_err(|e| {
            EngineError::Encoding(format!("Failed to serialize LogoutRequest: {:?}", e))
        })?;

        let url = self.redirect_url(
            destination,
            "SAMLRequest",
            &xml,
            request.relay_state(),
            &self.config.additional_logout_params,
        )?;

        tracing::debug!(
            destination = %destination,
            name_id = %user.name_id,
            "Generated SAML LogoutRequest URL"
        );

        Ok(url)
    }

    fn logout_response_xml(&self, destination: &str, in_response_to: Option<&str>) -> String {
        let in_response_to = in_response_to
            .map(|id| format!(r#" InResponseTo="{}""#, escape_xml(id)))
            .unwrap_or_default();

        format!(
            r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_{}" Version="2.0" IssueInstant="{}" Destination="{}"{}><saml:Issuer>{}</saml:Issuer><samlp:Status><samlp:StatusCode Value="{}"/></samlp:Status></samlp:LogoutResponse>"#,
            Uuid::new_v4(),
            issue_instant(),
            escape_xml(destination),
            in_response_to,
            escape_xml(&self.config.issuer),
            STATUS_SUCCESS,
        )
    }

    fn build_logout_response_url(
        &self,
        request: &AuthRequest,
        logout_request: &Profile,
    ) -> Result<String, EngineError> {
        let destination = self.config.logout_endpoint();
        let xml = self.logout_response_xml(destination, logout_request.id.as_deref());

        self.redirect_url(
            destination,
            "SAMLResponse",
            &xml,
            request.relay_state(),
            &self.config.additional_logout_params,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP-Redirect encoding
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode `xml` for the HTTP-Redirect binding and build the URL.
    ///
    /// The signature covers the SAML parameters only; additional parameters
    /// are appended after it.
    fn redirect_url(
        &self,
        destination: &str,
        parameter: &str,
        xml: &str,
        relay_state: Option<&str>,
        specific_params: &BTreeMap<String, String>,
    ) -> Result<String, EngineError> {
        if destination.is_empty() {
            return Err(EngineError::Configuration(
                "logout_url and entry_point are not configured".to_string(),
            ));
        }
        let mut url = Url::parse(destination).map_err(|e| {
            EngineError::Configuration(format!("Invalid SAML endpoint {}: {}", destination, e))
        })?;

        let mut pairs = vec![(parameter.to_string(), deflate_and_encode(xml)?)];
        if let Some(relay_state) = relay_state {
            pairs.push(("RelayState".to_string(), relay_state.to_string()));
        }
        if let Some(private_key) = self.load_private_key()? {
            pairs = sign_query(pairs, &private_key)?;
        }

        url.query_pairs_mut().extend_pairs(&pairs);
        self.append_additional_params(&mut url, specific_params);

        Ok(url.into())
    }

    fn additional_params<'a>(
        &'a self,
        specific: &'a BTreeMap<String, String>,
    ) -> impl Iterator<Item = (&'a String, &'a String)> {
        self.config
            .additional_params
            .iter()
            .filter(move |(key, _)| !specific.contains_key(*key))
            .chain(specific.iter())
    }

    fn append_additional_params(&self, url: &mut Url, specific: &BTreeMap<String, String>) {
        let params: Vec<_> = self.additional_params(specific).collect();
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────────

    fn sp_metadata(&self, decryption_cert: Option<&str>) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}" ID="{}">
  <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol" AuthnRequestsSigned="{}">"#,
            escape_xml(&self.config.issuer),
            escape_xml(&metadata_id(&self.config.issuer)),
            self.config.private_key.is_some(),
        );

        if let Some(signing_cert) = &self.config.signing_cert {
            xml.push_str(&key_descriptor("signing", signing_cert, ""));
        }

        if let Some(decryption_cert) = decryption_cert {
            xml.push_str(&key_descriptor(
                "encryption",
                decryption_cert,
                r#"
      <md:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/>
      <md:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
      <md:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#tripledes-cbc"/>"#,
            ));
        }

        if let Some(logout_callback_url) = &self.config.logout_callback_url {
            xml.push_str(&format!(
                r#"
    <md:SingleLogoutService Binding="{}" Location="{}"/>"#,
                HTTP_POST_BINDING,
                escape_xml(logout_callback_url)
            ));
        }

        let name_id_format = self
            .config
            .identifier_format
            .as_deref()
            .unwrap_or(EMAIL_NAME_ID_FORMAT);
        xml.push_str(&format!(
            r#"
    <md:NameIDFormat>{}</md:NameIDFormat>"#,
            escape_xml(name_id_format)
        ));

        xml.push_str(&format!(
            r#"
    <md:AssertionConsumerService
        Binding="{}"
        Location="{}"
        index="1"/>"#,
            HTTP_POST_BINDING,
            escape_xml(&self.config.callback_url)
        ));

        xml.push_str(
            r#"
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        );

        xml
    }
}

#[async_trait]
impl SamlEngine for SamaelEngine {
    async fn validate_post_response(&self, body: &SamlBody) -> Result<Validation, EngineError> {
        let encoded = body.saml_response().ok_or_else(|| {
            EngineError::InvalidMessage("Request body has no SAMLResponse".to_string())
        })?;
        self.validate_response(encoded)
    }

    async fn validate_post_request(&self, body: &SamlBody) -> Result<Validation, EngineError> {
        let encoded = body.saml_request().ok_or_else(|| {
            EngineError::InvalidMessage("Request body has no SAMLRequest".to_string())
        })?;
        self.validate_logout_request(encoded)
    }

    async fn authorize_url(&self, request: &AuthRequest) -> Result<String, EngineError> {
        self.build_authorize_url(request.relay_state().unwrap_or_default())
    }

    async fn authorize_form(&self, request: &AuthRequest) -> Result<String, EngineError> {
        self.build_authorize_form(request.relay_state())
    }

    async fn logout_url(&self, request: &AuthRequest) -> Result<String, EngineError> {
        self.build_logout_url(request)
    }

    async fn logout_response_url(
        &self,
        request: &AuthRequest,
        logout_request: &Profile,
    ) -> Result<String, EngineError> {
        self.build_logout_response_url(request, logout_request)
    }

    fn generate_service_provider_metadata(&self, decryption_cert: Option<&str>) -> String {
        self.sp_metadata(decryption_cert)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn profile_from_assertion(assertion: &Assertion) -> Result<Profile, EngineError> {
    let name_id = assertion
        .subject
        .as_ref()
        .and_then(|s| s.name_id.as_ref())
        .ok_or_else(|| EngineError::Validation("SAML assertion missing NameID".to_string()))?;

    let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for statement in assertion.attribute_statements.iter().flatten() {
        for attr in &statement.attributes {
            let Some(name) = attr.name.clone().or_else(|| attr.friendly_name.clone()) else {
                continue;
            };
            attributes
                .entry(name)
                .or_default()
                .extend(attr.values.iter().filter_map(|v| v.value.clone()));
        }
    }

    // SessionIndex from the AuthnStatement, needed for SLO
    let session_index = assertion
        .authn_statements
        .as_ref()
        .and_then(|stmts| stmts.first())
        .and_then(|stmt| stmt.session_index.clone());

    Ok(Profile {
        issuer: assertion.issuer.value.clone(),
        id: None,
        name_id: name_id.value.clone(),
        name_id_format: name_id.format.clone(),
        session_index,
        attributes,
    })
}

fn decode_message(encoded: &str) -> Result<String, EngineError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| EngineError::InvalidMessage(format!("Invalid base64: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| EngineError::InvalidMessage(format!("Message is not valid UTF-8: {}", e)))
}

fn deflate_and_encode(xml: &str) -> Result<String, EngineError> {
    use flate2::{Compression, write::DeflateEncoder};

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| EngineError::Encoding(format!("Failed to compress message: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| EngineError::Encoding(format!("Failed to compress message: {}", e)))?;

    Ok(STANDARD.encode(compressed))
}

/// Sign redirect-binding query parameters.
///
/// Appends `SigAlg` and `Signature`; the signed content is the URL-encoded
/// `SAMLRequest|SAMLResponse[&RelayState]&SigAlg` query.
fn sign_query(
    mut pairs: Vec<(String, String)>,
    private_key: &PKey<Private>,
) -> Result<Vec<(String, String)>, EngineError> {
    use openssl::{hash::MessageDigest, sign::Signer};

    let sig_alg = if private_key.ec_key().is_ok() {
        "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
    } else {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
    };
    pairs.push(("SigAlg".to_string(), sig_alg.to_string()));

    let signed_content = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&pairs)
        .finish();

    let mut signer = Signer::new(MessageDigest::sha256(), private_key)
        .map_err(|e| EngineError::Signing(format!("Failed to create signer: {}", e)))?;
    signer
        .update(signed_content.as_bytes())
        .map_err(|e| EngineError::Signing(format!("Failed to update signer: {}", e)))?;
    let signature = signer
        .sign_to_vec()
        .map_err(|e| EngineError::Signing(format!("Failed to sign: {}", e)))?;

    pairs.push(("Signature".to_string(), STANDARD.encode(signature)));
    Ok(pairs)
}

static ROOT_ELEMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:[A-Za-z_][\w.-]*:)?([A-Za-z_][\w.-]*)").unwrap());

static STATUS_CODE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:[\w.-]+:)?StatusCode\b[^>]*?\bValue\s*=\s*"([^"]*)""#).unwrap()
});

/// Local name of the document's root element.
fn root_element(xml: &str) -> Option<String> {
    ROOT_ELEMENT_REGEX
        .captures(xml)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Top-level status code of a SAML protocol response.
fn status_code(xml: &str) -> Option<String> {
    STATUS_CODE_REGEX
        .captures(xml)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

fn key_descriptor(usage: &str, cert: &str, children: &str) -> String {
    format!(
        r#"
    <md:KeyDescriptor use="{}">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>{}
    </md:KeyDescriptor>"#,
        usage,
        strip_pem_headers(cert),
        children
    )
}

/// Metadata document ID derived from the entity ID (must be an NCName).
fn metadata_id(entity_id: &str) -> String {
    let sanitized: String = entity_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("_{}", sanitized)
}

fn issue_instant() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Strip PEM headers and line breaks from a certificate.
fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----BEGIN") && !line.starts_with("-----END"))
        .collect::<Vec<_>>()
        .join("")
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
