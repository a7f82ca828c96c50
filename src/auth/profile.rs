use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity extracted from a validated SAML message.
///
/// For assertions this describes the authenticated subject. For inbound
/// logout requests `id` carries the request ID that the logout response
/// must answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Entity ID of the issuing IdP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Message ID (set for logout requests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_id_format: Option<String>,

    /// SessionIndex from the AuthnStatement, needed for single logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,

    /// Assertion attributes by name; every attribute may carry several values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Profile {
    pub fn new(name_id: impl Into<String>) -> Self {
        Self {
            name_id: name_id.into(),
            ..Default::default()
        }
    }

    /// First value of an attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of an attribute (empty when absent).
    pub fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
