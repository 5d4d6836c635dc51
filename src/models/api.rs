use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================
// Auth
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    None,
    Basic,
    #[serde(rename = "apikey")]
    ApiKey,
    Oauth2,
    Jwt,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::ApiKey => "apikey",
            AuthType::Oauth2 => "oauth2",
            AuthType::Jwt => "jwt",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequirement {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub location: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

impl AuthRequirement {
    /// Requirement carried in the `Authorization` header.
    pub fn header(auth_type: AuthType) -> Self {
        Self {
            auth_type,
            location: "header".to_string(),
            name: "Authorization".to_string(),
            scheme: None,
        }
    }
}

// ============================================
// Parameters
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamLocation {
    #[default]
    Query,
    Path,
    Header,
    Body,
    Cookie,
}

impl ParamLocation {
    /// Lenient conversion from a source document value.
    /// Unknown locations fall back to `query`.
    pub fn from_source(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "path" => ParamLocation::Path,
            "header" => ParamLocation::Header,
            "body" => ParamLocation::Body,
            "cookie" => ParamLocation::Cookie,
            _ => ParamLocation::Query,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Query => "query",
            ParamLocation::Path => "path",
            ParamLocation::Header => "header",
            ParamLocation::Body => "body",
            ParamLocation::Cookie => "cookie",
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ParamLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParamLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ParamLocation::from_source(&raw))
    }
}

/// Where an attack payload of a given category should be substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionPoint {
    pub param_name: String,
    /// Attack category, e.g. `sql_injection`
    pub param_type: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub payloads: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub insertion_points: Vec<InsertionPoint>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, location: ParamLocation) -> Self {
        Self {
            name: name.into(),
            location,
            required: false,
            param_type: "string".to_string(),
            description: None,
            insertion_points: Vec::new(),
        }
    }
}

// ============================================
// Endpoints
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Rest,
    Query,
    Mutation,
    Soap,
}

impl OperationType {
    /// Protocol a scanner node speaks for this kind of operation.
    pub fn protocol(&self) -> &'static str {
        match self {
            OperationType::Rest => "http",
            OperationType::Query | OperationType::Mutation => "graphql",
            OperationType::Soap => "soap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub content_type: String,
    pub schema: serde_json::Value,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub name: String,
    pub operation_type: OperationType,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    #[serde(default)]
    pub auth_requirements: Vec<AuthRequirement>,
    #[serde(default)]
    pub description: String,
}

impl Endpoint {
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        operation_type: OperationType,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            name: String::new(),
            operation_type,
            parameters: Vec::new(),
            request_body: None,
            auth_requirements: Vec::new(),
            description: String::new(),
        }
    }

    pub fn has_parameter(&self, name: &str, location: ParamLocation) -> bool {
        self.parameters
            .iter()
            .any(|p| p.location == location && p.name == name)
    }
}

// ============================================
// API Definition
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// First server URL declared by the document, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub auth_schemes: BTreeMap<String, serde_json::Value>,
}

impl ApiDefinition {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
            description: None,
            base_url: None,
            endpoints: Vec::new(),
            auth_schemes: BTreeMap::new(),
        }
    }
}
