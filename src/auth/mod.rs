// Auth material for scan tasks
//
// Handlers only produce header maps from pre-configured credentials; the
// orchestrator carries them to scanner nodes as opaque context.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{AuthContext, AuthType};

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

pub trait AuthHandler: Send + Sync {
    fn headers(&self, target: &str) -> Result<HashMap<String, String>, AuthError>;
}

pub struct BasicAuthHandler {
    username: String,
    password: String,
}

impl BasicAuthHandler {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl AuthHandler for BasicAuthHandler {
    fn headers(&self, _target: &str) -> Result<HashMap<String, String>, AuthError> {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Basic {}", encoded),
        )]))
    }
}

pub struct ApiKeyHandler {
    header: String,
    key: String,
}

impl ApiKeyHandler {
    pub fn new(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: key.into(),
        }
    }
}

impl AuthHandler for ApiKeyHandler {
    fn headers(&self, _target: &str) -> Result<HashMap<String, String>, AuthError> {
        if self.header.trim().is_empty() {
            return Err(AuthError::Misconfigured("API key header name is empty".to_string()));
        }
        Ok(HashMap::from([(self.header.clone(), self.key.clone())]))
    }
}

/// Pre-issued bearer token, used for JWT and OAuth2 requirements.
pub struct BearerHandler {
    token: String,
}

impl BearerHandler {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl AuthHandler for BearerHandler {
    fn headers(&self, _target: &str) -> Result<HashMap<String, String>, AuthError> {
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", self.token),
        )]))
    }
}

// ============================================
// Manager
// ============================================

#[derive(Default)]
pub struct AuthManager {
    handlers: HashMap<AuthType, Box<dyn AuthHandler>>,
}

impl AuthManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        let mut manager = Self::new();

        if let (Some(user), Some(pass)) = (&config.basic_username, &config.basic_password) {
            manager.register(AuthType::Basic, BasicAuthHandler::new(user.as_str(), pass.as_str()));
        }
        if let Some(key) = &config.api_key {
            let header = config
                .api_key_header
                .as_deref()
                .unwrap_or(DEFAULT_API_KEY_HEADER);
            manager.register(AuthType::ApiKey, ApiKeyHandler::new(header, key.as_str()));
        }
        if let Some(token) = &config.bearer_token {
            manager.register(AuthType::Jwt, BearerHandler::new(token.as_str()));
            manager.register(AuthType::Oauth2, BearerHandler::new(token.as_str()));
        }

        manager
    }

    pub fn register(&mut self, auth_type: AuthType, handler: impl AuthHandler + 'static) {
        self.handlers.insert(auth_type, Box::new(handler));
    }

    pub fn has_handler(&self, auth_type: AuthType) -> bool {
        self.handlers.contains_key(&auth_type)
    }

    pub fn headers_for(
        &self,
        auth_type: AuthType,
        target: &str,
    ) -> Result<HashMap<String, String>, AuthError> {
        let handler = self
            .handlers
            .get(&auth_type)
            .ok_or_else(|| AuthError::NoHandler(auth_type.to_string()))?;
        handler.headers(target)
    }

    /// Context for the first requirement type a handler exists for.
    pub fn context_for(&self, auth_types: &[AuthType], target: &str) -> Option<AuthContext> {
        for &auth_type in auth_types {
            if auth_type == AuthType::None || !self.has_handler(auth_type) {
                continue;
            }
            match self.headers_for(auth_type, target) {
                Ok(headers) => return Some(AuthContext { auth_type, headers }),
                Err(e) => tracing::warn!("Auth handler for {} failed: {}", auth_type, e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_handler_encodes_credentials() {
        let headers = BasicAuthHandler::new("admin", "secret").headers("http://t").unwrap();
        assert_eq!(headers["Authorization"], "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn bearer_covers_jwt_and_oauth2() {
        let manager = AuthManager::from_config(&AuthConfig {
            bearer_token: Some("tok".to_string()),
            ..AuthConfig::default()
        });
        assert!(manager.has_handler(AuthType::Jwt));
        assert!(manager.has_handler(AuthType::Oauth2));
        assert!(!manager.has_handler(AuthType::Basic));

        let context = manager.context_for(&[AuthType::Basic, AuthType::Jwt], "http://t").unwrap();
        assert_eq!(context.auth_type, AuthType::Jwt);
        assert_eq!(context.headers["Authorization"], "Bearer tok");
    }

    #[test]
    fn unknown_type_yields_no_context() {
        let manager = AuthManager::new();
        assert!(manager.context_for(&[AuthType::ApiKey], "http://t").is_none());
        assert!(matches!(
            manager.headers_for(AuthType::ApiKey, "http://t"),
            Err(AuthError::NoHandler(_))
        ));
    }

    #[test]
    fn api_key_uses_configured_header() {
        let manager = AuthManager::from_config(&AuthConfig {
            api_key: Some("k-123".to_string()),
            api_key_header: Some("X-Token".to_string()),
            ..AuthConfig::default()
        });
        let headers = manager.headers_for(AuthType::ApiKey, "http://t").unwrap();
        assert_eq!(headers["X-Token"], "k-123");
    }
}
