//! Credential and region resolution, injected rather than read from the
//! environment.
//!
//! The teacher's gateway reads BYOK overrides from an `X-Provider-API-Key`
//! header via `RequestContext` (`request.rs`). This crate has no HTTP
//! ingress of its own, so the same idea is expressed as a trait a caller
//! implements once (backed by env vars, a secrets manager, whatever) and
//! passes in, instead of this crate reaching into `std::env` itself.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Result;

/// Bedrock-style credentials, resolved once per stream start.
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub region: String,
}

/// Source of truth for provider credentials. Implementations decide how to
/// fetch and cache; this crate never persists what it's handed.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Bearer/API-key credential for OpenAI-compatible and Anthropic
    /// endpoints.
    async fn api_key(&self, provider: &str) -> Result<SecretString>;

    /// Resolved AWS credentials for Bedrock. Implementations may perform an
    /// assume-role call here; a failure maps to
    /// `LlmError::AuthAssumeRoleFailed`.
    async fn aws_credentials(&self) -> Result<AwsCredentials>;
}

/// A `KeyProvider` backed by values supplied directly at construction time.
/// Useful for tests and for callers who already hold resolved credentials.
pub struct StaticKeyProvider {
    api_keys: std::collections::BTreeMap<String, SecretString>,
    aws: Option<AwsCredentials>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self { api_keys: std::collections::BTreeMap::new(), aws: None }
    }

    pub fn with_api_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_keys.insert(provider.into(), SecretString::from(key.into()));
        self
    }

    pub fn with_aws_credentials(mut self, creds: AwsCredentials) -> Self {
        self.aws = Some(creds);
        self
    }
}

impl Default for StaticKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn api_key(&self, provider: &str) -> Result<SecretString> {
        self.api_keys
            .get(provider)
            .cloned()
            .ok_or_else(|| crate::error::LlmError::AuthMissingCredentials(format!(
                "no api key configured for provider '{provider}'"
            )))
    }

    async fn aws_credentials(&self) -> Result<AwsCredentials> {
        self.aws.clone().ok_or_else(|| crate::error::LlmError::AuthMissingCredentials(
            "no AWS credentials configured".into(),
        ))
    }
}

impl Clone for AwsCredentials {
    fn clone(&self) -> Self {
        Self {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            region: self.region.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_maps_to_auth_error() {
        let provider = StaticKeyProvider::new();
        let err = provider.api_key("openai").await.unwrap_err();
        assert!(matches!(err, crate::error::LlmError::AuthMissingCredentials(_)));
    }

    #[tokio::test]
    async fn configured_key_resolves() {
        let provider = StaticKeyProvider::new().with_api_key("openai", "sk-test");
        assert!(provider.api_key("openai").await.is_ok());
    }
}
