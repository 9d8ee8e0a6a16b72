//! Azure credential handling
//!
//! Azure endpoints accept either a static `api-key` header or a bearer token
//! for the Cognitive Services scope. When configured with a client secret the
//! credential runs the client-credentials flow against Entra ID and caches
//! the token until shortly before expiry. `invalidate()` drops the cached
//! token so the next request re-acquires it; the retry layer calls this
//! after an authentication failure.

use crate::core::error::PluginError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Token scope for Azure Cognitive Services (OpenAI included)
const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Seconds subtracted from the reported lifetime before a token counts as expired
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 120;

/// Credential settings shared by the Azure-backed plugins
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AzureAuthConfig {
    /// Static API key sent as the `api-key` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Pre-acquired bearer token (no refresh)
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Entra ID tenant for the client-credentials flow
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl AzureAuthConfig {
    /// Build a usable credential out of the configured fields
    ///
    /// Precedence: api key, then static bearer token, then client secret.
    pub fn build(&self) -> Result<AzureCredential, PluginError> {
        let mode = if let Some(key) = &self.api_key {
            CredentialMode::ApiKey(key.clone())
        } else if let Some(token) = &self.bearer_token {
            CredentialMode::StaticBearer(token.clone())
        } else if let (Some(tenant), Some(client), Some(secret)) =
            (&self.tenant_id, &self.client_id, &self.client_secret)
        {
            CredentialMode::ClientSecret {
                tenant_id: tenant.clone(),
                client_id: client.clone(),
                client_secret: secret.clone(),
            }
        } else {
            return Err(PluginError::Authentication(
                "no Azure credential configured (api_key, bearer_token, or tenant_id/client_id/client_secret)"
                    .to_string(),
            ));
        };

        Ok(AzureCredential {
            mode,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
        })
    }
}

#[derive(Debug, Clone)]
enum CredentialMode {
    ApiKey(String),
    StaticBearer(String),
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Entra ID token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// An Azure credential that knows how to attach itself to a request
pub struct AzureCredential {
    mode: CredentialMode,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl AzureCredential {
    /// Attach authentication to an outgoing request builder
    pub async fn apply(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, PluginError> {
        match &self.mode {
            CredentialMode::ApiKey(key) => Ok(builder.header("api-key", key)),
            CredentialMode::StaticBearer(token) => Ok(builder.bearer_auth(token)),
            CredentialMode::ClientSecret { .. } => {
                let token = self.token().await?;
                Ok(builder.bearer_auth(token))
            }
        }
    }

    /// Drop the cached token so the next request acquires a fresh one
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        if cached.take().is_some() {
            debug!("Azure credential cache invalidated");
        }
    }

    async fn token(&self) -> Result<String, PluginError> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let CredentialMode::ClientSecret {
            tenant_id,
            client_id,
            client_secret,
        } = &self.mode
        else {
            return Err(PluginError::Unexpected(
                "token acquisition requested for a static credential".to_string(),
            ));
        };

        let url = format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", tenant_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", COGNITIVE_SERVICES_SCOPE),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(PluginError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PluginError::Authentication(format!(
                "token request failed (status {}): {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PluginError::Unexpected(format!("Failed to parse token response: {}", e)))?;

        let expires_at = Utc::now()
            + ChronoDuration::seconds((token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0));
        info!("Acquired Azure bearer token, valid until {}", expires_at);

        let mut cached = self.cached.write().await;
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_takes_precedence() {
        let config = AzureAuthConfig {
            api_key: Some("key".into()),
            bearer_token: Some("token".into()),
            ..Default::default()
        };
        let credential = config.build().unwrap();
        assert!(matches!(credential.mode, CredentialMode::ApiKey(_)));
    }

    #[test]
    fn test_missing_credential_is_an_error() {
        let config = AzureAuthConfig::default();
        assert!(matches!(
            config.build(),
            Err(PluginError::Authentication(_))
        ));
    }

    #[test]
    fn test_client_secret_requires_all_fields() {
        let config = AzureAuthConfig {
            tenant_id: Some("t".into()),
            client_id: Some("c".into()),
            ..Default::default()
        };
        assert!(config.build().is_err());
    }
}
