//! Registry token verification.
//!
//! A token is exchanged for the username it belongs to; the pair then
//! serves as basic credentials for the registry.

use async_trait::async_trait;
use serde::Deserialize;
use yolo_core::config::YoloConfig;
use yolo_core::error::{Result, YoloError};

use super::registry::RegistryAuth;

/// Resolves a registry token to its username.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, registry: &str, token: &str) -> Result<String>;
}

/// Verifies tokens against the registry's `cog/v1/verify-token` endpoint.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct VerifyResponse {
    username: String,
}

impl HttpTokenVerifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// `https://` unless the address already names a scheme.
fn address_with_scheme(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

fn verify_url(registry: &str) -> String {
    format!("{}/cog/v1/verify-token", address_with_scheme(registry))
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, registry: &str, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(YoloError::Auth("token is required".to_string()));
        }

        let response = self
            .client
            .post(verify_url(registry))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| YoloError::Auth(format!("failed to verify token: {}", e)))?;

        match response.status() {
            reqwest::StatusCode::OK => {}
            reqwest::StatusCode::NOT_FOUND => {
                return Err(YoloError::Auth("user does not exist".to_string()))
            }
            status => {
                return Err(YoloError::Auth(format!(
                    "failed to verify token, got status {}",
                    status.as_u16()
                )))
            }
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| YoloError::Auth(format!("invalid verify-token response: {}", e)))?;
        tracing::debug!(registry = %registry, username = %body.username, "Token verified");
        Ok(body.username)
    }
}

/// Credentials for `config`: anonymous without a token, otherwise the
/// verified username with the token as password.
pub async fn authenticate(config: &YoloConfig, verifier: &dyn TokenVerifier) -> Result<RegistryAuth> {
    match config.token.as_deref() {
        None | Some("") => Ok(RegistryAuth::anonymous()),
        Some(token) => {
            let username = verifier.verify(&config.registry, token).await?;
            Ok(RegistryAuth::basic(username, token))
        }
    }
}
