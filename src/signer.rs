//! Custody signing / broadcast collaborator
//!
//! The vault service holds the authority key. We hand it a serialized
//! unsigned message plus the vault identity; it signs, broadcasts, and
//! answers accept/reject with an external reference.

use async_trait::async_trait;
use solana_sdk::message::VersionedMessage;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub accepted: bool,
    /// External reference assigned by the vault (transaction id on accept)
    pub reference: String,
    pub error_detail: Option<String>,
}

impl SubmissionResult {
    /// Acceptance gate: rejection becomes an error carrying the detail.
    pub fn into_accepted(self) -> Result<String, SignError> {
        if self.accepted {
            Ok(self.reference)
        } else {
            Err(SignError::Rejected(
                self.error_detail.unwrap_or_else(|| "no detail".to_string()),
            ))
        }
    }
}

#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Submit one transaction message for signing and broadcast. `label`
    /// names the phase for the vault's audit trail and our logs.
    async fn submit(
        &self,
        message: &VersionedMessage,
        label: &str,
    ) -> Result<SubmissionResult, SignError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("required credential missing: {0}")]
    MissingCredential(&'static str),
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// HTTP client for the vault signing API.
pub struct VaultSigner {
    client: reqwest::Client,
    sign_url: String,
    vault_id: String,
    api_token: String,
}

impl VaultSigner {
    /// Credentials come from the environment, never from the command line.
    /// A missing credential is fatal before anything is submitted.
    pub fn from_env(sign_url: String) -> Result<Self, SignError> {
        let api_token = std::env::var("VAULT_API_TOKEN")
            .map_err(|_| SignError::MissingCredential("VAULT_API_TOKEN"))?;
        let vault_id =
            std::env::var("VAULT_ID").map_err(|_| SignError::MissingCredential("VAULT_ID"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SignError::Network(e.to_string()))?;

        Ok(Self {
            client,
            sign_url,
            vault_id,
            api_token,
        })
    }
}

#[async_trait]
impl TxSubmitter for VaultSigner {
    async fn submit(
        &self,
        message: &VersionedMessage,
        label: &str,
    ) -> Result<SubmissionResult, SignError> {
        let message_bytes =
            bincode::serialize(message).map_err(|e| SignError::Serialize(e.to_string()))?;
        let message_base64 = base64::encode(&message_bytes);

        info!(
            "Submitting {} message: {} bytes (limit 1232)",
            label,
            message_bytes.len()
        );

        let body = serde_json::json!({
            "vault_id": self.vault_id,
            "message": message_base64,
            "encoding": "base64",
            "note": label,
        });

        let response = self
            .client
            .post(&self.sign_url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SignError::Network(e.to_string()))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SignError::Parse(e.to_string()))?;

        if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
            return Ok(SubmissionResult {
                accepted: false,
                reference: String::new(),
                error_detail: Some(error.to_string()),
            });
        }

        let reference = json["reference"]
            .as_str()
            .ok_or(SignError::Parse("no reference in response".to_string()))?
            .to_string();

        Ok(SubmissionResult {
            accepted: true,
            reference,
            error_detail: None,
        })
    }
}
