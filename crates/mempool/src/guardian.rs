//! Guardian REST client
//!
//! `GET {base}/v1/signed_vaa/{chain}/{emitter}/{sequence}` returns
//! `{"vaaBytes": "<base64>"}` once the guardians have signed the message and
//! 404 before that. Any other failure is transient.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::trace;

use crate::bridge::{DeliveryProofSource, PendingDelivery};
use crate::{MempoolError, Result};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaaResponse {
    vaa_bytes: String,
}

#[derive(Debug, Clone)]
pub struct GuardianClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl GuardianClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, delivery: &PendingDelivery) -> String {
        format!(
            "{}/v1/signed_vaa/{}/{}/{}",
            self.base_url, delivery.chain, delivery.emitter, delivery.sequence
        )
    }
}

#[async_trait]
impl DeliveryProofSource for GuardianClient {
    async fn fetch_proof(&self, delivery: &PendingDelivery) -> Result<Option<Vec<u8>>> {
        let url = self.url(delivery);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| MempoolError::TransientFetch(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                trace!(%url, "VAA not signed yet");
                Ok(None)
            }
            status if status.is_success() => {
                let body: SignedVaaResponse = response
                    .json()
                    .await
                    .map_err(|e| MempoolError::InvalidResponse(e.to_string()))?;
                let vaa = STANDARD
                    .decode(body.vaa_bytes.as_bytes())
                    .map_err(|e| MempoolError::InvalidResponse(e.to_string()))?;
                Ok(Some(vaa))
            }
            status => Err(MempoolError::TransientFetch(format!("{} returned {}", url, status))),
        }
    }
}
