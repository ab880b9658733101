use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};

use hue_marshal::{ObjectHash, Serializable};
use hue_track::ColorProof;

use crate::LookupError;

const STATUS_OK: &str = "ok";

/// Proofs by the hash of the definition they are about.
pub type FetchedProofs = Vec<(ObjectHash, ColorProof)>;

/// Source of color proofs for outputs whose color is not known locally.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ProofFetcher: Send + Sync + 'static {
    /// Proofs of the colors carried by `outpoint`, keyed by definition hash.
    async fn fetch(&self, outpoint: OutPoint) -> Result<FetchedProofs, LookupError>;
}

/// Body of a proof server reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProofResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Hex encoded proofs by hex encoded definition hash.
    #[serde(default)]
    pub proofs: BTreeMap<String, String>,
}

impl ProofResponse {
    /// Decode the proofs of a reply to a request for `outpoint`.
    pub fn into_proofs(self, outpoint: OutPoint) -> Result<FetchedProofs, LookupError> {
        if self.status != STATUS_OK {
            return Err(LookupError::Status {
                status: self.status,
                error: self.error,
            });
        }

        self.proofs
            .into_iter()
            .map(|(hash, proof)| {
                let hash = hash.parse::<ObjectHash>().map_err(|err| {
                    LookupError::MalformedResponse(format!("definition hash {hash}: {err}"))
                })?;
                let bytes = hex::decode(&proof).map_err(|err| {
                    LookupError::MalformedResponse(format!("proof for {hash}: {err}"))
                })?;
                let proof = ColorProof::from_raw_bytes(&bytes)?;

                if proof.outpoint() != outpoint {
                    return Err(LookupError::OutpointMismatch {
                        requested: outpoint,
                        found: proof.outpoint(),
                    });
                }

                Ok((hash, proof))
            })
            .collect()
    }
}

/// Fetches proofs from an HTTP proof server.
#[derive(Debug, Clone)]
pub struct HttpProofFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpProofFetcher {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ProofFetcher for HttpProofFetcher {
    async fn fetch(&self, outpoint: OutPoint) -> Result<FetchedProofs, LookupError> {
        tracing::trace!(outpoint = %outpoint, url = %self.url, "Fetching color proofs");

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("txid", outpoint.txid.to_string()),
                ("vout", outpoint.vout.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return Err(LookupError::Status {
                status: status.to_string(),
                error: (!body.is_empty()).then_some(body),
            });
        }

        let reply = response
            .json::<ProofResponse>()
            .await
            .map_err(|err| LookupError::MalformedResponse(err.to_string()))?;

        reply.into_proofs(outpoint)
    }
}
