//! ============================================================================
//! IPFS Client — CIDv0 codec, gateway download, pinning
//! ============================================================================
//! On-chain job and result fields hold the bare 32-byte SHA-256 digest of a
//! CIDv0 hash; the wire form is `0x12 0x20 ‖ digest`, base58-encoded.
//! ============================================================================

use serde_json::{json, Value as Json};
use tracing::{debug, info};

use crate::error::{NodeError, Result};

/// CIDv0 multihash header: sha2-256, 32 bytes.
const CIDV0_PREFIX: [u8; 2] = [0x12, 0x20];

/// Pinata pinning API.
const PINATA_PIN_URL: &str = "https://api.pinata.cloud/pinning/pinJSONToIPFS";

/// Decode a `Qm…` string into the bare 32-byte digest.
pub fn ipfs_hash_to_bytes(hash: &str) -> Result<[u8; 32]> {
    let raw = bs58::decode(hash)
        .into_vec()
        .map_err(|e| NodeError::Ipfs(format!("hash `{hash}`: {e}")))?;
    if raw.len() != 34 || raw[..2] != CIDV0_PREFIX {
        return Err(NodeError::Ipfs(format!(
            "hash `{hash}` is not a CIDv0 sha256 multihash"
        )));
    }
    Ok(raw[2..].try_into().unwrap())
}

/// Encode a digest back into its `Qm…` string. Accepts either the bare
/// 32-byte digest or the full 34-byte prefixed field.
pub fn bytes_to_ipfs_hash(bytes: &[u8]) -> Result<String> {
    match bytes.len() {
        32 => {
            let mut raw = Vec::with_capacity(34);
            raw.extend_from_slice(&CIDV0_PREFIX);
            raw.extend_from_slice(bytes);
            Ok(bs58::encode(raw).into_string())
        }
        34 if bytes[..2] == CIDV0_PREFIX => Ok(bs58::encode(bytes).into_string()),
        n => Err(NodeError::Ipfs(format!(
            "expected a 32-byte digest or 34-byte multihash, got {n} bytes"
        ))),
    }
}

/// Normalize an on-chain hash field to the bare digest. Accounts store
/// either the 32-byte digest or the full 34-byte multihash.
pub fn field_to_digest(bytes: &[u8]) -> Result<[u8; 32]> {
    match bytes.len() {
        32 => Ok(bytes.try_into().unwrap()),
        34 if bytes[..2] == CIDV0_PREFIX => Ok(bytes[2..].try_into().unwrap()),
        n => Err(NodeError::InvalidAccountData(format!(
            "ipfs hash field: expected 32 or 34 bytes, got {n}"
        ))),
    }
}

/// A downloaded job definition: JSON carrying a YAML `pipeline` document.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Parsed pipeline document.
    pub pipeline: serde_yaml::Value,
    /// Pipeline source as persisted into the flow record.
    pub source: String,
}

impl JobDefinition {
    pub fn from_json(body: &Json) -> Result<Self> {
        let field = body
            .get("pipeline")
            .ok_or_else(|| NodeError::Ipfs("job has no `pipeline` field".into()))?;

        let source = match field {
            Json::String(s) => s.clone(),
            // Some uploads inline the pipeline as JSON; normalize to YAML.
            other => serde_yaml::to_string(other)
                .map_err(|e| NodeError::Ipfs(format!("pipeline: {e}")))?,
        };

        let pipeline: serde_yaml::Value = serde_yaml::from_str(&source)
            .map_err(|e| NodeError::Ipfs(format!("pipeline: {e}")))?;

        Ok(Self { pipeline, source })
    }
}

pub struct IpfsClient {
    http: reqwest::Client,
    gateway: String,
    pinata_jwt: Option<String>,
}

impl IpfsClient {
    pub fn new(gateway: impl Into<String>, pinata_jwt: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("nosana-node/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            gateway: gateway.into(),
            pinata_jwt,
        }
    }

    fn gateway_url(&self, hash: &str) -> String {
        format!("{}/{hash}", self.gateway.trim_end_matches('/'))
    }

    /// Download a JSON document from the gateway.
    pub async fn download(&self, hash: &str) -> Result<Json> {
        let url = self.gateway_url(hash);
        debug!(%url, "ipfs download");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NodeError::Ipfs(format!("{hash}: {e}")))?;
        if !response.status().is_success() {
            return Err(NodeError::Ipfs(format!(
                "{hash}: gateway returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| NodeError::Ipfs(format!("{hash}: {e}")))
    }

    /// Download and parse the job definition behind an on-chain digest.
    pub async fn download_job(&self, digest: &[u8; 32]) -> Result<JobDefinition> {
        let hash = bytes_to_ipfs_hash(digest)?;
        let body = self.download(&hash).await?;
        JobDefinition::from_json(&body)
    }

    /// Pin a JSON document through Pinata; returns its `Qm…` hash.
    pub async fn pin_json(&self, content: &Json) -> Result<String> {
        let jwt = self
            .pinata_jwt
            .as_ref()
            .ok_or_else(|| NodeError::Ipfs("no pinning credential configured".into()))?;

        let response = self
            .http
            .post(PINATA_PIN_URL)
            .bearer_auth(jwt)
            .json(&json!({"pinataContent": content}))
            .send()
            .await
            .map_err(|e| NodeError::Ipfs(format!("pin: {e}")))?;
        if !response.status().is_success() {
            return Err(NodeError::Ipfs(format!(
                "pin: service returned {}",
                response.status()
            )));
        }

        let body: Json = response
            .json()
            .await
            .map_err(|e| NodeError::Ipfs(format!("pin: {e}")))?;
        let hash = body
            .get("IpfsHash")
            .and_then(Json::as_str)
            .ok_or_else(|| NodeError::Ipfs("pin: response has no IpfsHash".into()))?;
        info!(%hash, "pinned result");
        Ok(hash.to_string())
    }
}
