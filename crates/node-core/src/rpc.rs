//! ============================================================================
//! RPC Client — Thin JSON-RPC 2.0 wrapper over HTTPS
//! ============================================================================
//! One request, one response. Carries no state beyond the endpoint URL and a
//! shared HTTP client; retry policy lives with the callers.
//! ============================================================================

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use serde_json::{json, Value as Json};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {0}")]
    Status(u16),

    #[error("json-rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A `memcmp` program-account filter, already reduced to its wire form.
#[derive(Debug, Clone, Serialize)]
pub struct MemcmpFilter {
    pub offset: usize,
    /// Base58-encoded bytes to compare at `offset`.
    pub bytes: String,
}

impl MemcmpFilter {
    pub fn new(offset: usize, raw: &[u8]) -> Self {
        Self {
            offset,
            bytes: bs58::encode(raw).into_string(),
        }
    }
}

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("nosana-node/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the JSON-RPC 2.0 envelope for a call.
    fn envelope(method: &str, params: Json) -> Json {
        json!({
            "jsonrpc": "2.0",
            "id": "1",
            "method": method,
            "params": params,
        })
    }

    /// Issue one JSON-RPC call and return the `result` member.
    pub async fn call(&self, method: &str, params: Json) -> Result<Json, RpcError> {
        trace!(method, "rpc call");

        let response = self
            .http
            .post(&self.url)
            .json(&Self::envelope(method, params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }

        let body: Json = response.json().await?;
        if let Some(err) = body.get("error") {
            return Err(RpcError::Rpc {
                code: err.get("code").and_then(Json::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Json::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RpcError::Malformed("missing `result` member".into()))
    }

    /// Lamport balance of an account.
    pub async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcError> {
        let result = self
            .call("getBalance", json!([address.to_string()]))
            .await?;
        result
            .get("value")
            .and_then(Json::as_u64)
            .ok_or_else(|| RpcError::Malformed("getBalance: no numeric value".into()))
    }

    /// Raw token amount held by a token account. A missing account is a
    /// server-side error here; callers decide whether that means zero.
    pub async fn get_token_account_balance(&self, account: &Pubkey) -> Result<u64, RpcError> {
        let result = self
            .call("getTokenAccountBalance", json!([account.to_string()]))
            .await?;
        result
            .pointer("/value/amount")
            .and_then(Json::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| RpcError::Malformed("getTokenAccountBalance: no amount".into()))
    }

    /// Raw account data, or `None` when the account does not exist.
    pub async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, RpcError> {
        let result = self
            .call(
                "getAccountInfo",
                json!([address.to_string(), {"encoding": "base64"}]),
            )
            .await?;

        let value = match result.get("value") {
            None | Some(Json::Null) => return Ok(None),
            Some(v) => v,
        };

        let encoded = value
            .pointer("/data/0")
            .and_then(Json::as_str)
            .ok_or_else(|| RpcError::Malformed("getAccountInfo: no data".into()))?;

        let data = BASE64
            .decode(encoded)
            .map_err(|e| RpcError::Malformed(format!("getAccountInfo: bad base64: {e}")))?;
        Ok(Some(data))
    }

    /// All accounts owned by `program` matching every supplied memcmp filter.
    pub async fn get_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[MemcmpFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, RpcError> {
        let filters: Vec<Json> = filters
            .iter()
            .map(|f| json!({"memcmp": {"offset": f.offset, "bytes": f.bytes}}))
            .collect();

        let result = self
            .call(
                "getProgramAccounts",
                json!([program.to_string(), {"encoding": "base64", "filters": filters}]),
            )
            .await?;

        let entries = result
            .as_array()
            .ok_or_else(|| RpcError::Malformed("getProgramAccounts: not an array".into()))?;

        let mut accounts = Vec::with_capacity(entries.len());
        for entry in entries {
            let pubkey = entry
                .get("pubkey")
                .and_then(Json::as_str)
                .and_then(|s| s.parse::<Pubkey>().ok())
                .ok_or_else(|| RpcError::Malformed("getProgramAccounts: bad pubkey".into()))?;
            let encoded = entry
                .pointer("/account/data/0")
                .and_then(Json::as_str)
                .ok_or_else(|| RpcError::Malformed("getProgramAccounts: no data".into()))?;
            let data = BASE64
                .decode(encoded)
                .map_err(|e| RpcError::Malformed(format!("getProgramAccounts: bad base64: {e}")))?;
            accounts.push((pubkey, data));
        }
        Ok(accounts)
    }

    /// Submit a base64-encoded signed transaction; returns the signature.
    pub async fn send_transaction(&self, encoded_tx: &str) -> Result<String, RpcError> {
        let result = self
            .call(
                "sendTransaction",
                json!([encoded_tx, {"encoding": "base64"}]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("sendTransaction: no signature".into()))
    }

    /// Fetch a confirmed transaction record; `None` until the cluster has it.
    pub async fn get_transaction(&self, signature: &str) -> Result<Option<Json>, RpcError> {
        let result = self
            .call(
                "getTransaction",
                json!([signature, {"encoding": "json", "maxSupportedTransactionVersion": 0}]),
            )
            .await?;
        match result {
            Json::Null => Ok(None),
            other => Ok(Some(other)),
        }
    }

    /// Most recent blockhash, needed to sign a transaction.
    pub async fn get_latest_blockhash(&self) -> Result<String, RpcError> {
        let result = self.call("getLatestBlockhash", json!([])).await?;
        result
            .pointer("/value/blockhash")
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| RpcError::Malformed("getLatestBlockhash: no blockhash".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let env = RpcClient::envelope("getBalance", json!(["abc"]));
        assert_eq!(env["jsonrpc"], "2.0");
        assert_eq!(env["id"], "1");
        assert_eq!(env["method"], "getBalance");
        assert_eq!(env["params"], json!(["abc"]));
    }

    #[test]
    fn memcmp_filter_is_base58() {
        let f = MemcmpFilter::new(8, &[1, 2, 3]);
        assert_eq!(f.offset, 8);
        assert_eq!(bs58::decode(&f.bytes).into_vec().unwrap(), vec![1, 2, 3]);
    }
}
