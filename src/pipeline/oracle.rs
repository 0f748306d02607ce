//! Contract-detection oracle
//!
//! `IsContract(address)` backed by a JSON-RPC `eth_getCode` query: an address
//! is a contract when the node returns non-empty bytecode for it at `latest`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let oracle = RpcContractOracle::new("https://rpc.example.org", Duration::from_secs(10))?;
//! let is_contract = oracle.is_contract("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").await?;
//! ```

use crate::error::{AttributionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Remote `IsContract` lookup
///
/// Callers pass EIP-55 checksummed addresses. Implementations must be safe
/// to call from several tasks at once; rate limiting is the caller's job.
#[async_trait]
pub trait ContractOracle: Send + Sync {
    async fn is_contract(&self, checksummed: &str) -> Result<bool>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (&'a str, &'static str),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// `eth_getCode` oracle over HTTP JSON-RPC
pub struct RpcContractOracle {
    client: reqwest::Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl RpcContractOracle {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl ContractOracle for RpcContractOracle {
    async fn is_contract(&self, checksummed: &str) -> Result<bool> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_getCode",
            params: (checksummed, "latest"),
        };

        let response = self.client.post(&self.rpc_url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(AttributionError::Oracle(format!(
                "RPC HTTP error: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_get_code(&body)
    }
}

/// Decode a JSON-RPC `eth_getCode` response body
fn parse_get_code(body: &str) -> Result<bool> {
    let response: RpcResponse = serde_json::from_str(body)
        .map_err(|e| AttributionError::Oracle(format!("invalid RPC response: {}", e)))?;

    if let Some(err) = response.error {
        return Err(AttributionError::Oracle(format!(
            "RPC error {}: {}",
            err.code, err.message
        )));
    }

    let code = response
        .result
        .ok_or_else(|| AttributionError::Oracle("RPC response missing result".to_string()))?;

    bytecode_is_contract(&code)
}

/// Interpret an `eth_getCode` result (`"0x"` means no code)
pub fn bytecode_is_contract(code: &str) -> Result<bool> {
    let stripped = code.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|e| AttributionError::Oracle(format!("invalid bytecode hex: {}", e)))?;
    Ok(!bytes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_code_is_eoa() {
        assert!(!bytecode_is_contract("0x").unwrap());
        assert!(!bytecode_is_contract("").unwrap());
    }

    #[test]
    fn test_code_is_contract() {
        assert!(bytecode_is_contract("0x6080604052").unwrap());
    }

    #[test]
    fn test_bad_hex_is_error() {
        assert!(bytecode_is_contract("0xzz").is_err());
    }

    #[test]
    fn test_request_shape() {
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "eth_getCode",
            params: ("0xAbC", "latest"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "eth_getCode");
        assert_eq!(json["params"][0], "0xAbC");
        assert_eq!(json["params"][1], "latest");
    }

    #[test]
    fn test_parse_get_code_responses() {
        assert!(parse_get_code(r#"{"jsonrpc":"2.0","id":1,"result":"0x60806040"}"#).unwrap());
        assert!(!parse_get_code(r#"{"jsonrpc":"2.0","id":1,"result":"0x"}"#).unwrap());

        let err = parse_get_code(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"rate limited"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rate limited"));

        assert!(parse_get_code(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
        assert!(parse_get_code("<html>bad gateway</html>").is_err());
    }

    #[tokio::test]
    #[ignore] // Run only against a live node (RPC_URL)
    async fn test_live_rpc_lookup() {
        let url = std::env::var("RPC_URL").unwrap();
        let oracle = RpcContractOracle::new(url, Duration::from_secs(10)).unwrap();
        // Zero address never has code
        let result = oracle
            .is_contract("0x0000000000000000000000000000000000000000")
            .await
            .unwrap();
        assert!(!result);
    }
}
