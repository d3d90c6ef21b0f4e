//! Chain API schema source.
//!
//! Reads the chain head from `/v1/chain/get_info` and contract ABIs from
//! `/v1/chain/get_abi` on any Antelope node with the chain API plugin.
//!
//! # Feature Flag
//! This module requires the `remote` feature flag (enables `reqwest`).
//!
//! ```toml
//! shipstream-registry = { version = "0.2", features = ["remote"] }
//! ```
//!
//! # Usage
//! ```ignore
//! let source = RpcSchemaSource::new("http://127.0.0.1:8888")?;
//! let provider = LocalAbiProvider::new(Arc::new(source));
//! ```

#[cfg(feature = "remote")]
pub use imp::*;

#[cfg(feature = "remote")]
mod imp {
    use async_trait::async_trait;
    use reqwest::{Client, StatusCode};
    use serde::{Deserialize, Serialize};
    use shipstream_abi::Abi;
    use shipstream_core::{SchemaSource, ShipError};
    use std::time::Duration;
    use tracing::debug;

    // ─── Wire shapes ──────────────────────────────────────────────────────────

    #[derive(Debug, Deserialize)]
    struct GetInfoResponse {
        head_block_num: u32,
    }

    #[derive(Debug, Serialize)]
    struct GetAbiRequest<'a> {
        account_name: &'a str,
    }

    #[derive(Debug, Deserialize)]
    struct GetAbiResponse {
        #[serde(default)]
        abi: Option<Abi>,
    }

    // ─── Source ───────────────────────────────────────────────────────────────

    pub struct RpcSchemaSource {
        client: Client,
        endpoint: String,
    }

    impl RpcSchemaSource {
        /// `endpoint` is the node's HTTP base URL, without a trailing `/v1`.
        pub fn new(endpoint: impl Into<String>) -> Result<Self, ShipError> {
            Self::with_timeout(endpoint, Duration::from_secs(15))
        }

        pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ShipError> {
            let client = Client::builder()
                .timeout(timeout)
                .user_agent(concat!("shipstream/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| ShipError::Rpc(format!("failed to build HTTP client: {e}")))?;
            Ok(Self {
                client,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
            &self,
            path: &str,
            body: &B,
        ) -> Result<R, ShipError> {
            let url = format!("{}{path}", self.endpoint);
            let resp = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| ShipError::Rpc(format!("{path}: {e}")))?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ShipError::Rpc(format!("{path}: rate limited")));
            }
            if !status.is_success() {
                return Err(ShipError::Rpc(format!("{path}: HTTP {status}")));
            }
            resp.json()
                .await
                .map_err(|e| ShipError::Rpc(format!("{path}: invalid response: {e}")))
        }
    }

    #[async_trait]
    impl SchemaSource for RpcSchemaSource {
        async fn get_current_head(&self) -> Result<u32, ShipError> {
            let info: GetInfoResponse = self.post("/v1/chain/get_info", &serde_json::json!({})).await?;
            Ok(info.head_block_num)
        }

        async fn get_schema(&self, account: &str) -> Result<Option<Abi>, ShipError> {
            let resp: GetAbiResponse = self
                .post("/v1/chain/get_abi", &GetAbiRequest { account_name: account })
                .await?;
            // Accounts without a contract come back with no abi or an empty one.
            let abi = resp.abi.filter(|abi| !abi.version.is_empty());
            debug!(account, found = abi.is_some(), "get_abi");
            Ok(abi)
        }
    }

}
