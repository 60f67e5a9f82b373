//! Minimal JSON-RPC access to the chain, shaped as the exact collaborator
//! surface the indexing core consumes: logs, block headers, call traces
//! and `eth_call`.

pub mod block_stream;

use {
    alloy_primitives::{Address, B256, Bytes, U64},
    anyhow::{Context, Result, anyhow, ensure},
    serde::{Deserialize, de::DeserializeOwned},
    std::sync::atomic::{AtomicU64, Ordering},
    url::Url,
};

pub use {alloy_rpc_types_eth::Log, alloy_rpc_types_trace::geth::CallFrame};

/// Max number of rpc calls in flight against the node at the same time.
const MAX_PARALLEL_RPC_CALLS: usize = 32;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeInclusive<T: Ord> {
    start: T,
    end: T,
}

impl<T: Ord + Copy> RangeInclusive<T> {
    pub fn try_new(start: T, end: T) -> Result<Self> {
        ensure!(end >= start, "end has to be bigger or equal to start");
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &T {
        &self.start
    }

    pub fn end(&self) -> &T {
        &self.end
    }

    pub fn into_inner(self) -> (T, T) {
        (self.start, self.end)
    }
}

/// Header information of a single block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockInfo {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
}

/// An `eth_getLogs` filter. `topics` are alternatives for topic0.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Vec<Address>,
    pub topics: Vec<B256>,
}

impl LogFilter {
    fn to_params(&self) -> serde_json::Value {
        let mut filter = serde_json::json!({
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
            "topics": [self.topics],
        });
        if !self.addresses.is_empty() {
            filter["address"] = serde_json::json!(self.addresses);
        }
        serde_json::json!([filter])
    }
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait BlockRetrieving: Send + Sync + 'static {
    async fn current_block(&self) -> Result<BlockInfo>;
    async fn block(&self, number: u64) -> Result<BlockInfo>;
    async fn blocks(&self, range: RangeInclusive<u64>) -> Result<Vec<BlockInfo>>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait LogRetrieving: Send + Sync + 'static {
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait TraceFetching: Send + Sync + 'static {
    /// The full call trace of a transaction, as produced by the node's
    /// call tracer.
    async fn call_trace(&self, tx_hash: B256) -> Result<CallFrame>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait CallExecuting: Send + Sync + 'static {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
}

#[derive(Debug, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: U64,
    hash: B256,
    parent_hash: B256,
    timestamp: U64,
}

impl From<RpcBlock> for BlockInfo {
    fn from(block: RpcBlock) -> Self {
        Self {
            number: block.number.to::<u64>(),
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: block.timestamp.to::<u64>(),
        }
    }
}

/// JSON-RPC client over plain HTTP.
#[derive(Debug)]
pub struct EthRpc {
    client: reqwest::Client,
    url: Url,
    id: AtomicU64,
}

impl EthRpc {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self {
            client,
            url,
            id: AtomicU64::new(0),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to send {method} request"))?;
        ensure!(
            response.status().is_success(),
            "{method} returned status {}",
            response.status()
        );
        let response: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("failed to decode {method} response"))?;
        if let Some(error) = response.error {
            return Err(RpcError {
                code: error.code,
                message: error.message,
            }
            .into());
        }
        response
            .result
            .ok_or_else(|| anyhow!("{method} returned neither result nor error"))
    }

    async fn block_by_tag(&self, tag: serde_json::Value) -> Result<BlockInfo> {
        let block: Option<RpcBlock> = self
            .request("eth_getBlockByNumber", serde_json::json!([tag, false]))
            .await?;
        block
            .map(Into::into)
            .context("block not found")
    }
}

#[async_trait::async_trait]
impl BlockRetrieving for EthRpc {
    async fn current_block(&self) -> Result<BlockInfo> {
        self.block_by_tag(serde_json::json!("latest")).await
    }

    async fn block(&self, number: u64) -> Result<BlockInfo> {
        self.block_by_tag(serde_json::json!(format!("0x{number:x}")))
            .await
    }

    async fn blocks(&self, range: RangeInclusive<u64>) -> Result<Vec<BlockInfo>> {
        let numbers = (*range.start()..=*range.end()).collect::<Vec<_>>();
        let mut blocks = Vec::with_capacity(numbers.len());
        for chunk in numbers.chunks(MAX_PARALLEL_RPC_CALLS) {
            blocks.extend(
                futures::future::try_join_all(chunk.iter().map(|number| self.block(*number)))
                    .await?,
            );
        }
        Ok(blocks)
    }
}

#[async_trait::async_trait]
impl LogRetrieving for EthRpc {
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        self.request("eth_getLogs", filter.to_params()).await
    }
}

#[async_trait::async_trait]
impl TraceFetching for EthRpc {
    async fn call_trace(&self, tx_hash: B256) -> Result<CallFrame> {
        self.request(
            "debug_traceTransaction",
            serde_json::json!([tx_hash, {"tracer": "callTracer"}]),
        )
        .await
    }
}

#[async_trait::async_trait]
impl CallExecuting for EthRpc {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.request(
            "eth_call",
            serde_json::json!([{"to": to, "data": data}, "latest"]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(RangeInclusive::try_new(2u64, 1).is_err());
        let range = RangeInclusive::try_new(1u64, 2).unwrap();
        assert_eq!((*range.start(), *range.end()), (1, 2));
    }

    #[test]
    fn filter_params_shape() {
        let filter = LogFilter {
            from_block: 16,
            to_block: 32,
            addresses: vec![],
            topics: vec![B256::repeat_byte(1)],
        };
        let params = filter.to_params();
        assert_eq!(params[0]["fromBlock"], "0x10");
        assert_eq!(params[0]["toBlock"], "0x20");
        // No address filter unless one was requested.
        assert!(params[0].get("address").is_none());
        assert!(params[0]["topics"][0].is_array());

        let filter = LogFilter {
            addresses: vec![Address::with_last_byte(1)],
            ..filter
        };
        assert!(filter.to_params()[0]["address"].is_array());
    }

    #[test]
    fn block_response_decodes_hex_quantities() {
        let block: RpcBlock = serde_json::from_value(serde_json::json!({
            "number": "0x1b4",
            "hash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "parentHash": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "timestamp": "0x65a0f880",
        }))
        .unwrap();
        let info = BlockInfo::from(block);
        assert_eq!(info.number, 436);
        assert_eq!(info.hash, B256::repeat_byte(1));
        assert_eq!(info.timestamp, 0x65a0_f880);
    }
}
