//! EVM-family driver.
//!
//! Finality comes from the `safe`/`finalized` block tags, nonce lookups use
//! the `pending`/`latest`/`finalized` tags, and a receipt's success flag is
//! its `status` quantity.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::error::DriverError;
use crate::types::{Address, BlockHash, FinalityWaterline, TxHash};

use super::rpc::{field_quantity, field_str, parse_quantity, RpcCall, RpcTransport};
use super::{
    normalize_parsed, ChainDriver, NonceUsedState, NormalizeInput, NormalizedExecution, RawReceipt,
    TxPresence,
};

const STATUS_SUCCESS: u64 = 1;

pub struct EvmDriver<T> {
    transport: T,
}

impl<T: RpcTransport> EvmDriver<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn nonce_at(&self, address: &Address, tag: &str) -> Result<u64, DriverError> {
        let result = self
            .transport
            .call(RpcCall::new(
                "eth_getTransactionCount",
                json!([address.as_str(), tag]),
            ))
            .await?;
        parse_quantity(&result)
            .ok_or_else(|| DriverError::malformed("eth_getTransactionCount", result.to_string()))
    }

    fn parse_receipt(value: Value) -> RawReceipt {
        RawReceipt {
            block_number: field_quantity(&value, "blockNumber"),
            block_hash: field_str(&value, "blockHash").map(BlockHash),
            gas_used: field_quantity(&value, "gasUsed"),
            success: field_quantity(&value, "status") == Some(STATUS_SUCCESS),
            exec_error: None,
            raw: value,
        }
    }
}

#[async_trait]
impl<T: RpcTransport> ChainDriver for EvmDriver<T> {
    async fn pending_nonce(&self, address: &Address) -> Result<u64, DriverError> {
        self.nonce_at(address, "pending").await
    }

    async fn nonce_used_state(
        &self,
        address: &Address,
        nonce: u64,
    ) -> Result<NonceUsedState, DriverError> {
        let results = self
            .transport
            .batch(vec![
                RpcCall::new(
                    "eth_getTransactionCount",
                    json!([address.as_str(), "latest"]),
                ),
                RpcCall::new(
                    "eth_getTransactionCount",
                    json!([address.as_str(), "finalized"]),
                ),
            ])
            .await?;
        if results.len() != 2 {
            return Err(DriverError::malformed(
                "eth_getTransactionCount",
                format!("batch answered {} of 2", results.len()),
            ));
        }

        // A count of N means nonces 0..N are consumed at that tag.
        let latest = parse_quantity(&results[0]).unwrap_or(0);
        let finalized = parse_quantity(&results[1]).unwrap_or(0);

        Ok(if nonce < finalized {
            NonceUsedState::FinalizedUsed
        } else if nonce < latest {
            NonceUsedState::TempUsed
        } else {
            NonceUsedState::NotUsed
        })
    }

    async fn batch_presence(&self, hashes: &[TxHash]) -> Result<Vec<TxPresence>, DriverError> {
        let calls = hashes
            .iter()
            .map(|h| RpcCall::new("eth_getTransactionByHash", json!([h.as_str()])))
            .collect();
        let results = self.transport.batch(calls).await?;

        Ok(results
            .into_iter()
            .map(|v| {
                if v.is_null() {
                    TxPresence::Missing
                } else {
                    TxPresence::Present
                }
            })
            .collect())
    }

    async fn batch_receipts(
        &self,
        hashes: &[TxHash],
    ) -> Result<Vec<Option<RawReceipt>>, DriverError> {
        let calls = hashes
            .iter()
            .map(|h| RpcCall::new("eth_getTransactionReceipt", json!([h.as_str()])))
            .collect();
        let results = self.transport.batch(calls).await?;

        Ok(results
            .into_iter()
            .map(|v| if v.is_null() { None } else { Some(Self::parse_receipt(v)) })
            .collect())
    }

    async fn finality_waterline(&self) -> Result<FinalityWaterline, DriverError> {
        let results = self
            .transport
            .batch(vec![
                RpcCall::new("eth_getBlockByNumber", json!(["safe", false])),
                RpcCall::new("eth_getBlockByNumber", json!(["finalized", false])),
            ])
            .await?;

        // Nodes that do not serve these tags answer null; the engine then
        // simply cannot promote past EXECUTED this run.
        let safe = results.first().and_then(|v| field_quantity(v, "number"));
        let finalized = results.get(1).and_then(|v| field_quantity(v, "number"));

        Ok(FinalityWaterline { safe, finalized })
    }

    async fn batch_block_timestamps_ms(
        &self,
        block_hashes: &[BlockHash],
    ) -> Result<Vec<Option<u64>>, DriverError> {
        let calls = block_hashes
            .iter()
            .map(|h| RpcCall::new("eth_getBlockByHash", json!([h.0, false])))
            .collect();
        let results = self.transport.batch(calls).await?;

        Ok(results
            .into_iter()
            .map(|v| field_quantity(&v, "timestamp").map(|secs| secs * 1000))
            .collect())
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, DriverError> {
        let payload = format!("0x{}", hex::encode(raw));
        let result = self
            .transport
            .call(RpcCall::new("eth_sendRawTransaction", json!([payload])))
            .await?;
        result
            .as_str()
            .map(|s| TxHash(s.to_string()))
            .ok_or_else(|| DriverError::malformed("eth_sendRawTransaction", result.to_string()))
    }

    fn normalize_executed(&self, input: NormalizeInput) -> NormalizedExecution {
        normalize_parsed(input, "transaction execution failed")
    }
}
