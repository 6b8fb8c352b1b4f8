//! Epoch-family driver (Conflux-style semantics).
//!
//! Differences from the EVM family that matter here:
//! * finality comes from `cfx_getStatus` (`latestConfirmed` /
//!   `latestFinalized` epoch numbers), not block tags;
//! * nonce lookups use `cfx_getNextNonce`, unscoped for the pending view
//!   and with `latest_state` / `latest_finalized` epoch tags otherwise;
//! * a receipt's success flag is `outcomeStatus == 0` and failures carry
//!   `txExecErrorMsg`;
//! * the transaction object itself has a status code, and the skipped
//!   code means the transaction will never execute at this nonce.

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

const OUTCOME_SUCCESS: u64 = 0;
/// Transaction-object status code for "skipped": the node knows the hash
/// but will never execute it.
const TX_STATUS_SKIPPED: u64 = 2;

pub struct ConfluxDriver<T> {
    transport: T,
}

impl<T: RpcTransport> ConfluxDriver<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn next_nonce(&self, address: &Address, tag: Option<&str>) -> Result<u64, DriverError> {
        let params = match tag {
            Some(tag) => json!([address.as_str(), tag]),
            None => json!([address.as_str()]),
        };
        let result = self
            .transport
            .call(RpcCall::new("cfx_getNextNonce", params))
            .await?;
        parse_quantity(&result)
            .ok_or_else(|| DriverError::malformed("cfx_getNextNonce", result.to_string()))
    }

    fn parse_receipt(value: Value) -> RawReceipt {
        RawReceipt {
            block_number: field_quantity(&value, "epochNumber"),
            block_hash: field_str(&value, "blockHash").map(BlockHash),
            gas_used: field_quantity(&value, "gasUsed"),
            success: field_quantity(&value, "outcomeStatus") == Some(OUTCOME_SUCCESS),
            exec_error: field_str(&value, "txExecErrorMsg"),
            raw: value,
        }
    }
}

#[async_trait]
impl<T: RpcTransport> ChainDriver for ConfluxDriver<T> {
    async fn pending_nonce(&self, address: &Address) -> Result<u64, DriverError> {
        self.next_nonce(address, None).await
    }

    async fn nonce_used_state(
        &self,
        address: &Address,
        nonce: u64,
    ) -> Result<NonceUsedState, DriverError> {
        let results = self
            .transport
            .batch(vec![
                RpcCall::new("cfx_getNextNonce", json!([address.as_str(), "latest_state"])),
                RpcCall::new(
                    "cfx_getNextNonce",
                    json!([address.as_str(), "latest_finalized"]),
                ),
            ])
            .await?;
        if results.len() != 2 {
            return Err(DriverError::malformed(
                "cfx_getNextNonce",
                format!("batch answered {} of 2", results.len()),
            ));
        }

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
            .map(|h| RpcCall::new("cfx_getTransactionByHash", json!([h.as_str()])))
            .collect();
        let results = self.transport.batch(calls).await?;

        Ok(results
            .into_iter()
            .map(|v| {
                if v.is_null() {
                    TxPresence::Missing
                } else if field_quantity(&v, "status") == Some(TX_STATUS_SKIPPED) {
                    TxPresence::SkippedOrReplaced
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
            .map(|h| RpcCall::new("cfx_getTransactionReceipt", json!([h.as_str()])))
            .collect();
        let results = self.transport.batch(calls).await?;

        Ok(results
            .into_iter()
            .map(|v| if v.is_null() { None } else { Some(Self::parse_receipt(v)) })
            .collect())
    }

    async fn finality_waterline(&self) -> Result<FinalityWaterline, DriverError> {
        let status = self
            .transport
            .call(RpcCall::new("cfx_getStatus", json!([])))
            .await?;

        Ok(FinalityWaterline {
            safe: field_quantity(&status, "latestConfirmed"),
            finalized: field_quantity(&status, "latestFinalized"),
        })
    }

    async fn batch_block_timestamps_ms(
        &self,
        block_hashes: &[BlockHash],
    ) -> Result<Vec<Option<u64>>, DriverError> {
        let calls = block_hashes
            .iter()
            .map(|h| RpcCall::new("cfx_getBlockByHash", json!([h.0, false])))
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
            .call(RpcCall::new("cfx_sendRawTransaction", json!([payload])))
            .await?;
        result
            .as_str()
            .map(|s| TxHash(s.to_string()))
            .ok_or_else(|| DriverError::malformed("cfx_sendRawTransaction", result.to_string()))
    }

    fn normalize_executed(&self, input: NormalizeInput) -> NormalizedExecution {
        normalize_parsed(input, "transaction execution failed")
    }
}
