//! Pure in-memory mock chain driver.
//!
//! Scriptable stand-in for a real node: tests set the chain view up front
//! (pending nonce, presence, receipts, waterline) and assert on the calls
//! the engine made. Also usable by embedders for their own tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::DriverError;
use crate::types::{Address, BlockHash, FinalityWaterline, TxHash};

use super::{
    normalize_parsed, ChainDriver, NonceUsedState, NormalizeInput, NormalizedExecution, RawReceipt,
    TxPresence,
};

#[derive(Default)]
pub struct MockDriver {
    pub pending_nonce: Mutex<u64>,
    pub nonce_state: Mutex<NonceUsedState>,
    pub presence: Mutex<HashMap<TxHash, TxPresence>>,
    pub receipts: Mutex<HashMap<TxHash, RawReceipt>>,
    pub waterline: Mutex<FinalityWaterline>,
    pub timestamps_ms: Mutex<HashMap<BlockHash, u64>>,

    /// Raw payloads handed to `send_raw_transaction`, in call order.
    pub sent: Mutex<Vec<Bytes>>,
    /// When set, the next resend is rejected with this message.
    pub reject_send: Mutex<Option<String>>,
    /// When set, presence probes fail with a transport error.
    pub fail_presence: Mutex<Option<String>>,

    pub nonce_state_calls: AtomicU32,
    pub waterline_calls: AtomicU32,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        *self.pending_nonce.lock().unwrap() = nonce;
    }

    pub fn set_nonce_state(&self, state: NonceUsedState) {
        *self.nonce_state.lock().unwrap() = state;
    }

    pub fn set_presence(&self, hash: &TxHash, presence: TxPresence) {
        self.presence.lock().unwrap().insert(hash.clone(), presence);
    }

    pub fn set_receipt(&self, hash: &TxHash, receipt: RawReceipt) {
        self.receipts.lock().unwrap().insert(hash.clone(), receipt);
    }

    pub fn clear_receipt(&self, hash: &TxHash) {
        self.receipts.lock().unwrap().remove(hash);
    }

    pub fn set_waterline(&self, waterline: FinalityWaterline) {
        *self.waterline.lock().unwrap() = waterline;
    }

    pub fn set_timestamp_ms(&self, block: &BlockHash, ts_ms: u64) {
        self.timestamps_ms
            .lock()
            .unwrap()
            .insert(block.clone(), ts_ms);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Convenience: a successful receipt in the given block.
    pub fn receipt_in_block(block_number: u64, block_hash: &str) -> RawReceipt {
        RawReceipt {
            block_number: Some(block_number),
            block_hash: Some(BlockHash(block_hash.to_string())),
            gas_used: Some(21_000),
            success: true,
            exec_error: None,
            raw: serde_json::json!({"blockNumber": block_number}),
        }
    }

    /// Convenience: a failed receipt in the given block.
    pub fn failed_receipt_in_block(block_number: u64, err: &str) -> RawReceipt {
        RawReceipt {
            block_number: Some(block_number),
            block_hash: None,
            gas_used: Some(21_000),
            success: false,
            exec_error: Some(err.to_string()),
            raw: serde_json::json!({"blockNumber": block_number}),
        }
    }
}

#[async_trait]
impl ChainDriver for MockDriver {
    async fn pending_nonce(&self, _address: &Address) -> Result<u64, DriverError> {
        Ok(*self.pending_nonce.lock().unwrap())
    }

    async fn nonce_used_state(
        &self,
        _address: &Address,
        _nonce: u64,
    ) -> Result<NonceUsedState, DriverError> {
        self.nonce_state_calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.nonce_state.lock().unwrap())
    }

    async fn batch_presence(&self, hashes: &[TxHash]) -> Result<Vec<TxPresence>, DriverError> {
        if let Some(message) = self.fail_presence.lock().unwrap().clone() {
            return Err(DriverError::Transport(message));
        }
        let presence = self.presence.lock().unwrap();
        Ok(hashes
            .iter()
            .map(|h| presence.get(h).copied().unwrap_or(TxPresence::Missing))
            .collect())
    }

    async fn batch_receipts(
        &self,
        hashes: &[TxHash],
    ) -> Result<Vec<Option<RawReceipt>>, DriverError> {
        let receipts = self.receipts.lock().unwrap();
        Ok(hashes.iter().map(|h| receipts.get(h).cloned()).collect())
    }

    async fn finality_waterline(&self) -> Result<FinalityWaterline, DriverError> {
        self.waterline_calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.waterline.lock().unwrap())
    }

    async fn batch_block_timestamps_ms(
        &self,
        block_hashes: &[BlockHash],
    ) -> Result<Vec<Option<u64>>, DriverError> {
        let timestamps = self.timestamps_ms.lock().unwrap();
        Ok(block_hashes
            .iter()
            .map(|h| timestamps.get(h).copied())
            .collect())
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, DriverError> {
        if let Some(message) = self.reject_send.lock().unwrap().clone() {
            return Err(DriverError::Rpc {
                code: -32000,
                message,
            });
        }
        self.sent.lock().unwrap().push(raw.clone());
        Ok(TxHash(format!("0xresent{}", hex::encode(raw))))
    }

    fn normalize_executed(&self, input: NormalizeInput) -> NormalizedExecution {
        normalize_parsed(input, "transaction execution failed")
    }
}
