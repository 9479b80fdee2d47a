use serde::{Deserialize, Serialize};

use crate::ledger::SlotId;

pub type Identity = [u8; 32];

/// Persisted layout: 8-byte tag, count as little-endian i64, authority bytes.
pub const RECORD_TAG: [u8; 8] = *b"tallyrec";
pub const RECORD_LEN: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("slot {} already holds a record", hex::encode(.slot))]
    AlreadyInitialized { slot: SlotId },
    #[error("caller {} is not the record authority", hex::encode(.caller))]
    Unauthorized { caller: Identity },
    #[error("counter overflow")]
    Overflow,
    #[error("counter underflow")]
    Underflow,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterRecord {
    pub count: i64,
    pub authority: Identity,
}

impl CounterRecord {
    pub fn new(authority: Identity) -> Self {
        Self {
            count: 0,
            authority,
        }
    }

    pub fn increment(&mut self) -> Result<(), CounterError> {
        self.count = self.count.checked_add(1).ok_or(CounterError::Overflow)?;
        Ok(())
    }

    pub fn decrement(&mut self) -> Result<(), CounterError> {
        self.count = self.count.checked_sub(1).ok_or(CounterError::Underflow)?;
        Ok(())
    }

    /// The one privileged operation: only the creation-time authority may zero
    /// the counter. On failure the record is untouched.
    pub fn reset(&mut self, caller: Identity) -> Result<(), CounterError> {
        if caller != self.authority {
            return Err(CounterError::Unauthorized { caller });
        }
        self.count = 0;
        Ok(())
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[..8].copy_from_slice(&RECORD_TAG);
        buf[8..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16..].copy_from_slice(&self.authority);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != RECORD_LEN || bytes[..8] != RECORD_TAG {
            return None;
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[8..16]);
        let mut authority = [0u8; 32];
        authority.copy_from_slice(&bytes[16..]);
        Some(Self {
            count: i64::from_le_bytes(count),
            authority,
        })
    }
}
