use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::counter::{CounterError, CounterRecord, Identity};
use crate::txn::{AuthError, SignedTransaction};

pub type SlotId = [u8; 32];

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown slot {}", hex::encode(.slot))]
    UnknownSlot { slot: SlotId },
    #[error("transaction already applied")]
    DuplicateTransaction,
    #[error(transparent)]
    Counter(#[from] CounterError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Storage interface for slot-addressed counter records. Injected into the
/// runtime so no global state is involved.
pub trait SlotStore {
    fn load(&self, slot: &SlotId) -> Option<CounterRecord>;
    fn store(&mut self, slot: &SlotId, record: &CounterRecord);
}

#[derive(Default)]
pub struct MemoryStore {
    slots: BTreeMap<SlotId, CounterRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &BTreeMap<SlotId, CounterRecord> {
        &self.slots
    }
}

impl SlotStore for MemoryStore {
    fn load(&self, slot: &SlotId) -> Option<CounterRecord> {
        self.slots.get(slot).copied()
    }

    fn store(&mut self, slot: &SlotId, record: &CounterRecord) {
        self.slots.insert(*slot, *record);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    Increment,
    Decrement,
    Reset,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Initialized { slot: SlotId, authority: Identity },
    Incremented { slot: SlotId, count: i64 },
    Decremented { slot: SlotId, count: i64 },
    Reset { slot: SlotId, authority: Identity },
}

pub struct LedgerRuntime<S> {
    store: S,
    pub events: Vec<LedgerEvent>,
    pub height: u64,
    applied: BTreeMap<[u8; 32], ()>,
}

impl<S: SlotStore> LedgerRuntime<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            events: Vec::new(),
            height: 0,
            applied: BTreeMap::new(),
        }
    }

    pub fn restore(store: S, height: u64, applied: impl IntoIterator<Item = [u8; 32]>) -> Self {
        Self {
            store,
            events: Vec::new(),
            height,
            applied: applied.into_iter().map(|digest| (digest, ())).collect(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn record(&self, slot: &SlotId) -> Option<CounterRecord> {
        self.store.load(slot)
    }

    pub fn applied_digests(&self) -> impl Iterator<Item = &[u8; 32]> {
        self.applied.keys()
    }

    /// Authenticate the envelope, reject replays, then apply the operation.
    pub fn submit(&mut self, tx: &SignedTransaction) -> Result<CounterRecord, LedgerError> {
        let caller = tx.verify()?;
        let digest = tx.digest();
        if self.applied.contains_key(&digest) {
            return Err(LedgerError::DuplicateTransaction);
        }
        let record = self.apply(&tx.txn.slot, &tx.txn.op, caller)?;
        self.applied.insert(digest, ());
        Ok(record)
    }

    /// Dispatch one operation against one slot. Operations mutate a copy of
    /// the record; the store only ever sees committed post-states.
    pub fn apply(
        &mut self,
        slot: &SlotId,
        op: &Operation,
        caller: Identity,
    ) -> Result<CounterRecord, LedgerError> {
        let record = match op {
            Operation::Initialize => {
                if self.store.load(slot).is_some() {
                    return Err(CounterError::AlreadyInitialized { slot: *slot }.into());
                }
                let record = CounterRecord::new(caller);
                self.events.push(LedgerEvent::Initialized {
                    slot: *slot,
                    authority: caller,
                });
                record
            }
            Operation::Increment => {
                let mut record = self.load_occupied(slot)?;
                record.increment()?;
                self.events.push(LedgerEvent::Incremented {
                    slot: *slot,
                    count: record.count,
                });
                record
            }
            Operation::Decrement => {
                let mut record = self.load_occupied(slot)?;
                record.decrement()?;
                self.events.push(LedgerEvent::Decremented {
                    slot: *slot,
                    count: record.count,
                });
                record
            }
            Operation::Reset => {
                let mut record = self.load_occupied(slot)?;
                record.reset(caller)?;
                self.events.push(LedgerEvent::Reset {
                    slot: *slot,
                    authority: caller,
                });
                record
            }
        };
        self.store.store(slot, &record);
        self.height += 1;
        Ok(record)
    }

    fn load_occupied(&self, slot: &SlotId) -> Result<CounterRecord, LedgerError> {
        self.store
            .load(slot)
            .ok_or(LedgerError::UnknownSlot { slot: *slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use crate::txn::Transaction;

    fn keypair() -> (SigningKey, Identity) {
        let sk = SigningKey::generate(&mut OsRng);
        let id = sk.verifying_key().to_bytes();
        (sk, id)
    }

    fn runtime() -> LedgerRuntime<MemoryStore> {
        LedgerRuntime::new(MemoryStore::new())
    }

    #[test]
    fn initialize_allocates_a_zeroed_record() {
        let mut runtime = runtime();
        let (_, creator) = keypair();
        let slot = [1u8; 32];
        let record = runtime
            .apply(&slot, &Operation::Initialize, creator)
            .unwrap();
        assert_eq!(record.count, 0);
        assert_eq!(record.authority, creator);
        assert_eq!(runtime.record(&slot), Some(record));
        assert_eq!(runtime.height, 1);
    }

    #[test]
    fn initialize_rejects_an_occupied_slot() {
        let mut runtime = runtime();
        let (_, alice) = keypair();
        let (_, mallory) = keypair();
        let slot = [2u8; 32];
        runtime.apply(&slot, &Operation::Initialize, alice).unwrap();
        let err = runtime
            .apply(&slot, &Operation::Initialize, mallory)
            .unwrap_err();
        match err {
            LedgerError::Counter(CounterError::AlreadyInitialized { slot: reported }) => {
                assert_eq!(reported, slot)
            }
            other => panic!("unexpected error: {other}"),
        }
        let record = runtime.record(&slot).unwrap();
        assert_eq!(record.authority, alice);
        assert_eq!(record.count, 0);
    }

    #[test]
    fn increments_from_arbitrary_callers_accumulate() {
        let mut runtime = runtime();
        let (_, creator) = keypair();
        let slot = [3u8; 32];
        runtime
            .apply(&slot, &Operation::Initialize, creator)
            .unwrap();
        for _ in 0..5 {
            let (_, caller) = keypair();
            runtime.apply(&slot, &Operation::Increment, caller).unwrap();
        }
        assert_eq!(runtime.record(&slot).unwrap().count, 5);
    }

    #[test]
    fn operations_against_a_vacant_slot_fail() {
        let mut runtime = runtime();
        let (_, caller) = keypair();
        let slot = [4u8; 32];
        let err = runtime
            .apply(&slot, &Operation::Increment, caller)
            .unwrap_err();
        match err {
            LedgerError::UnknownSlot { slot: reported } => assert_eq!(reported, slot),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_operations_commit_nothing() {
        let mut store = MemoryStore::new();
        let (_, creator) = keypair();
        let slot = [5u8; 32];
        let mut saturated = CounterRecord::new(creator);
        saturated.count = i64::MAX;
        store.store(&slot, &saturated);
        let mut runtime = LedgerRuntime::new(store);

        let err = runtime
            .apply(&slot, &Operation::Increment, creator)
            .unwrap_err();
        match err {
            LedgerError::Counter(CounterError::Overflow) => {}
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.record(&slot), Some(saturated));
        assert_eq!(runtime.height, 0);
        assert!(runtime.events.is_empty());
    }

    #[test]
    fn reset_by_a_stranger_leaves_the_record_unchanged() {
        let mut runtime = runtime();
        let (_, authority) = keypair();
        let (_, stranger) = keypair();
        let slot = [6u8; 32];
        runtime
            .apply(&slot, &Operation::Initialize, authority)
            .unwrap();
        runtime
            .apply(&slot, &Operation::Increment, authority)
            .unwrap();
        runtime
            .apply(&slot, &Operation::Increment, stranger)
            .unwrap();

        let err = runtime
            .apply(&slot, &Operation::Reset, stranger)
            .unwrap_err();
        match err {
            LedgerError::Counter(CounterError::Unauthorized { caller }) => {
                assert_eq!(caller, stranger)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.record(&slot).unwrap().count, 2);

        runtime.apply(&slot, &Operation::Reset, authority).unwrap();
        assert_eq!(runtime.record(&slot).unwrap().count, 0);
    }

    #[test]
    fn submit_checks_signatures_and_replays() {
        let mut runtime = runtime();
        let (sk, _) = keypair();
        let slot = [7u8; 32];
        runtime
            .submit(&SignedTransaction::sign(
                &sk,
                Transaction {
                    slot,
                    op: Operation::Initialize,
                    nonce: 1,
                },
            ))
            .unwrap();

        let envelope = SignedTransaction::sign(
            &sk,
            Transaction {
                slot,
                op: Operation::Increment,
                nonce: 2,
            },
        );
        runtime.submit(&envelope).unwrap();
        match runtime.submit(&envelope).unwrap_err() {
            LedgerError::DuplicateTransaction => {}
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.record(&slot).unwrap().count, 1);

        // the same operation under a fresh nonce is a distinct transaction
        runtime
            .submit(&SignedTransaction::sign(
                &sk,
                Transaction {
                    slot,
                    op: Operation::Increment,
                    nonce: 3,
                },
            ))
            .unwrap();
        assert_eq!(runtime.record(&slot).unwrap().count, 2);

        let mut tampered = SignedTransaction::sign(
            &sk,
            Transaction {
                slot,
                op: Operation::Increment,
                nonce: 4,
            },
        );
        tampered.txn.op = Operation::Reset;
        match runtime.submit(&tampered).unwrap_err() {
            LedgerError::Auth(AuthError::InvalidSignature) => {}
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.record(&slot).unwrap().count, 2);
    }

    #[test]
    fn restore_preserves_replay_protection() {
        let mut runtime = runtime();
        let (sk, _) = keypair();
        let slot = [8u8; 32];
        runtime
            .submit(&SignedTransaction::sign(
                &sk,
                Transaction {
                    slot,
                    op: Operation::Initialize,
                    nonce: 1,
                },
            ))
            .unwrap();
        let envelope = SignedTransaction::sign(
            &sk,
            Transaction {
                slot,
                op: Operation::Increment,
                nonce: 2,
            },
        );
        runtime.submit(&envelope).unwrap();

        let mut copied = MemoryStore::new();
        for (slot, record) in runtime.store().slots() {
            copied.store(slot, record);
        }
        let applied: Vec<[u8; 32]> = runtime.applied_digests().copied().collect();
        let mut restored = LedgerRuntime::restore(copied, runtime.height, applied);

        match restored.submit(&envelope).unwrap_err() {
            LedgerError::DuplicateTransaction => {}
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(restored.record(&slot).unwrap().count, 1);
    }

    #[test]
    fn walkthrough_matches_the_reference_scenario() {
        let mut runtime = runtime();
        let (authority_sk, authority) = keypair();
        let (stranger_sk, _) = keypair();
        let slot = [9u8; 32];
        let mut nonce = 0u64;
        let mut submit =
            |runtime: &mut LedgerRuntime<MemoryStore>, sk: &SigningKey, op: Operation| {
                nonce += 1;
                runtime.submit(&SignedTransaction::sign(sk, Transaction { slot, op, nonce }))
            };

        assert_eq!(
            submit(&mut runtime, &authority_sk, Operation::Initialize)
                .unwrap()
                .count,
            0
        );
        assert_eq!(
            submit(&mut runtime, &authority_sk, Operation::Increment)
                .unwrap()
                .count,
            1
        );
        assert_eq!(
            submit(&mut runtime, &authority_sk, Operation::Decrement)
                .unwrap()
                .count,
            0
        );
        assert_eq!(
            submit(&mut runtime, &stranger_sk, Operation::Increment)
                .unwrap()
                .count,
            1
        );
        assert_eq!(
            submit(&mut runtime, &stranger_sk, Operation::Increment)
                .unwrap()
                .count,
            2
        );
        assert_eq!(
            submit(&mut runtime, &authority_sk, Operation::Reset)
                .unwrap()
                .count,
            0
        );
        let err = submit(&mut runtime, &stranger_sk, Operation::Reset).unwrap_err();
        match err {
            LedgerError::Counter(CounterError::Unauthorized { .. }) => {}
            other => panic!("unexpected error: {other}"),
        }
        let record = runtime.record(&slot).unwrap();
        assert_eq!(record.count, 0);
        assert_eq!(record.authority, authority);
        assert_eq!(runtime.height, 6);
        assert_eq!(runtime.events.len(), 6);
    }
}
