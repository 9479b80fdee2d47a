use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::counter::Identity;
use crate::ledger::{Operation, SlotId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub slot: SlotId,
    pub op: Operation,
    pub nonce: u64,
}

impl Transaction {
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"tally-txn-v1");
        hasher.update(self.slot);
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(serde_json::to_vec(&self.op).expect("operation encode"));
        hasher.finalize().into()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub txn: Transaction,
    pub caller: Identity,
    #[serde(with = "crate::txn::serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn sign(sk: &SigningKey, txn: Transaction) -> Self {
        let signature = sk.sign(&txn.digest());
        Self {
            caller: sk.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
            txn,
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        self.txn.digest()
    }

    /// Runtime-side authentication: on success the returned identity is the
    /// caller the core operations may trust as a plain value.
    pub fn verify(&self) -> Result<Identity, AuthError> {
        let key = VerifyingKey::from_bytes(&self.caller).map_err(|_| AuthError::MalformedKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| AuthError::MalformedSignature)?;
        key.verify_strict(&self.digest(), &signature)
            .map_err(|_| AuthError::InvalidSignature)?;
        Ok(self.caller)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("caller bytes are not a valid ed25519 key")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match the caller")]
    InvalidSignature,
}


pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
