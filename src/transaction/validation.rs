/// Stateless validation of transactions, separated from type definitions
use crate::crypto;
use crate::error::ChainError;
use crate::transaction::types::{Input, Transaction};

impl Input {
    /// Checks the signature against the input coordinates and public key.
    pub fn verify_signature(&self) -> Result<(), ChainError> {
        let message = self.info().signable_message()?;
        crypto::verify_signature_hex(&self.public_key, &message, &self.signature)
    }
}

impl Transaction {
    /// Verifies every input signature; a reward transaction has none to check.
    pub fn verify_signatures(&self) -> Result<(), ChainError> {
        for input in self.inputs() {
            input.verify_signature().map_err(|e| {
                ChainError::InvalidSignature(format!(
                    "failed to verify signature of an input of transaction {}: {}",
                    self.id(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
