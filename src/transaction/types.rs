/// Transaction types for DecayChain
use crate::crypto::{self, Address, KeyPair};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A recipient of value, optionally enrolled in the universal income.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub is_yielding: bool,
    pub initial_value: u64,
}

impl Output {
    pub fn new(address: impl Into<Address>, is_yielding: bool, initial_value: u64) -> Self {
        Output {
            address: address.into(),
            is_yielding,
            initial_value,
        }
    }
}

/// Coordinates of an output: the transaction holding it and its position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputInfo {
    pub output_index: u16,
    pub transaction_id: String,
}

impl InputInfo {
    pub fn new(output_index: u16, transaction_id: impl Into<String>) -> Self {
        InputInfo {
            output_index,
            transaction_id: transaction_id.into(),
        }
    }

    /// The bytes an input signature covers.
    pub fn signable_message(&self) -> Result<Vec<u8>, ChainError> {
        Ok(bincode::serialize(self)?)
    }
}

/// A spent output reference, signed by the owner of that output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub output_index: u16,
    pub transaction_id: String,
    /// Hex-encoded compressed secp256k1 public key
    pub public_key: String,
    /// Hex-encoded compact ECDSA signature
    pub signature: String,
}

impl Input {
    pub fn new(
        output_index: u16,
        transaction_id: impl Into<String>,
        public_key: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Input {
            output_index,
            transaction_id: transaction_id.into(),
            public_key: public_key.into(),
            signature: signature.into(),
        }
    }

    /// Builds an input spending `info`, signed with `keypair`.
    pub fn new_signed(info: &InputInfo, keypair: &KeyPair) -> Result<Self, ChainError> {
        let signature = keypair.sign(&info.signable_message()?)?;
        Ok(Input::new(
            info.output_index,
            info.transaction_id.clone(),
            keypair.public_key_hex(),
            hex::encode(signature),
        ))
    }

    pub fn info(&self) -> InputInfo {
        InputInfo::new(self.output_index, self.transaction_id.clone())
    }

    /// Address derived from the input public key.
    pub fn address(&self) -> Result<Address, ChainError> {
        crypto::address_from_public_key_hex(&self.public_key)
    }
}

#[derive(Serialize, Deserialize)]
struct TransactionDto {
    id: String,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    timestamp: i64,
}

/// A transfer of value, or a reward when it has no input.
///
/// The id is the hex SHA-256 of the encoded `(inputs, outputs, timestamp)` and
/// is recomputed whenever a transaction is decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TransactionDto", into = "TransactionDto")]
pub struct Transaction {
    id: String,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    timestamp: i64,
}

impl Transaction {
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>, timestamp: i64) -> Result<Self, ChainError> {
        check_shape(&inputs, &outputs)?;
        let id = generate_id(&inputs, &outputs, timestamp)?;
        Ok(Transaction {
            id,
            inputs,
            outputs,
            timestamp,
        })
    }

    /// The zero-input transaction crediting a validator.
    pub fn new_reward(
        address: impl Into<Address>,
        is_yielding: bool,
        timestamp: i64,
        value: u64,
    ) -> Result<Self, ChainError> {
        Transaction::new(
            Vec::new(),
            vec![Output::new(address, is_yielding, value)],
            timestamp,
        )
    }

    /// Spends every output of `spent` with `keypair` and sends `outputs`.
    pub fn new_signed(
        keypair: &KeyPair,
        spent: &[InputInfo],
        outputs: Vec<Output>,
        timestamp: i64,
    ) -> Result<Self, ChainError> {
        let inputs = spent
            .iter()
            .map(|info| Input::new_signed(info, keypair))
            .collect::<Result<Vec<_>, _>>()?;
        Transaction::new(inputs, outputs, timestamp)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn has_reward(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn reward_recipient_address(&self) -> Option<&str> {
        self.reward_output().map(|output| output.address.as_str())
    }

    pub fn reward_value(&self) -> u64 {
        self.reward_output().map_or(0, |output| output.initial_value)
    }

    fn reward_output(&self) -> Option<&Output> {
        if self.has_reward() {
            self.outputs.first()
        } else {
            None
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl TryFrom<TransactionDto> for Transaction {
    type Error = ChainError;

    fn try_from(dto: TransactionDto) -> Result<Self, Self::Error> {
        let id = generate_id(&dto.inputs, &dto.outputs, dto.timestamp)?;
        if id != dto.id {
            return Err(ChainError::InvalidTransaction(format!(
                "wrong transaction ID, provided: {}, calculated: {}",
                dto.id, id
            )));
        }
        check_shape(&dto.inputs, &dto.outputs)?;
        Ok(Transaction {
            id,
            inputs: dto.inputs,
            outputs: dto.outputs,
            timestamp: dto.timestamp,
        })
    }
}

impl From<Transaction> for TransactionDto {
    fn from(transaction: Transaction) -> Self {
        TransactionDto {
            id: transaction.id,
            inputs: transaction.inputs,
            outputs: transaction.outputs,
            timestamp: transaction.timestamp,
        }
    }
}

/// Outputs are addressed by a `u16` index.
fn check_shape(inputs: &[Input], outputs: &[Output]) -> Result<(), ChainError> {
    if outputs.len() > usize::from(u16::MAX) + 1 {
        return Err(ChainError::InvalidTransaction(format!(
            "too many outputs: {}",
            outputs.len()
        )));
    }
    if inputs.is_empty() {
        if outputs.len() > 1 {
            return Err(ChainError::InvalidTransaction(
                "multiple rewards attempt for the same transaction".to_string(),
            ));
        } else if outputs.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "reward not found whereas the transaction has no input".to_string(),
            ));
        }
    }
    Ok(())
}

fn generate_id(inputs: &[Input], outputs: &[Output], timestamp: i64) -> Result<String, ChainError> {
    let encoded = bincode::serialize(&(inputs, outputs, timestamp))?;
    Ok(hex::encode(Sha256::digest(encoded)))
}

/// A transaction relayed between nodes, tagged with the relaying node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub transaction: Transaction,
    pub transaction_broadcaster_target: String,
}

impl TransactionRequest {
    pub fn new(transaction: Transaction, transaction_broadcaster_target: impl Into<String>) -> Self {
        TransactionRequest {
            transaction,
            transaction_broadcaster_target: transaction_broadcaster_target.into(),
        }
    }
}
