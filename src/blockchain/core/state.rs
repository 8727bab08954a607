use crate::config::SettingsProvider;
use crate::crypto::Address;
use crate::economics::Utxo;
use crate::error::ChainError;
use crate::transaction::{InputInfo, Transaction};
use imbl::{HashMap, Vector};
use parking_lot::RwLock;
use std::sync::Arc;

/// Access to the set of unspent outputs.
pub trait UtxosManager: Send + Sync {
    /// Fee paid by `transaction` if its inputs were spent at `timestamp`.
    fn calculate_fee(&self, transaction: &Transaction, timestamp: i64) -> Result<u64, ChainError>;
    fn clear(&self);
    /// An independent snapshot sharing the current outputs.
    fn copy(&self) -> Box<dyn UtxosManager>;
    /// Applies `transactions` as created at `timestamp`, all or nothing.
    fn update_utxos(&self, transactions: &[Transaction], timestamp: i64) -> Result<(), ChainError>;
    fn utxos(&self, address: &str) -> Vec<Arc<Utxo>>;
}

/// Both indexes over the unspent outputs. A slot of `by_id` is the output index;
/// spent outputs leave an empty slot so positions stay stable.
#[derive(Debug, Clone, Default)]
struct UtxosMaps {
    by_address: HashMap<Address, Vector<Arc<Utxo>>>,
    by_id: HashMap<String, Vector<Option<Arc<Utxo>>>>,
}

impl UtxosMaps {
    fn find(&self, input_info: &InputInfo) -> Result<&Arc<Utxo>, ChainError> {
        self.by_id
            .get(input_info.transaction_id.as_str())
            .and_then(|slots| slots.get(input_info.output_index as usize))
            .and_then(Option::as_ref)
            .ok_or_else(|| input_not_found(input_info))
    }

    fn apply(&mut self, transaction: &Transaction, timestamp: i64) -> Result<(), ChainError> {
        let id = transaction.id();
        if self.by_id.contains_key(id) {
            return Err(ChainError::DuplicateTransactionId(id.to_string()));
        }
        let outputs = transaction.outputs();
        let is_spendable = outputs.len() > 1
            || outputs
                .first()
                .is_some_and(|output| output.initial_value > 0 || output.is_yielding);
        if is_spendable {
            let mut slots = Vector::new();
            for (index, output) in outputs.iter().enumerate() {
                let output_index = u16::try_from(index).map_err(|_| {
                    ChainError::InvalidTransaction(format!("too many outputs: {}", outputs.len()))
                })?;
                let input_info = InputInfo::new(output_index, id);
                let utxo = Arc::new(Utxo::new(input_info, output.clone(), timestamp));
                self.by_address
                    .entry(output.address.clone())
                    .or_insert_with(Vector::new)
                    .push_back(utxo.clone());
                slots.push_back(Some(utxo));
            }
            self.by_id.insert(id.to_string(), slots);
        }
        for input in transaction.inputs() {
            let input_info = input.info();
            let slots = self
                .by_id
                .get_mut(input_info.transaction_id.as_str())
                .ok_or_else(|| input_not_found(&input_info))?;
            let utxo = slots
                .get_mut(input_info.output_index as usize)
                .and_then(Option::take)
                .ok_or_else(|| input_not_found(&input_info))?;
            let is_exhausted = !slots
                .iter()
                .flatten()
                .any(|remaining| remaining.initial_value() > 0 || remaining.is_yielding());
            if is_exhausted {
                self.by_id.remove(input_info.transaction_id.as_str());
            }
            let address = utxo.address();
            if let Some(utxos) = self.by_address.get_mut(address.as_str()) {
                if let Some(position) = utxos
                    .iter()
                    .position(|candidate| candidate.input_info == input_info)
                {
                    utxos.remove(position);
                }
                if utxos.is_empty() {
                    self.by_address.remove(address.as_str());
                }
            }
        }
        Ok(())
    }

    /// At most one yielding output per address.
    fn verify_incomes(&self) -> Result<(), ChainError> {
        for (address, utxos) in self.by_address.iter() {
            if utxos.iter().filter(|utxo| utxo.is_yielding()).count() > 1 {
                return Err(ChainError::IncomeConflict(address.clone()));
            }
        }
        Ok(())
    }
}

fn input_not_found(input_info: &InputInfo) -> ChainError {
    ChainError::InputNotFound(format!(
        "transaction ID: {}, output index: {}",
        input_info.transaction_id, input_info.output_index
    ))
}

/// The unspent outputs of the ledger, indexed by address and by transaction.
///
/// Updates are computed on a private copy of the persistent maps and swapped in
/// once they succeed, so the lock is never held during validation.
pub struct UtxosRegistry {
    settings: Arc<dyn SettingsProvider>,
    maps: RwLock<UtxosMaps>,
}

impl UtxosRegistry {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        UtxosRegistry {
            settings,
            maps: RwLock::new(UtxosMaps::default()),
        }
    }
}

impl UtxosManager for UtxosRegistry {
    fn calculate_fee(&self, transaction: &Transaction, timestamp: i64) -> Result<u64, ChainError> {
        let maps = self.maps.read();
        let mut inputs_value: u64 = 0;
        for input in transaction.inputs() {
            let utxo = maps.find(&input.info())?;
            let input_address = input
                .address()
                .map_err(|e| ChainError::AddressMismatch(e.to_string()))?;
            if utxo.address() != &input_address {
                return Err(ChainError::AddressMismatch(format!(
                    "input address: {}, output address: {}",
                    input_address,
                    utxo.address()
                )));
            }
            let value = utxo.value(
                timestamp,
                self.settings.half_life_in_nanoseconds(),
                self.settings.income_base(),
                self.settings.income_limit(),
            );
            inputs_value = inputs_value.saturating_add(value);
        }
        let outputs_value = transaction
            .outputs()
            .iter()
            .fold(0u64, |total, output| total.saturating_add(output.initial_value));
        if inputs_value < outputs_value {
            return Err(ChainError::NegativeFee);
        }
        let fee = inputs_value - outputs_value;
        let minimal_fee = self.settings.minimal_transaction_fee();
        if fee < minimal_fee {
            return Err(ChainError::FeeTooLow { fee, minimal_fee });
        }
        Ok(fee)
    }

    fn clear(&self) {
        *self.maps.write() = UtxosMaps::default();
    }

    fn copy(&self) -> Box<dyn UtxosManager> {
        Box::new(UtxosRegistry {
            settings: self.settings.clone(),
            maps: RwLock::new(self.maps.read().clone()),
        })
    }

    fn update_utxos(&self, transactions: &[Transaction], timestamp: i64) -> Result<(), ChainError> {
        let mut maps = self.maps.read().clone();
        for transaction in transactions {
            maps.apply(transaction, timestamp)?;
        }
        maps.verify_incomes()?;
        *self.maps.write() = maps;
        Ok(())
    }

    fn utxos(&self, address: &str) -> Vec<Arc<Utxo>> {
        self.maps
            .read()
            .by_address
            .get(address)
            .map(|utxos| utxos.iter().cloned().collect())
            .unwrap_or_default()
    }
}
