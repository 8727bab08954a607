//! Verification of the blocks offered by a neighbor.

use crate::addressbook::AddressesManager;
use crate::blockchain::core::chain::{apply_block, Block, Sha256Hash};
use crate::blockchain::core::state::UtxosManager;
use crate::config::SettingsProvider;
use crate::error::ChainError;
use std::slice;
use std::sync::Arc;

/// Verifies `neighbor_blocks` as the continuation of `old_host_blocks`.
///
/// `last_host_blocks` are the local blocks at the same heights as the
/// neighbor ones; only neighbor blocks that differ from them are fully
/// verified. Verification runs against copies of the registries, cleared
/// when there is no common prefix. Returns the verified neighbor blocks.
pub fn verify_neighbor_blocks(
    addresses: &dyn AddressesManager,
    utxos: &dyn UtxosManager,
    settings: &dyn SettingsProvider,
    last_host_blocks: &[Arc<Block>],
    neighbor_blocks: Vec<Arc<Block>>,
    old_host_blocks: &[Arc<Block>],
    timestamp: i64,
) -> Result<Vec<Arc<Block>>, ChainError> {
    if old_host_blocks.is_empty() && neighbor_blocks.len() < 2 {
        return Err(ChainError::ChainTooShort);
    }
    let Some(first_neighbor_block) = neighbor_blocks.first() else {
        return Err(ChainError::ForkDetected);
    };
    if !old_host_blocks.is_empty()
        && last_host_blocks.first().map(|block| block.previous_hash)
            != Some(first_neighbor_block.previous_hash)
    {
        return Err(ChainError::ForkDetected);
    }

    if let Some(last_neighbor_block) = neighbor_blocks.last() {
        if last_neighbor_block.timestamp == timestamp {
            if let Some(validator_address) = last_neighbor_block.validator_address() {
                addresses.verify(&[validator_address.to_string()], &[])?;
            }
        }
    }

    let neighbor_utxos = utxos.copy();
    let neighbor_addresses = addresses.copy();
    if old_host_blocks.is_empty() {
        neighbor_utxos.clear();
        neighbor_addresses.clear();
    }

    for (i, block) in neighbor_blocks.iter().enumerate() {
        let previous_block = if i == 0 {
            old_host_blocks.last()
        } else {
            neighbor_blocks.get(i - 1)
        };
        let (previous_hash, previous_timestamp): (Sha256Hash, i64) = match previous_block {
            Some(previous_block) => (previous_block.hash()?, previous_block.timestamp),
            None => ([0u8; 32], 0),
        };
        if block.previous_hash != previous_hash {
            return Err(ChainError::InvalidPreviousHash {
                height: old_host_blocks.len() + i,
            });
        }

        // The predecessor becomes part of the ledger once its successor is in.
        if i > 0 {
            if let Some(previous_block) = previous_block {
                apply_block(neighbor_utxos.as_ref(), neighbor_addresses.as_ref(), previous_block)?;
            }
        }

        let is_genesis = i == 0 && old_host_blocks.is_empty();
        let is_new = match last_host_blocks.get(i) {
            Some(host_block) => host_block.hash()? != block.hash()?,
            None => true,
        };
        if is_new && !is_genesis {
            verify_block(
                block,
                previous_timestamp,
                timestamp,
                neighbor_utxos.as_ref(),
                neighbor_addresses.as_ref(),
                settings,
            )?;
        }
    }

    // The tip itself must also apply cleanly.
    if let Some(last_neighbor_block) = neighbor_blocks.last() {
        addresses.verify(
            &last_neighbor_block.added_registered_addresses,
            &last_neighbor_block.removed_registered_addresses,
        )?;
        apply_block(neighbor_utxos.as_ref(), neighbor_addresses.as_ref(), last_neighbor_block)?;
    }

    Ok(neighbor_blocks)
}

/// Verifies a single neighbor block against the ledger state preceding it.
pub fn verify_block(
    block: &Block,
    previous_timestamp: i64,
    now: i64,
    utxos: &dyn UtxosManager,
    addresses: &dyn AddressesManager,
    settings: &dyn SettingsProvider,
) -> Result<(), ChainError> {
    let expected_timestamp = previous_timestamp
        .checked_add(settings.validation_timestamp())
        .ok_or(ChainError::TimestampCadenceInvalid {
            timestamp: block.timestamp,
            expected: i64::MAX,
        })?;
    if block.timestamp != expected_timestamp {
        return Err(ChainError::TimestampCadenceInvalid {
            timestamp: block.timestamp,
            expected: expected_timestamp,
        });
    }
    if block.timestamp > now {
        return Err(ChainError::TimestampInFuture {
            timestamp: block.timestamp,
            now,
        });
    }

    // Fees are computed as the transactions get applied, one after the other.
    let block_utxos = utxos.copy();
    let mut reward: Option<u64> = None;
    let mut fees: u64 = 0;
    for transaction in &block.transactions {
        if transaction.has_reward() {
            if reward.is_some() {
                return Err(ChainError::MultipleRewards);
            }
            reward = Some(transaction.reward_value());
            continue;
        }
        if transaction.timestamp() > block.timestamp {
            return Err(ChainError::InvalidBlock(format!(
                "a neighbor block transaction timestamp is too far in the future: transaction timestamp: {}, id: {}",
                transaction.timestamp(),
                transaction.id()
            )));
        }
        if transaction.timestamp() < previous_timestamp {
            return Err(ChainError::InvalidBlock(format!(
                "a neighbor block transaction timestamp is too old: transaction timestamp: {}, id: {}",
                transaction.timestamp(),
                transaction.id()
            )));
        }
        transaction.verify_signatures()?;
        for output in transaction.outputs() {
            if output.is_yielding
                && !block.added_registered_addresses.contains(&output.address)
                && !addresses.is_registered(&output.address)
            {
                return Err(ChainError::InvalidBlock(format!(
                    "a neighbor block transaction yielding output address is not registered: {}",
                    output.address
                )));
            }
        }
        let fee = block_utxos.calculate_fee(transaction, block.timestamp)?;
        block_utxos.update_utxos(slice::from_ref(transaction), block.timestamp)?;
        fees = fees.saturating_add(fee);
    }

    let reward = reward.ok_or_else(|| {
        ChainError::InvalidBlock("neighbor block has not been rewarded".to_string())
    })?;
    if reward > fees {
        return Err(ChainError::RewardExceedsFees { reward, fees });
    }
    Ok(())
}
