use crate::addressbook::AddressesManager;
use crate::blockchain::core::fork_choice::{self, Candidate};
use crate::blockchain::core::state::UtxosManager;
use crate::blockchain::core::validation::verify_neighbor_blocks;
use crate::config::SettingsProvider;
use crate::crypto::Address;
use crate::error::ChainError;
use crate::sync::{Sender, SendersManager};
use crate::transaction::Transaction;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub type Sha256Hash = [u8; 32];

const HOST_CANDIDATE_TARGET: &str = "host";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub previous_hash: Sha256Hash,
    pub added_registered_addresses: Vec<Address>,
    pub removed_registered_addresses: Vec<Address>,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        previous_hash: Sha256Hash,
        added_registered_addresses: Vec<Address>,
        removed_registered_addresses: Vec<Address>,
        timestamp: i64,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            previous_hash,
            added_registered_addresses,
            removed_registered_addresses,
            timestamp,
            transactions,
        }
    }

    pub fn hash(&self) -> Result<Sha256Hash, ChainError> {
        let encoded = bincode::serialize(self)?;
        let mut hasher = Sha256::new();
        hasher.update(encoded);
        Ok(hasher.finalize().into())
    }

    /// Recipient of the block reward.
    pub fn validator_address(&self) -> Option<&str> {
        self.transactions
            .iter()
            .rev()
            .find_map(|transaction| transaction.reward_recipient_address())
    }
}

/// Read and append access to the local blockchain.
pub trait BlocksManager: Send + Sync {
    fn add_block(
        &self,
        timestamp: i64,
        transactions: Vec<Transaction>,
        new_addresses: Vec<Address>,
    ) -> Result<(), ChainError>;
    /// At most `blocks_count_limit` blocks, from `start_height` on.
    fn blocks(&self, start_height: u64) -> Vec<Arc<Block>>;
    fn first_block_timestamp(&self) -> Option<i64>;
    fn last_block_timestamp(&self) -> Option<i64>;
    fn last_block_transactions(&self) -> Vec<Transaction>;
}

/// Applies the ledger effects of `block` to the given registries.
pub(crate) fn apply_block(
    utxos: &dyn UtxosManager,
    addresses: &dyn AddressesManager,
    block: &Block,
) -> Result<(), ChainError> {
    utxos.update_utxos(&block.transactions, block.timestamp)?;
    addresses.update(
        &block.added_registered_addresses,
        &block.removed_registered_addresses,
    );
    Ok(())
}

/// The local chain of blocks.
///
/// The registries always reflect every block but the last one: a block's
/// transactions and registrations are applied when its successor is appended.
pub struct Blockchain {
    blocks: RwLock<Vec<Arc<Block>>>,
    addresses: Arc<dyn AddressesManager>,
    settings: Arc<dyn SettingsProvider>,
    senders: Arc<dyn SendersManager>,
    utxos: Arc<dyn UtxosManager>,
    update_lock: Mutex<()>,
}

impl Blockchain {
    pub fn new(
        addresses: Arc<dyn AddressesManager>,
        settings: Arc<dyn SettingsProvider>,
        senders: Arc<dyn SendersManager>,
        utxos: Arc<dyn UtxosManager>,
    ) -> Self {
        Blockchain {
            blocks: RwLock::new(Vec::new()),
            addresses,
            settings,
            senders,
            utxos,
            update_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Reconciles the local chain with the neighbors' chains.
    ///
    /// Neighbors are first asked for the blocks from the local tip on. When no
    /// neighbor agrees with the local chain, their whole chains are verified
    /// instead. The local chain is replaced by the selected candidate if it is
    /// longer or ends differently.
    pub async fn update(&self, timestamp: i64) {
        let _guard = self.update_lock.lock().await;
        let host_blocks: Vec<Arc<Block>> = self.blocks.read().clone();
        let senders = self.senders.senders();
        let mut candidates: Vec<Candidate> = Vec::new();

        if host_blocks.len() > 2 {
            candidates.push(Candidate::new(HOST_CANDIDATE_TARGET, host_blocks.clone()));
            let (old_host_blocks, last_host_blocks) = host_blocks.split_at(host_blocks.len() - 1);
            let start_height = old_host_blocks.len() as u64;
            for (target, result) in self.fetch_neighbor_blocks(&senders, start_height).await {
                let verified = result.and_then(|neighbor_blocks| {
                    self.verify(last_host_blocks, neighbor_blocks, old_host_blocks, timestamp)
                });
                match verified {
                    Ok(verified_blocks) => {
                        let mut blocks = old_host_blocks.to_vec();
                        blocks.extend(verified_blocks);
                        candidates.push(Candidate::new(target, blocks));
                    }
                    Err(e) => debug!("failed to verify last neighbor blocks for target {}: {}", target, e),
                }
            }
        }

        let mut is_fork = false;
        if !host_blocks.is_empty() && candidates.len() < 2 && !senders.is_empty() {
            is_fork = true;
            debug!("all neighbor blockchains are forks, verifying the whole blockchains");
            let last_host_blocks = &host_blocks[..host_blocks.len() - 1];
            for (target, result) in self.fetch_neighbor_blocks(&senders, 0).await {
                let verified = result.and_then(|neighbor_blocks| {
                    self.verify(last_host_blocks, neighbor_blocks, &[], timestamp)
                });
                match verified {
                    Ok(verified_blocks) => {
                        candidates.retain(|candidate| candidate.target != target);
                        candidates.push(Candidate::new(target, verified_blocks));
                    }
                    Err(e) => debug!("failed to verify neighbor blocks for target {}: {}", target, e),
                }
            }
        }

        let is_replaced = match fork_choice::select(host_blocks.len(), candidates) {
            Some(selected) if fork_choice::is_replacement(&host_blocks, &selected) => {
                self.replace(&host_blocks, selected, is_fork)
            }
            _ => false,
        };
        if is_replaced {
            debug!("verification done: blockchain replaced");
        } else {
            debug!("verification done: blockchain kept");
        }
    }

    fn verify(
        &self,
        last_host_blocks: &[Arc<Block>],
        neighbor_blocks: Vec<Arc<Block>>,
        old_host_blocks: &[Arc<Block>],
        timestamp: i64,
    ) -> Result<Vec<Arc<Block>>, ChainError> {
        verify_neighbor_blocks(
            self.addresses.as_ref(),
            self.utxos.as_ref(),
            self.settings.as_ref(),
            last_host_blocks,
            neighbor_blocks,
            old_host_blocks,
            timestamp,
        )
    }

    /// Asks every sender concurrently for its blocks from `start_height` on.
    /// Results keep the senders order.
    async fn fetch_neighbor_blocks(
        &self,
        senders: &[Arc<dyn Sender>],
        start_height: u64,
    ) -> Vec<(String, Result<Vec<Arc<Block>>, ChainError>)> {
        let timeout = self.settings.validation_timeout();
        let mut tasks = JoinSet::new();
        for (index, sender) in senders.iter().enumerate() {
            let sender = sender.clone();
            tasks.spawn(async move {
                let target = sender.target();
                let result = match tokio::time::timeout(timeout, sender.get_blocks(start_height)).await {
                    Err(_) => Err(ChainError::NeighborTimeout),
                    Ok(Err(e)) => Err(ChainError::NeighborUnreachable(e.to_string())),
                    Ok(Ok(bytes)) => bincode::deserialize::<Vec<Block>>(&bytes)
                        .map(|blocks| blocks.into_iter().map(Arc::new).collect())
                        .map_err(|e| ChainError::NeighborUnreachable(e.to_string())),
                };
                (index, target, result)
            });
        }

        let mut results = Vec::with_capacity(senders.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("neighbor blocks request task failed: {}", e),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, target, result)| (target, result))
            .collect()
    }

    /// Swaps in `selected` if the local chain did not change meanwhile.
    ///
    /// The adopted blocks are first replayed on copies of the registries so
    /// that a failure leaves the canonical state untouched.
    fn replace(&self, host_blocks: &[Arc<Block>], selected: Vec<Arc<Block>>, is_fork: bool) -> bool {
        let mut blocks = self.blocks.write();
        let is_unchanged = blocks.len() == host_blocks.len()
            && blocks
                .iter()
                .zip(host_blocks)
                .all(|(block, host_block)| Arc::ptr_eq(block, host_block));
        if !is_unchanged {
            debug!("local blockchain changed during verification");
            return false;
        }

        let Some(tip_index) = selected.len().checked_sub(1) else {
            return false;
        };
        let replayed: &[Arc<Block>] = if is_fork {
            &selected[..tip_index]
        } else if host_blocks.len() < selected.len() {
            &selected[host_blocks.len().saturating_sub(1)..tip_index]
        } else {
            &[]
        };

        let utxos = self.utxos.copy();
        let addresses = self.addresses.copy();
        if is_fork {
            utxos.clear();
            addresses.clear();
        }
        for block in replayed {
            if let Err(e) = apply_block(utxos.as_ref(), addresses.as_ref(), block) {
                error!("verification failed: failed to apply a neighbor block: {}", e);
                return false;
            }
        }

        if is_fork {
            self.utxos.clear();
            self.addresses.clear();
        }
        for block in replayed {
            if let Err(e) = apply_block(self.utxos.as_ref(), self.addresses.as_ref(), block) {
                error!("failed to apply a verified neighbor block: {}", e);
            }
        }
        *blocks = selected;
        true
    }
}

impl BlocksManager for Blockchain {
    fn add_block(
        &self,
        timestamp: i64,
        transactions: Vec<Transaction>,
        new_addresses: Vec<Address>,
    ) -> Result<(), ChainError> {
        let mut blocks = self.blocks.write();
        let previous_hash = match blocks.last() {
            Some(last_block) => last_block.hash()?,
            None => [0u8; 32],
        };
        let added_addresses = self.addresses.filter(&new_addresses);
        let removed_addresses = self.addresses.removed_addresses();
        let block = Block::new(
            previous_hash,
            added_addresses,
            removed_addresses,
            timestamp,
            transactions,
        );
        if let Some(last_block) = blocks.last() {
            apply_block(self.utxos.as_ref(), self.addresses.as_ref(), last_block)?;
        }
        blocks.push(Arc::new(block));
        Ok(())
    }

    fn blocks(&self, start_height: u64) -> Vec<Arc<Block>> {
        let blocks_count_limit = self.settings.blocks_count_limit();
        let blocks = self.blocks.read();
        if blocks_count_limit == 0 || start_height >= blocks.len() as u64 {
            return Vec::new();
        }
        let start = start_height as usize;
        let count = usize::try_from(blocks_count_limit).unwrap_or(usize::MAX);
        let end = start.saturating_add(count).min(blocks.len());
        blocks[start..end].to_vec()
    }

    fn first_block_timestamp(&self) -> Option<i64> {
        self.blocks.read().first().map(|block| block.timestamp)
    }

    fn last_block_timestamp(&self) -> Option<i64> {
        self.blocks.read().last().map(|block| block.timestamp)
    }

    fn last_block_transactions(&self) -> Vec<Transaction> {
        self.blocks
            .read()
            .last()
            .map(|block| block.transactions.clone())
            .unwrap_or_default()
    }
}
