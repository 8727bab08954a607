//! Transaction pool and block production.
//!
//! Pending transactions are admitted against a snapshot of the ledger as it
//! will be once the last block is applied. On every validation tick they are
//! shuffled with the block timestamp as seed, re-validated one after the other
//! and committed together with the validator reward.

use crate::blockchain::{BlocksManager, UtxosManager};
use crate::config::SettingsProvider;
use crate::crypto::Address;
use crate::error::ChainError;
use crate::sync::SendersManager;
use crate::transaction::{Transaction, TransactionRequest};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::slice;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub trait TransactionsManager: Send + Sync {
    /// Admits `transaction` relayed by `broadcaster_target`, then relays it
    /// tagged with `host_target`. Rejections are logged and dropped.
    fn add_transaction(&self, transaction: Transaction, broadcaster_target: &str, host_target: &str);
    fn transactions(&self) -> Vec<Transaction>;
}

pub struct TransactionsPool {
    blocks_manager: Arc<dyn BlocksManager>,
    senders: Arc<dyn SendersManager>,
    settings: Arc<dyn SettingsProvider>,
    transactions: RwLock<Vec<Transaction>>,
    utxos: Arc<dyn UtxosManager>,
    validator_address: Address,
}

impl TransactionsPool {
    pub fn new(
        blocks_manager: Arc<dyn BlocksManager>,
        settings: Arc<dyn SettingsProvider>,
        senders: Arc<dyn SendersManager>,
        utxos: Arc<dyn UtxosManager>,
        validator_address: impl Into<Address>,
    ) -> Self {
        TransactionsPool {
            blocks_manager,
            senders,
            settings,
            transactions: RwLock::new(Vec::new()),
            utxos,
            validator_address: validator_address.into(),
        }
    }

    /// Decodes a relayed `TransactionRequest` and admits its transaction.
    pub fn handle_transaction_request(&self, request: &[u8]) {
        match bincode::deserialize::<TransactionRequest>(request) {
            Ok(request) => self.add_transaction(
                request.transaction,
                &request.transaction_broadcaster_target,
                &self.senders.host_target(),
            ),
            Err(e) => debug!("failed to decode transaction request: {}", e),
        }
    }

    /// Produces the block at `timestamp` out of the pending transactions.
    pub fn validate(&self, timestamp: i64) {
        let last_block_timestamp = self.blocks_manager.last_block_timestamp();
        let is_genesis = last_block_timestamp.is_none();
        if let Some(last_block_timestamp) = last_block_timestamp {
            if timestamp == last_block_timestamp {
                error!("unable to create block, a block with the same timestamp is already in the blockchain");
                return;
            }
            if timestamp < last_block_timestamp {
                error!("unable to create block, a block with a later timestamp is already in the blockchain");
                return;
            }
            if timestamp > last_block_timestamp.saturating_add(self.settings.validation_timestamp()) {
                error!("unable to create block, a block is missing in the blockchain");
                return;
            }
        }
        let previous_timestamp = last_block_timestamp.unwrap_or(timestamp);

        let utxos = self.utxos.copy();
        let last_block_transactions = self.blocks_manager.last_block_transactions();
        if let Err(e) = utxos.update_utxos(&last_block_transactions, previous_timestamp) {
            error!("failed to update UTXOs: {}", e);
            return;
        }

        let pending = self.transactions.read().clone();
        // Same pending set and timestamp, same order on every node.
        let mut ordered = pending.clone();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));
        let mut rng = ChaCha8Rng::seed_from_u64(timestamp as u64);
        ordered.shuffle(&mut rng);

        let mut reward = if is_genesis {
            self.settings.genesis_amount()
        } else {
            0
        };
        let mut new_addresses: Vec<Address> = if is_genesis {
            vec![self.validator_address.clone()]
        } else {
            Vec::new()
        };
        let mut transactions = Vec::with_capacity(ordered.len() + 1);
        for transaction in ordered {
            match validate_transaction(&transaction, timestamp, previous_timestamp, utxos.as_ref()) {
                Ok(fee) => {
                    reward = reward.saturating_add(fee);
                    new_addresses.extend(
                        transaction
                            .outputs()
                            .iter()
                            .filter(|output| output.is_yielding)
                            .map(|output| output.address.clone()),
                    );
                    transactions.push(transaction);
                }
                Err(e) => warn!(
                    "transaction removed from the transactions pool, transaction: {}, error: {}",
                    transaction.id(),
                    e
                ),
            }
        }

        let reward_transaction =
            match Transaction::new_reward(self.validator_address.clone(), is_genesis, timestamp, reward) {
                Ok(reward_transaction) => reward_transaction,
                Err(e) => {
                    error!("unable to create block, failed to create reward transaction: {}", e);
                    return;
                }
            };
        transactions.push(reward_transaction);
        if let Err(e) = self.blocks_manager.add_block(timestamp, transactions, new_addresses) {
            error!("unable to create block: {}", e);
            return;
        }
        self.transactions
            .write()
            .retain(|transaction| !pending.contains(transaction));
        debug!("reward: {}", reward);
    }

    fn admit(&self, transaction: &Transaction) -> Result<(), ChainError> {
        let last_block_timestamp = self
            .blocks_manager
            .last_block_timestamp()
            .ok_or(ChainError::EmptyLedger)?;
        let next_block_timestamp = last_block_timestamp.saturating_add(self.settings.validation_timestamp());
        let timestamp = transaction.timestamp();
        if timestamp > next_block_timestamp {
            return Err(ChainError::TooFarInFuture {
                timestamp,
                next_block_timestamp,
            });
        }
        if timestamp < last_block_timestamp {
            return Err(ChainError::TooOld {
                timestamp,
                block_timestamp: last_block_timestamp,
            });
        }
        let pending = self.transactions.read().clone();
        if pending.contains(transaction) {
            return Err(ChainError::Duplicate);
        }
        transaction.verify_signatures()?;

        let utxos = self.utxos.copy();
        utxos.update_utxos(
            &self.blocks_manager.last_block_transactions(),
            last_block_timestamp,
        )?;
        utxos.update_utxos(&pending, next_block_timestamp)?;
        utxos.calculate_fee(transaction, next_block_timestamp)?;

        let mut transactions = self.transactions.write();
        if transactions.contains(transaction) {
            return Err(ChainError::Duplicate);
        }
        transactions.push(transaction.clone());
        Ok(())
    }

    /// Relays `transaction` to every sender, without waiting for them.
    fn broadcast(&self, transaction: Transaction, host_target: &str) {
        let request = TransactionRequest::new(transaction, host_target);
        let encoded = match bincode::serialize(&request) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!("failed to encode transaction request: {}", e);
                return;
            }
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                debug!("unable to broadcast transaction: {}", e);
                return;
            }
        };
        for sender in self.senders.senders() {
            let encoded = encoded.clone();
            runtime.spawn(async move {
                let _ = sender.add_transaction(encoded).await;
            });
        }
    }
}

impl TransactionsManager for TransactionsPool {
    fn add_transaction(&self, transaction: Transaction, broadcaster_target: &str, host_target: &str) {
        if let Err(e) = self.admit(&transaction) {
            debug!("failed to add transaction {}: {}", transaction.id(), e);
            return;
        }
        self.senders.incentive(broadcaster_target);
        self.broadcast(transaction, host_target);
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.transactions.read().clone()
    }
}

/// Fee of `transaction` for the block at `timestamp`, applied to `utxos` on success.
fn validate_transaction(
    transaction: &Transaction,
    timestamp: i64,
    previous_timestamp: i64,
    utxos: &dyn UtxosManager,
) -> Result<u64, ChainError> {
    if timestamp < transaction.timestamp() {
        return Err(ChainError::TooFarInFuture {
            timestamp: transaction.timestamp(),
            next_block_timestamp: timestamp,
        });
    }
    if transaction.timestamp() < previous_timestamp {
        return Err(ChainError::TooOld {
            timestamp: transaction.timestamp(),
            block_timestamp: previous_timestamp,
        });
    }
    transaction.verify_signatures()?;
    let fee = utxos.calculate_fee(transaction, timestamp)?;
    utxos.update_utxos(slice::from_ref(transaction), timestamp)?;
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Block, UtxosRegistry};
    use crate::config::ProtocolSettings;
    use crate::crypto::KeyPair;
    use crate::sync::Sender;
    use crate::transaction::{InputInfo, Output};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    const VALIDATION_TIMESTAMP: i64 = 10;
    const LAST_BLOCK_TIMESTAMP: i64 = 100;

    /// A chain made of a single block holding `transactions`, recording commits.
    struct RecordingBlocks {
        last_block_timestamp: Option<i64>,
        last_block_transactions: Vec<Transaction>,
        added: Mutex<Vec<(i64, Vec<Transaction>, Vec<Address>)>>,
    }

    impl RecordingBlocks {
        fn new(last_block_timestamp: Option<i64>, last_block_transactions: Vec<Transaction>) -> Arc<Self> {
            Arc::new(RecordingBlocks {
                last_block_timestamp,
                last_block_transactions,
                added: Mutex::new(Vec::new()),
            })
        }
    }

    impl BlocksManager for RecordingBlocks {
        fn add_block(
            &self,
            timestamp: i64,
            transactions: Vec<Transaction>,
            new_addresses: Vec<Address>,
        ) -> Result<(), ChainError> {
            self.added.lock().push((timestamp, transactions, new_addresses));
            Ok(())
        }

        fn blocks(&self, _start_height: u64) -> Vec<Arc<Block>> {
            Vec::new()
        }

        fn first_block_timestamp(&self) -> Option<i64> {
            self.last_block_timestamp
        }

        fn last_block_timestamp(&self) -> Option<i64> {
            self.last_block_timestamp
        }

        fn last_block_transactions(&self) -> Vec<Transaction> {
            self.last_block_transactions.clone()
        }
    }

    struct ChannelSender {
        relayed: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait]
    impl Sender for ChannelSender {
        async fn get_blocks(&self, _start_height: u64) -> Result<Vec<u8>, ChainError> {
            Ok(Vec::new())
        }

        async fn add_transaction(&self, request: Vec<u8>) -> Result<(), ChainError> {
            let _ = self.relayed.send(request);
            Ok(())
        }

        async fn send_targets(&self, _targets: Vec<String>) -> Result<(), ChainError> {
            Ok(())
        }

        fn target(&self) -> String {
            "neighbor:1".to_string()
        }
    }

    struct FakeSenders {
        senders: Vec<Arc<dyn Sender>>,
        incentives: Mutex<Vec<String>>,
    }

    impl SendersManager for FakeSenders {
        fn add_targets(&self, _targets: &[String]) {}

        fn incentive(&self, target: &str) {
            self.incentives.lock().push(target.to_string());
        }

        fn host_target(&self) -> String {
            "host:1".to_string()
        }

        fn senders(&self) -> Vec<Arc<dyn Sender>> {
            self.senders.clone()
        }
    }

    struct Fixture {
        keypair: KeyPair,
        funding: Transaction,
        blocks: Arc<RecordingBlocks>,
        senders: Arc<FakeSenders>,
        pool: TransactionsPool,
    }

    fn fixture(last_block_timestamp: Option<i64>, senders: Vec<Arc<dyn Sender>>) -> Fixture {
        let settings = Arc::new(ProtocolSettings {
            minimal_transaction_fee: 10,
            validation_timestamp: VALIDATION_TIMESTAMP,
            genesis_amount: 1_000,
            ..ProtocolSettings::default()
        });
        let keypair = KeyPair::generate().unwrap();
        let funding = Transaction::new_reward(keypair.address(), false, LAST_BLOCK_TIMESTAMP, 1_000).unwrap();
        let blocks = RecordingBlocks::new(last_block_timestamp, vec![funding.clone()]);
        let senders = Arc::new(FakeSenders {
            senders,
            incentives: Mutex::new(Vec::new()),
        });
        let utxos = Arc::new(UtxosRegistry::new(settings.clone()));
        let pool = TransactionsPool::new(blocks.clone(), settings, senders.clone(), utxos, "validator");
        Fixture {
            keypair,
            funding,
            blocks,
            senders,
            pool,
        }
    }

    impl Fixture {
        fn spending(&self, timestamp: i64, value: u64) -> Transaction {
            Transaction::new_signed(
                &self.keypair,
                &[InputInfo::new(0, self.funding.id())],
                vec![Output::new("bob", false, value)],
                timestamp,
            )
            .unwrap()
        }

        fn admit(&self, transaction: &Transaction) -> Result<(), ChainError> {
            self.pool.admit(transaction)
        }
    }

    #[test]
    fn test_admission_requires_a_blockchain() {
        let fixture = fixture(None, Vec::new());
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP, 100);
        assert_eq!(fixture.admit(&transaction), Err(ChainError::EmptyLedger));
    }

    #[test]
    fn test_admission_window_bounds() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());

        let too_old = fixture.spending(LAST_BLOCK_TIMESTAMP - 1, 100);
        assert!(matches!(fixture.admit(&too_old), Err(ChainError::TooOld { .. })));

        let too_far = fixture.spending(LAST_BLOCK_TIMESTAMP + VALIDATION_TIMESTAMP + 1, 100);
        assert!(matches!(
            fixture.admit(&too_far),
            Err(ChainError::TooFarInFuture { .. })
        ));

        let on_boundary = fixture.spending(LAST_BLOCK_TIMESTAMP, 100);
        assert_eq!(fixture.admit(&on_boundary), Ok(()));
        assert_eq!(fixture.pool.transactions(), vec![on_boundary]);
    }

    #[test]
    fn test_duplicate_transaction_is_rejected() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP, 100);

        fixture.admit(&transaction).unwrap();

        assert_eq!(fixture.admit(&transaction), Err(ChainError::Duplicate));
    }

    #[test]
    fn test_double_spend_of_pending_output_is_rejected() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());
        fixture.admit(&fixture.spending(LAST_BLOCK_TIMESTAMP, 100)).unwrap();

        let second = fixture.spending(LAST_BLOCK_TIMESTAMP + 1, 200);

        assert!(matches!(fixture.admit(&second), Err(ChainError::InputNotFound(_))));
    }

    #[test]
    fn test_insufficient_fee_is_rejected() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP, 995);
        assert!(matches!(
            fixture.admit(&transaction),
            Err(ChainError::FeeTooLow { .. })
        ));
    }

    #[tokio::test]
    async fn test_added_transaction_is_relayed_and_rewarded() {
        let (relayed, mut receiver) = mpsc::unbounded_channel();
        let fixture = fixture(
            Some(LAST_BLOCK_TIMESTAMP),
            vec![Arc::new(ChannelSender { relayed })],
        );
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP, 100);

        fixture
            .pool
            .add_transaction(transaction.clone(), "broadcaster:1", "host:1");

        let request: TransactionRequest = bincode::deserialize(&receiver.recv().await.unwrap()).unwrap();
        assert_eq!(request, TransactionRequest::new(transaction, "host:1"));
        assert_eq!(*fixture.senders.incentives.lock(), vec!["broadcaster:1".to_string()]);
    }

    #[test]
    fn test_rejected_transaction_is_not_relayed() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP - 1, 100);

        fixture.pool.add_transaction(transaction, "broadcaster:1", "host:1");

        assert!(fixture.pool.transactions().is_empty());
        assert!(fixture.senders.incentives.lock().is_empty());
    }

    #[test]
    fn test_handle_transaction_request_decodes_and_admits() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP, 100);
        let request = bincode::serialize(&TransactionRequest::new(transaction.clone(), "broadcaster:1")).unwrap();

        fixture.pool.handle_transaction_request(&request);
        fixture.pool.handle_transaction_request(b"garbage");

        assert_eq!(fixture.pool.transactions(), vec![transaction]);
    }

    #[test]
    fn test_validate_commits_pending_transaction_with_reward() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());
        let transaction = fixture.spending(LAST_BLOCK_TIMESTAMP, 100);
        fixture.admit(&transaction).unwrap();

        fixture.pool.validate(LAST_BLOCK_TIMESTAMP + VALIDATION_TIMESTAMP);

        let added = fixture.blocks.added.lock();
        assert_eq!(added.len(), 1);
        let (timestamp, transactions, new_addresses) = &added[0];
        assert_eq!(*timestamp, LAST_BLOCK_TIMESTAMP + VALIDATION_TIMESTAMP);
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0], transaction);
        assert!(transactions[1].has_reward());
        assert_eq!(transactions[1].reward_recipient_address(), Some("validator"));
        assert!(transactions[1].reward_value() > 0);
        assert!(new_addresses.is_empty());
        assert!(fixture.pool.transactions().is_empty());
    }

    #[test]
    fn test_validate_creates_genesis_block() {
        let fixture = fixture(None, Vec::new());

        fixture.pool.validate(0);

        let added = fixture.blocks.added.lock();
        assert_eq!(added.len(), 1);
        let (_, transactions, new_addresses) = &added[0];
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].reward_value(), 1_000);
        assert!(transactions[0].outputs()[0].is_yielding);
        assert_eq!(*new_addresses, vec!["validator".to_string()]);
    }

    #[test]
    fn test_validate_refuses_existing_or_missing_blocks() {
        let fixture = fixture(Some(LAST_BLOCK_TIMESTAMP), Vec::new());

        fixture.pool.validate(LAST_BLOCK_TIMESTAMP);
        fixture.pool.validate(LAST_BLOCK_TIMESTAMP + 2 * VALIDATION_TIMESTAMP);

        assert!(fixture.blocks.added.lock().is_empty());
    }

    #[test]
    fn test_validate_order_ignores_arrival_order() {
        let keypairs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate().unwrap()).collect();
        let fundings: Vec<Transaction> = keypairs
            .iter()
            .map(|keypair| {
                Transaction::new_reward(keypair.address(), false, LAST_BLOCK_TIMESTAMP, 1_000).unwrap()
            })
            .collect();
        let spendings: Vec<Transaction> = keypairs
            .iter()
            .zip(&fundings)
            .map(|(keypair, funding)| {
                Transaction::new_signed(
                    keypair,
                    &[InputInfo::new(0, funding.id())],
                    vec![Output::new("bob", false, 100)],
                    LAST_BLOCK_TIMESTAMP,
                )
                .unwrap()
            })
            .collect();

        let produce_block = |admission_order: Vec<&Transaction>| {
            let blocks = RecordingBlocks::new(Some(LAST_BLOCK_TIMESTAMP), fundings.clone());
            let settings = Arc::new(ProtocolSettings {
                minimal_transaction_fee: 1,
                validation_timestamp: VALIDATION_TIMESTAMP,
                ..ProtocolSettings::default()
            });
            let senders = Arc::new(FakeSenders {
                senders: Vec::new(),
                incentives: Mutex::new(Vec::new()),
            });
            let utxos = Arc::new(UtxosRegistry::new(settings.clone()));
            let pool = TransactionsPool::new(blocks.clone(), settings, senders, utxos, "validator");
            for transaction in admission_order {
                pool.admit(transaction).unwrap();
            }
            pool.validate(LAST_BLOCK_TIMESTAMP + VALIDATION_TIMESTAMP);
            let added = blocks.added.lock();
            added[0].1.clone()
        };

        let first = produce_block(spendings.iter().collect());
        let second = produce_block(spendings.iter().rev().collect());
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }
}
