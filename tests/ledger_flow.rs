//! End-to-end flow: a validator produces blocks out of its transactions pool
//! and the ledger follows.

mod common;

use common::*;
use decaychain::addressbook::AddressesManager;
use decaychain::blockchain::{BlocksManager, UtxosManager};
use decaychain::crypto::KeyPair;
use decaychain::mempool::{TransactionsManager, TransactionsPool};
use decaychain::transaction::{InputInfo, Output, Transaction};
use std::sync::Arc;

const VALIDATION_TIMESTAMP: i64 = 60_000_000_000;

fn validator_pool(chain: &TestChain, validator: &KeyPair) -> TransactionsPool {
    TransactionsPool::new(
        chain.blockchain.clone(),
        chain.settings.clone(),
        Arc::new(StaticSenders(vec![])),
        chain.utxos.clone(),
        validator.address(),
    )
}

#[test]
fn test_genesis_block_credits_validator() -> Result<(), Box<dyn std::error::Error>> {
    let validator = KeyPair::generate()?;
    let chain = test_chain(settings(VALIDATION_TIMESTAMP), vec![]);
    let pool = validator_pool(&chain, &validator);

    pool.validate(0);
    assert_eq!(chain.blockchain.len(), 1);
    // Effects of a block only land once it has a successor.
    assert!(chain.utxos.utxos(&validator.address()).is_empty());

    pool.validate(VALIDATION_TIMESTAMP);
    assert_eq!(chain.blockchain.len(), 2);
    let utxos = chain.utxos.utxos(&validator.address());
    assert_eq!(utxos.len(), 1);
    assert!(utxos[0].output.is_yielding);
    assert_eq!(utxos[0].output.initial_value, chain.settings.genesis_amount);
    assert!(chain.addresses.is_registered(&validator.address()));
    Ok(())
}

#[test]
fn test_spent_genesis_reaches_recipient() -> Result<(), Box<dyn std::error::Error>> {
    let validator = KeyPair::generate()?;
    let chain = test_chain(settings(VALIDATION_TIMESTAMP), vec![]);
    let pool = validator_pool(&chain, &validator);
    pool.validate(0);
    pool.validate(VALIDATION_TIMESTAMP);

    let genesis_reward = chain.blockchain.blocks(0)[0].transactions[0].clone();
    let transaction = Transaction::new_signed(
        &validator,
        &[InputInfo::new(0, genesis_reward.id())],
        vec![Output::new("recipient", false, 1000)],
        VALIDATION_TIMESTAMP,
    )?;
    pool.add_transaction(transaction.clone(), "neighbor", "host");
    assert_eq!(pool.transactions(), vec![transaction.clone()]);

    pool.validate(2 * VALIDATION_TIMESTAMP);
    assert!(pool.transactions().is_empty());
    let last_block_transactions = chain.blockchain.last_block_transactions();
    assert_eq!(last_block_transactions.len(), 2);
    assert_eq!(last_block_transactions[0], transaction);
    let fee = last_block_transactions[1].reward_value();
    assert!(fee > 0);

    pool.validate(3 * VALIDATION_TIMESTAMP);
    assert_eq!(chain.blockchain.len(), 4);
    let received = chain.utxos.utxos("recipient");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].output.initial_value, 1000);
    assert_eq!(received[0].creation_timestamp, 2 * VALIDATION_TIMESTAMP);
    let validator_utxos = chain.utxos.utxos(&validator.address());
    assert_eq!(validator_utxos.len(), 1);
    assert!(!validator_utxos[0].output.is_yielding);
    assert_eq!(validator_utxos[0].output.initial_value, fee);
    Ok(())
}

#[test]
fn test_double_spend_is_refused_by_the_pool() -> Result<(), Box<dyn std::error::Error>> {
    let validator = KeyPair::generate()?;
    let chain = test_chain(settings(VALIDATION_TIMESTAMP), vec![]);
    let pool = validator_pool(&chain, &validator);
    pool.validate(0);
    pool.validate(VALIDATION_TIMESTAMP);

    let genesis_reward = chain.blockchain.blocks(0)[0].transactions[0].clone();
    let spent = [InputInfo::new(0, genesis_reward.id())];
    let first = Transaction::new_signed(
        &validator,
        &spent,
        vec![Output::new("first", false, 1000)],
        VALIDATION_TIMESTAMP,
    )?;
    let second = Transaction::new_signed(
        &validator,
        &spent,
        vec![Output::new("second", false, 1000)],
        VALIDATION_TIMESTAMP,
    )?;
    pool.add_transaction(first.clone(), "neighbor", "host");
    pool.add_transaction(second, "neighbor", "host");

    assert_eq!(pool.transactions(), vec![first]);
    Ok(())
}

#[tokio::test]
async fn test_validated_blocks_survive_update_without_neighbors() -> Result<(), Box<dyn std::error::Error>> {
    let validator = KeyPair::generate()?;
    let chain = test_chain(settings(VALIDATION_TIMESTAMP), vec![]);
    let pool = validator_pool(&chain, &validator);
    for height in 0..4 {
        pool.validate(height * VALIDATION_TIMESTAMP);
    }
    let blocks = chain.blockchain.blocks(0);

    chain.blockchain.update(4 * VALIDATION_TIMESTAMP).await;

    assert_eq!(chain.blockchain.blocks(0), blocks);
    assert_eq!(chain.blockchain.first_block_timestamp(), Some(0));
    Ok(())
}
