//! DecayChain - A validator node for a ledger whose value decays over time
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, UTXO registry, neighbor verification and fork choice
//! - [`transaction`] - Transaction types and signatures
//! - [`mempool`] - Transaction pool and block production
//!
//! ## Economics
//! - [`economics`] - UTXO valuation (decay and universal income)
//!
//! ## Cryptography
//! - [`crypto`] - Addresses and signatures (secp256k1)
//!
//! ## Networking & Registration
//! - [`sync`] - Neighbors and outbound senders
//! - [`addressbook`] - Registered addresses, backed by a proof-of-humanity oracle
//!
//! ## Node
//! - [`node`] - Tick engines driving validation, verification and synchronisation
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Economics
// ============================================================================
pub mod economics;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Networking & Registration
// ============================================================================
pub mod addressbook;
pub mod sync;

// ============================================================================
// Node
// ============================================================================
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ChainError, Result};
