// Thin re-export module: implementation is in `blockchain/core.rs`, split by
// responsibility (chain management, UTXO state, neighbor validation, fork choice).

pub mod core;
pub use core::*;
