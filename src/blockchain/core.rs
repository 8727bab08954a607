// core.rs splits the ledger responsibilities into submodules.
pub mod chain;
pub mod fork_choice;
pub mod state;
pub mod validation;

pub use chain::*;
pub use fork_choice::Candidate;
pub use state::*;
pub use validation::*;
