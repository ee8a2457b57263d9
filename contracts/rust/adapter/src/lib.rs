//! Cross-domain (between Solidity and Rust) helpers for the vault protocol contracts.

pub mod evm;
pub mod sol_types;
