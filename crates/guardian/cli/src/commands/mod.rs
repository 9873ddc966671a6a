//! CLI command implementations

pub mod daemon;
pub mod ledger;
pub mod manifest;
pub mod overrides;
