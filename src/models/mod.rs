//! Data models for option chains and recovered densities
//!
//! This module contains data structures for representing end-of-day option
//! quotes, per-expiry chains, risk-neutral densities, and analysis results.

mod analysis;
mod chain;
mod density;
mod option;

pub use analysis::*;
pub use chain::*;
pub use density::*;
pub use option::*;
