pub mod black_scholes;
pub mod fitting;
pub mod pdf;
mod plotting;
pub mod polars_utils;
mod probability;
pub mod root;
pub mod spline;

pub use plotting::*;
pub use probability::*;
