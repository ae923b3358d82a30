//! Facade crate for osmweave.
//!
//! Re-exports the domain types from [`osmweave_core`] and the decoding
//! pipeline from [`osmweave_data`] so callers can depend on a single crate.
#![forbid(unsafe_code)]

pub use osmweave_core::*;
pub use osmweave_data as data;
