//! Classification Module
//!
//! Turns source filenames into classification keys and validates those keys
//! against the domain whitelist.

pub mod domain;
pub mod key;

pub use domain::*;
pub use key::*;
