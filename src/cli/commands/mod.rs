//! Command implementations.

pub mod describe;
pub mod run;
pub mod states;
pub mod version;
