pub mod adapters;
pub mod config;
pub mod core;

pub use crate::core::diff_engine::compute_diff;
pub use crate::core::interpret::interpret;
