pub mod coherence;
pub mod commons;
pub mod error;
pub mod simulator;
pub mod utils;
