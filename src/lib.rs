pub mod analysis;
pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod market;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod testing; // Mock provider and candle builders
pub mod utils;

pub use config::Config;
pub use error::{ErrorCategory, ScanError};
pub use pipeline::Pipeline;
