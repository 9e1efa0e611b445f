//! Request plumbing shared by every provider call: the adaptive concurrency
//! controller and the executor that gates, retries and classifies requests.

pub mod concurrency;
pub mod executor;

pub use concurrency::{AdaptiveConcurrencyController, Adjustment, ControllerSettings, ControllerStats};
pub use executor::RequestExecutor;
