pub mod flags;
pub mod metrics;
pub mod scorecard;

pub use flags::AnomalyFlag;
pub use scorecard::{QuantEngine, QuantInputs};
