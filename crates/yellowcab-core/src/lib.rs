pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod db;
pub mod error;
pub mod gateway;
pub mod mart;
pub mod period;
pub mod pipeline;
pub mod quality;
pub mod resolver;
pub mod source;
pub mod warehouse;
pub mod zones;

pub use error::{PipelineError, Result};
pub use period::Period;
