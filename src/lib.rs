pub mod bridge;
pub mod config;
pub mod error;
pub mod pipeline;

pub mod document;
pub mod kafka;
pub mod queue;
pub mod record;

pub use bridge::Bridge;
pub use config::{Config, PipelineConfig};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Outcome, Pipeline, PipelineStats, Stage};
