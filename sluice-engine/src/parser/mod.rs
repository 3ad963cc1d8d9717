// Parser module for pipeline files
// Provides YAML parsing, load-time validation and the shared value model

pub mod error;
pub mod models;
pub mod pipeline;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use models::*;
pub use pipeline::{PipelineParser, PipelineValidator};
