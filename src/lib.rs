pub mod error;
pub mod pipeline;

pub use error::{AttributionError, AttributionIncomplete, Result};
