//! Conversion records
//!
//! # Modules
//!
//! - [`extractor`]: Event to conversion record extraction
//! - [`timestamp`]: Timestamp policies for the delivery target

pub mod extractor;
pub mod timestamp;

pub use extractor::{gclid_from_event, ConversionExtractor};
pub use timestamp::{parse_timestamp, render_watermark, TimestampPolicy};

use serde::{Deserialize, Serialize};

/// One offline conversion, as delivered to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    /// Action that produced the conversion
    pub action_id: u64,
    /// Google click identifier
    pub gclid: String,
    /// Conversion name from the action map
    pub conversion_name: String,
    /// Conversion time, formatted for the target
    pub timestamp: String,
}
