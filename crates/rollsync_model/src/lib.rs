//! # rollsync Model
//!
//! Data model shared by every rollsync crate.
//!
//! This crate provides:
//! - [`Record`] - a JSON-shaped domain entity with a [`NaturalKey`]
//! - [`SettingsEntry`] - a timestamped settings value
//! - [`Snapshot`] - the complete local dataset exchanged during sync
//! - ISO-8601 timestamp helpers and the [`Clock`] abstraction
//!
//! ## Usage
//!
//! ```
//! use rollsync_model::{NaturalKey, Record};
//! use serde_json::json;
//!
//! let record = Record::from_value(json!({"grNo": "002205", "name": "Asha"})).unwrap();
//! assert_eq!(record.natural_key("grNo"), NaturalKey::parse("2205"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod record;
mod settings;
mod snapshot;
pub mod time;

pub use error::{ModelError, ModelResult};
pub use record::{is_empty_value, NaturalKey, Record};
pub use settings::{next_stamp, Settings, SettingsEntry};
pub use snapshot::{Snapshot, CURRENT_SCHEMA_VERSION};
pub use time::{Clock, ManualClock, SystemClock};

/// JSON value type used for record fields and settings.
pub use serde_json::Value;
