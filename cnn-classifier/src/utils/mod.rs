//! Utility functions for artifact persistence and timestamps.

pub mod common;

pub use common::{
    create_directories, decode_image_base64, encode_image_base64, get_size, load_bin,
    load_json, read_yaml, save_bin, save_json, write_yaml,
};

/// Returns the current UTC time as an RFC3339 string.
#[must_use]
pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
