//! A library for converting a Verizon Messages database to SMS Backup XML.
//!
//! Reads the `Message` table of the Verizon Messages SQLite store and
//! produces the XML document format consumed by SMS Backup & Restore on
//! Android. The conversion is a single forward pass: every row becomes one
//! normalized [`MessageRecord`], and the full record sequence is serialized
//! into one document. MMS rows are downgraded to plain-text SMS elements;
//! attachments and multi-part structure are not preserved.
//!
//! # Examples
//!
//! ```no_run
//! use vzm2sms::{ConvertOptions, SmsBackupConverter};
//!
//! // Convert a database file to an XML file
//! SmsBackupConverter::convert_file("Verizon.db", "sms-backup.xml", &ConvertOptions::default())
//!     .unwrap();
//!
//! // Convert to an in-memory string
//! let xml = SmsBackupConverter::convert_to_string("Verizon.db", &ConvertOptions::default())
//!     .unwrap();
//! ```

use std::io;
use thiserror::Error;

pub mod cli;
mod converter;
mod extract;
mod phone;
mod xml;

pub use converter::{ConvertOptions, SmsBackupConverter};
pub use extract::{
    Direction, ExtractOptions, MessageRecord, MessageStore, created_on_to_timestamp_ms,
};
pub use phone::{guess_region, normalize_phone_number};
pub use xml::{BackupStamp, encode_xml_entities, readable_date, serialize_document, verify_document};

/// Error types for extraction and serialization
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to read from the source database: {0}")]
    SourceRead(#[from] rusqlite::Error),
    #[error(
        "Source schema mismatch - no {kind} named {name:?}. Is this a Verizon Messages database?"
    )]
    SchemaMismatch { kind: &'static str, name: &'static str },
    #[error("Text cannot be represented in the output document: {0}")]
    Encoding(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, ConvertError>;

// Message.SourceType values used by the store
pub const SOURCE_TYPE_RECEIVED: i64 = 2;
pub const SOURCE_TYPE_SENT: i64 = 3;

// Message.MessageType values used by the store
pub const MESSAGE_TYPE_SMS: i64 = 1;
pub const MESSAGE_TYPE_MMS: i64 = 2;

// Target schema type codes for the sms element
pub const SMS_TYPE_RECEIVED: &str = "1";
pub const SMS_TYPE_SENT: &str = "2";

// Fixed values for target-schema attributes that have no source counterpart.
// The target parser expects these to be present on every sms element.
pub const ATTR_PROTOCOL: &str = "0";
pub const ATTR_SUBJECT: &str = "null";
pub const ATTR_TOA: &str = "null";
pub const ATTR_SC_TOA: &str = "null";
pub const ATTR_SERVICE_CENTER: &str = "null";
pub const ATTR_STATUS: &str = "-1";
