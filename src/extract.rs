//! Record extraction from the Verizon Messages store.
//!
//! The `Message` table is read once, in the store's native row order, and
//! every row becomes one [`MessageRecord`]. The expected columns are
//! validated up front so a schema mismatch surfaces as a single error at
//! the store boundary instead of a mid-run surprise that could silently
//! lose messages.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::phone::normalize_phone_number;
use crate::{ConvertError, MESSAGE_TYPE_MMS, Result, SOURCE_TYPE_RECEIVED, SOURCE_TYPE_SENT};

const MESSAGE_TABLE: &str = "Message";

// Columns the row mapping depends on. Anything else the store keeps in the
// Message table is ignored.
const MESSAGE_COLUMNS: [&str; 8] = [
    "Sender",
    "ToAddress",
    "SourceType",
    "MessageType",
    "CreatedOn",
    "Body",
    "IsRead",
    "IsLocked",
];

// CreatedOn is stored as 100 ns ticks since midnight 0000-01-01.
const CREATED_ON_TICKS_PER_MS: i64 = 10_000;
const CREATED_ON_EPOCH_OFFSET_MS: i64 = 62_167_219_200_000;

/// Message direction relative to the account holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the remote party
    Inbox,
    /// Sent by the account holder
    Sent,
}

/// A single message row, normalized for serialization.
///
/// Constructed once per source row and never mutated afterwards. An MMS row
/// still produces a record (with `is_multimedia` set); only the text portion
/// of its body survives the conversion.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Remote party number: the recipient for sent messages, the sender for
    /// received ones. Empty when the source field was null/empty.
    pub address: String,
    /// Epoch milliseconds, decoded from CreatedOn
    pub timestamp_ms: i64,
    pub direction: Direction,
    /// Plain-text content; never null, empty when the source body was NULL
    pub body: String,
    /// True if the source row was an MMS message
    pub is_multimedia: bool,
    pub is_read: bool,
    pub is_locked: bool,
}

/// Extraction settings
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Phone-number region for normalization (e.g. "US")
    pub region: Option<String>,
    /// Normalized numbers whose messages are always classified as sent,
    /// regardless of SourceType
    pub own_numbers: HashSet<String>,
}

/// Read-only handle to a Verizon Messages database.
///
/// Opening validates that the `Message` table and every column the row
/// mapping reads are present.
#[derive(Debug)]
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Open a database file read-only and validate its schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Wrap an already-opened connection, validating the expected schema.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.check_schema()?;
        Ok(store)
    }

    fn check_schema(&self) -> Result<()> {
        if !self.table_exists(MESSAGE_TABLE)? {
            return Err(ConvertError::SchemaMismatch {
                kind: "table",
                name: MESSAGE_TABLE,
            });
        }
        for column in MESSAGE_COLUMNS {
            if !self.column_exists(MESSAGE_TABLE, column)? {
                return Err(ConvertError::SchemaMismatch {
                    kind: "column",
                    name: column,
                });
            }
        }
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name.eq_ignore_ascii_case(column) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read every message row in the store's native row order.
    ///
    /// The sequence restarts from scratch on each call; there is no
    /// mid-stream resumption. No row is dropped: unclassifiable directions
    /// fall back to inbox and missing addresses stay empty.
    pub fn read_records(&self, options: &ExtractOptions) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT Sender, ToAddress, SourceType, MessageType, CreatedOn, Body, IsRead, IsLocked
             FROM Message",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(map_row(row, options)?);
        }
        debug!("extracted {} message records", records.len());
        Ok(records)
    }
}

fn map_row(row: &Row<'_>, options: &ExtractOptions) -> Result<MessageRecord> {
    let sender: Option<String> = row.get(0)?;
    let to_address: Option<String> = row.get(1)?;
    let source_type: Option<i64> = row.get(2)?;
    let message_type: Option<i64> = row.get(3)?;
    let created_on: Option<i64> = row.get(4)?;
    let body = text_or_empty(row.get_ref(5)?)?;
    let is_read: Option<i64> = row.get(6)?;
    let is_locked: Option<i64> = row.get(7)?;

    let region = options.region.as_deref();
    let sender = normalize_phone_number(sender.as_deref().unwrap_or(""), region);
    let direction = classify_direction(source_type, &sender, &options.own_numbers);
    let address = match direction {
        Direction::Sent => normalize_phone_number(to_address.as_deref().unwrap_or(""), region),
        Direction::Inbox => sender,
    };

    let timestamp_ms = match created_on {
        Some(ticks) => {
            let ms = created_on_to_timestamp_ms(ticks);
            if ms < 0 {
                warn!("CreatedOn value {ticks} predates the epoch, clamping to 0");
            }
            ms.max(0)
        }
        None => 0,
    };

    Ok(MessageRecord {
        address,
        timestamp_ms,
        direction,
        body,
        is_multimedia: message_type == Some(MESSAGE_TYPE_MMS),
        is_read: is_read.unwrap_or(0) != 0,
        is_locked: is_locked.unwrap_or(0) != 0,
    })
}

/// Classify a row's direction from its SourceType.
///
/// The self-origin value maps to sent, as does any row whose sender is one
/// of the caller's own numbers. Every other value maps to inbox; an
/// unrecognized value is logged but never drops the message.
fn classify_direction(
    source_type: Option<i64>,
    sender: &str,
    own_numbers: &HashSet<String>,
) -> Direction {
    if source_type == Some(SOURCE_TYPE_SENT) || (!sender.is_empty() && own_numbers.contains(sender))
    {
        return Direction::Sent;
    }
    if source_type != Some(SOURCE_TYPE_RECEIVED) {
        warn!("Unrecognized SourceType {source_type:?}, treating as received");
    }
    Direction::Inbox
}

/// Converts a Message CreatedOn column value to an epoch-millisecond
/// timestamp.
///
/// CreatedOn is the number of 100 nanosecond increments since midnight
/// 0000-01-01; the output is the number of millisecond increments since
/// midnight 1970-01-01.
pub fn created_on_to_timestamp_ms(created_on: i64) -> i64 {
    created_on / CREATED_ON_TICKS_PER_MS - CREATED_ON_EPOCH_OFFSET_MS
}

/// Text column access that tolerates SQLite's dynamic typing.
///
/// NULL becomes the empty string so downstream serialization never has to
/// special-case absence. Bytes that are not valid UTF-8 cannot be carried
/// into the UTF-8 output document and fail the run.
fn text_or_empty(value: ValueRef<'_>) -> Result<String> {
    match value {
        ValueRef::Null => Ok(String::new()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
            .map(|text| text.to_owned())
            .map_err(|err| ConvertError::Encoding(format!("message body is not valid UTF-8: {err}"))),
        ValueRef::Integer(value) => Ok(value.to_string()),
        ValueRef::Real(value) => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn message_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Message (
                MessageId INTEGER PRIMARY KEY AUTOINCREMENT,
                Sender TEXT,
                ToAddress TEXT,
                SourceType INTEGER,
                MessageType INTEGER,
                CreatedOn INTEGER,
                Body TEXT,
                IsRead INTEGER,
                IsLocked INTEGER
            );",
        )
        .unwrap();
        conn
    }

    fn ms_to_created_on(timestamp_ms: i64) -> i64 {
        (timestamp_ms + CREATED_ON_EPOCH_OFFSET_MS) * CREATED_ON_TICKS_PER_MS
    }

    fn insert_message(
        conn: &Connection,
        sender: Option<&str>,
        to_address: Option<&str>,
        source_type: i64,
        message_type: i64,
        timestamp_ms: i64,
        body: Option<&str>,
    ) {
        conn.execute(
            "INSERT INTO Message
                 (Sender, ToAddress, SourceType, MessageType, CreatedOn, Body, IsRead, IsLocked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 0)",
            params![
                sender,
                to_address,
                source_type,
                message_type,
                ms_to_created_on(timestamp_ms),
                body
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_received_row_uses_sender_address() {
        let conn = message_db();
        insert_message(
            &conn,
            Some("5551234567"),
            Some("5559999999"),
            SOURCE_TYPE_RECEIVED,
            1,
            1_700_000_000_000,
            Some("hello"),
        );
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Inbox);
        assert_eq!(records[0].address, "+5551234567");
        assert_eq!(records[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(records[0].body, "hello");
    }

    #[test]
    fn test_sent_row_uses_recipient_address() {
        let conn = message_db();
        insert_message(
            &conn,
            Some("5551234567"),
            Some("5559999999"),
            SOURCE_TYPE_SENT,
            1,
            1_700_000_000_000,
            Some("hi"),
        );
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert_eq!(records[0].direction, Direction::Sent);
        assert_eq!(records[0].address, "+5559999999");
    }

    #[test]
    fn test_unrecognized_source_type_falls_back_to_inbox() {
        let conn = message_db();
        insert_message(&conn, Some("555"), None, 99, 1, 0, Some("odd"));
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Inbox);
    }

    #[test]
    fn test_own_number_forces_sent() {
        let conn = message_db();
        insert_message(
            &conn,
            Some("5551234567"),
            Some("5559999999"),
            SOURCE_TYPE_RECEIVED,
            1,
            0,
            Some("actually mine"),
        );
        let store = MessageStore::from_connection(conn).unwrap();

        let options = ExtractOptions {
            own_numbers: HashSet::from(["+5551234567".to_string()]),
            ..ExtractOptions::default()
        };
        let records = store.read_records(&options).unwrap();
        assert_eq!(records[0].direction, Direction::Sent);
        assert_eq!(records[0].address, "+5559999999");
    }

    #[test]
    fn test_null_body_becomes_empty_string() {
        let conn = message_db();
        insert_message(&conn, Some("555"), None, SOURCE_TYPE_RECEIVED, 1, 0, None);
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert_eq!(records[0].body, "");
    }

    #[test]
    fn test_null_sender_still_emits_record_with_empty_address() {
        let conn = message_db();
        insert_message(&conn, None, None, SOURCE_TYPE_RECEIVED, 1, 0, Some("who?"));
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, "");
    }

    #[test]
    fn test_mms_row_is_flagged_multimedia() {
        let conn = message_db();
        insert_message(
            &conn,
            Some("555"),
            None,
            SOURCE_TYPE_RECEIVED,
            MESSAGE_TYPE_MMS,
            0,
            Some("picture caption"),
        );
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert!(records[0].is_multimedia);
        assert_eq!(records[0].body, "picture caption");
    }

    #[test]
    fn test_rows_preserve_insertion_order() {
        let conn = message_db();
        for body in ["first", "second", "third"] {
            insert_message(&conn, Some("555"), None, SOURCE_TYPE_RECEIVED, 1, 0, Some(body));
        }
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        let bodies: Vec<&str> = records.iter().map(|r| r.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[test]
    fn test_missing_message_table_is_schema_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE NotMessages (id INTEGER);")
            .unwrap();

        match MessageStore::from_connection(conn) {
            Err(ConvertError::SchemaMismatch { kind: "table", name }) => {
                assert_eq!(name, "Message");
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        // Body column missing
        conn.execute_batch(
            "CREATE TABLE Message (
                Sender TEXT, ToAddress TEXT, SourceType INTEGER, MessageType INTEGER,
                CreatedOn INTEGER, IsRead INTEGER, IsLocked INTEGER
            );",
        )
        .unwrap();

        match MessageStore::from_connection(conn) {
            Err(ConvertError::SchemaMismatch { kind: "column", name }) => {
                assert_eq!(name, "Body");
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_created_on_epoch_conversion() {
        // 1970-01-01 in CreatedOn ticks
        assert_eq!(created_on_to_timestamp_ms(621_672_192_000_000_000), 0);
        assert_eq!(
            created_on_to_timestamp_ms(ms_to_created_on(1_700_000_000_000)),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_pre_epoch_timestamp_clamps_to_zero() {
        let conn = message_db();
        conn.execute(
            "INSERT INTO Message
                 (Sender, ToAddress, SourceType, MessageType, CreatedOn, Body, IsRead, IsLocked)
             VALUES ('555', NULL, 2, 1, 0, 'old', 0, 0)",
            [],
        )
        .unwrap();
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert_eq!(records[0].timestamp_ms, 0);
    }

    #[test]
    fn test_read_flag_mapping() {
        let conn = message_db();
        conn.execute(
            "INSERT INTO Message
                 (Sender, ToAddress, SourceType, MessageType, CreatedOn, Body, IsRead, IsLocked)
             VALUES ('555', NULL, 2, 1, 0, 'x', NULL, 1)",
            [],
        )
        .unwrap();
        let store = MessageStore::from_connection(conn).unwrap();

        let records = store.read_records(&ExtractOptions::default()).unwrap();
        assert!(!records[0].is_read);
        assert!(records[0].is_locked);
    }
}
