//! SMS Backup XML document assembly.
//!
//! The whole document is built in memory and re-parsed once before anything
//! touches the destination, so a failed run can never leave a truncated or
//! malformed file behind. Attribute order is fixed for diffability.

use std::io::Write;

use chrono::{Local, LocalResult, TimeZone, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use uuid::Uuid;

use crate::extract::{Direction, MessageRecord};
use crate::{
    ATTR_PROTOCOL, ATTR_SC_TOA, ATTR_SERVICE_CENTER, ATTR_STATUS, ATTR_SUBJECT, ATTR_TOA,
    ConvertError, Result, SMS_TYPE_RECEIVED, SMS_TYPE_SENT,
};

/// XML entity encoder for safe XML output
pub fn encode_xml_entities(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Backup metadata stamped onto the root element, matching what the target
/// app writes in its own backup files.
#[derive(Debug, Clone)]
pub struct BackupStamp {
    pub backup_set: Uuid,
    pub backup_date_ms: i64,
}

impl BackupStamp {
    /// Stamp for a backup taken now.
    pub fn now() -> Self {
        Self {
            backup_set: Uuid::new_v4(),
            backup_date_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Serialize the full record sequence into one SMS Backup XML document.
///
/// The count attribute is computed from the realized sequence, so it always
/// matches the number of child elements.
pub fn serialize_document(records: &[MessageRecord], stamp: Option<&BackupStamp>) -> Result<String> {
    let mut output = Vec::new();
    write_document(records, stamp, &mut output)?;
    String::from_utf8(output)
        .map_err(|_| ConvertError::Parse("Invalid UTF-8 in output".to_string()))
}

/// Serialize the record sequence into a writer.
///
/// Prefer [`serialize_document`] when the all-or-nothing output contract
/// matters; this writes incrementally into whatever it is handed.
pub fn write_document<W: Write>(
    records: &[MessageRecord],
    stamp: Option<&BackupStamp>,
    output: &mut W,
) -> Result<()> {
    // Prelude matching SMS Backup & Restore's own files
    write!(
        output,
        "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>\n"
    )?;
    if let Some(stamp) = stamp {
        write!(
            output,
            "<!--File Created By {} v{} on {}-->\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            readable_date(stamp.backup_date_ms)
        )?;
    }
    write!(
        output,
        "<?xml-stylesheet type=\"text/xsl\" href=\"sms.xsl\"?>\n"
    )?;

    match stamp {
        Some(stamp) => write!(
            output,
            "<smses count=\"{}\" backup_set=\"{}\" backup_date=\"{}\"",
            records.len(),
            stamp.backup_set,
            stamp.backup_date_ms
        )?,
        None => write!(output, "<smses count=\"{}\"", records.len())?,
    }
    if records.is_empty() {
        write!(output, " />\n")?;
        return Ok(());
    }
    write!(output, ">\n")?;

    for record in records {
        write_sms_element(record, output)?;
    }

    write!(output, "</smses>\n")?;
    Ok(())
}

fn write_sms_element<W: Write>(record: &MessageRecord, output: &mut W) -> Result<()> {
    check_encodable(&record.address, "address")?;
    check_encodable(&record.body, "body")?;

    let sms_type = match record.direction {
        Direction::Inbox => SMS_TYPE_RECEIVED,
        Direction::Sent => SMS_TYPE_SENT,
    };
    write!(
        output,
        "  <sms protocol=\"{protocol}\" address=\"{address}\" date=\"{date}\" \
         type=\"{sms_type}\" subject=\"{subject}\" body=\"{body}\" toa=\"{toa}\" \
         sc_toa=\"{sc_toa}\" service_center=\"{service_center}\" read=\"{read}\" \
         status=\"{status}\" locked=\"{locked}\" date_sent=\"{date}\" \
         readable_date=\"{readable_date}\" />\n",
        protocol = ATTR_PROTOCOL,
        address = encode_xml_entities(&record.address),
        date = record.timestamp_ms,
        subject = ATTR_SUBJECT,
        body = encode_xml_entities(&record.body),
        toa = ATTR_TOA,
        sc_toa = ATTR_SC_TOA,
        service_center = ATTR_SERVICE_CENTER,
        read = flag(record.is_read),
        status = ATTR_STATUS,
        locked = flag(record.is_locked),
        readable_date = readable_date(record.timestamp_ms),
    )?;
    Ok(())
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// Local-time rendering of a timestamp in the target app's format,
/// e.g. "Nov 14, 2023 10:13:20 PM" (no zero-padded day or hour).
pub fn readable_date(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
            dt.format("%b %-d, %Y %-I:%M:%S %p").to_string()
        }
        LocalResult::None => String::new(),
    }
}

/// Chars permitted by the XML 1.0 Char production. Everything else is
/// unrepresentable even as a character reference.
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

fn check_encodable(text: &str, what: &str) -> Result<()> {
    if let Some(c) = text.chars().find(|&c| !is_xml_char(c)) {
        return Err(ConvertError::Encoding(format!(
            "{what} contains U+{:04X}, which cannot appear in an XML document",
            c as u32
        )));
    }
    Ok(())
}

/// Re-parse an assembled document, checking that it is well-formed and that
/// the root count attribute matches the number of sms elements present.
pub fn verify_document(xml: &str, expected: usize) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut count_attr: Option<usize> = None;
    let mut sms_elements = 0usize;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ConvertError::Parse(format!("output failed to re-parse: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let element_name = e.name();
                match element_name.as_ref() {
                    b"smses" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"count" {
                                count_attr = String::from_utf8_lossy(&attr.value).parse().ok();
                            }
                        }
                    }
                    b"sms" => sms_elements += 1,
                    other => {
                        return Err(ConvertError::Parse(format!(
                            "unexpected element {:?} in output",
                            String::from_utf8_lossy(other)
                        )));
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if count_attr != Some(expected) {
        return Err(ConvertError::Parse(format!(
            "root count attribute {count_attr:?} does not match {expected} records"
        )));
    }
    if sms_elements != expected {
        return Err(ConvertError::Parse(format!(
            "output contains {sms_elements} sms elements, expected {expected}"
        )));
    }
    Ok(())
}
