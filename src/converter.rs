use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::extract::{ExtractOptions, MessageStore};
use crate::xml::{BackupStamp, serialize_document, verify_document};
use crate::Result;

/// Conversion settings shared by all entry points.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Phone-number region for normalization (e.g. "US")
    pub region: Option<String>,
    /// Normalized numbers always treated as the account holder's
    pub own_numbers: HashSet<String>,
    /// Stamp the root element with backup_set/backup_date metadata
    pub backup_stamp: bool,
}

/// High-level converter for Verizon Messages to SMS Backup XML
pub struct SmsBackupConverter;

impl SmsBackupConverter {
    /// Convert from an opened store to a writer, returning the number of
    /// messages converted.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vzm2sms::{ConvertOptions, MessageStore, SmsBackupConverter};
    ///
    /// let store = MessageStore::open("Verizon.db").unwrap();
    /// let mut output = Vec::new();
    /// SmsBackupConverter::convert(&store, &ConvertOptions::default(), &mut output).unwrap();
    /// ```
    pub fn convert<W: Write>(
        store: &MessageStore,
        options: &ConvertOptions,
        mut writer: W,
    ) -> Result<usize> {
        let (document, count) = Self::render(store, options)?;
        writer.write_all(document.as_bytes())?;
        writer.flush()?;
        Ok(count)
    }

    /// Convert a database file to an XML file
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vzm2sms::{ConvertOptions, SmsBackupConverter};
    ///
    /// SmsBackupConverter::convert_file("Verizon.db", "sms-backup.xml", &ConvertOptions::default())
    ///     .unwrap();
    /// ```
    pub fn convert_file<P: AsRef<Path>, Q: AsRef<Path>>(
        db_path: P,
        output_path: Q,
        options: &ConvertOptions,
    ) -> Result<usize> {
        let store = MessageStore::open(db_path)?;
        let (document, count) = Self::render(&store, options)?;

        // Create the destination only once the document is complete, so a
        // failed run never leaves a partial file behind.
        let output_file = File::create(output_path)?;
        let mut writer = BufWriter::new(output_file);
        writer.write_all(document.as_bytes())?;
        writer.flush()?;
        info!("wrote {count} messages");
        Ok(count)
    }

    /// Convert a database file to stdout
    pub fn convert_file_to_stdout<P: AsRef<Path>>(
        db_path: P,
        options: &ConvertOptions,
    ) -> Result<usize> {
        let store = MessageStore::open(db_path)?;
        let (document, count) = Self::render(&store, options)?;

        let stdout = io::stdout();
        let mut writer = stdout.lock();
        writer.write_all(document.as_bytes())?;
        writer.flush()?;
        Ok(count)
    }

    /// Convert a database file to an in-memory XML string
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use vzm2sms::{ConvertOptions, SmsBackupConverter};
    ///
    /// let xml = SmsBackupConverter::convert_to_string("Verizon.db", &ConvertOptions::default())
    ///     .unwrap();
    /// println!("{}", xml);
    /// ```
    pub fn convert_to_string<P: AsRef<Path>>(
        db_path: P,
        options: &ConvertOptions,
    ) -> Result<String> {
        let store = MessageStore::open(db_path)?;
        let (document, _) = Self::render(&store, options)?;
        Ok(document)
    }

    /// Extract, serialize and self-check; nothing is written here.
    fn render(store: &MessageStore, options: &ConvertOptions) -> Result<(String, usize)> {
        let extract_options = ExtractOptions {
            region: options.region.clone(),
            own_numbers: options.own_numbers.clone(),
        };
        let records = store.read_records(&extract_options)?;

        let stamp = if options.backup_stamp {
            Some(BackupStamp::now())
        } else {
            None
        };
        let document = serialize_document(&records, stamp.as_ref())?;

        // Read our own output back before it goes anywhere. A document that
        // does not re-parse, or whose count disagrees with its children,
        // must never reach the destination.
        verify_document(&document, records.len())?;
        Ok((document, records.len()))
    }
}
