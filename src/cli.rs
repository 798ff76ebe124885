use std::collections::HashSet;
use std::path::Path;

use clap::{Arg, ArgAction, Command};
use tracing::warn;

use crate::phone::{guess_region, normalize_phone_number};
use crate::{ConvertError, ConvertOptions, Result, SmsBackupConverter};

pub struct Cli;

impl Cli {
    pub fn build_command() -> Command {
        Command::new("vzm2sms")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Converts a Verizon Messages database to SMS Backup XML")
            .long_about(
                "Converts the Verizon Messages SQLite database to the XML format used by \
                 SMS Backup & Restore on Android.\n\nMMS messages are downgraded to \
                 plain-text SMS records; attachments are not preserved. Output can be '-' \
                 to use stdout.",
            )
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .help("Output file path (use '-' for stdout)")
                    .default_value("-"),
            )
            .arg(
                Arg::new("region")
                    .short('r')
                    .long("region")
                    .help("Region of phone numbers, for normalization (default from locale)"),
            )
            .arg(
                Arg::new("sender")
                    .short('s')
                    .long("sender")
                    .help("Phone number to always treat as the sender")
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("backup-stamp")
                    .long("backup-stamp")
                    .help("Stamp the output with backup_set/backup_date root attributes")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .help("Decrease verbosity (less detailed output)")
                    .action(ArgAction::Count),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Increase verbosity (more detailed output)")
                    .action(ArgAction::Count),
            )
            .arg(
                Arg::new("database")
                    .help("Verizon Messages SQLite database file")
                    .required(true)
                    .index(1),
            )
    }

    pub fn run() -> Result<()> {
        let matches = Self::build_command().get_matches();
        Self::run_with_matches(matches)
    }

    pub fn run_with_matches(matches: clap::ArgMatches) -> Result<()> {
        let db_path = matches.get_one::<String>("database").unwrap();
        let output_path = matches.get_one::<String>("output").unwrap();

        // SQLite reports a missing file in its own terms; check first.
        if !Path::new(db_path).is_file() {
            return Err(ConvertError::Parse(format!(
                "database file not found: {db_path}"
            )));
        }

        let region = match matches.get_one::<String>("region") {
            Some(region) => Some(region.to_ascii_uppercase()),
            None => {
                let guessed = guess_region();
                if guessed.is_none() {
                    warn!(
                        "Unable to guess phone number region. \
                         Numbers must start with '+' then country code."
                    );
                }
                guessed
            }
        };

        let own_numbers: HashSet<String> = matches
            .get_many::<String>("sender")
            .unwrap_or_default()
            .map(|number| normalize_phone_number(number, region.as_deref()))
            .collect();

        let options = ConvertOptions {
            region,
            own_numbers,
            backup_stamp: matches.get_flag("backup-stamp"),
        };

        match output_path.as_str() {
            "-" => SmsBackupConverter::convert_file_to_stdout(db_path, &options)?,
            path => SmsBackupConverter::convert_file(db_path, path, &options)?,
        };
        Ok(())
    }

    /// Log filter directive derived from the -q/-v counts (default "info").
    pub fn log_filter(matches: &clap::ArgMatches) -> &'static str {
        let verbosity =
            matches.get_count("verbose") as i32 - matches.get_count("quiet") as i32;
        match verbosity {
            i32::MIN..=-2 => "error",
            -1 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        let cmd = Cli::build_command();
        assert_eq!(cmd.get_name(), "vzm2sms");
    }

    #[test]
    fn test_database_argument_is_required() {
        let result = Cli::build_command().try_get_matches_from(vec!["vzm2sms"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_database_file_error() {
        let matches = Cli::build_command()
            .try_get_matches_from(vec!["vzm2sms", "/no/such/Verizon.db"])
            .unwrap();

        let result = Cli::run_with_matches(matches);
        assert!(result.is_err());

        if let Err(ConvertError::Parse(msg)) = result {
            assert!(msg.contains("database file not found"));
        } else {
            panic!("Expected Parse error");
        }
    }

    #[test]
    fn test_repeatable_sender_argument() {
        let matches = Cli::build_command()
            .try_get_matches_from(vec![
                "vzm2sms", "-s", "5551234567", "-s", "5559999999", "Verizon.db",
            ])
            .unwrap();
        let senders: Vec<&String> = matches.get_many::<String>("sender").unwrap().collect();
        assert_eq!(senders.len(), 2);
    }

    #[test]
    fn test_log_filter_from_verbosity() {
        let filter = |args: Vec<&str>| {
            let matches = Cli::build_command().try_get_matches_from(args).unwrap();
            Cli::log_filter(&matches)
        };
        assert_eq!(filter(vec!["vzm2sms", "db"]), "info");
        assert_eq!(filter(vec!["vzm2sms", "-v", "db"]), "debug");
        assert_eq!(filter(vec!["vzm2sms", "-vv", "db"]), "trace");
        assert_eq!(filter(vec!["vzm2sms", "-q", "db"]), "warn");
        assert_eq!(filter(vec!["vzm2sms", "-qq", "db"]), "error");
        assert_eq!(filter(vec!["vzm2sms", "-v", "-q", "db"]), "info");
    }
}
