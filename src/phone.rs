//! Best-effort phone number normalization.
//!
//! The store keeps addresses in whatever shape the app received them, so
//! the same correspondent can appear as "555-123-4567" in one row and
//! "+15551234567" in another. Normalizing toward E.164 keeps the exported
//! addresses consistent and lets the own-number override match reliably.

use std::env;

use tracing::debug;

/// Normalizes a phone number toward E.164 format.
///
/// Strips formatting characters, prepends the country code to bare
/// 10-digit numbers when the region is US, and prefixes '+'. Empty input
/// stays empty so records with a missing address survive unchanged.
pub fn normalize_phone_number(raw: &str, region: Option<&str>) -> String {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    if digits.len() == 10 && region.is_some_and(|r| r.eq_ignore_ascii_case("US")) {
        digits.insert(0, '1');
    }
    format!("+{digits}")
}

/// Guess the phone-number region from the process locale.
///
/// Checks LC_ALL, LC_MESSAGES and LANG in that order; "en_US.UTF-8" gives
/// "US". Returns None when no region can be determined (e.g. the C locale).
pub fn guess_region() -> Option<String> {
    let locale = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|var| env::var(var).ok().filter(|value| !value.is_empty()))?;
    let region = parse_locale_region(&locale);
    if let Some(region) = &region {
        debug!("Assuming phone region is {region}");
    }
    region
}

fn parse_locale_region(locale: &str) -> Option<String> {
    let tail = locale.split_once('_')?.1;
    let region: String = tail
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if region.is_empty() {
        None
    } else {
        Some(region.to_ascii_uppercase())
    }
}
