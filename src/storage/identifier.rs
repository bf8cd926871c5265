//! Timestamp-derived revision identifiers.
//!
//! An identifier is the UTC moment of a change formatted as
//! `YYYY-MM-DD_HH-mm-ss`. The format is fixed width, so comparing two
//! identifiers as plain strings gives the same answer as comparing the
//! moments they encode.

use crate::core::{HistoryError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// `chrono` format string of a revision identifier.
pub const ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Upper bound on collision retries, one day's worth of seconds.
pub const MAX_ID_ATTEMPTS: u32 = 86_400;

lazy_static! {
    static ref ID_PATTERN: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}$").unwrap();
}

/// Sortable key naming one revision inside an entity's log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId(String);

impl RevisionId {
    /// Parses an identifier, rejecting anything that does not have the fixed
    /// identifier shape.
    pub fn parse(text: &str) -> Result<Self> {
        if Self::is_well_formed(text) {
            Ok(Self(text.to_string()))
        } else {
            Err(HistoryError::Corruption(format!(
                "'{}' is not a revision identifier",
                text
            )))
        }
    }

    /// Checks only the textual shape; the date itself may still be invalid.
    #[inline]
    pub fn is_well_formed(text: &str) -> bool {
        ID_PATTERN.is_match(text)
    }

    /// Formats a moment, dropping sub-second precision.
    pub fn from_timestamp(at: &DateTime<Utc>) -> Self {
        Self(at.format(ID_FORMAT).to_string())
    }

    /// Parses the identifier back into the moment it encodes.
    ///
    /// Fails for well-formed but impossible dates such as month 13, which
    /// only appear when a directory was created by hand.
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, ID_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| {
                HistoryError::Corruption(format!(
                    "Revision identifier '{}' is not a valid date: {}",
                    self.0, e
                ))
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Allocates identifiers that are unique within one entity's log and sort
/// after every identifier already in it.
pub struct RevisionIdentifier;

impl RevisionIdentifier {
    /// Returns the identifier for `now`, or for one second past the newest
    /// entry of `existing` when `now` is not later than it. Further collisions
    /// move the candidate forward one second at a time.
    ///
    /// Entries whose names are not valid dates do not take part in ordering.
    pub fn generate(now: DateTime<Utc>, existing: &BTreeSet<RevisionId>) -> Result<RevisionId> {
        let mut candidate_at = now.with_nanosecond(0).unwrap_or(now);

        if let Some(newest) = existing.iter().rev().find_map(|id| id.timestamp().ok()) {
            let floor = newest.checked_add_signed(Duration::seconds(1)).ok_or_else(|| {
                HistoryError::IdentifierExhausted(format!(
                    "timestamp overflow after {}",
                    RevisionId::from_timestamp(&newest)
                ))
            })?;
            candidate_at = candidate_at.max(floor);
        }

        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = RevisionId::from_timestamp(&candidate_at);
            if !existing.contains(&candidate) {
                return Ok(candidate);
            }
            candidate_at = candidate_at
                .checked_add_signed(Duration::seconds(1))
                .ok_or_else(|| {
                    HistoryError::IdentifierExhausted(format!(
                        "timestamp overflow after {}",
                        candidate
                    ))
                })?;
        }

        Err(HistoryError::IdentifierExhausted(format!(
            "no free identifier within {} seconds of {}",
            MAX_ID_ATTEMPTS,
            RevisionId::from_timestamp(&now)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 11, 21, h, m, s).unwrap()
    }

    #[test]
    fn test_format_is_fixed_width() {
        let id = RevisionId::from_timestamp(&at(3, 4, 5));
        assert_eq!(id.as_str(), "2012-11-21_03-04-05");

        let epoch = RevisionId::from_timestamp(&Utc.timestamp_opt(0, 0).unwrap());
        assert!(epoch.as_str().starts_with("19"));
        assert!(epoch.as_str().ends_with("00-00"));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let moment = at(23, 59, 58);
        let id = RevisionId::from_timestamp(&moment);
        assert_eq!(id.timestamp().unwrap(), moment);
    }

    #[test]
    fn test_lexical_order_matches_time() {
        let earlier = RevisionId::from_timestamp(&at(9, 59, 59));
        let later = RevisionId::from_timestamp(&at(10, 0, 0));
        assert!(earlier < later);
        assert!(earlier.as_str() < later.as_str());
    }

    #[test]
    fn test_collision_moves_forward() {
        let now = at(12, 0, 0);
        let mut existing = BTreeSet::new();

        let first = RevisionIdentifier::generate(now, &existing).unwrap();
        existing.insert(first.clone());
        let second = RevisionIdentifier::generate(now, &existing).unwrap();
        existing.insert(second.clone());
        let third = RevisionIdentifier::generate(now, &existing).unwrap();

        assert_eq!(first.as_str(), "2012-11-21_12-00-00");
        assert_eq!(second.as_str(), "2012-11-21_12-00-01");
        assert_eq!(third.as_str(), "2012-11-21_12-00-02");
    }

    #[test]
    fn test_freed_older_identifier_is_not_reused() {
        let now = at(12, 0, 0);
        let existing: BTreeSet<_> = [at(12, 0, 1), at(12, 0, 2)]
            .iter()
            .map(RevisionId::from_timestamp)
            .collect();

        let next = RevisionIdentifier::generate(now, &existing).unwrap();
        assert_eq!(next.as_str(), "2012-11-21_12-00-03");
    }

    #[test]
    fn test_clock_stepping_back_stays_after_newest() {
        let mut existing = BTreeSet::new();
        existing.insert(RevisionId::from_timestamp(&at(15, 30, 0)));

        let next = RevisionIdentifier::generate(at(9, 0, 0), &existing).unwrap();
        assert_eq!(next.timestamp().unwrap(), at(15, 30, 1));

        let later = RevisionIdentifier::generate(at(16, 0, 0), &existing).unwrap();
        assert_eq!(later.timestamp().unwrap(), at(16, 0, 0));
    }

    #[test]
    fn test_invalid_dates_do_not_raise_the_floor() {
        let mut existing = BTreeSet::new();
        existing.insert(RevisionId::parse("2012-11-21_10-00-00").unwrap());
        existing.insert(RevisionId::parse("2012-13-45_99-99-99").unwrap());

        let next = RevisionIdentifier::generate(at(12, 0, 0), &existing).unwrap();
        assert_eq!(next.timestamp().unwrap(), at(12, 0, 0));
    }

    #[test]
    fn test_sub_second_precision_is_dropped() {
        let now = at(12, 0, 0) + Duration::milliseconds(750);
        let id = RevisionIdentifier::generate(now, &BTreeSet::new()).unwrap();
        assert_eq!(id.timestamp().unwrap(), at(12, 0, 0));
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert!(RevisionId::parse("2012-11-21_12-00-00").is_ok());
        assert!(RevisionId::parse("config.xml").is_err());
        assert!(RevisionId::parse(".staging-abc").is_err());
        assert!(RevisionId::parse("2012-11-21 12:00:00").is_err());
    }

    #[test]
    fn test_impossible_date_is_corruption() {
        let id = RevisionId::parse("2012-13-45_99-99-99").unwrap();
        assert!(matches!(id.timestamp(), Err(HistoryError::Corruption(_))));
    }
}
