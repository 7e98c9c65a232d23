//! Reverse-chronological time keys.
//!
//! A key is the number of milliseconds between an instant and a fixed anchor
//! in the future, zero padded to [`KEY_WIDTH`] digits. Later instants produce
//! smaller keys, so an ascending scan over keys walks history newest first.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::day;

/// Number of digits in an encoded key.
pub const KEY_WIDTH: usize = 12;

/// `2049-01-01T00:00:00Z` in milliseconds since the Unix epoch.
pub const ANCHOR_MILLIS: i64 = 2_493_072_000_000;

/// Largest offset that fits in [`KEY_WIDTH`] digits.
const MAX_OFFSET: i64 = 999_999_999_999;

/// Errors produced by the key codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The instant lies after the anchor or too far before it.
    #[error("Instant {0} cannot be encoded as a time key")]
    OutOfRange(DateTime<Utc>),

    /// The input is not exactly twelve ASCII digits.
    #[error("Malformed time key: {0:?}")]
    Malformed(String),

    /// Every millisecond left in the day has already been issued.
    #[error("No time keys left on {0}")]
    DayExhausted(NaiveDate),
}

/// Encoded identifier of a ledger entry or checkpoint.
///
/// Ordering follows the encoded string, so `a < b` means `a` is the later
/// instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeKey(i64);

impl TimeKey {
    /// Key of the anchor instant, the smallest possible key.
    pub const NEWEST: Self = Self(0);

    /// The largest possible key.
    pub const OLDEST: Self = Self(MAX_OFFSET);

    /// Encodes an instant at millisecond precision.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::OutOfRange`] if the instant is after the anchor or
    /// the offset needs more than [`KEY_WIDTH`] digits.
    pub fn encode(instant: DateTime<Utc>) -> Result<Self, KeyError> {
        let offset = ANCHOR_MILLIS - instant.timestamp_millis();
        if (0..=MAX_OFFSET).contains(&offset) {
            Ok(Self(offset))
        } else {
            Err(KeyError::OutOfRange(instant))
        }
    }

    /// Parses an encoded key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Malformed`] unless the input is exactly
    /// [`KEY_WIDTH`] ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        if raw.len() != KEY_WIDTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeyError::Malformed(raw.to_string()));
        }
        raw.parse::<i64>()
            .map(Self)
            .map_err(|_| KeyError::Malformed(raw.to_string()))
    }

    /// The instant this key encodes.
    #[must_use]
    pub fn instant(self) -> DateTime<Utc> {
        // offsets are always within 0..=MAX_OFFSET
        DateTime::from_timestamp_millis(ANCHOR_MILLIS - self.0).unwrap_or_default()
    }

    /// The next key in ascending order (one millisecond earlier), if any.
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        (self.0 < MAX_OFFSET).then_some(Self(self.0 + 1))
    }
}

impl std::fmt::Display for TimeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0width$}", self.0, width = KEY_WIDTH)
    }
}

impl std::str::FromStr for TimeKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeKey> for String {
    fn from(value: TimeKey) -> Self {
        value.to_string()
    }
}

/// Encodes an instant as a key string.
///
/// # Errors
///
/// See [`TimeKey::encode`].
pub fn encode(instant: DateTime<Utc>) -> Result<TimeKey, KeyError> {
    TimeKey::encode(instant)
}

/// Decodes a key string back to its instant.
///
/// # Errors
///
/// See [`TimeKey::parse`].
pub fn decode(raw: &str) -> Result<DateTime<Utc>, KeyError> {
    TimeKey::parse(raw).map(TimeKey::instant)
}

/// Issues strictly unique keys from clock readings.
///
/// When the clock has not advanced past the last issued millisecond, the
/// next key is bumped one millisecond forward.
#[derive(Debug)]
pub struct KeyGenerator {
    last_millis: AtomicI64,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator {
    /// Creates a generator with no history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(i64::MIN),
        }
    }

    /// Issues the key for `now`, or for the first unused millisecond after it.
    ///
    /// Issued keys never leave the UTC day containing `now`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::DayExhausted`] once the last millisecond of the
    /// day has been issued, or [`KeyError::OutOfRange`] if the resulting
    /// instant cannot be encoded.
    pub fn next(&self, now: DateTime<Utc>) -> Result<TimeKey, KeyError> {
        let now_millis = now.timestamp_millis();
        let last_of_day = day::end_of_day(now).timestamp_millis();
        let bump = |last: i64| Some(now_millis.max(last.saturating_add(1))).filter(|millis| *millis <= last_of_day);
        let previous = self
            .last_millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, bump)
            .map_err(|_| KeyError::DayExhausted(now.date_naive()))?;
        let issued = bump(previous)
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(KeyError::OutOfRange(now))?;
        TimeKey::encode(issued)
    }
}
