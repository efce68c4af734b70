//! Sensor sample and activity label types.
//!
//! A [`Sample`] is one combined accelerometer + gyroscope reading. The same
//! six-column CSV layout is used by the training recordings, the inbound
//! event stream and the capture server, so record conversion lives here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of channels in a sample (3-axis accelerometer + 3-axis gyroscope).
pub const CHANNELS: usize = 6;

/// Column names, in the order they appear in every CSV record.
pub const CHANNEL_NAMES: [&str; CHANNELS] = [
    "accel_x", "accel_y", "accel_z", "gyro_x", "gyro_y", "gyro_z",
];

/// One combined sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub values: [f64; CHANNELS],
}

impl Sample {
    pub fn new(values: [f64; CHANNELS]) -> Self {
        Self { values }
    }

    /// Combine an accelerometer and a gyroscope reading.
    pub fn from_parts(accel: [f64; 3], gyro: [f64; 3]) -> Self {
        Self {
            values: [accel[0], accel[1], accel[2], gyro[0], gyro[1], gyro[2]],
        }
    }

    pub fn accel(&self) -> [f64; 3] {
        [self.values[0], self.values[1], self.values[2]]
    }

    pub fn gyro(&self) -> [f64; 3] {
        [self.values[3], self.values[4], self.values[5]]
    }

    /// Decode a raw stream payload: one comma-delimited record.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(payload);

        let mut record = csv::StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(true) => Self::from_record(&record),
            Ok(false) => Err(DecodeError::FieldCount {
                expected: CHANNELS,
                found: 0,
            }),
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => Err(DecodeError::InvalidUtf8),
            Err(e) => Err(DecodeError::Unreadable(e.to_string())),
        }
    }

    /// Convert one CSV record. Every field must be a finite number.
    pub fn from_record(record: &csv::StringRecord) -> Result<Self, DecodeError> {
        if record.len() != CHANNELS {
            return Err(DecodeError::FieldCount {
                expected: CHANNELS,
                found: record.len(),
            });
        }

        let mut values = [0.0; CHANNELS];
        for (index, (slot, field)) in values.iter_mut().zip(record.iter()).enumerate() {
            let column = CHANNEL_NAMES[index];
            let value: f64 = field.parse().map_err(|_| DecodeError::InvalidNumber {
                column,
                value: field.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DecodeError::NonFinite { column });
            }
            *slot = value;
        }

        Ok(Self { values })
    }

    /// Encode as a stream payload (no trailing newline).
    pub fn to_csv_line(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Sample {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s.as_bytes())
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

/// Why a single record could not be turned into a [`Sample`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("invalid number {value:?} in column {column}")]
    InvalidNumber { column: &'static str, value: String },

    #[error("non-finite value in column {column}")]
    NonFinite { column: &'static str },

    #[error("unreadable record: {0}")]
    Unreadable(String),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

/// The phone contexts the classifier can recognise.
///
/// Declaration order is also the sorted order of the label strings, and is
/// the column order of every encoded label vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLabel {
    /// Phone is on a table, face up or down, not being touched
    Idle,
    /// Phone is in a hand and in use
    InHand,
    /// Phone is in a pocket while standing or walking around
    PocketMoving,
    /// Phone is in a pocket while sitting down
    PocketSitting,
    /// Phone is in a hand while running
    Running,
}

impl ActivityLabel {
    /// Every label, in column order.
    pub const ALL: [ActivityLabel; 5] = [
        ActivityLabel::Idle,
        ActivityLabel::InHand,
        ActivityLabel::PocketMoving,
        ActivityLabel::PocketSitting,
        ActivityLabel::Running,
    ];

    /// Number of labels.
    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLabel::Idle => "idle",
            ActivityLabel::InHand => "inhand",
            ActivityLabel::PocketMoving => "pocketmoving",
            ActivityLabel::PocketSitting => "pocketsitting",
            ActivityLabel::Running => "running",
        }
    }

    /// Column index of this label in an encoded vector.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or(UnknownLabel(s))
    }
}

/// A label string outside the fixed label set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown activity {0:?} (expected one of idle, inhand, pocketmoving, pocketsitting, running)")]
pub struct UnknownLabel(pub String);

/// A message as it arrives from the inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Message key; carries the capture timestamp and is informational only
    pub key: Option<Vec<u8>>,
    /// Message payload
    pub value: Vec<u8>,
}

impl RawRecord {
    pub fn new(key: Option<Vec<u8>>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    /// A record carrying only a payload.
    pub fn from_value(value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    pub fn decode(&self) -> Result<Sample, DecodeError> {
        Sample::decode(&self.value)
    }

    /// Key rendered for logging.
    pub fn key_lossy(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}
