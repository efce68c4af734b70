//! Collation of separate accelerometer and gyroscope updates.
//!
//! Phones report the two sensors independently. The collator keeps the
//! latest reading of each and produces a combined [`Sample`] on every
//! update once both are known and the warm-up period has passed.

use crate::collector::types::Sample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which sensor an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accel,
    Gyro,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Accel => "accel",
            SensorKind::Gyro => "gyro",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accel" => Ok(SensorKind::Accel),
            "gyro" => Ok(SensorKind::Gyro),
            other => Err(format!("unknown sensor {other:?}")),
        }
    }
}

/// Combines the latest accelerometer and gyroscope readings.
#[derive(Debug, Clone)]
pub struct SensorCollator {
    accel: Option<[f64; 3]>,
    gyro: Option<[f64; 3]>,
    /// Updates still to be discarded while the phone settles
    warmup_remaining: u32,
    /// Updates received so far (including warm-up)
    updates: u64,
}

impl SensorCollator {
    /// Create a collator that discards the first `warmup_updates` updates.
    pub fn new(warmup_updates: u32) -> Self {
        Self {
            accel: None,
            gyro: None,
            warmup_remaining: warmup_updates,
            updates: 0,
        }
    }

    /// Record a reading and return the combined sample, if one is ready.
    pub fn update(&mut self, kind: SensorKind, reading: [f64; 3]) -> Option<Sample> {
        self.updates += 1;
        match kind {
            SensorKind::Accel => self.accel = Some(reading),
            SensorKind::Gyro => self.gyro = Some(reading),
        }

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return None;
        }

        match (self.accel, self.gyro) {
            (Some(accel), Some(gyro)) => Some(Sample::from_parts(accel, gyro)),
            _ => None,
        }
    }

    /// Whether the warm-up period is over.
    pub fn is_warmed_up(&self) -> bool {
        self.warmup_remaining == 0
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }
}
