//! Batch timestamps.
//!
//! Batches are stamped by day and shift rather than by wall-clock time, so
//! every run within one shift shares a stamp and lands in the same folders.

use chrono::{DateTime, Local, TimeZone, Timelike};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Hour at which the afternoon shift starts
const SHIFT_B_START_HOUR: u32 = 15;
const SHIFT_A_TIME: &str = "071500";
const SHIFT_B_TIME: &str = "151500";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Shift {
    A,
    B,
}

impl Shift {
    pub fn clock(&self) -> &'static str {
        match self {
            Shift::A => SHIFT_A_TIME,
            Shift::B => SHIFT_B_TIME,
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shift::A => f.write_str("A"),
            Shift::B => f.write_str("B"),
        }
    }
}

/// `yyMMdd` plus the shift's fixed clock time, e.g. `240315151500`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStamp {
    stamp: String,
    shift: Shift,
}

impl RunStamp {
    pub fn now() -> Self {
        Self::at(&Local::now())
    }

    pub fn at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        let shift = if time.hour() >= SHIFT_B_START_HOUR {
            Shift::B
        } else {
            Shift::A
        };
        let stamp = format!("{}{}", time.format("%y%m%d"), shift.clock());
        Self { stamp, shift }
    }

    pub fn as_str(&self) -> &str {
        &self.stamp
    }

    pub fn shift(&self) -> Shift {
        self.shift
    }

    /// `root/<stamp>/<shift>`
    pub fn run_folder(&self, root: &Path) -> PathBuf {
        root.join(&self.stamp).join(self.shift.to_string())
    }
}

impl fmt::Display for RunStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stamp)
    }
}
