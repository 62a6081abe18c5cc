//! Canonical output unit of the acquisition engine

use chrono::{DateTime, Local};
use serde::Serialize;

/// One decoded, scaled measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub group: String,
    pub device: String,
    pub code: String,
    pub display_name: String,
    pub unit: String,
    /// `None` when the registers did not decode to a finite number
    pub value: Option<f64>,
    /// Capture time of the batched read; shared by every point of one device read
    pub timestamp: DateTime<Local>,
}

impl Sample {
    /// Column key used by exports: `{device}_{code}`
    pub fn column_key(&self) -> String {
        column_key(&self.device, &self.code)
    }
}

pub fn column_key(device: &str, code: &str) -> String {
    format!("{device}_{code}")
}
