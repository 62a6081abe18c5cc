//! Daily CSV export sink
//!
//! One file per group per day, `device_data_{group}_{YYYYMMDD}.csv`, with a UTF-8 BOM
//! and header row on creation so spreadsheet tools pick the encoding up. Each tick
//! appends one row: time, then one cell per `(device, code)` column.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::SampleSink;
use crate::catalog::RegisterCatalog;
use crate::config::DeviceGroup;
use crate::error::Result;
use crate::sample::{column_key, Sample};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const TIME_COLUMN: &str = "time";

pub struct CsvExportSink {
    dir: PathBuf,
    /// Column keys per group, in configuration then catalog order
    layouts: HashMap<String, Vec<String>>,
    /// Serializes the new-file check with the append that follows it
    file_lock: Arc<Mutex<()>>,
}

impl CsvExportSink {
    pub fn new(dir: impl Into<PathBuf>, layouts: HashMap<String, Vec<String>>) -> Self {
        Self {
            dir: dir.into(),
            layouts,
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Derive column layouts from the configured groups
    pub fn from_groups(
        dir: impl Into<PathBuf>,
        groups: &[DeviceGroup],
        catalog: &RegisterCatalog,
    ) -> Self {
        let layouts = groups
            .iter()
            .map(|group| {
                let columns = group
                    .devices
                    .iter()
                    .flat_map(|device| {
                        catalog
                            .points_for(&device.device_type)
                            .iter()
                            .map(|point| column_key(&device.name, &point.code))
                    })
                    .collect();
                (group.name.clone(), columns)
            })
            .collect();
        Self::new(dir, layouts)
    }

    pub fn file_path(&self, group: &str, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "device_data_{}_{}.csv",
            group,
            date.format("%Y%m%d")
        ))
    }

    fn columns_for(&self, group: &str, batch: &[Sample]) -> Vec<String> {
        if let Some(columns) = self.layouts.get(group) {
            return columns.clone();
        }
        debug!("No column layout for group {}, using batch order", group);
        let mut columns: Vec<String> = Vec::new();
        for sample in batch {
            let key = sample.column_key();
            if !columns.contains(&key) {
                columns.push(key);
            }
        }
        columns
    }
}

fn format_value(value: f64) -> String {
    format!("{value}")
}

/// Caller holds the sink's file lock
fn append_row(path: &Path, header: &[String], row: &[String]) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;
    if is_new {
        file.write_all(UTF8_BOM)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(header)?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(is_new)
}

#[async_trait]
impl SampleSink for CsvExportSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write(&self, group: &str, batch: &[Sample]) -> Result<()> {
        let Some(first) = batch.first() else {
            debug!("CSV: empty batch for {}, nothing exported", group);
            return Ok(());
        };
        let timestamp = first.timestamp;

        let columns = self.columns_for(group, batch);
        let values: HashMap<String, Option<f64>> = batch
            .iter()
            .map(|sample| (sample.column_key(), sample.value))
            .collect();

        let mut header = Vec::with_capacity(columns.len() + 1);
        header.push(TIME_COLUMN.to_string());
        header.extend(columns.iter().cloned());

        let mut row = Vec::with_capacity(columns.len() + 1);
        row.push(timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
        row.extend(columns.iter().map(|column| {
            values
                .get(column)
                .copied()
                .flatten()
                .map(format_value)
                .unwrap_or_default()
        }));

        let path = self.file_path(group, timestamp.date_naive());
        let target = path.clone();
        let file_lock = Arc::clone(&self.file_lock);
        let created = tokio::task::spawn_blocking(move || {
            let _guard = file_lock.lock();
            append_row(&target, &header, &row)
        })
        .await??;

        if created {
            info!("CSV: created {} ({} columns)", path.display(), columns.len() + 1);
        }
        debug!("CSV: {} samples -> {}", batch.len(), path.display());
        Ok(())
    }
}
