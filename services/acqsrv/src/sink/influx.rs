//! InfluxDB 2.x storage sink
//!
//! One point per sample: `{measurement},group=..,device=..,code=.. value=<f64> <secs>`.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use super::SampleSink;
use crate::config::StorageConfig;
use crate::error::{AcqSrvError, Result};
use crate::sample::Sample;

/// Line protocol builder for a single float field
#[derive(Debug)]
pub struct LineProtocolBuilder {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, f64)>,
    timestamp: Option<i64>,
}

impl LineProtocolBuilder {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Timestamp in the write precision (seconds here)
    #[must_use]
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            // Empty tag values are not allowed by the protocol
            if value.is_empty() {
                continue;
            }
            let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            let _ = write!(line, "{}={}", escape_key(key), value);
        }

        if let Some(ts) = self.timestamp {
            let _ = write!(line, " {ts}");
        }
        line
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

// Tag keys, tag values and field keys share the same rules
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

pub struct InfluxSink {
    client: Client,
    write_url: String,
    org: String,
    bucket: String,
    token: String,
    measurement: String,
}

impl InfluxSink {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.write_timeout_ms))
            .build()?;

        debug!(
            "Creating InfluxDB sink: url={}, org={}, bucket={}",
            config.url, config.org, config.bucket
        );

        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
            measurement: config.measurement.clone(),
        })
    }

    /// Line protocol body for a batch; samples without a value are left out
    pub fn line_protocol(&self, group: &str, batch: &[Sample]) -> String {
        batch
            .iter()
            .filter_map(|sample| {
                let value = sample.value?;
                Some(
                    LineProtocolBuilder::new(&self.measurement)
                        .tag("group", group)
                        .tag("device", &sample.device)
                        .tag("code", &sample.code)
                        .field("value", value)
                        .timestamp(sample.timestamp.timestamp())
                        .build(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl SampleSink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    async fn write(&self, group: &str, batch: &[Sample]) -> Result<()> {
        let body = self.line_protocol(group, batch);
        if body.is_empty() {
            debug!("InfluxDB: nothing to write for {}", group);
            return Ok(());
        }

        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "s"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("InfluxDB: wrote {} samples for {}", batch.len(), group);
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            error!("InfluxDB write failed: {} - {}", status, text);
            Err(AcqSrvError::sink(
                "influxdb",
                format!("write failed: {status} - {text}"),
            ))
        }
    }
}
