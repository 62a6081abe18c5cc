//! Downstream consumers of group batches
//!
//! The poller hands every configured sink the complete batch of a group once per
//! tick, possibly empty. A failing sink is logged by the caller and affects nothing
//! else.

pub mod csv;
pub mod influx;

use async_trait::async_trait;

use crate::error::Result;
use crate::sample::Sample;

pub use self::csv::CsvExportSink;
pub use self::influx::InfluxSink;

#[async_trait]
pub trait SampleSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, group: &str, batch: &[Sample]) -> Result<()>;
}
