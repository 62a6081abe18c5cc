//! Polling orchestrator
//!
//! A fixed-period timer spawns one tick per period. A tick polls every group as its
//! own task and every device of a group as its own task (capped per group by a
//! semaphore), then hands each group's batch to every sink. Ticks may overlap; a
//! device whose previous read is still in flight is skipped, never queued.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DeviceGroup;
use crate::reader::{DeviceReader, ReadOutcome};
use crate::sink::SampleSink;

/// Whether any tick is currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Running,
}

/// Result of one group in one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub group: String,
    /// Samples in the batch handed to the sinks
    pub samples: usize,
    /// Devices that returned samples
    pub devices_read: usize,
    /// Devices that failed, timed out, were throttled or panicked
    pub failed: Vec<String>,
    /// Devices skipped because their previous read was still running
    pub skipped_busy: Vec<String>,
    /// Devices whose type has no catalog points
    pub no_points: Vec<String>,
    /// Sinks whose write failed
    pub sink_failures: Vec<String>,
}

/// Result of one tick across all groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub groups: Vec<GroupReport>,
    pub duration: Duration,
}

impl TickReport {
    pub fn total_samples(&self) -> usize {
        self.groups.iter().map(|g| g.samples).sum()
    }

    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.group == name)
    }

    pub fn skipped_busy(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.skipped_busy.iter().map(String::as_str))
    }
}

type Sinks = Arc<Vec<Arc<dyn SampleSink>>>;

// Decrements the in-flight counter even if the tick future is dropped
struct InFlight<'a> {
    count: &'a AtomicUsize,
    idle: &'a Notify,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, idle: &'a Notify) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count, idle }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct Poller {
    groups: Vec<Arc<DeviceGroup>>,
    reader: Arc<DeviceReader>,
    sinks: Sinks,
    interval: Duration,
    max_concurrent_reads: usize,
    in_flight: AtomicUsize,
    idle: Notify,
    ticks: AtomicU64,
}

impl Poller {
    pub fn new(groups: Vec<DeviceGroup>, reader: Arc<DeviceReader>, interval: Duration) -> Self {
        Self {
            groups: groups.into_iter().map(Arc::new).collect(),
            reader,
            sinks: Arc::new(Vec::new()),
            interval,
            max_concurrent_reads: 16,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            ticks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn SampleSink>>) -> Self {
        self.sinks = Arc::new(sinks);
        self
    }

    /// Per-group cap on concurrent device reads (at least 1)
    #[must_use]
    pub fn with_max_concurrent_reads(mut self, max: usize) -> Self {
        self.max_concurrent_reads = max.max(1);
        self
    }

    pub fn state(&self) -> PollState {
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            PollState::Idle
        } else {
            PollState::Running
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no tick is running, up to `limit`; returns whether idle was reached
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    /// Execute one tick across all groups
    pub async fn tick(&self) -> TickReport {
        let _in_flight = InFlight::enter(&self.in_flight, &self.idle);
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        debug!("Tick {} started ({} groups)", tick, self.groups.len());

        let handles: Vec<_> = self
            .groups
            .iter()
            .map(|group| {
                tokio::spawn(poll_group(
                    Arc::clone(group),
                    Arc::clone(&self.reader),
                    Arc::clone(&self.sinks),
                    self.max_concurrent_reads,
                ))
            })
            .collect();

        let mut groups = Vec::with_capacity(handles.len());
        for (group, result) in self.groups.iter().zip(join_all(handles).await) {
            match result {
                Ok(report) => groups.push(report),
                Err(e) => {
                    error!("Group {} task failed: {}", group.name, e);
                    groups.push(GroupReport {
                        group: group.name.clone(),
                        failed: group.devices.iter().map(|d| d.name.clone()).collect(),
                        ..Default::default()
                    });
                },
            }
        }

        let report = TickReport {
            tick,
            groups,
            duration: started.elapsed(),
        };
        info!(
            "Tick {} done in {:?}: {} samples from {} groups",
            tick,
            report.duration,
            report.total_samples(),
            report.groups.len()
        );
        for health in self.reader.health().snapshot() {
            debug!(
                "Health {}: connected={} last_failure={:?}",
                health.device,
                health.connected,
                health.last_failure_at.map(|t| t.elapsed())
            );
        }
        report
    }

    /// Tick every `interval` until `token` is cancelled
    ///
    /// Each tick runs on its own task so a slow tick never delays the clock. Ticks
    /// still running at cancellation are detached; use [`Poller::wait_idle`] to
    /// let them finish.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = JoinSet::new();

        info!(
            "Polling started: {} groups, interval {:?}",
            self.groups.len(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let poller = Arc::clone(&self);
                    ticks.spawn(async move { poller.tick().await });
                }
                Some(done) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = done {
                        error!("Tick task failed: {}", e);
                    }
                }
            }
        }

        ticks.detach_all();
        info!("Polling stopped ({} ticks in flight)", self.in_flight());
    }
}

async fn poll_group(
    group: Arc<DeviceGroup>,
    reader: Arc<DeviceReader>,
    sinks: Sinks,
    max_concurrent_reads: usize,
) -> GroupReport {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_reads));

    let handles: Vec<_> = group
        .devices
        .iter()
        .map(|endpoint| {
            let endpoint = endpoint.clone();
            let group_name = group.name.clone();
            let reader = Arc::clone(&reader);
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                reader.read_device(&group_name, &endpoint).await
            })
        })
        .collect();

    let mut report = GroupReport {
        group: group.name.clone(),
        ..Default::default()
    };
    let mut batch = Vec::new();

    for (endpoint, handle) in group.devices.iter().zip(handles) {
        let name = endpoint.name.clone();
        match handle.await {
            Ok(ReadOutcome::Samples(samples)) => {
                report.devices_read += 1;
                batch.extend(samples);
            },
            Ok(ReadOutcome::Busy) => report.skipped_busy.push(name),
            Ok(ReadOutcome::NoPoints) => report.no_points.push(name),
            Ok(ReadOutcome::Unavailable | ReadOutcome::Failed) => report.failed.push(name),
            Err(e) => {
                error!("Device task {}/{} failed: {}", group.name, name, e);
                // The task died mid-read; the socket may hold half an exchange
                reader.health().fail(&name).await;
                report.failed.push(name);
            },
        }
    }
    report.samples = batch.len();

    let writes = sinks.iter().map(|sink| {
        let batch = &batch;
        let group_name = group.name.as_str();
        async move {
            match sink.write(group_name, batch).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Sink {} failed for group {}: {}", sink.name(), group_name, e);
                    Some(sink.name().to_string())
                },
            }
        }
    });
    report.sink_failures = join_all(writes).await.into_iter().flatten().collect();

    if !report.failed.is_empty() {
        warn!(
            "Group {}: {} samples, no data from {:?}",
            report.group, report.samples, report.failed
        );
    } else {
        debug!("Group {}: {} samples", report.group, report.samples);
    }
    report
}
