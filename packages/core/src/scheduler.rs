//! Repeating poll tasks.
//!
//! [`PollScheduler::schedule`] runs a task body immediately and then again
//! `interval` after each run finishes, whatever the outcome. Each body runs
//! in its own Tokio task so a panic is logged and the loop carries on.
//! Every loop can be stopped through its [`TaskHandle`];
//! [`PollScheduler::shutdown`] stops them all.
//!
//! [`start_aggregation`] wires one loop per metric kind, topology table and
//! key kind, plus the utilization, retention and inspection loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertDeduplicator;
use crate::directory::SensorDirectory;
use crate::fanout::{Fanout, FanoutSummary};
use crate::fetcher::IncrementalFetcher;
use crate::inspector::EventInspector;
use crate::metrics::AppMetrics;
use crate::reconciler::SetReconciler;
use crate::retention::{PcapArchiver, RetentionMirror};
use crate::snapshot::SnapshotReplacer;
use crate::types::{KeyKind, MetricKind, TopologyTable};

/// Stop handle for one repeating task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    name: String,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the loop. An in-flight run is aborted.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Default)]
pub struct PollScheduler {
    root: CancellationToken,
    tasks: Vec<(TaskHandle, JoinHandle<()>)>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, task: F) -> TaskHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = TaskHandle {
            name: name.into(),
            token: self.root.child_token(),
        };
        let name = handle.name.clone();
        let token = handle.token.clone();

        let join = tokio::spawn(async move {
            tracing::info!(task = %name, "Polling started (interval: {:?})", interval);
            loop {
                let mut run = tokio::spawn(task());
                tokio::select! {
                    _ = token.cancelled() => {
                        run.abort();
                        break;
                    }
                    result = &mut run => {
                        if let Err(err) = result {
                            tracing::error!(task = %name, "Poll run failed: {}", err);
                        }
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::info!(task = %name, "Polling stopped");
        });

        self.tasks.push((handle.clone(), join));
        handle
    }

    pub fn handles(&self) -> Vec<TaskHandle> {
        self.tasks.iter().map(|(handle, _)| handle.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every loop and wait for them to exit.
    pub async fn shutdown(self) {
        self.root.cancel();
        for (handle, join) in self.tasks {
            if let Err(err) = join.await {
                tracing::warn!(task = handle.name(), "Task did not exit cleanly: {}", err);
            }
        }
    }
}

/// Everything the aggregation loops need.
#[derive(Clone)]
pub struct Pollers {
    pub directory: SensorDirectory,
    pub fanout: Fanout,
    pub metrics: Arc<AppMetrics>,
    pub fetcher: IncrementalFetcher,
    pub reconciler: SetReconciler,
    pub snapshots: SnapshotReplacer,
    pub inspector: EventInspector,
    pub dedup: AlertDeduplicator,
    pub mirror: Option<RetentionMirror>,
    pub archiver: Option<PcapArchiver>,
}

#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    pub aggregation: Duration,
    pub inspection: Duration,
    pub retention: Duration,
}

fn record(metrics: &AppMetrics, task: &str, summary: FanoutSummary) {
    metrics.polls_total.with_label_values(&[task]).inc();
    metrics
        .poll_errors_total
        .with_label_values(&[task])
        .inc_by(summary.failed as f64);
}

pub async fn run_history_tick(pollers: &Pollers, kind: MetricKind) -> FanoutSummary {
    let sensors = pollers.directory.snapshot().await;
    let fetcher = pollers.fetcher.clone();
    let summary = pollers
        .fanout
        .run(kind.path(), sensors, move |sensor| {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(&sensor, kind).await.map(|_| ()) }
        })
        .await;
    record(&pollers.metrics, kind.path(), summary);
    summary
}

pub async fn run_utilization_tick(pollers: &Pollers) -> FanoutSummary {
    let sensors = pollers.directory.snapshot().await;
    let fetcher = pollers.fetcher.clone();
    let summary = pollers
        .fanout
        .run("utilization", sensors, move |sensor| {
            let fetcher = fetcher.clone();
            async move { fetcher.poll_utilization(&sensor).await }
        })
        .await;
    record(&pollers.metrics, "utilization", summary);
    summary
}

pub async fn run_topology_tick(pollers: &Pollers, table: TopologyTable) -> FanoutSummary {
    let sensors = pollers.directory.snapshot().await;
    let snapshots = pollers.snapshots.clone();
    let summary = pollers
        .fanout
        .run(table.path(), sensors, move |sensor| {
            let snapshots = snapshots.clone();
            async move { snapshots.replace(&sensor, table).await.map(|_| ()) }
        })
        .await;
    record(&pollers.metrics, table.path(), summary);
    summary
}

pub async fn run_keys_tick(pollers: &Pollers, kind: KeyKind) -> FanoutSummary {
    let sensors = pollers.directory.snapshot().await;
    let reconciler = pollers.reconciler.clone();
    let summary = pollers
        .fanout
        .run(kind.path(), sensors, move |sensor| {
            let reconciler = reconciler.clone();
            async move { reconciler.reconcile(&sensor, kind).await.map(|_| ()) }
        })
        .await;
    record(&pollers.metrics, kind.path(), summary);
    summary
}

pub async fn run_pcap_tick(pollers: &Pollers, archiver: &PcapArchiver) -> FanoutSummary {
    let sensors = pollers.directory.snapshot().await;
    let archiver = archiver.clone();
    let summary = pollers
        .fanout
        .run("pcap-files", sensors, move |sensor| {
            let archiver = archiver.clone();
            async move { archiver.archive(&sensor).await.map(|_| ()) }
        })
        .await;
    record(&pollers.metrics, "pcap-files", summary);
    summary
}

pub async fn run_mirror_tick(pollers: &Pollers, mirror: &RetentionMirror) {
    pollers.metrics.polls_total.with_label_values(&["active-wids-sensors"]).inc();
    let sensors = pollers.directory.snapshot().await;
    if let Err(err) = mirror.sync(&sensors).await {
        pollers
            .metrics
            .poll_errors_total
            .with_label_values(&["active-wids-sensors"])
            .inc();
        tracing::warn!("Retention mirror failed: {}", err);
    }
}

/// One inspection pass followed by cooldown filtering.
pub async fn run_inspection_tick(pollers: &Pollers) {
    pollers.metrics.polls_total.with_label_values(&["inspection"]).inc();
    let candidates = match pollers.inspector.inspect().await {
        Ok(candidates) => candidates,
        Err(err) => {
            tracing::error!("Event inspection failed: {}", err);
            return;
        }
    };
    if candidates.is_empty() {
        return;
    }
    if let Err(err) = pollers.dedup.process(&candidates).await {
        tracing::error!("Alert deduplication failed: {}", err);
    }
}

/// Schedule every aggregation loop.
pub fn start_aggregation(scheduler: &mut PollScheduler, pollers: Pollers, intervals: Intervals) {
    let pollers = Arc::new(pollers);

    for kind in MetricKind::ALL {
        let p = pollers.clone();
        scheduler.schedule(kind.path(), intervals.aggregation, move || {
            let p = p.clone();
            async move {
                run_history_tick(&p, kind).await;
            }
        });
    }

    let p = pollers.clone();
    scheduler.schedule("utilization", intervals.aggregation, move || {
        let p = p.clone();
        async move {
            run_utilization_tick(&p).await;
        }
    });

    for table in TopologyTable::ALL {
        let p = pollers.clone();
        scheduler.schedule(table.path(), intervals.aggregation, move || {
            let p = p.clone();
            async move {
                run_topology_tick(&p, table).await;
            }
        });
    }

    for kind in KeyKind::ALL {
        let p = pollers.clone();
        scheduler.schedule(kind.path(), intervals.aggregation, move || {
            let p = p.clone();
            async move {
                run_keys_tick(&p, kind).await;
            }
        });
    }

    if let Some(mirror) = pollers.mirror.clone() {
        let p = pollers.clone();
        scheduler.schedule("active-wids-sensors", intervals.aggregation, move || {
            let (p, mirror) = (p.clone(), mirror.clone());
            async move { run_mirror_tick(&p, &mirror).await }
        });
    }

    if let Some(archiver) = pollers.archiver.clone() {
        let p = pollers.clone();
        scheduler.schedule("pcap-files", intervals.retention, move || {
            let (p, archiver) = (p.clone(), archiver.clone());
            async move {
                run_pcap_tick(&p, &archiver).await;
            }
        });
    }

    let p = pollers.clone();
    scheduler.schedule("inspection", intervals.inspection, move || {
        let p = p.clone();
        async move { run_inspection_tick(&p).await }
    });

    tracing::info!("{} polling tasks scheduled", scheduler.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::alerts::DigestSender;
    use crate::cursor::CursorStore;
    use crate::db::create_pool;
    use crate::reconciler::KeyRing;
    use crate::repository::{AggregatorRepository, SeriesFilter};
    use crate::services::mock_sensor::MockSensor;
    use crate::types::Sensor;

    fn counting_task(counter: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send + Sync + 'static {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollScheduler::new();
        scheduler.schedule("count", Duration::from_secs(5), counting_task(counter.clone()));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_task_no_longer_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollScheduler::new();
        let handle = scheduler.schedule("count", Duration::from_secs(5), counting_task(counter.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        assert!(handle.is_stopped());
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_run_does_not_stop_the_loop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut scheduler = PollScheduler::new();
        scheduler.schedule("flaky", Duration::from_secs(5), move || {
            let run = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if run == 0 {
                    panic!("first run fails");
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PollScheduler::new();
        scheduler.schedule("a", Duration::from_secs(5), counting_task(counter.clone()));
        scheduler.schedule("b", Duration::from_secs(5), counting_task(counter.clone()));
        let handles = scheduler.handles();

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;

        assert!(handles.iter().all(TaskHandle::is_stopped));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    async fn make_pollers(mock: MockSensor, sensors: &[Sensor]) -> (Pollers, Arc<AggregatorRepository>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = Arc::new(AggregatorRepository::new(pool));
        for sensor in sensors {
            repo.insert_sensor(sensor).await.unwrap();
        }
        let directory = SensorDirectory::new();
        directory.refresh(&repo).await.unwrap();

        let api: Arc<dyn crate::services::SensorApi> = Arc::new(mock);
        let metrics = Arc::new(AppMetrics::new().unwrap());
        let digest = DigestSender::new(repo.clone(), Vec::new(), metrics.clone());
        let pollers = Pollers {
            directory,
            fanout: Fanout::unbounded(),
            metrics: metrics.clone(),
            fetcher: IncrementalFetcher::new(api.clone(), repo.clone(), CursorStore::shared(), metrics.clone()),
            reconciler: SetReconciler::new(api.clone(), repo.clone(), KeyRing::new(), metrics.clone()),
            snapshots: SnapshotReplacer::new(api.clone(), repo.clone(), metrics.clone()),
            inspector: EventInspector::new(repo.clone(), metrics.clone(), 3600.0),
            dedup: AlertDeduplicator::new(repo.clone(), digest, metrics, 3600.0),
            mirror: None,
            archiver: None,
        };
        (pollers, repo)
    }

    #[tokio::test]
    async fn failing_sensor_does_not_block_others_in_a_tick() {
        let mock = MockSensor::new()
            .with_history(
                MetricKind::NwkSeqnums,
                vec![json!({"epochTimestamp": 1.0, "srcpanid": "0x99aa", "srcshortaddr": "0x0001", "nwkSeqnum": 7})],
            )
            .failing_for("beta");
        let sensors = [
            Sensor::new("alpha", "http://10.0.0.1/api"),
            Sensor::new("beta", "http://10.0.0.2/api"),
        ];
        let (pollers, repo) = make_pollers(mock, &sensors).await;

        let summary = run_history_tick(&pollers, MetricKind::NwkSeqnums).await;

        assert_eq!(summary, FanoutSummary { succeeded: 1, failed: 1 });
        let all = SeriesFilter::default();
        assert_eq!(repo.fetch_timeseries(MetricKind::NwkSeqnums, "alpha", &all).await.unwrap().len(), 1);
        assert!(repo.fetch_timeseries(MetricKind::NwkSeqnums, "beta", &all).await.unwrap().is_empty());
        let errors = pollers.metrics.poll_errors_total.with_label_values(&["nwk-seqnums"]).get();
        assert!((errors - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn inspection_tick_creates_alerts() {
        let (pollers, repo) = make_pollers(MockSensor::new(), &[]).await;
        repo.insert_event("alpha", 10.0, "Unknown PAN").await.unwrap();

        run_inspection_tick(&pollers).await;

        assert_eq!(repo.list_alerts(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_directory_is_a_no_op() {
        let (pollers, _) = make_pollers(MockSensor::new(), &[]).await;
        let summary = run_topology_tick(&pollers, TopologyTable::Pairs).await;
        assert_eq!(summary, FanoutSummary::default());
    }
}
