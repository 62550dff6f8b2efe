use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use confcollect::dispatch::{Collector, Dispatcher, Outcome, Summary};
use confcollect::error::CollectError;
use confcollect::job::{Job, JobParams};
use confcollect::logging::HostLog;
use log::LevelFilter;
use serde_json::Map;

/// Writes `<host>.txt` unless the host name asks for something else.
struct FakeCollector {
    dir: PathBuf,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeCollector {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Collector for FakeCollector {
    async fn collect(&self, job: &Job, log: &HostLog) -> Result<Outcome, CollectError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        log.debug("collecting");
        match job.host.as_str() {
            "refused" => Err(CollectError::ConnectRefused("connection refused".to_string())),
            "boom" => panic!("adapter bug"),
            "fresh" => Ok(Outcome::Skipped("artifact is fresh".to_string())),
            host => {
                let path = self.dir.join(format!("{host}.txt"));
                std::fs::write(&path, host)?;
                Ok(Outcome::Saved(vec![path]))
            }
        }
    }
}

fn job(host: &str) -> Job {
    Job {
        section: host.to_string(),
        host: host.to_string(),
        params: JobParams::from_section(host, "urlget", Map::new()).expect("params"),
        repo_dir: None,
    }
}

#[tokio::test]
async fn failing_and_panicking_jobs_do_not_stop_siblings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let collector = FakeCollector::new(dir.path().to_path_buf());
    let hosts = ["r1", "refused", "r2", "boom", "r3", "fresh", "r4"];
    let jobs = hosts.iter().map(|host| job(host)).collect();

    let summary = Dispatcher::new(collector, 3).run(jobs).await;

    assert_eq!(
        summary,
        Summary {
            succeeded: 4,
            skipped: 1,
            failed: 2,
        }
    );
    for host in ["r1", "r2", "r3", "r4"] {
        assert_eq!(
            std::fs::read_to_string(dir.path().join(format!("{host}.txt"))).expect("artifact"),
            host
        );
    }
    assert!(!dir.path().join("refused.txt").exists());
    assert!(!dir.path().join("boom.txt").exists());
}

#[tokio::test]
async fn every_position_of_a_failure_is_isolated() {
    for failing in 0..4 {
        let dir = tempfile::tempdir().expect("tempdir");
        let collector = FakeCollector::new(dir.path().to_path_buf());
        let jobs = (0..4)
            .map(|i| if i == failing { job("boom") } else { job(&format!("h{i}")) })
            .collect();

        let summary = Dispatcher::new(collector, 2).run(jobs).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 3);
    }
}

#[tokio::test]
async fn concurrency_never_exceeds_worker_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let collector = Arc::new(FakeCollector::new(dir.path().to_path_buf()));
    let jobs = (0..12).map(|i| job(&format!("h{i}"))).collect();

    let summary = Dispatcher::new(SharedCollector(Arc::clone(&collector)), 4)
        .run(jobs)
        .await;
    assert_eq!(summary.total(), 12);
    let peak = collector.peak.load(Ordering::SeqCst);
    assert!((1..=4).contains(&peak), "peak {peak}");
}

struct SharedCollector(Arc<FakeCollector>);

#[async_trait]
impl Collector for SharedCollector {
    async fn collect(&self, job: &Job, log: &HostLog) -> Result<Outcome, CollectError> {
        self.0.collect(job, log).await
    }
}

#[tokio::test]
async fn per_host_logs_are_bracketed() {
    let artifacts = tempfile::tempdir().expect("tempdir");
    let logs = tempfile::tempdir().expect("tempdir");
    let collector = FakeCollector::new(artifacts.path().to_path_buf());

    let summary = Dispatcher::new(collector, 8)
        .with_host_logs(Some(logs.path().to_path_buf()), LevelFilter::Info)
        .run(vec![job("r1"), job("refused")])
        .await;
    assert_eq!(summary.total(), 2);

    let ok = std::fs::read_to_string(logs.path().join(HostLog::file_name("urlget", "r1")))
        .expect("r1 log");
    let records: Vec<Vec<&str>> = ok.lines().map(|line| line.split('\t').collect()).collect();
    assert_eq!(records.first().map(|r| r[3]), Some("BEGIN r1"));
    assert_eq!(records.last().map(|r| r[3]), Some("END r1"));
    assert!(records.iter().all(|r| r.len() == 4 && r[1] == "urlget"));
    assert!(!ok.contains("collecting"), "debug records filtered at Info");

    let failed = std::fs::read_to_string(logs.path().join(HostLog::file_name("urlget", "refused")))
        .expect("refused log");
    assert!(failed.contains("ERROR\tConnectRefused: connection error: connection refused"));
}

#[tokio::test]
async fn empty_roster_returns_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = Dispatcher::new(FakeCollector::new(dir.path().to_path_buf()), 4)
        .run(Vec::new())
        .await;
    assert_eq!(summary, Summary::default());
}
