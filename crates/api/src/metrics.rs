use index::BuildReport;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Metrics {
    // Requests
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_build_time_us: AtomicU64,
    total_query_time_us: AtomicU64,

    // Build counts
    builds: AtomicUsize,
    documents_built: AtomicUsize,
    chunks_indexed: AtomicUsize,
    entities_resolved: AtomicUsize,
    relationships_written: AtomicUsize,

    // Query outcomes
    queries: AtomicUsize,
    degraded_queries: AtomicUsize,
    no_evidence_queries: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_build(&self, duration: Duration, report: &BuildReport) {
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.total_build_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.documents_built
            .fetch_add(report.graph.documents, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(report.passages.indexed, Ordering::Relaxed);
        self.entities_resolved
            .fetch_add(report.graph.entities, Ordering::Relaxed);
        self.relationships_written
            .fetch_add(report.graph.write.relationships_written, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration, degraded: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if degraded {
            self.degraded_queries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_evidence(&self) {
        self.no_evidence_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_build_time_ms: avg_time_ms(&self.total_build_time_us, &self.builds),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
            builds: self.builds.load(Ordering::Relaxed),
            documents_built: self.documents_built.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            entities_resolved: self.entities_resolved.load(Ordering::Relaxed),
            relationships_written: self.relationships_written.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            degraded_queries: self.degraded_queries.load(Ordering::Relaxed),
            no_evidence_queries: self.no_evidence_queries.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_build_time_ms: f64,
    pub avg_query_time_ms: f64,
    pub builds: usize,
    pub documents_built: usize,
    pub chunks_indexed: usize,
    pub entities_resolved: usize,
    pub relationships_written: usize,
    pub queries: usize,
    pub degraded_queries: usize,
    pub no_evidence_queries: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_counters() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_query(Duration::from_millis(4), false);
        metrics.record_query(Duration::from_millis(2), true);
        metrics.record_no_evidence();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.degraded_queries, 1);
        assert_eq!(snapshot.no_evidence_queries, 1);
        assert!((snapshot.avg_query_time_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_build_counters() {
        let metrics = Metrics::new();
        let mut report = BuildReport::default();
        report.graph.documents = 3;
        report.graph.entities = 7;
        report.graph.write.relationships_written = 4;
        report.passages.indexed = 12;

        metrics.record_build(Duration::from_millis(10), &report);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.builds, 1);
        assert_eq!(snapshot.documents_built, 3);
        assert_eq!(snapshot.chunks_indexed, 12);
        assert_eq!(snapshot.entities_resolved, 7);
        assert_eq!(snapshot.relationships_written, 4);
        assert_eq!(snapshot.avg_query_time_ms, 0.0);
    }
}
