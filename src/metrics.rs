//! Export job counters and duration histogram.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::sync::Once;

static METRIC_DESCRIPTIONS: Once = Once::new();

const JOBS_ENQUEUED: &str = "export_jobs_enqueued_total";
const JOBS_COMPLETED: &str = "export_jobs_completed_total";
const JOBS_FAILED: &str = "export_jobs_failed_total";
const JOBS_FAILED_BY_CODE: &str = "export_jobs_failed_by_code_total";
const JOB_DURATION_MS: &str = "export_job_duration_ms";

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            JOBS_ENQUEUED,
            Unit::Count,
            "Number of export jobs enqueued."
        );
        describe_counter!(
            JOBS_COMPLETED,
            Unit::Count,
            "Number of export jobs completed."
        );
        describe_counter!(JOBS_FAILED, Unit::Count, "Number of export jobs failed.");
        describe_counter!(
            JOBS_FAILED_BY_CODE,
            Unit::Count,
            "Number of export jobs failed, labeled by error code."
        );
        describe_histogram!(
            JOB_DURATION_MS,
            Unit::Milliseconds,
            "Export job duration in milliseconds."
        );
    });
}

/// Counters and histogram the runner updates on job completion/failure.
#[derive(Clone, Copy, Default)]
pub struct MetricsSink;

impl MetricsSink {
    pub fn new() -> Self {
        describe_metrics();
        Self
    }

    pub fn job_enqueued(&self) {
        counter!(JOBS_ENQUEUED).increment(1);
    }

    pub fn job_completed(&self, duration_ms: Option<i64>) {
        counter!(JOBS_COMPLETED).increment(1);
        self.observe_duration(duration_ms);
    }

    pub fn job_failed(&self, error_code: &str, duration_ms: Option<i64>) {
        counter!(JOBS_FAILED).increment(1);
        counter!(JOBS_FAILED_BY_CODE, "error_code" => error_code.to_string()).increment(1);
        self.observe_duration(duration_ms);
    }

    fn observe_duration(&self, duration_ms: Option<i64>) {
        if let Some(duration_ms) = duration_ms {
            histogram!(JOB_DURATION_MS).record(duration_ms as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn failure_updates_total_by_code_and_duration() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            let sink = MetricsSink::new();
            sink.job_failed("TIMEOUT", Some(120));
            sink.job_completed(Some(80));
            sink.job_enqueued();
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();
        for expected in [
            JOBS_ENQUEUED,
            JOBS_COMPLETED,
            JOBS_FAILED,
            JOBS_FAILED_BY_CODE,
            JOB_DURATION_MS,
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
