use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

use crate::core::RejectReason;

pub const MIRROR_REQUESTS_TOTAL: &str = "mirror_requests_total";
pub const MIRROR_REJECTIONS_TOTAL: &str = "mirror_rejections_total";
pub const MIRROR_UPSTREAM_RESPONSES_TOTAL: &str = "mirror_upstream_responses_total";
pub const MIRROR_UPSTREAM_DURATION_SECONDS: &str = "mirror_upstream_duration_seconds";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        MIRROR_REQUESTS_TOTAL,
        Unit::Count,
        "Client requests handled by the mirror, by outcome."
    );
    describe_counter!(
        MIRROR_REJECTIONS_TOTAL,
        Unit::Count,
        "Client requests refused by the admission filter, by reason."
    );
    describe_counter!(
        MIRROR_UPSTREAM_RESPONSES_TOTAL,
        Unit::Count,
        "Responses received from upstream registries."
    );
    describe_histogram!(
        MIRROR_UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Time until an upstream registry returned response headers."
    );
});

/// Installs the global Prometheus recorder. Without it every macro below is a no-op.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Lazy::force(&DESCRIPTIONS);
    Ok(handle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Forwarded,
    Rejected,
    Failed,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Forwarded => "forwarded",
            RequestOutcome::Rejected => "rejected",
            RequestOutcome::Failed => "failed",
        }
    }
}

pub fn increment_request_total(outcome: RequestOutcome) {
    counter!(MIRROR_REQUESTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn increment_rejection_total(reason: RejectReason) {
    counter!(MIRROR_REJECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
}

pub fn increment_upstream_response_total(upstream: &str, status: u16) {
    counter!(
        MIRROR_UPSTREAM_RESPONSES_TOTAL,
        "upstream" => upstream.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_upstream_duration(upstream: &str, duration: Duration) {
    histogram!(MIRROR_UPSTREAM_DURATION_SECONDS, "upstream" => upstream.to_string())
        .record(duration.as_secs_f64());
}

// Records the upstream call duration when dropped, error paths included.
pub struct UpstreamTimer {
    start: Instant,
    upstream: String,
}

impl UpstreamTimer {
    pub fn new(upstream: &str) -> Self {
        Self {
            start: Instant::now(),
            upstream: upstream.to_string(),
        }
    }
}

impl Drop for UpstreamTimer {
    fn drop(&mut self) {
        record_upstream_duration(&self.upstream, self.start.elapsed());
    }
}
