use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static SESSION_RENEWALS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "session_renewals_total",
            "Access token renewals attempted by the session proxy",
        ),
        &["outcome"],
    )
    .expect("valid session_renewals_total metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PROXY_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "proxy_outcomes_total",
            "Authenticated backend calls by execution outcome",
        ),
        &["outcome"],
    )
    .expect("valid proxy_outcomes_total metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Wall time of one logical call, renewal and retry included.
pub static PROXY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new(
            "proxy_call_duration_seconds",
            "Time spent executing an authenticated backend call",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 70.0]),
        &["outcome"],
    )
    .expect("valid proxy_call_duration_seconds metric");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub fn export_prometheus() -> String {
    Lazy::force(&SESSION_RENEWALS);
    Lazy::force(&PROXY_OUTCOMES);
    Lazy::force(&PROXY_DURATION);
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
