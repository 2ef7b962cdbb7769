use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    cache::metrics::{
        METRIC_PIPELINE_MS, METRIC_PIPELINE_RUNS_TOTAL, METRIC_POOL_ENTRIES,
        METRIC_POOL_EVICTED_TOTAL, METRIC_POOL_LOOKUP_TOTAL, METRIC_STORE_READ_TOTAL,
        METRIC_STORE_WRITE_FAILED_TOTAL,
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every metric the service emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_POOL_LOOKUP_TOTAL,
            Unit::Count,
            "Generator pool lookups, labelled by whether an entry was reused or created."
        );
        describe_counter!(
            METRIC_POOL_EVICTED_TOTAL,
            Unit::Count,
            "Generator pool evictions, labelled by reason (expired or failed)."
        );
        describe_gauge!(
            METRIC_POOL_ENTRIES,
            Unit::Count,
            "Current number of generators held by the pool."
        );
        describe_counter!(
            METRIC_STORE_READ_TOTAL,
            Unit::Count,
            "Preview store reads, labelled by outcome (hit, miss or error)."
        );
        describe_counter!(
            METRIC_STORE_WRITE_FAILED_TOTAL,
            Unit::Count,
            "Generated previews that could not be written back to the store."
        );
        describe_counter!(
            METRIC_PIPELINE_RUNS_TOTAL,
            Unit::Count,
            "Decoder invocations, labelled by outcome."
        );
        describe_histogram!(
            METRIC_PIPELINE_MS,
            Unit::Milliseconds,
            "Decoder wall time in milliseconds."
        );
    });
}
