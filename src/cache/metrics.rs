//! Metric names emitted by the pool and its generators.

pub const METRIC_POOL_LOOKUP_TOTAL: &str = "thumbgen_pool_lookup_total";
pub const METRIC_POOL_EVICTED_TOTAL: &str = "thumbgen_pool_evicted_total";
pub const METRIC_POOL_ENTRIES: &str = "thumbgen_pool_entries";
pub const METRIC_STORE_READ_TOTAL: &str = "thumbgen_store_read_total";
pub const METRIC_STORE_WRITE_FAILED_TOTAL: &str = "thumbgen_store_write_failed_total";
pub const METRIC_PIPELINE_RUNS_TOTAL: &str = "thumbgen_pipeline_runs_total";
pub const METRIC_PIPELINE_MS: &str = "thumbgen_pipeline_ms";
