#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "event_indexing")]
pub(crate) struct Metrics {
    /// canonical fill events persisted
    pub fills_indexed: prometheus::IntCounter,
    /// logs that matched a descriptor but yielded no canonical event
    #[metric(labels("reason"))]
    pub logs_skipped: prometheus::IntCounterVec,
    /// blocks soft-deleted because they were orphaned by a reorg
    pub blocks_reorged: prometheus::IntCounter,
}

impl Metrics {
    pub(crate) fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
