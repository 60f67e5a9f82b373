use {
    anyhow::{Result, ensure},
    ethrpc::{BlockInfo, block_stream::CurrentBlockStream},
    futures::{Stream, StreamExt, future::join_all},
    std::sync::Arc,
    tracing::Instrument,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Maintaining: Send + Sync {
    async fn run_maintenance(&self) -> Result<()>;
}

/// Collects all service components requiring maintenance on each new
/// block.
pub struct ServiceMaintenance {
    pub maintainers: Vec<Arc<dyn Maintaining>>,
}

#[async_trait::async_trait]
impl Maintaining for ServiceMaintenance {
    async fn run_maintenance(&self) -> Result<()> {
        let mut no_error = true;
        for result in join_all(self.maintainers.iter().map(|m| m.run_maintenance())).await {
            if let Err(err) = result {
                tracing::warn!(?err, "service maintenance error");
                no_error = false;
            }
        }

        ensure!(no_error, "maintenance encountered one or more errors");
        Ok(())
    }
}

impl ServiceMaintenance {
    async fn run_maintenance_for_block_stream(self, block_stream: impl Stream<Item = BlockInfo>) {
        futures::pin_mut!(block_stream);

        let metrics = Metrics::instance(observe::metrics::get_storage_registry()).unwrap();

        while let Some(block) = block_stream.next().await {
            tracing::debug!(number = block.number, hash = ?block.hash, "running maintenance");

            metrics.last_seen_block.set(i64::try_from(block.number).unwrap_or(i64::MAX));

            if self
                .run_maintenance()
                .instrument(tracing::debug_span!("maintenance", block = block.number))
                .await
                .is_ok()
            {
                metrics
                    .last_updated_block
                    .set(i64::try_from(block.number).unwrap_or(i64::MAX));
            }
        }
    }

    pub async fn run_maintenance_on_new_block(self, current_block_stream: CurrentBlockStream) -> ! {
        self.run_maintenance_for_block_stream(ethrpc::block_stream::into_stream(
            current_block_stream,
        ))
        .await;
        unreachable!()
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "maintenance")]
struct Metrics {
    /// Last block seen by the maintenance loop.
    #[metric()]
    last_seen_block: prometheus::IntGauge,

    /// Last block all maintainers processed successfully.
    #[metric()]
    last_updated_block: prometheus::IntGauge,
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::bail};

    #[tokio::test]
    async fn run_maintenance_ignores_errors() {
        let mut ok_mock_maintenance = MockMaintaining::new();
        let mut err_mock_maintenance = MockMaintaining::new();
        ok_mock_maintenance
            .expect_run_maintenance()
            .times(1)
            .returning(|| Ok(()));
        err_mock_maintenance
            .expect_run_maintenance()
            .times(1)
            .returning(|| bail!("failed maintenance"));

        let service_maintenance = ServiceMaintenance {
            maintainers: vec![
                Arc::new(ok_mock_maintenance),
                Arc::new(err_mock_maintenance),
            ],
        };

        assert!(service_maintenance.run_maintenance().await.is_err());
    }

    #[tokio::test]
    async fn block_stream_maintenance() {
        let block_count = 2;
        let mut mock_maintenance = MockMaintaining::new();
        // Will panic if run_maintenance is not called exactly
        // `block_count` times.
        mock_maintenance
            .expect_run_maintenance()
            .times(block_count)
            .returning(|| Ok(()));
        let service_maintenance = ServiceMaintenance {
            maintainers: vec![Arc::new(mock_maintenance)],
        };

        let block_stream = futures::stream::repeat(BlockInfo::default()).take(block_count);
        service_maintenance
            .run_maintenance_for_block_stream(block_stream)
            .await;
    }
}
