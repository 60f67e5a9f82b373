use {
    crate::{BlockInfo, BlockRetrieving},
    anyhow::Result,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
    tokio_stream::wrappers::WatchStream,
    tracing::Instrument,
};

pub type CurrentBlockStream = watch::Receiver<BlockInfo>;

/// Creates a cloneable stream that yields the current block whenever it
/// changes.
///
/// The stream is not guaranteed to yield *every* block individually
/// without gaps but it does yield the newest block whenever it detects a
/// block number increase.
pub async fn current_block_stream(
    retriever: Arc<dyn BlockRetrieving>,
    poll_interval: Duration,
) -> Result<CurrentBlockStream> {
    let first_block = retriever.current_block().await?;
    tracing::debug!(number = %first_block.number, hash = ?first_block.hash, "polled block");

    let (sender, receiver) = watch::channel(first_block);
    let update_future = async move {
        let mut previous_block = first_block;
        loop {
            tokio::time::sleep(poll_interval).await;
            let block = match retriever.current_block().await {
                Ok(block) => block,
                Err(err) => {
                    tracing::warn!("failed to get current block: {err:?}");
                    continue;
                }
            };

            // If the block is exactly the same, ignore it.
            if previous_block.hash == block.hash {
                continue;
            }

            // The new block is different but might still have the same
            // number; only update the stream if the number increased.
            tracing::debug!(number = %block.number, hash = ?block.hash, "polled block");
            if block.number <= previous_block.number {
                continue;
            }

            if sender.send(block).is_err() {
                tracing::debug!("exiting polling loop");
                break;
            }

            previous_block = block;
        }
    };

    tokio::task::spawn(update_future.instrument(tracing::info_span!("current_block_stream")));
    Ok(receiver)
}

/// A block stream with an initial value that never observes any new
/// blocks. Useful for testing and "mock" components.
pub fn mock_single_block(block: BlockInfo) -> CurrentBlockStream {
    let (sender, receiver) = watch::channel(block);
    // Make sure the `sender` never drops so the `receiver` stays open.
    std::mem::forget(sender);
    receiver
}

pub fn into_stream(receiver: CurrentBlockStream) -> WatchStream<BlockInfo> {
    WatchStream::new(receiver)
}

#[cfg(test)]
mod tests {
    use {super::*, crate::MockBlockRetrieving, futures::StreamExt};

    #[tokio::test]
    async fn mock_stream_yields_initial_block() {
        let block = BlockInfo {
            number: 5,
            ..Default::default()
        };
        let stream = mock_single_block(block);
        assert_eq!(stream.borrow().number, 5);

        let mut stream = into_stream(stream);
        assert_eq!(stream.next().await.unwrap().number, 5);
    }

    #[tokio::test]
    async fn stream_skips_non_increasing_blocks() {
        let mut retriever = MockBlockRetrieving::new();
        let mut number = 0;
        retriever.expect_current_block().returning(move || {
            number += 1;
            Ok(BlockInfo {
                // 1, 1, 2, 2, 3, ...
                number: (number + 1) / 2,
                hash: alloy_primitives::B256::with_last_byte(number as u8),
                ..Default::default()
            })
        });

        let stream = current_block_stream(Arc::new(retriever), Duration::from_millis(1))
            .await
            .unwrap();
        let mut stream = into_stream(stream);
        assert_eq!(stream.next().await.unwrap().number, 1);
        assert_eq!(stream.next().await.unwrap().number, 2);
        assert_eq!(stream.next().await.unwrap().number, 3);
    }
}
