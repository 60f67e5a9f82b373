pub mod auction_house;
pub mod loan_collateral;
pub mod order_book;
pub mod pool;

use {
    crate::{
        accumulator::OnChainData,
        context::{CallOccurrences, HandlerContext},
        matcher::{EventDescriptor, EventRegistry, EventSubKind},
    },
    anyhow::Result,
    async_trait::async_trait,
    ethrpc::Log,
    itertools::Itertools,
    model::{events::BaseEventParams, order::OrderKind},
    std::{collections::HashMap, sync::Arc},
};

/// A raw log together with the descriptor that matched it and its
/// canonical on-chain position.
#[derive(Clone, Debug)]
pub struct MatchedEvent {
    pub sub_kind: EventSubKind,
    pub log: Log,
    pub base: BaseEventParams,
}

/// One implementation per marketplace protocol family. Handlers decode
/// their protocol's events into canonical data; they never write to
/// storage themselves.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn kind(&self) -> OrderKind;

    /// The event shapes this handler wants dispatched to it.
    fn descriptors(&self) -> Vec<EventDescriptor>;

    /// Processes one batch of matched events into an owned accumulator.
    /// `occurrences` is shared by all handler invocations of the same
    /// dispatch and by nothing else. Expected per-event skips are handled
    /// internally; an error means infrastructure failure and aborts the
    /// batch.
    async fn handle(
        &self,
        events: &[MatchedEvent],
        ctx: &HandlerContext,
        occurrences: &CallOccurrences,
    ) -> Result<OnChainData>;
}

pub fn all_handlers() -> Vec<Arc<dyn ProtocolHandler>> {
    vec![
        Arc::new(order_book::OrderBook),
        Arc::new(pool::Pool),
        Arc::new(auction_house::AuctionHouse),
        Arc::new(loan_collateral::LoanCollateral),
    ]
}

/// Dispatch table from `(order kind, event sub-kind)` to the handler
/// responsible for it, plus the descriptor registry for matching.
pub struct HandlerRegistry {
    handlers: HashMap<(OrderKind, EventSubKind), Arc<dyn ProtocolHandler>>,
    events: EventRegistry,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn ProtocolHandler>>) -> Self {
        let mut table = HashMap::new();
        let mut descriptors = Vec::new();
        for handler in handlers {
            for descriptor in handler.descriptors() {
                table.insert((descriptor.kind, descriptor.sub_kind), handler.clone());
                descriptors.push(descriptor);
            }
        }
        Self {
            handlers: table,
            events: EventRegistry::new(descriptors),
        }
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Matches the logs, groups them per handler and runs every handler
    /// over its share of the batch, merging the owned results.
    pub async fn dispatch(
        &self,
        logs: &[Log],
        timestamps: &HashMap<u64, u64>,
        ctx: &HandlerContext,
    ) -> Result<OnChainData> {
        let mut per_handler: HashMap<(OrderKind, EventSubKind), Vec<MatchedEvent>> = HashMap::new();
        for log in logs {
            for descriptor in self.events.matching(log) {
                let timestamp = log
                    .block_timestamp
                    .or_else(|| {
                        log.block_number
                            .and_then(|number| timestamps.get(&number).copied())
                    })
                    .unwrap_or_default();
                let Some(base) = base_event_params(log, timestamp) else {
                    // Pending or otherwise incomplete logs cannot be
                    // deduplicated and are dropped here.
                    tracing::debug!("dropping log without complete on-chain position");
                    continue;
                };
                per_handler
                    .entry((descriptor.kind, descriptor.sub_kind))
                    .or_default()
                    .push(MatchedEvent {
                        sub_kind: descriptor.sub_kind,
                        log: log.clone(),
                        base,
                    });
            }
        }

        let mut data = OnChainData::default();
        // Occurrence ranks are scoped to this dispatch so reprocessing the
        // same batch resolves the same sub-calls again.
        let occurrences = CallOccurrences::default();
        // Deterministic handler order keeps reprocessing reproducible.
        for key in per_handler.keys().copied().sorted() {
            let events = &per_handler[&key];
            let handler = self
                .handlers
                .get(&key)
                .expect("dispatch table covers every registered descriptor");
            data.merge(handler.handle(events, ctx, &occurrences).await?);
        }
        Ok(data)
    }
}

/// The canonical on-chain position of a log. `None` when the log has not
/// actually landed in a block.
pub fn base_event_params(log: &Log, timestamp: u64) -> Option<BaseEventParams> {
    Some(BaseEventParams {
        address: log.address(),
        block: log.block_number?,
        block_hash: log.block_hash?,
        tx_hash: log.transaction_hash?,
        tx_index: log.transaction_index?,
        log_index: log.log_index?,
        // Handlers emitting several canonical events from one log bump
        // this per event.
        batch_index: 1,
        timestamp,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use {
        super::*,
        alloy_primitives::{Address, B256, Bytes, Log as PrimitiveLog, LogData},
        alloy_sol_types::SolEvent,
    };

    /// Builds an rpc log carrying `event` as emitted by `address`.
    pub fn log_for_event<E: SolEvent>(address: Address, event: &E, log_index: u64) -> Log {
        let data = event.encode_log_data();
        Log {
            inner: PrimitiveLog { address, data },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(100),
            block_timestamp: Some(1_700_000_000),
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(3),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    pub fn matched<E: SolEvent>(
        sub_kind: EventSubKind,
        address: Address,
        event: &E,
        log_index: u64,
    ) -> MatchedEvent {
        let log = log_for_event(address, event, log_index);
        let base = base_event_params(&log, 1_700_000_000).unwrap();
        MatchedEvent {
            sub_kind,
            log,
            base,
        }
    }

    /// An empty-bodied log (events whose payload is entirely implied by
    /// the transaction context).
    pub fn matched_raw(
        sub_kind: EventSubKind,
        address: Address,
        topic: B256,
        log_index: u64,
    ) -> MatchedEvent {
        let log = Log {
            inner: PrimitiveLog {
                address,
                data: LogData::new(vec![topic], Bytes::new()).unwrap(),
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(100),
            block_timestamp: Some(1_700_000_000),
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(3),
            log_index: Some(log_index),
            ..Default::default()
        };
        let base = base_event_params(&log, 1_700_000_000).unwrap();
        MatchedEvent {
            sub_kind,
            log,
            base,
        }
    }
}
