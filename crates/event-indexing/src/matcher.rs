use {
    alloy_primitives::{Address, B256},
    ethrpc::Log,
    model::order::OrderKind,
    std::collections::HashSet,
};

/// Event shapes the indexer understands, across all protocol families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum EventSubKind {
    OrderFulfilled,
    OrderCancelled,
    CounterIncremented,
    SwapNftIn,
    SwapNftOut,
    AuctionSettled,
    AuctionCancelled,
    CollateralSeized,
}

/// Describes one recognizable protocol event. Topics come from the
/// `sol!`-generated signature hashes, so a descriptor can never drift
/// from the ABI it decodes with.
#[derive(Clone, Debug)]
pub struct EventDescriptor {
    pub kind: OrderKind,
    pub sub_kind: EventSubKind,
    pub topic: B256,
    pub num_topics: usize,
    /// When set, only logs emitted by these contracts match.
    pub address_filter: Option<HashSet<Address>>,
}

impl EventDescriptor {
    fn matches(&self, log: &Log) -> bool {
        let topics = log.inner.data.topics();
        if topics.first() != Some(&self.topic) || topics.len() != self.num_topics {
            return false;
        }
        match &self.address_filter {
            Some(addresses) => addresses.contains(&log.address()),
            None => true,
        }
    }
}

/// Pure lookup from a raw log to the descriptors it satisfies.
/// Overlapping descriptors are legal (protocols version their events) and
/// every match is dispatched.
pub struct EventRegistry {
    descriptors: Vec<EventDescriptor>,
}

impl EventRegistry {
    pub fn new(descriptors: Vec<EventDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn matching<'a>(&'a self, log: &Log) -> Vec<&'a EventDescriptor> {
        self.descriptors
            .iter()
            .filter(|descriptor| descriptor.matches(log))
            .collect()
    }

    /// All topic0 values of interest, for the `eth_getLogs` filter.
    pub fn topics(&self) -> Vec<B256> {
        let mut topics: Vec<_> = self
            .descriptors
            .iter()
            .map(|descriptor| descriptor.topic)
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy_primitives::{Bytes, Log as PrimitiveLog, LogData},
        maplit::hashset,
    };

    fn log(address: Address, topics: Vec<B256>) -> Log {
        Log {
            inner: PrimitiveLog {
                address,
                data: LogData::new(topics, Bytes::new()).unwrap(),
            },
            ..Default::default()
        }
    }

    fn descriptor(topic: B256, num_topics: usize) -> EventDescriptor {
        EventDescriptor {
            kind: OrderKind::OrderBook,
            sub_kind: EventSubKind::OrderFulfilled,
            topic,
            num_topics,
            address_filter: None,
        }
    }

    #[test]
    fn matches_on_topic_and_count() {
        let topic = B256::repeat_byte(1);
        let registry = EventRegistry::new(vec![descriptor(topic, 2)]);

        let matching = log(Address::ZERO, vec![topic, B256::repeat_byte(9)]);
        assert_eq!(registry.matching(&matching).len(), 1);

        // Same topic, wrong count.
        let wrong_count = log(Address::ZERO, vec![topic]);
        assert!(registry.matching(&wrong_count).is_empty());

        // Unknown topic.
        let unknown = log(
            Address::ZERO,
            vec![B256::repeat_byte(2), B256::repeat_byte(9)],
        );
        assert!(registry.matching(&unknown).is_empty());
    }

    #[test]
    fn address_filter_restricts_matches() {
        let topic = B256::repeat_byte(1);
        let exchange = Address::with_last_byte(5);
        let mut filtered = descriptor(topic, 1);
        filtered.address_filter = Some(hashset! {exchange});
        let registry = EventRegistry::new(vec![filtered]);

        assert_eq!(registry.matching(&log(exchange, vec![topic])).len(), 1);
        assert!(
            registry
                .matching(&log(Address::with_last_byte(6), vec![topic]))
                .is_empty()
        );
    }

    #[test]
    fn ambiguous_descriptors_all_match() {
        let topic = B256::repeat_byte(1);
        let mut versioned = descriptor(topic, 1);
        versioned.sub_kind = EventSubKind::OrderCancelled;
        let registry = EventRegistry::new(vec![descriptor(topic, 1), versioned]);

        let matches = registry.matching(&log(Address::ZERO, vec![topic]));
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn topics_are_deduplicated() {
        let topic = B256::repeat_byte(1);
        let registry = EventRegistry::new(vec![descriptor(topic, 1), descriptor(topic, 2)]);
        assert_eq!(registry.topics(), vec![topic]);
    }
}
