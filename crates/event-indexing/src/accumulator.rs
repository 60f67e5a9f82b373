use model::events::{BulkCancelEvent, CancelEvent, FillEvent, OnChainOrderInfo};

/// Canonical data produced by one handler invocation. Each handler
/// returns its own owned instance and the dispatcher merges them, so no
/// mutable state is shared across concurrently running handlers.
///
/// Fills are bucketed by the reconciliation policy their protocol
/// requires (see the event store).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OnChainData {
    /// One-shot sales: the referenced order is marked filled outright.
    pub fills: Vec<FillEvent>,
    /// Sales against partially fillable orders: remaining quantity is
    /// decremented per fill.
    pub partial_fills: Vec<FillEvent>,
    /// Sales whose order id was only discovered from transaction
    /// context: the order is updated last-writer-wins by chain position.
    pub matched_fills: Vec<FillEvent>,
    pub cancels: Vec<CancelEvent>,
    pub bulk_cancels: Vec<BulkCancelEvent>,
    /// Orders discovered on-chain along the way.
    pub orders: Vec<OnChainOrderInfo>,
}

impl OnChainData {
    pub fn merge(&mut self, other: OnChainData) {
        self.fills.extend(other.fills);
        self.partial_fills.extend(other.partial_fills);
        self.matched_fills.extend(other.matched_fills);
        self.cancels.extend(other.cancels);
        self.bulk_cancels.extend(other.bulk_cancels);
        self.orders.extend(other.orders);
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
            && self.partial_fills.is_empty()
            && self.matched_fills.is_empty()
            && self.cancels.is_empty()
            && self.bulk_cancels.is_empty()
            && self.orders.is_empty()
    }

    /// All fills regardless of reconciliation policy, e.g. for royalty
    /// enrichment.
    pub fn all_fills(&self) -> impl Iterator<Item = &FillEvent> {
        self.fills
            .iter()
            .chain(&self.partial_fills)
            .chain(&self.matched_fills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_concatenates_all_buckets() {
        let mut left = OnChainData {
            fills: vec![FillEvent::default()],
            ..Default::default()
        };
        let right = OnChainData {
            partial_fills: vec![FillEvent::default()],
            cancels: vec![CancelEvent::default()],
            ..Default::default()
        };
        left.merge(right);
        assert_eq!(left.fills.len(), 1);
        assert_eq!(left.partial_fills.len(), 1);
        assert_eq!(left.cancels.len(), 1);
        assert_eq!(left.all_fills().count(), 2);
        assert!(!left.is_empty());
        assert!(OnChainData::default().is_empty());
    }
}
