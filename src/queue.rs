//! Ordered work orders for one pick run.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{BinName, ProductName};

/// Pick `product` out of `bin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub bin: BinName,
    pub product: ProductName,
}

impl WorkOrder {
    pub fn new(bin: impl Into<BinName>, product: impl Into<ProductName>) -> Self {
        Self {
            bin: bin.into(),
            product: product.into(),
        }
    }
}

impl fmt::Display for WorkOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.product, self.bin)
    }
}

/// Front-to-back queue of work orders.
///
/// The window (`start`, `limit`) is fixed when the queue is built; there is
/// no reordering or retry here.
#[derive(Debug, Clone, Default)]
pub struct WorkOrderQueue {
    pending: VecDeque<(usize, WorkOrder)>,
    total: usize,
}

impl WorkOrderQueue {
    /// Queue every order.
    pub fn new(orders: Vec<WorkOrder>) -> Self {
        Self::window(orders, 0, None)
    }

    /// Queue orders starting at index `start`, at most `limit` of them.
    pub fn window(orders: Vec<WorkOrder>, start: usize, limit: Option<usize>) -> Self {
        let total = orders.len();
        let take = limit.unwrap_or(usize::MAX);
        let pending = orders
            .into_iter()
            .enumerate()
            .skip(start)
            .take(take)
            .collect();
        Self { pending, total }
    }

    /// Next order with its index in the original order list.
    pub fn next(&mut self) -> Option<(usize, WorkOrder)> {
        self.pending.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Size of the order list the queue was built from.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders(n: usize) -> Vec<WorkOrder> {
        (0..n)
            .map(|i| WorkOrder::new(format!("bin_{}", i), format!("product_{}", i)))
            .collect()
    }

    #[test]
    fn test_consumes_in_insertion_order() {
        let mut queue = WorkOrderQueue::new(orders(3));
        assert_eq!(queue.remaining(), 3);
        assert_eq!(queue.next().unwrap().0, 0);
        assert_eq!(queue.next().unwrap().1.product.as_str(), "product_1");
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.next().unwrap().0, 2);
        assert!(queue.next().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_window_start_and_limit() {
        let mut queue = WorkOrderQueue::window(orders(5), 1, Some(2));
        assert_eq!(queue.remaining(), 2);
        assert_eq!(queue.total(), 5);
        assert_eq!(queue.next().unwrap().0, 1);
        assert_eq!(queue.next().unwrap().0, 2);
        assert!(queue.next().is_none());
    }

    #[test]
    fn test_window_past_end_is_empty() {
        let queue = WorkOrderQueue::window(orders(2), 5, None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_display() {
        let order = WorkOrder::new("bin_A", "oreo_mega_stuf");
        assert_eq!(order.to_string(), "oreo_mega_stuf from bin_A");
    }
}
