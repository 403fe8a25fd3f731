//! Shared ticket stock

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use tracing::error;

/// Ticket stock shared by all windows.
///
/// `sell_one` reads and writes the stock in two separate steps, the way a
/// remote inventory would be updated. Callers must hold the lock.
pub struct TicketOffice {
    remaining: AtomicU32,
    /// ticket number -> window that sold it
    sold: DashMap<u32, String>,
    double_sold: AtomicU32,
}

impl TicketOffice {
    pub fn new(tickets: u32) -> Self {
        Self {
            remaining: AtomicU32::new(tickets),
            sold: DashMap::new(),
            double_sold: AtomicU32::new(0),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Sell the next ticket, `None` when sold out
    pub fn sell_one(&self, window: &str) -> Option<u32> {
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return None;
        }
        self.remaining.store(remaining - 1, Ordering::SeqCst);

        if let Some(previous) = self.sold.insert(remaining, window.to_string()) {
            self.double_sold.fetch_add(1, Ordering::SeqCst);
            error!(ticket = remaining, window, previous = %previous, "Ticket sold twice");
        }
        Some(remaining)
    }

    pub fn sold_count(&self) -> usize {
        self.sold.len()
    }

    pub fn double_sold(&self) -> u32 {
        self.double_sold.load(Ordering::SeqCst)
    }

    pub fn sales_by_window(&self) -> BTreeMap<String, usize> {
        let mut sales = BTreeMap::new();
        for entry in self.sold.iter() {
            *sales.entry(entry.value().clone()).or_insert(0) += 1;
        }
        sales
    }
}
