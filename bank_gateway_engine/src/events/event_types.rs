use crate::db_types::{BankTransactionEntry, Order};

/// An order reached a state its merchant should hear about.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFinalizedEvent {
    pub order: Order,
}

impl OrderFinalizedEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }
}

/// Money arrived that could not be attributed to an order and needs a human.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUnlinkedEvent {
    pub entry: BankTransactionEntry,
    pub reason: String,
}

impl EntryUnlinkedEvent {
    pub fn new<S: Into<String>>(entry: BankTransactionEntry, reason: S) -> Self {
        Self { entry, reason: reason.into() }
    }
}
