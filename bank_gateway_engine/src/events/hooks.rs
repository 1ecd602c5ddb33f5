use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EntryUnlinkedEvent, EventHandler, EventProducer, Handler, OrderFinalizedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_finalized_producer: Vec<EventProducer<OrderFinalizedEvent>>,
    pub entry_unlinked_producer: Vec<EventProducer<EntryUnlinkedEvent>>,
}

impl EventProducers {
    pub async fn publish_order_finalized(&self, event: OrderFinalizedEvent) {
        for producer in &self.order_finalized_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_entry_unlinked(&self, event: EntryUnlinkedEvent) {
        for producer in &self.entry_unlinked_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_order_finalized: Option<EventHandler<OrderFinalizedEvent>>,
    pub on_entry_unlinked: Option<EventHandler<EntryUnlinkedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_finalized =
            hooks.on_order_finalized.map(|f| EventHandler::new("order_finalized", buffer_size, f));
        let on_entry_unlinked = hooks.on_entry_unlinked.map(|f| EventHandler::new("entry_unlinked", buffer_size, f));
        Self { on_order_finalized, on_entry_unlinked }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_finalized {
            result.order_finalized_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_entry_unlinked {
            result.entry_unlinked_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_finalized {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_entry_unlinked {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_finalized: Option<Handler<OrderFinalizedEvent>>,
    pub on_entry_unlinked: Option<Handler<EntryUnlinkedEvent>>,
}

impl EventHooks {
    pub fn on_order_finalized<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderFinalizedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_finalized = Some(Arc::new(f));
        self
    }

    pub fn on_entry_unlinked<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EntryUnlinkedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_entry_unlinked = Some(Arc::new(f));
        self
    }
}
