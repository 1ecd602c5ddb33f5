//! A small, stateless pub-sub channel.
//!
//! Components publish events through an [`EventProducer`]; an [`EventHandler`] owns the receiving end and runs the
//! registered async handler for every event on its own task. Handlers only ever see the event, never the publisher,
//! which keeps reconciliation and expiry unaware of who (if anyone) is listening.
use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::FutureExt;
use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    name: &'static str,
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(name: &'static str, buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        Self { name, listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs until every producer has been dropped, then waits for in-flight handler jobs before returning.
    pub async fn start_handler(mut self) {
        debug!("📬️ Starting {} event handler", self.name);
        // Without this, the channel would never close, since we hold a sender ourselves
        drop(self.sender);
        let mut jobs = JoinSet::new();
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Handling {} event", self.name);
            let handler = Arc::clone(&self.handler);
            jobs.spawn(async move { (handler)(ev).await });
            // Reap whatever has already finished so the set does not grow without bound
            while let Some(Some(done)) = jobs.join_next().now_or_never() {
                if let Err(e) = done {
                    error!("📬️ A {} event handler job panicked: {e}", self.name);
                }
            }
        }
        debug!("📬️ All {} producers are gone. Waiting for {} job(s) to finish", self.name, jobs.len());
        while let Some(done) = jobs.join_next().await {
            if let Err(e) = done {
                error!("📬️ A {} event handler job panicked: {e}", self.name);
            }
        }
        debug!("📬️ {} event handler has shut down", self.name);
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    /// Waits for buffer space if the handler is behind. Fails only if the handler has shut down, which is logged.
    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}
