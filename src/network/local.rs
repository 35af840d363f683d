//! In-process bus: every published action reaches every other subscriber, in publish order per
//! sender, and never comes back to its sender.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::common::{Delivery, SessionAction};

use super::BusEndpoint;

struct Subscriber {
    tab_id: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Clone, Default)]
pub struct LocalBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `tab_id`. Only actions published after this call are delivered to it.
    /// Must be called inside a tokio runtime.
    pub fn subscribe(&self, tab_id: impl Into<String>) -> BusEndpoint {
        let tab_id = tab_id.into();
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let (outbound, mut outbound_receiver) = mpsc::unbounded_channel::<SessionAction>();

        self.lock().push(Subscriber {
            tab_id: tab_id.clone(),
            sender: inbound_sender,
        });
        log::debug!("{tab_id} subscribed to local bus");

        let bus = self.clone();
        tokio::spawn(async move {
            while let Some(action) = outbound_receiver.recv().await {
                bus.publish(&tab_id, action);
            }
            log::debug!("{tab_id} stopped publishing on local bus");
        });

        BusEndpoint { inbound, outbound }
    }

    /// Delivers `action` to every subscriber except `source`. Subscribers whose receiver is gone
    /// are forgotten.
    pub fn publish(&self, source: &str, action: SessionAction) {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| {
            if subscriber.tab_id == source {
                return !subscriber.sender.is_closed();
            }
            subscriber
                .sender
                .send(Delivery::new(source, action.clone()))
                .is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
