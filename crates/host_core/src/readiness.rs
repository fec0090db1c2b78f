use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use shared::domain::ItemType;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{lock, TypeReadiness};

/// Latched one-shot readiness signal per item type.
#[derive(Default)]
pub struct ReadinessSignals {
    signals: Mutex<HashMap<ItemType, watch::Sender<bool>>>,
}

impl ReadinessSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self, item_type: impl Into<ItemType>) {
        let item_type = item_type.into();
        let mut signals = lock::lock(&self.signals);
        let sender = signals
            .entry(item_type.clone())
            .or_insert_with(|| watch::channel(false).0);
        if !*sender.borrow() {
            debug!(item_type = %item_type, "item type ready");
            sender.send_replace(true);
        }
    }

    pub fn is_ready(&self, item_type: &ItemType) -> bool {
        lock::lock(&self.signals)
            .get(item_type)
            .is_some_and(|sender| *sender.borrow())
    }

    fn subscribe(&self, item_type: &ItemType) -> watch::Receiver<bool> {
        lock::lock(&self.signals)
            .entry(item_type.clone())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }
}

#[async_trait]
impl TypeReadiness for ReadinessSignals {
    async fn when_ready(&self, item_type: &ItemType) {
        let mut receiver = self.subscribe(item_type);
        if receiver.wait_for(|ready| *ready).await.is_err() {
            warn!(item_type = %item_type, "readiness signal dropped before the type became ready");
        }
    }
}
