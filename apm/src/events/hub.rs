// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! WebSocket client registry. Delivery is best effort: a client whose
//! queue is full is dropped rather than allowed to stall the plane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;
use tokio::sync::mpsc;

/// Per-client outbound queue depth
const CLIENT_QUEUE: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct Hub {
    clients: Arc<RwLock<HashMap<u64, mpsc::Sender<String>>>>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    /// Attach a client; the receiver feeds its socket writer
    pub fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.write().expect("hub lock").insert(id, sender);
        debug!("websocket client {id} registered");
        (id, receiver)
    }

    pub fn unregister(&self, id: u64) {
        self.clients.write().expect("hub lock").remove(&id);
        debug!("websocket client {id} unregistered");
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().expect("hub lock").len()
    }

    /// Fan a frame out to every client, unregistering the slow and the gone
    pub fn broadcast(&self, frame: &str) {
        let stale: Vec<u64> = {
            let clients = self.clients.read().expect("hub lock");
            clients
                .iter()
                .filter_map(|(id, sender)| sender.try_send(frame.to_owned()).is_err().then_some(*id))
                .collect()
        };

        if !stale.is_empty() {
            let mut clients = self.clients.write().expect("hub lock");
            for id in stale {
                debug!("dropping slow websocket client {id}");
                clients.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all() {
        let hub = Hub::default();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.broadcast("ping");
        assert_eq!(rx_a.recv().await.unwrap(), "ping");
        assert_eq!(rx_b.recv().await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn slow_client_dropped() {
        let hub = Hub::default();
        let (_id, _rx) = hub.register();
        let (id_slow, rx_slow) = hub.register();
        // Close the receiver so sends fail immediately
        drop(rx_slow);

        hub.broadcast("frame");
        assert_eq!(hub.client_count(), 1);
        let _ = id_slow;
    }
}
