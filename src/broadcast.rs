use async_std::channel::{self, Receiver, Sender, TrySendError};
use async_std::task;
use async_trait::async_trait;
use log::*;
use tide_websockets::WebSocketConnection;
use uuid::Uuid;

use std::collections::HashMap;

/**
 * How many snapshots may be waiting on a single connection before it is
 * considered stuck and dropped
 */
const SUBSCRIBER_BUFFER: usize = 32;

/**
 * Anything a room can push a text payload down to
 */
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn send(&self, payload: &str) -> Result<(), crate::room::RoomError>;
}

#[async_trait]
impl Subscriber for WebSocketConnection {
    async fn send(&self, payload: &str) -> Result<(), crate::room::RoomError> {
        self.send_string(payload.to_string())
            .await
            .map_err(|err| crate::room::RoomError::Delivery(err.to_string()))
    }
}

/**
 * Drain one subscriber's queue until it goes away or a send fails
 */
async fn deliver(id: Uuid, subscriber: Box<dyn Subscriber>, queue: Receiver<String>) {
    while let Ok(payload) = queue.recv().await {
        if let Err(err) = subscriber.send(&payload).await {
            warn!("Dropping subscriber {}: {}", id, err);
            break;
        }
    }
}

/**
 * The set of connections currently attached to a room
 *
 * Every subscriber gets its own queue and its own task writing to it, so a
 * slow connection never holds up the room. Delivery is best-effort and only
 * to whoever is attached at the time of the publish: a subscriber whose queue
 * is full or whose connection failed is dropped.
 */
#[derive(Default)]
pub struct BroadcastChannel {
    subscribers: HashMap<Uuid, Sender<String>>,
}

impl BroadcastChannel {
    pub fn subscribe(&mut self, id: Uuid, subscriber: Box<dyn Subscriber>) {
        let (queue_tx, queue_rx) = channel::bounded(SUBSCRIBER_BUFFER);
        task::spawn(deliver(id, subscriber, queue_rx));
        self.subscribers.insert(id, queue_tx);
    }

    pub fn unsubscribe(&mut self, id: &Uuid) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn publish(&mut self, payload: &str) {
        self.subscribers
            .retain(|id, queue| match queue.try_send(payload.to_string()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, dropping it", id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} has gone away", id);
                    false
                }
            });
    }
}
