/*!
 * Rooms and the poll each of them runs
 *
 * Every room is a single task which owns its poll and its subscribers, events
 * for a room are handled one at a time and in the order they were sent. There
 * is no lock around the poll since nothing outside of the room's task can
 * reach it.
 */
use async_std::channel::{self, Receiver, Sender};
use async_std::sync::Mutex;
use async_std::task;
use log::*;
use thiserror::Error;
use uuid::Uuid;

use std::collections::HashMap;
use std::sync::Arc;

use crate::api_models::ClientMessage;
use crate::broadcast::{BroadcastChannel, Subscriber};
use crate::models::{InsertablePoll, Poll, PollError};
use crate::store::{DurableStore, RoomStorage, StoreError};

/**
 * Storage key the room's poll lives under
 */
const POLL_KEY: &str = "poll";
const EVENT_BUFFER: usize = 100;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("room is no longer running")]
    Closed,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug)]
enum PollState {
    Uninitialized,
    Active(Poll),
}

/**
 * The authoritative poll for one room, along with the subscribers that need
 * to hear about every change to it
 */
pub struct PollRoom {
    state: PollState,
    started: bool,
    storage: RoomStorage,
    channel: BroadcastChannel,
}

impl PollRoom {
    pub fn new(storage: RoomStorage) -> Self {
        Self {
            state: PollState::Uninitialized,
            started: false,
            storage,
            channel: BroadcastChannel::default(),
        }
    }

    /**
     * Pick up whatever poll was last saved for this room
     *
     * Only the first call touches storage, after that this is a no-op.
     */
    pub async fn initialize(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        match self.storage.get::<Poll>(POLL_KEY).await {
            Ok(Some(poll)) => {
                info!("Loaded poll for room {}: {:?}", self.storage.room(), poll);
                self.state = PollState::Active(poll);
            }
            Ok(None) => debug!("No stored poll for room {}", self.storage.room()),
            Err(err) => error!(
                "Failed to load poll for room {}: {}",
                self.storage.room(),
                err
            ),
        }
    }

    /**
     * Replace whatever poll the room had with a brand new one
     */
    pub async fn create_poll(&mut self, request: InsertablePoll) -> Result<Poll, RoomError> {
        let poll = request.into_poll()?;
        info!("Creating poll in room {}: {:?}", self.storage.room(), poll);

        self.state = PollState::Active(poll.clone());
        self.persist(&poll).await;
        self.publish(&poll);
        Ok(poll)
    }

    /**
     * Count a vote for `option` and push the result out to every subscriber
     *
     * Votes which arrive before there is a poll are dropped, `Ok(None)` is
     * returned and nothing is sent.
     */
    pub async fn apply_vote(&mut self, option: i64) -> Result<Option<Poll>, RoomError> {
        let poll = match &mut self.state {
            PollState::Uninitialized => {
                debug!("Ignoring vote in room {}, no poll yet", self.storage.room());
                return Ok(None);
            }
            PollState::Active(poll) => {
                poll.vote(option)?;
                poll.clone()
            }
        };

        debug!(
            "Vote for {} in room {}, {} votes total",
            option,
            self.storage.room(),
            poll.total_votes()
        );
        self.persist(&poll).await;
        self.publish(&poll);
        Ok(Some(poll))
    }

    pub fn current_snapshot(&self) -> Option<&Poll> {
        match &self.state {
            PollState::Uninitialized => None,
            PollState::Active(poll) => Some(poll),
        }
    }

    pub fn subscribe(&mut self, id: Uuid, subscriber: Box<dyn Subscriber>) {
        self.channel.subscribe(id, subscriber);
        debug!(
            "{} joined room {} ({} connected)",
            id,
            self.storage.room(),
            self.channel.len()
        );
    }

    pub fn unsubscribe(&mut self, id: &Uuid) {
        if self.channel.unsubscribe(id) {
            debug!("{} left room {}", id, self.storage.room());
        }
        if self.channel.is_empty() {
            debug!("Room {} has nobody connected", self.storage.room());
        }
    }

    /**
     * Handle a raw text frame from one of the room's connections
     */
    pub async fn handle_message(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                debug!("Discarding message in room {}: {}", self.storage.room(), err);
                return;
            }
        };
        info!("Event in room {}: {:?}", self.storage.room(), message);

        match message {
            ClientMessage::Vote { option } => {
                if let Err(err) = self.apply_vote(option).await {
                    warn!("Rejected vote in room {}: {}", self.storage.room(), err);
                }
            }
        }
    }

    async fn persist(&self, poll: &Poll) {
        // The in-memory poll has already moved on, a failed save only costs durability
        if let Err(err) = self.storage.put(POLL_KEY, poll).await {
            error!(
                "Failed to persist poll for room {}: {}",
                self.storage.room(),
                err
            );
        }
    }

    pub fn subscribers(&self) -> usize {
        self.channel.len()
    }

    fn publish(&mut self, poll: &Poll) {
        match serde_json::to_string(poll) {
            Ok(payload) => self.channel.publish(&payload),
            Err(err) => error!("Failed to serialize poll: {}", err),
        }
    }
}

/**
 * Everything a room's task can be asked to do
 */
pub enum RoomEvent {
    Connected {
        id: Uuid,
        subscriber: Box<dyn Subscriber>,
    },
    Disconnected {
        id: Uuid,
    },
    Message {
        text: String,
    },
    Create {
        poll: InsertablePoll,
        reply_tx: Sender<Result<Poll, RoomError>>,
    },
    Snapshot {
        reply_tx: Sender<Option<Poll>>,
    },
    Subscribers {
        reply_tx: Sender<usize>,
    },
}

pub struct RoomActor {
    room: PollRoom,
}

impl RoomActor {
    /**
     * Start the task for a room and hand back the way to talk to it
     */
    pub fn spawn(storage: RoomStorage) -> RoomHandle {
        let (events_tx, events_rx) = channel::bounded(EVENT_BUFFER);
        let id = storage.room().to_string();
        let actor = Self {
            room: PollRoom::new(storage),
        };

        task::spawn(actor.run(events_rx));

        RoomHandle {
            id,
            events: events_tx,
        }
    }

    async fn run(mut self, events: Receiver<RoomEvent>) {
        self.room.initialize().await;

        while let Ok(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connected { id, subscriber } => {
                self.room.initialize().await;
                self.room.subscribe(id, subscriber);
            }
            RoomEvent::Disconnected { id } => self.room.unsubscribe(&id),
            RoomEvent::Message { text } => self.room.handle_message(&text).await,
            RoomEvent::Create { poll, reply_tx } => {
                let result = self.room.create_poll(poll).await;
                let _ = reply_tx.send(result).await;
            }
            RoomEvent::Snapshot { reply_tx } => {
                let _ = reply_tx.send(self.room.current_snapshot().cloned()).await;
            }
            RoomEvent::Subscribers { reply_tx } => {
                let _ = reply_tx.send(self.room.subscribers()).await;
            }
        }
    }
}

/**
 * Cheap, cloneable handle onto a running room
 */
#[derive(Clone)]
pub struct RoomHandle {
    id: String,
    events: Sender<RoomEvent>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn dispatch(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.events.send(event).await.map_err(|_| RoomError::Closed)
    }

    pub async fn connect(&self, id: Uuid, subscriber: Box<dyn Subscriber>) -> Result<(), RoomError> {
        self.dispatch(RoomEvent::Connected { id, subscriber }).await
    }

    pub async fn disconnect(&self, id: Uuid) -> Result<(), RoomError> {
        self.dispatch(RoomEvent::Disconnected { id }).await
    }

    pub async fn message(&self, text: String) -> Result<(), RoomError> {
        self.dispatch(RoomEvent::Message { text }).await
    }

    pub async fn create(&self, poll: InsertablePoll) -> Result<Poll, RoomError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.dispatch(RoomEvent::Create { poll, reply_tx }).await?;
        reply_rx.recv().await.map_err(|_| RoomError::Closed)?
    }

    pub async fn snapshot(&self) -> Result<Option<Poll>, RoomError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.dispatch(RoomEvent::Snapshot { reply_tx }).await?;
        reply_rx.recv().await.map_err(|_| RoomError::Closed)
    }

    pub async fn subscribers(&self) -> Result<usize, RoomError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.dispatch(RoomEvent::Subscribers { reply_tx }).await?;
        reply_rx.recv().await.map_err(|_| RoomError::Closed)
    }
}

/**
 * All of the rooms this process is hosting
 *
 * Rooms are started by anything that can change them (a connection or a
 * new poll). Reads only find rooms which are already running or have a poll
 * in storage, so looking up unknown ids leaves nothing behind.
 */
pub struct Rooms {
    store: Arc<dyn DurableStore>,
    rooms: Mutex<HashMap<String, RoomHandle>>,
}

impl Rooms {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub async fn room(&self, id: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Starting room {}", id);
                RoomActor::spawn(RoomStorage::new(id, self.store.clone()))
            })
            .clone()
    }

    /**
     * The running room for `id`, starting it only when storage holds a poll
     * for it
     */
    pub async fn find(&self, id: &str) -> Result<Option<RoomHandle>, StoreError> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(id) {
            return Ok(Some(room.clone()));
        }
        if self.store.load(id, POLL_KEY).await?.is_none() {
            return Ok(None);
        }

        info!("Starting room {} from storage", id);
        let room = RoomActor::spawn(RoomStorage::new(id, self.store.clone()));
        rooms.insert(id.to_string(), room.clone());
        Ok(Some(room))
    }

    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }
}
