//! Change notices published after a successful save.
//!
//! The manager hands one [`ChangeNotice`] per changed tracked entity to its
//! [`ChangeSubscriber`] once the store has confirmed the write. Publishing is
//! fire-and-forget: a subscriber cannot fail the save.
//!
//! # Usage
//!
//! ```rust
//! use entigate_core::{ChangeFeed, ChangeKind, ChangeNotice, ChangeSubscriber};
//! use entigate_engine::EntityData;
//!
//! let feed = ChangeFeed::new();
//! let receiver = feed.subscribe();
//!
//! feed.publish(ChangeNotice::new("Main", ChangeKind::Insert, None, EntityData::new("tag")));
//! let event = receiver.recv().unwrap();
//! assert_eq!(event.sequence, 1);
//! assert_eq!(event.notice.shape, "tag");
//! ```

use entigate_engine::{EntityData, EntityState, Identifier};
use parking_lot::{Mutex, RwLock};
use std::sync::mpsc::{self, Receiver, Sender};

/// Kind of write a notice reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The entity was inserted.
    Insert,
    /// The entity was updated.
    Update,
    /// The entity was deleted.
    Delete,
}

impl ChangeKind {
    /// Maps a committed state to the write it produced.
    ///
    /// Returns `None` for states that do not write.
    #[must_use]
    pub fn from_state(state: EntityState) -> Option<Self> {
        match state {
            EntityState::Added => Some(Self::Insert),
            EntityState::Modified => Some(Self::Update),
            EntityState::Deleted => Some(Self::Delete),
            EntityState::Detached | EntityState::Unchanged => None,
        }
    }
}

/// A committed change of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotice {
    /// Connection the change was written to.
    pub connection: String,
    /// Shape of the entity.
    pub shape: String,
    /// Kind of write.
    pub kind: ChangeKind,
    /// Identifier of the entity, when it has one.
    pub identifier: Option<Identifier>,
    /// Values of the entity as written (original values for a delete).
    pub entity: EntityData,
}

impl ChangeNotice {
    /// Creates a notice.
    pub fn new(
        connection: impl Into<String>,
        kind: ChangeKind,
        identifier: Option<Identifier>,
        entity: EntityData,
    ) -> Self {
        Self {
            connection: connection.into(),
            shape: entity.shape.clone(),
            kind,
            identifier,
            entity,
        }
    }
}

/// Receives change notices from managers.
pub trait ChangeSubscriber: Send + Sync {
    /// Handles one notice. Must not block for long.
    fn publish(&self, notice: ChangeNotice);
}

/// A notice stamped with its position in a [`ChangeFeed`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    /// Position of the notice, starting at 1.
    pub sequence: u64,
    /// The notice.
    pub notice: ChangeNotice,
}

/// A subscriber that fans notices out to channel receivers.
///
/// The feed keeps a bounded history so late consumers can catch up with
/// [`ChangeFeed::poll`]. Disconnected receivers are dropped on the next
/// publish.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<FeedEvent>>>,
    history: RwLock<Vec<FeedEvent>>,
    next_sequence: Mutex<u64>,
    max_history: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    /// Creates a feed keeping the last 10 000 events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a feed with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            next_sequence: Mutex::new(1),
            max_history,
        }
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Events with a sequence above `cursor`, up to `limit`.
    #[must_use]
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<FeedEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence of the latest event, 0 if none.
    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map_or(0, |e| e.sequence)
    }

    /// Number of connected receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn emit(&self, notice: ChangeNotice) {
        let event = {
            let mut next = self.next_sequence.lock();
            let event = FeedEvent {
                sequence: *next,
                notice,
            };
            *next += 1;
            event
        };

        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl ChangeSubscriber for ChangeFeed {
    fn publish(&self, notice: ChangeNotice) {
        self.emit(notice);
    }
}
