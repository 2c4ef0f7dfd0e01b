use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Topic carrying claimed messages from producers to delivery workers.
pub const MESSAGE_SENDER_TOPIC: &str = "message-sender";

/// In-process registry of named, bounded topics.
///
/// Every topic on a bus carries the same payload type. Registration takes the
/// write lock; lookups share the read lock and run concurrently.
pub struct Bus<T> {
    topics: RwLock<HashMap<String, Topic<T>>>,
}

impl<T> fmt::Debug for Bus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics: Vec<String> = self
            .topics
            .read()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("Bus").field("topics", &topics).finish()
    }
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bus<T> {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the topic, replacing any existing one of the same name.
    ///
    /// Replacing drops the bus's handle to the old channel; anything still
    /// queued there is lost once the last holder lets go of it. Register each
    /// topic once, before producers and consumers start.
    pub fn register_channel(&self, topic: &str, buffer_size: usize) {
        let capacity = buffer_size.max(1);
        let mut guard = match self.topics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard
            .insert(topic.to_string(), Topic::new(topic, capacity))
            .is_some()
        {
            warn!(topic, "replaced existing bus topic; queued messages dropped");
        } else {
            debug!(topic, capacity, "registered bus topic");
        }
    }

    /// Returns a handle to the topic, or `None` when it was never registered.
    pub fn get_channel(&self, topic: &str) -> Option<Topic<T>> {
        let guard = match self.topics.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(topic).cloned()
    }
}

/// Cloneable handle to one bounded topic.
///
/// Any number of holders may publish. Receivers share a single queue, so each
/// message goes to exactly one of them: whichever asks first.
pub struct Topic<T> {
    name: Arc<str>,
    capacity: usize,
    sender: mpsc::Sender<T>,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            capacity: self.capacity,
            sender: self.sender.clone(),
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("queued", &self.queued())
            .finish()
    }
}

impl<T> Topic<T> {
    fn new(name: &str, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            name: Arc::from(name),
            capacity,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages published but not yet taken by a receiver.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Waits for a free slot, then enqueues. This wait is the pipeline's only
    /// backpressure.
    pub async fn publish(&self, message: T) -> Result<(), T> {
        self.sender.send(message).await.map_err(|err| err.0)
    }

    /// Enqueues only if a slot is free right now.
    pub fn try_publish(&self, message: T) -> Result<(), T> {
        self.sender.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(message)
            | mpsc::error::TrySendError::Closed(message) => message,
        })
    }

    /// Takes the next message. Concurrent receivers queue on the shared
    /// receiver; dropping the future gives up the place in line.
    pub async fn recv(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }
}
