use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use crate::errors::StoreError;
use crate::models::message::Message;
use crate::models::role::Role;

const EVENT_CAPACITY: usize = 256;

/// Change notifications published by the conversation store, in mutation order
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    Appended { index: usize, message: Message },
    Replaced { index: usize, message: Message },
    Removed { index: usize },
    Reset,
}

struct StoreInner {
    messages: Vec<Message>,
    epoch: u64,
    tail_open: bool,
}

/// The ordered message history of one conversation.
///
/// History is append-only except for the most recent message while it is an open
/// placeholder. Every write carries the epoch it was started under; a reset bumps the
/// epoch so late writes from an abandoned exchange are rejected with [`StoreError::Stale`].
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<HistoryEvent>,
    epochs: watch::Sender<u64>,
}

impl ConversationStore {
    pub fn new(system_prompt: Option<String>) -> Self {
        let messages = system_prompt
            .map(|prompt| vec![Message::system().with_text(prompt)])
            .unwrap_or_default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (epochs, _) = watch::channel(0);
        Self {
            inner: Mutex::new(StoreInner {
                messages,
                epoch: 0,
                tail_open: false,
            }),
            events,
            epochs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: HistoryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    /// The epoch new writes should be tagged with
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Resolves once the conversation has been reset past `epoch`
    pub async fn reset_since(&self, epoch: u64) {
        let mut epochs = self.epochs.subscribe();
        // The sender lives as long as the store, so this only returns on a reset
        let _ = epochs.wait_for(|current| *current != epoch).await;
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn last(&self) -> Option<Message> {
        self.lock().messages.last().cloned()
    }

    fn writable(&self, epoch: u64) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        let inner = self.lock();
        if inner.epoch != epoch {
            return Err(StoreError::Stale);
        }
        Ok(inner)
    }

    fn push(&self, epoch: u64, message: Message, open: bool) -> Result<usize, StoreError> {
        let mut inner = self.writable(epoch)?;
        if inner.tail_open {
            return Err(StoreError::PlaceholderOpen);
        }
        inner.messages.push(message.clone());
        inner.tail_open = open;
        let index = inner.messages.len() - 1;
        self.publish(HistoryEvent::Appended { index, message });
        Ok(index)
    }

    /// Append a committed message
    pub fn append(&self, epoch: u64, message: Message) -> Result<usize, StoreError> {
        self.push(epoch, message, false)
    }

    /// Append a message that stays mutable until it is committed or discarded
    pub fn append_placeholder(&self, epoch: u64, message: Message) -> Result<usize, StoreError> {
        self.push(epoch, message, true)
    }

    fn replace(&self, epoch: u64, message: Message, keep_open: bool) -> Result<(), StoreError> {
        let mut inner = self.writable(epoch)?;
        if !inner.tail_open {
            return Err(StoreError::NoPlaceholder);
        }
        let index = inner.messages.len() - 1;
        inner.messages[index] = message.clone();
        inner.tail_open = keep_open;
        self.publish(HistoryEvent::Replaced { index, message });
        Ok(())
    }

    /// Live-update the open placeholder, which stays open
    pub fn replace_last(&self, epoch: u64, message: Message) -> Result<(), StoreError> {
        self.replace(epoch, message, true)
    }

    /// Replace the open placeholder with its final value and close it
    pub fn commit_last(&self, epoch: u64, message: Message) -> Result<(), StoreError> {
        self.replace(epoch, message, false)
    }

    /// Drop the open placeholder, if there is one
    pub fn discard_placeholder(&self, epoch: u64) -> Result<bool, StoreError> {
        let mut inner = self.writable(epoch)?;
        if !inner.tail_open {
            return Ok(false);
        }
        inner.messages.pop();
        inner.tail_open = false;
        let index = inner.messages.len();
        self.publish(HistoryEvent::Removed { index });
        Ok(true)
    }

    /// Clear history back to the initial system message and invalidate in-flight writers
    pub fn reset(&self) {
        let mut inner = self.lock();
        let keep = match inner.messages.first() {
            Some(first) if first.role == Role::System => 1,
            _ => 0,
        };
        inner.messages.truncate(keep);
        inner.tail_open = false;
        inner.epoch += 1;
        self.epochs.send_replace(inner.epoch);
        self.publish(HistoryEvent::Reset);
    }
}
