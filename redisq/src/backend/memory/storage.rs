use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{
    backend::{ChannelEvent, CollectionKind, QueueBackend, ReclaimReport, Subscription},
    Item, QueueError, QueueKeys, QueueResult,
};

const CHANNEL_CAPACITY: usize = 64;

/// Key space of the in-memory store
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) lists: HashMap<String, VecDeque<String>>,
    pub(crate) sorted: HashMap<String, HashMap<String, i64>>,
    pub(crate) hashes: HashMap<String, HashMap<String, String>>,
}

impl StoreState {
    fn list(&mut self, name: &str) -> &mut VecDeque<String> {
        self.lists.entry(name.to_string()).or_default()
    }

    fn hash(&mut self, name: &str) -> &mut HashMap<String, String> {
        self.hashes.entry(name.to_string()).or_default()
    }

    fn sorted(&mut self, name: &str) -> &mut HashMap<String, i64> {
        self.sorted.entry(name.to_string()).or_default()
    }

    fn hdel(&mut self, name: &str, field: &str) -> Option<String> {
        self.hashes.get_mut(name).and_then(|hash| hash.remove(field))
    }

    /// Remove a claim and its companions when the score still matches
    fn take_claim(&mut self, keys: &QueueKeys, id: &str, deadline: i64) -> Option<String> {
        let matches = self
            .sorted
            .get(&keys.processing)
            .and_then(|set| set.get(id))
            .is_some_and(|score| *score == deadline);
        if !matches {
            return None;
        }

        self.sorted(&keys.processing).remove(id);
        self.hdel(&keys.deliveries, id);
        self.hdel(&keys.processing_items, id)
    }
}

/// In-process stand-in for the shared store
///
/// All operations on one `MemoryBackend` (and its clones) serialize on a
/// single lock, which gives the same atomic-unit guarantee the Redis scripts
/// get from the server. Clones share state, so several engines built on
/// clones of one backend behave like separate consumers of one store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub(crate) state: Arc<Mutex<StoreState>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish on a channel; returns the number of live subscribers
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        let channels = self.channels.lock();
        channels
            .get(channel)
            .and_then(|sender| sender.send(message.to_string()).ok())
            .unwrap_or(0)
    }

    /// Append a raw record to the source queue without validation
    pub fn push_raw(&self, keys: &QueueKeys, record: &str) {
        self.state.lock().list(&keys.source).push_back(record.to_string());
        self.publish(&keys.channel, "push");
    }

    /// Deadline currently stored for a claim
    pub fn claim_deadline(&self, keys: &QueueKeys, id: &str) -> Option<i64> {
        let state = self.state.lock();
        state.sorted.get(&keys.processing).and_then(|set| set.get(id).copied())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn register(&self, _keys: &QueueKeys) -> QueueResult<()> {
        Ok(())
    }

    async fn enqueue(&self, keys: &QueueKeys, record: &str) -> QueueResult<()> {
        self.push_raw(keys, record);
        Ok(())
    }

    async fn claim(&self, keys: &QueueKeys, deadline: i64) -> QueueResult<Option<String>> {
        let mut state = self.state.lock();

        let Some(record) = state.list(&keys.source).pop_front() else {
            return Ok(None);
        };

        match Item::decode(&record) {
            Ok(item) => {
                let id = item.id().as_str();
                state.sorted(&keys.processing).insert(id.to_string(), deadline);
                state.hash(&keys.processing_items).insert(id.to_string(), record.clone());
                let deliveries = state.hash(&keys.deliveries).entry(id.to_string()).or_default();
                let count = deliveries.parse::<u64>().unwrap_or(0) + 1;
                *deliveries = count.to_string();
            }
            Err(_) => state.list(&keys.error).push_back(record.clone()),
        }

        Ok(Some(record))
    }

    async fn reclaim(
        &self,
        keys: &QueueKeys,
        now: i64,
        max_deliveries: Option<u32>,
    ) -> QueueResult<ReclaimReport> {
        let mut report = ReclaimReport::default();
        {
            let mut state = self.state.lock();

            // Same order as ZRANGEBYSCORE: by score, then member
            let mut expired: Vec<(i64, String)> = state
                .sorted
                .get(&keys.processing)
                .map(|set| {
                    set.iter()
                        .filter(|(_, score)| **score <= now)
                        .map(|(id, score)| (*score, id.clone()))
                        .collect()
                })
                .unwrap_or_default();
            expired.sort();

            for (_, id) in expired {
                state.sorted(&keys.processing).remove(&id);
                let record = state.hdel(&keys.processing_items, &id);
                let deliveries = state
                    .hashes
                    .get(&keys.deliveries)
                    .and_then(|hash| hash.get(&id))
                    .and_then(|count| count.parse::<u32>().ok())
                    .unwrap_or(0);

                let Some(record) = record else {
                    state.hdel(&keys.deliveries, &id);
                    continue;
                };

                match max_deliveries {
                    Some(limit) if limit > 0 && deliveries >= limit => {
                        state.hdel(&keys.deliveries, &id);
                        state.list(&keys.error).push_back(record);
                        report.dead_lettered += 1;
                    }
                    _ => {
                        state.list(&keys.source).push_back(record);
                        report.requeued += 1;
                    }
                }
            }
        }

        if report.requeued > 0 {
            self.publish(&keys.channel, "reclaim");
        }
        Ok(report)
    }

    async fn ack(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool> {
        Ok(self.state.lock().take_claim(keys, id, deadline).is_some())
    }

    async fn fail(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool> {
        let mut state = self.state.lock();
        match state.take_claim(keys, id, deadline) {
            Some(record) => {
                state.list(&keys.error).push_back(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn len(&self, name: &str, kind: CollectionKind) -> QueueResult<usize> {
        let state = self.state.lock();
        let len = match kind {
            CollectionKind::List => state.lists.get(name).map_or(0, VecDeque::len),
            CollectionKind::SortedSet => state.sorted.get(name).map_or(0, HashMap::len),
        };
        Ok(len)
    }

    async fn members(&self, name: &str, kind: CollectionKind) -> QueueResult<Vec<String>> {
        let state = self.state.lock();
        let members = match kind {
            CollectionKind::List => state
                .lists
                .get(name)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default(),
            CollectionKind::SortedSet => {
                let mut entries: Vec<(i64, String)> = state
                    .sorted
                    .get(name)
                    .map(|set| set.iter().map(|(id, score)| (*score, id.clone())).collect())
                    .unwrap_or_default();
                entries.sort();
                entries.into_iter().map(|(_, id)| id).collect()
            }
        };
        Ok(members)
    }

    async fn flush(&self, names: &[String]) -> QueueResult<()> {
        let mut state = self.state.lock();
        for name in names {
            state.lists.remove(name);
            state.sorted.remove(name);
            state.hashes.remove(name);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> QueueResult<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            receiver: self.sender(channel).subscribe(),
            unsubscribing: false,
        }))
    }
}

/// Broadcast-backed subscription
///
/// After `unsubscribe`, messages already buffered are still handed out
/// before the confirmation, mirroring how a pub/sub connection drains.
pub struct MemorySubscription {
    receiver: broadcast::Receiver<String>,
    unsubscribing: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_event(&mut self) -> QueueResult<ChannelEvent> {
        if self.unsubscribing {
            return match self.receiver.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => Ok(ChannelEvent::Message),
                Err(_) => Ok(ChannelEvent::Unsubscribed),
            };
        }

        match self.receiver.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => Ok(ChannelEvent::Message),
            Err(broadcast::error::RecvError::Closed) => {
                Err(QueueError::Store("notification channel closed".to_string()))
            }
        }
    }

    async fn unsubscribe(&mut self) -> QueueResult<()> {
        self.unsubscribing = true;
        Ok(())
    }
}
