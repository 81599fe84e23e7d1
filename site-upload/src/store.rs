//! In-memory item store: upload records, the dispatch queue and the event feed.
//!
//! The store is plain data. The manager owns it behind a single mutex, so
//! every mutation here is already serialized.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{ItemId, UploadError, UploadEvent, UploadItem, UploadPriority, UploadResult, UploadState};

/// Capacity of the event channel; slow subscribers see `Lagged` past this
pub const EVENT_CAPACITY: usize = 1000;

/// Counts per state plus the number of occupied dispatch slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub total: usize,
    pub queued: usize,
    pub compressing: usize,
    pub uploading: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub removed: usize,
    pub in_flight: usize,
    /// Mean `progress_percent` over items that were not removed
    pub overall_progress: u8,
}

impl UploadStats {
    /// Items not yet in a terminal state
    pub fn pending(&self) -> usize {
        self.queued + self.compressing + self.uploading + self.retrying
    }
}

pub struct ItemStore {
    items: HashMap<ItemId, UploadItem>,
    /// Destination paths of every record, so no two items share an object
    paths: HashSet<String>,
    /// Items waiting for a slot; higher priority first, FIFO within a priority
    queue: VecDeque<ItemId>,
    events: broadcast::Sender<UploadEvent>,
}

impl ItemStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            items: HashMap::new(),
            paths: HashSet::new(),
            queue: VecDeque::new(),
            events,
        }
    }

    pub fn events(&self) -> broadcast::Sender<UploadEvent> {
        self.events.clone()
    }

    pub fn publish(&self, event: UploadEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Add a new queued item. Ids and destination paths must be unused.
    pub fn insert(&mut self, item: UploadItem) -> UploadResult<()> {
        if self.items.contains_key(&item.id) {
            return Err(UploadError::config(format!("duplicate item id {}", item.id)));
        }
        if self.paths.contains(&item.destination_path) {
            return Err(UploadError::config(format!(
                "destination path {} is already in use",
                item.destination_path
            )));
        }

        let id = item.id.clone();
        let priority = item.priority;
        self.paths.insert(item.destination_path.clone());
        self.items.insert(id.clone(), item);
        self.enqueue(id, priority);
        Ok(())
    }

    pub fn path_in_use(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Put an existing item in line and announce it
    pub fn enqueue(&mut self, id: ItemId, priority: UploadPriority) {
        let items = &self.items;
        let position = self
            .queue
            .iter()
            .position(|queued| {
                items
                    .get(queued)
                    .map_or(true, |existing| priority > existing.priority)
            })
            .unwrap_or(self.queue.len());
        self.queue.insert(position, id.clone());

        self.publish(UploadEvent::Queued {
            item_id: id,
            priority,
            at: Utc::now(),
        });
    }

    /// Take the next item in line
    pub fn pop_next(&mut self) -> Option<ItemId> {
        self.queue.pop_front()
    }

    /// Drop `id` from the queue; false if it was not waiting
    pub fn dequeue(&mut self, id: &ItemId) -> bool {
        match self.queue.iter().position(|queued| queued == id) {
            Some(position) => {
                self.queue.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn queued_ids(&self) -> Vec<ItemId> {
        self.queue.iter().cloned().collect()
    }

    pub fn get(&self, id: &ItemId) -> Option<&UploadItem> {
        self.items.get(id)
    }

    /// Mutate an item, publishing `StateChanged` if its state moved
    pub fn update<R>(&mut self, id: &ItemId, f: impl FnOnce(&mut UploadItem) -> R) -> Option<R> {
        let item = self.items.get_mut(id)?;
        let from = item.state;
        let result = f(item);
        let to = item.state;

        if from != to {
            self.publish(UploadEvent::StateChanged {
                item_id: id.clone(),
                from,
                to,
                at: Utc::now(),
            });
        }
        Some(result)
    }

    /// Delete the record entirely
    pub fn remove(&mut self, id: &ItemId) -> Option<UploadItem> {
        self.dequeue(id);
        let item = self.items.remove(id)?;
        self.paths.remove(&item.destination_path);
        Some(item)
    }

    /// Empty the store, returning everything it held
    pub fn drain(&mut self) -> Vec<UploadItem> {
        self.queue.clear();
        self.paths.clear();
        self.items.drain().map(|(_, item)| item).collect()
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<UploadItem> {
        let mut items: Vec<UploadItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub fn by_state(&self, state: UploadState) -> Vec<UploadItem> {
        self.list().into_iter().filter(|item| item.state == state).collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.items.values().all(UploadItem::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self, in_flight: usize) -> UploadStats {
        let mut stats = UploadStats {
            total: self.items.len(),
            in_flight,
            ..UploadStats::default()
        };
        let mut progress_sum = 0u64;
        for item in self.items.values() {
            if item.state != UploadState::Removed {
                progress_sum += u64::from(item.progress_percent);
            }
            match item.state {
                UploadState::Queued => stats.queued += 1,
                UploadState::Compressing => stats.compressing += 1,
                UploadState::Uploading => stats.uploading += 1,
                UploadState::Retrying => stats.retrying += 1,
                UploadState::Succeeded => stats.succeeded += 1,
                UploadState::Failed => stats.failed += 1,
                UploadState::Removed => stats.removed += 1,
            }
        }
        let counted = (stats.total - stats.removed) as u64;
        if counted > 0 {
            stats.overall_progress = (progress_sum / counted) as u8;
        }
        stats
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}
