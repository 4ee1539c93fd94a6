use crate::infrastructure::error::StoreError;
use crate::infrastructure::profile_document::record_name;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A change pushed by a live record subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent {
    Changed(Value),
    Removed,
}

/// Live feed of one record. Dropping (or cancelling) the handle unregisters
/// it from the store.
#[derive(Debug)]
pub struct RecordSubscription {
    record_id: String,
    events: mpsc::UnboundedReceiver<RecordEvent>,
}

impl RecordSubscription {
    pub fn new(record_id: impl Into<String>, events: mpsc::UnboundedReceiver<RecordEvent>) -> Self {
        Self {
            record_id: record_id.into(),
            events,
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Next pushed event, or `None` once the store stops the feed.
    pub async fn next(&mut self) -> Option<RecordEvent> {
        self.events.recv().await
    }

    pub fn cancel(mut self) {
        self.events.close();
    }
}

/// Hosted document store holding one profile record per user id.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<Option<Value>, StoreError>;

    async fn create_record(&self, id: &str, fields: Value) -> Result<(), StoreError>;

    async fn update_record(&self, id: &str, fields: Value) -> Result<(), StoreError>;

    async fn delete_record(&self, id: &str) -> Result<(), StoreError>;

    async fn subscribe(&self, id: &str) -> Result<RecordSubscription, StoreError>;

    /// Records whose `name` starts with `prefix`, keyed by user id.
    async fn search_by_name_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;

    async fn exists_by_name(&self, name: &str) -> Result<bool, StoreError>;
}

/// Process-local store. New subscriptions receive the current record first,
/// then every later write or delete of that record.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    records: Mutex<BTreeMap<String, Value>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RecordEvent>>>>,
}

impl InMemoryUserStore {
    /// Number of open subscriptions on `id`.
    pub fn active_subscriptions(&self, id: &str) -> usize {
        self.watchers
            .lock()
            .map(|watchers| {
                watchers
                    .get(id)
                    .map(|senders| senders.iter().filter(|sender| !sender.is_closed()).count())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>, StoreError> {
        self.records
            .lock()
            .map_err(|error| StoreError::Unavailable(format!("user store lock poisoned: {error}")))
    }

    fn write(&self, id: &str, fields: Value) -> Result<(), StoreError> {
        let id = normalized_id(id)?;
        if !fields.is_object() {
            return Err(StoreError::Malformed(format!("user {id}: record must be an object")));
        }
        self.records()?.insert(id.to_string(), fields.clone());
        self.notify(id, RecordEvent::Changed(fields));
        Ok(())
    }

    fn notify(&self, id: &str, event: RecordEvent) {
        let Ok(mut watchers) = self.watchers.lock() else {
            return;
        };
        if let Some(senders) = watchers.get_mut(id) {
            senders.retain(|sender| sender.send(event.clone()).is_ok());
            if senders.is_empty() {
                watchers.remove(id);
            }
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_record(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let id = normalized_id(id)?;
        Ok(self.records()?.get(id).cloned())
    }

    async fn create_record(&self, id: &str, fields: Value) -> Result<(), StoreError> {
        self.write(id, fields)
    }

    async fn update_record(&self, id: &str, fields: Value) -> Result<(), StoreError> {
        self.write(id, fields)
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        let id = normalized_id(id)?;
        let removed = self.records()?.remove(id);
        if removed.is_some() {
            self.notify(id, RecordEvent::Removed);
        }
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Result<RecordSubscription, StoreError> {
        let id = normalized_id(id)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(current) = self.records()?.get(id).cloned() {
            let _ = sender.send(RecordEvent::Changed(current));
        }
        self.watchers
            .lock()
            .map_err(|error| StoreError::Unavailable(format!("user store lock poisoned: {error}")))?
            .entry(id.to_string())
            .or_default()
            .push(sender);
        Ok(RecordSubscription::new(id, receiver))
    }

    async fn search_by_name_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let records = self.records()?;
        let mut matches = records
            .iter()
            .filter(|(_, record)| record_name(record).is_some_and(|name| name.starts_with(prefix)))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect::<Vec<_>>();
        matches.sort_by(|(_, left), (_, right)| record_name(left).cmp(&record_name(right)));
        Ok(matches)
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .records()?
            .values()
            .any(|record| record_name(record) == Some(name)))
    }
}

fn normalized_id(id: &str) -> Result<&str, StoreError> {
    let normalized = id.trim();
    if normalized.is_empty() {
        return Err(StoreError::PermissionDenied("record id must not be empty".to_string()));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> Value {
        serde_json::json!({
            "addedDateTime": "2026-02-16T09:00:00Z",
            "email": format!("{name}@example.com"),
            "name": name,
            "isUserNameSet": true,
            "isPremium": false,
        })
    }

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let store = InMemoryUserStore::default();
        assert_eq!(store.get_record("u1").await.expect("get"), None);

        store.create_record("u1", record("ana")).await.expect("create");
        assert_eq!(store.get_record("u1").await.expect("get"), Some(record("ana")));

        store.delete_record("u1").await.expect("delete");
        assert_eq!(store.get_record("u1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn rejects_empty_ids_and_non_object_records() {
        let store = InMemoryUserStore::default();
        assert!(matches!(
            store.get_record("  ").await,
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            store.update_record("u1", serde_json::json!([1, 2])).await,
            Err(StoreError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn subscription_sees_current_value_then_changes() {
        let store = InMemoryUserStore::default();
        store.create_record("u1", record("ana")).await.expect("create");

        let mut subscription = store.subscribe("u1").await.expect("subscribe");
        assert_eq!(subscription.record_id(), "u1");
        assert_eq!(subscription.next().await, Some(RecordEvent::Changed(record("ana"))));

        store.update_record("u1", record("anna")).await.expect("update");
        assert_eq!(subscription.next().await, Some(RecordEvent::Changed(record("anna"))));

        store.delete_record("u1").await.expect("delete");
        assert_eq!(subscription.next().await, Some(RecordEvent::Removed));
    }

    #[tokio::test]
    async fn cancelled_subscription_is_unregistered() {
        let store = InMemoryUserStore::default();
        let first = store.subscribe("u1").await.expect("subscribe");
        let second = store.subscribe("u1").await.expect("subscribe");
        assert_eq!(store.active_subscriptions("u1"), 2);

        first.cancel();
        assert_eq!(store.active_subscriptions("u1"), 1);

        drop(second);
        store.create_record("u1", record("ana")).await.expect("create");
        assert_eq!(store.active_subscriptions("u1"), 0);
    }

    #[tokio::test]
    async fn name_queries_match_prefix_and_exact_name() {
        let store = InMemoryUserStore::default();
        store.create_record("u1", record("anna")).await.expect("create");
        store.create_record("u2", record("ana")).await.expect("create");
        store.create_record("u3", record("bob")).await.expect("create");

        let found = store.search_by_name_prefix("an").await.expect("search");
        let names = found
            .iter()
            .filter_map(|(_, record)| record_name(record))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["ana", "anna"]);
        assert_eq!(found[0].0, "u2");

        assert!(store.exists_by_name("bob").await.expect("exists"));
        assert!(!store.exists_by_name("bo").await.expect("exists"));
    }
}
