use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::db::StorageError;
use crate::hands::record::{HandPage, HandRecord};

use super::HandRecordStorage;

#[derive(Clone, Default)]
pub struct InMemoryHandStorage {
    records: Arc<RwLock<HashMap<String, HandRecord>>>,
    fail_next_upsert: Arc<AtomicBool>,
}

impl InMemoryHandStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_next_upsert(&self) {
        self.fail_next_upsert.store(true, Ordering::SeqCst);
    }

    fn page<F>(&self, limit: u64, offset: u64, keep: F) -> HandPage
    where
        F: Fn(&HandRecord) -> bool,
    {
        let records = self.records.read();
        let mut matching: Vec<&HandRecord> = records.values().filter(|r| keep(r)).collect();
        matching.sort_by_key(|r| (Reverse(r.completed_at), r.hand_id.clone()));
        HandPage {
            total: matching.len() as u64,
            hands: matching
                .into_iter()
                .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .cloned()
                .collect(),
        }
    }
}

#[async_trait]
impl HandRecordStorage for InMemoryHandStorage {
    async fn upsert(
        &self,
        record: &HandRecord,
        _updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if self.fail_next_upsert.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected upsert failure".into()));
        }
        self.records
            .write()
            .insert(record.hand_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, hand_id: &str) -> Result<Option<HandRecord>, StorageError> {
        Ok(self.records.read().get(hand_id).cloned())
    }

    async fn list_by_table(
        &self,
        table_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<HandPage, StorageError> {
        Ok(self.page(limit, offset, |r| r.table_id == table_id))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<HandPage, StorageError> {
        Ok(self.page(limit, offset, |r| r.is_participant(user_id)))
    }
}
