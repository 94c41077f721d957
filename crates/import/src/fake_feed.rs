//! Scripted feed source used by the task tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use evento_core::error::{EventoError, Result};
use evento_core::feed::{FeedPage, FeedSource, PageCursor};
use evento_core::models::import::ImportKind;

#[derive(Default)]
struct FeedState {
    records: HashMap<ImportKind, Vec<Value>>,
    /// Records only reachable by id, as when one slid between pages.
    by_id_only: HashMap<(ImportKind, i64), Value>,
    fail_pages: bool,
}

#[derive(Default)]
pub(crate) struct FakeFeed {
    state: Mutex<FeedState>,
}

fn record_id(kind: ImportKind, record: &Value) -> Option<i64> {
    let key = match kind {
        ImportKind::Users => "idAccount",
        ImportKind::Events | ImportKind::Admins => "idEvent",
    };
    record.get(key).and_then(Value::as_i64)
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: ImportKind, records: Vec<Value>) {
        self.state.lock().unwrap().records.insert(kind, records);
    }

    pub fn add_by_id_only(&self, kind: ImportKind, id: i64, record: Value) {
        self.state
            .lock()
            .unwrap()
            .by_id_only
            .insert((kind, id), record);
    }

    pub fn fail_pages(&self) {
        self.state.lock().unwrap().fail_pages = true;
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_page(&self, kind: ImportKind, cursor: &PageCursor) -> Result<FeedPage> {
        let state = self.state.lock().unwrap();
        if state.fail_pages {
            return Err(EventoError::Communication("feed unavailable".into()));
        }
        let all = state.records.get(&kind).cloned().unwrap_or_default();
        let start = (cursor.skip as usize).min(all.len());
        let end = (start + cursor.take as usize).min(all.len());
        Ok(FeedPage {
            records: all[start..end].to_vec(),
            has_more: end < all.len(),
        })
    }

    async fn fetch_by_id(&self, kind: ImportKind, evento_id: i64) -> Result<Option<Value>> {
        let state = self.state.lock().unwrap();
        if let Some(record) = state.by_id_only.get(&(kind, evento_id)) {
            return Ok(Some(record.clone()));
        }
        Ok(state
            .records
            .get(&kind)
            .and_then(|all| {
                all.iter()
                    .find(|r| record_id(kind, r) == Some(evento_id))
            })
            .cloned())
    }
}
