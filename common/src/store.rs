use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub state: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item `{0}` does not exist")]
    NotFound(String),
    #[error("item store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    // May wait indefinitely; callers bound the wait.
    async fn get_item(&self, name: &str) -> Result<Item, StoreError>;

    fn submit_item(&self, name: &str, state: &str);
}

#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<String, String>>,
    submissions: Mutex<Vec<Item>>,
}

impl MemoryItemStore {
    pub fn with_items<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let items = items
            .into_iter()
            .map(|(name, state)| (name.to_string(), state.to_string()))
            .collect();
        Self {
            items: Mutex::new(items),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self, name: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn set_state(&self, name: &str, state: &str) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), state.to_string());
    }

    pub fn submissions(&self) -> Vec<Item> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get_item(&self, name: &str) -> Result<Item, StoreError> {
        self.state(name)
            .map(|state| Item {
                name: name.to_string(),
                state,
            })
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn submit_item(&self, name: &str, state: &str) {
        self.set_state(name, state);
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Item {
                name: name.to_string(),
                state: state.to_string(),
            });
    }
}
