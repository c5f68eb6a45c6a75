use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::client::AssistantsApi;
use crate::errors::AssistantError;
use crate::types::ConversationKey;

/// Per-key conversation state. Locking the slot serializes turns for one key.
#[derive(Debug, Default)]
pub struct SessionSlot {
    thread_id: Option<String>,
}

impl SessionSlot {
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Return the live thread id, creating a remote thread if none exists.
    ///
    /// A failed creation leaves the slot empty.
    pub fn get_or_create(&mut self, api: &dyn AssistantsApi) -> Result<String, AssistantError> {
        if let Some(thread_id) = &self.thread_id {
            return Ok(thread_id.clone());
        }
        let thread_id = api.create_thread().map_err(|err| {
            warn!("thread creation failed: {}", err);
            AssistantError::SessionCreationFailed(err.to_string())
        })?;
        self.thread_id = Some(thread_id.clone());
        Ok(thread_id)
    }

    pub fn reset(&mut self) -> Option<String> {
        self.thread_id.take()
    }
}

/// Maps conversation keys to remote thread ids for the lifetime of the process.
#[derive(Debug, Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<ConversationKey, Arc<Mutex<SessionSlot>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the slot for `key`, inserting an empty one if absent.
    pub fn slot(&self, key: &ConversationKey) -> Arc<Mutex<SessionSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.clone()).or_default().clone()
    }

    pub fn get_or_create(
        &self,
        key: &ConversationKey,
        api: &dyn AssistantsApi,
    ) -> Result<String, AssistantError> {
        let slot = self.slot(key);
        let mut slot = lock_slot(&slot);
        slot.get_or_create(api)
    }

    /// Discard the thread mapped to `key`; the next turn starts a fresh thread.
    /// Waits for an in-flight turn on the same key to finish.
    pub fn reset(&self, key: &ConversationKey) {
        let slot = self.slot(key);
        let previous = lock_slot(&slot).reset();
        if let Some(thread_id) = previous {
            info!("session {} reset (was thread {})", key, thread_id);
        }
    }

    pub fn thread_id(&self, key: &ConversationKey) -> Option<String> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(key).cloned()
        }?;
        let slot = lock_slot(&slot);
        slot.thread_id().map(str::to_string)
    }

    /// Number of keys that currently hold a thread.
    pub fn len(&self) -> usize {
        let slots: Vec<_> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().cloned().collect()
        };
        slots
            .iter()
            .filter(|slot| lock_slot(slot).thread_id.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn lock_slot(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Assistant, AssistantSpec, File, RemoteFile, Run, ThreadMessage, ToolOutput,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Only thread creation is exercised here.
    struct ThreadCounter {
        created: AtomicUsize,
        fail: bool,
    }

    impl ThreadCounter {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    impl AssistantsApi for ThreadCounter {
        fn create_thread(&self) -> Result<String, AssistantError> {
            if self.fail {
                return Err(AssistantError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("thread_{}", n))
        }
        fn add_message(&self, _: &str, _: &str, _: &[String]) -> Result<String, AssistantError> {
            unimplemented!()
        }
        fn create_run(&self, _: &str, _: &str) -> Result<Run, AssistantError> {
            unimplemented!()
        }
        fn retrieve_run(&self, _: &str, _: &str) -> Result<Run, AssistantError> {
            unimplemented!()
        }
        fn submit_tool_outputs(&self, _: &str, _: &str, _: &[ToolOutput]) -> Result<Run, AssistantError> {
            unimplemented!()
        }
        fn cancel_run(&self, _: &str, _: &str) -> Result<Run, AssistantError> {
            unimplemented!()
        }
        fn list_messages(&self, _: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
            unimplemented!()
        }
        fn file_content(&self, _: &str) -> Result<Vec<u8>, AssistantError> {
            unimplemented!()
        }
        fn upload_file(&self, _: &File) -> Result<String, AssistantError> {
            unimplemented!()
        }
        fn create_assistant(&self, _: &AssistantSpec) -> Result<Assistant, AssistantError> {
            unimplemented!()
        }
        fn retrieve_assistant(&self, _: &str) -> Result<Assistant, AssistantError> {
            unimplemented!()
        }
        fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError> {
            unimplemented!()
        }
        fn delete_assistant(&self, _: &str) -> Result<(), AssistantError> {
            unimplemented!()
        }
        fn list_files(&self, _: &str) -> Result<Vec<RemoteFile>, AssistantError> {
            unimplemented!()
        }
        fn delete_file(&self, _: &str) -> Result<(), AssistantError> {
            unimplemented!()
        }
    }

    #[test]
    fn distinct_keys_get_distinct_threads() {
        let api = ThreadCounter::new();
        let store = SessionStore::new();
        let a = store.get_or_create(&"slack:a@example.com".into(), &api).unwrap();
        let b = store.get_or_create(&"slack:b@example.com".into(), &api).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let api = ThreadCounter::new();
        let store = SessionStore::new();
        let key = ConversationKey::from("gmail:a@example.com");
        let first = store.get_or_create(&key, &api).unwrap();
        let second = store.get_or_create(&key, &api).unwrap();
        assert_eq!(first, second);
        assert_eq!(api.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_issues_a_fresh_thread() {
        let api = ThreadCounter::new();
        let store = SessionStore::new();
        let key = ConversationKey::from("a@example.com");
        let mut issued = vec![store.get_or_create(&key, &api).unwrap()];
        for _ in 0..3 {
            store.reset(&key);
            assert_eq!(store.thread_id(&key), None);
            let next = store.get_or_create(&key, &api).unwrap();
            assert!(!issued.contains(&next));
            issued.push(next);
        }
    }

    #[test]
    fn failed_creation_stores_nothing() {
        let api = ThreadCounter {
            created: AtomicUsize::new(0),
            fail: true,
        };
        let store = SessionStore::new();
        let key = ConversationKey::from("a@example.com");
        let err = store.get_or_create(&key, &api).unwrap_err();
        assert!(matches!(err, AssistantError::SessionCreationFailed(_)));
        assert_eq!(store.thread_id(&key), None);
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_first_messages_share_one_thread() {
        let api = Arc::new(ThreadCounter::new());
        let store = Arc::new(SessionStore::new());
        let key = ConversationKey::from("slack:a@example.com");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let api = api.clone();
                let store = store.clone();
                let key = key.clone();
                std::thread::spawn(move || store.get_or_create(&key, api.as_ref()).unwrap())
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(api.created.load(Ordering::SeqCst), 1);
    }
}
