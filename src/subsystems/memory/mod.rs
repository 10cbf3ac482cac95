//! Memory subsystem: ordered, per-conversation chat history.
//!
//! [`MessageStore`] is the async face of [`history::HistoryFile`].  Writes
//! and reads for one `(conversation, data_dir)` pair go through a dedicated
//! async mutex, so concurrent turns on the same conversation are serialised
//! while different conversations never wait on each other.
//!
//! File I/O is dispatched to `tokio::task::spawn_blocking`.  The conversation
//! guard moves into the blocking closure, so it is held until the file I/O
//! finishes even if the caller's future is dropped.  Each write is an atomic
//! replace, so a turn is either fully stored or not at all.

pub mod history;
pub mod types;

pub use types::{ChatMessage, Role};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::StorageError;
use history::HistoryFile;

type ConversationLock = Arc<AsyncMutex<()>>;

/// Process-wide message persistence, scoped by storage directory.
#[derive(Debug, Default)]
pub struct MessageStore {
    /// FIFO cap per conversation; `None` keeps everything.
    history_cap: Option<usize>,
    /// history path -> lock serialising that conversation's I/O.  Entries
    /// nobody holds are pruned after each operation.
    locks: Mutex<HashMap<PathBuf, ConversationLock>>,
}

impl MessageStore {
    pub fn new(history_cap: Option<usize>) -> Self {
        Self { history_cap, locks: Mutex::new(HashMap::new()) }
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<PathBuf, ConversationLock>> {
        // The table only holds `Arc`s; a panic elsewhere cannot leave it torn.
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn conversation_lock(&self, path: &Path) -> ConversationLock {
        self.locks()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the table entry for `path` when only the table still refers to it.
    /// Clones are made under the table lock, so the count cannot rise here.
    fn prune_lock(&self, path: &Path) {
        let mut locks = self.locks();
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
    }

    /// Number of conversations with a lock entry.
    pub fn tracked_conversations(&self) -> usize {
        self.locks().len()
    }

    /// Run `op` on the blocking pool while holding the conversation's lock.
    async fn with_history<T, F>(
        &self,
        file: HistoryFile,
        what: &'static str,
        op: F,
    ) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&HistoryFile) -> Result<T, StorageError> + Send + 'static,
    {
        let path = file.path().to_path_buf();
        let guard = self.conversation_lock(&path).lock_owned().await;

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op(&file)
        })
        .await
        .map_err(|e| StorageError::Join(format!("{what}: {e}")));

        self.prune_lock(&path);
        result?
    }

    /// Durably record one message.
    pub async fn append(
        &self,
        conversation_id: &str,
        data_dir: &Path,
        message: ChatMessage,
    ) -> Result<(), StorageError> {
        self.append_all(conversation_id, data_dir, vec![message]).await
    }

    /// Record a user message and its reply as one atomic write.  The pair is
    /// contiguous in the log regardless of concurrent turns.
    pub async fn append_turn(
        &self,
        conversation_id: &str,
        data_dir: &Path,
        user: ChatMessage,
        assistant: ChatMessage,
    ) -> Result<(), StorageError> {
        self.append_all(conversation_id, data_dir, vec![user, assistant]).await
    }

    async fn append_all(
        &self,
        conversation_id: &str,
        data_dir: &Path,
        messages: Vec<ChatMessage>,
    ) -> Result<(), StorageError> {
        let count = messages.len();
        let cap = self.history_cap;
        self.with_history(HistoryFile::new(data_dir, conversation_id), "append", move |file| {
            file.append(&messages, cap)
        })
        .await?;

        debug!(conversation = %conversation_id, appended = count, "messages appended");
        Ok(())
    }

    /// All messages for the conversation in append order.
    pub async fn list(
        &self,
        conversation_id: &str,
        data_dir: &Path,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        self.with_history(HistoryFile::new(data_dir, conversation_id), "list", |file| file.read())
            .await
    }

    /// Remove every message for the conversation.  Idempotent.
    pub async fn clear(&self, conversation_id: &str, data_dir: &Path) -> Result<(), StorageError> {
        self.with_history(HistoryFile::new(data_dir, conversation_id), "clear", |file| file.clear())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn list_empty_conversation() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::new(None);
        assert!(store.list("default", dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_list_in_order() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::new(None);
        store.append("c1", dir.path(), ChatMessage::user("one")).await.unwrap();
        store
            .append_turn("c1", dir.path(), ChatMessage::user("two"), ChatMessage::assistant("three"))
            .await
            .unwrap();

        let msgs = store.list("c1", dir.path()).await.unwrap();
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn clear_twice_is_fine() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::new(None);
        store.append("c1", dir.path(), ChatMessage::user("x")).await.unwrap();
        store.clear("c1", dir.path()).await.unwrap();
        store.clear("c1", dir.path()).await.unwrap();
        assert!(store.list("c1", dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_id_in_different_dirs_is_separate() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let store = MessageStore::new(None);
        store.append("default", a.path(), ChatMessage::user("in a")).await.unwrap();
        assert_eq!(store.list("default", a.path()).await.unwrap().len(), 1);
        assert!(store.list("default", b.path()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_turns_never_interleave() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MessageStore::new(None));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let path = dir.path().to_path_buf();
            tasks.push(tokio::spawn(async move {
                store
                    .append_turn(
                        "busy",
                        &path,
                        ChatMessage::user(format!("q{i}")),
                        ChatMessage::assistant(format!("a{i}")),
                    )
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let msgs = store.list("busy", dir.path()).await.unwrap();
        assert_eq!(msgs.len(), 32);
        for pair in msgs.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].text[1..], pair[1].text[1..]);
        }
    }

    #[tokio::test]
    async fn store_cap_applies() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::new(Some(4));
        for i in 0..3 {
            store
                .append_turn(
                    "c",
                    dir.path(),
                    ChatMessage::user(format!("q{i}")),
                    ChatMessage::assistant(format!("a{i}")),
                )
                .await
                .unwrap();
        }
        let msgs = store.list("c", dir.path()).await.unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].text, "q1");
    }

    #[tokio::test]
    async fn odd_cap_keeps_whole_turns() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::new(Some(3));
        for i in 0..2 {
            store
                .append_turn(
                    "c",
                    dir.path(),
                    ChatMessage::user(format!("q{i}")),
                    ChatMessage::assistant(format!("a{i}")),
                )
                .await
                .unwrap();
        }
        let roles: Vec<_> = store.list("c", dir.path()).await.unwrap().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_append_does_not_clobber_next_turn() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MessageStore::new(None));

        for round in 0..4 {
            let slow = {
                let store = store.clone();
                let path = dir.path().to_path_buf();
                tokio::spawn(async move {
                    store
                        .append_turn(
                            "c",
                            &path,
                            ChatMessage::user("x".repeat(8 * 1024 * 1024)),
                            ChatMessage::assistant("big"),
                        )
                        .await
                })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            slow.abort();

            let marker = format!("after abort {round}");
            store
                .append_turn("c", dir.path(), ChatMessage::user(marker.clone()), ChatMessage::assistant("ok"))
                .await
                .unwrap();

            let msgs = store.list("c", dir.path()).await.unwrap();
            assert!(msgs.iter().any(|m| m.text == marker), "round {round}: acknowledged turn lost");
            for pair in msgs.chunks(2) {
                assert_eq!(pair[0].role, Role::User);
                assert_eq!(pair[1].role, Role::Assistant);
            }
        }

        // Every earlier acknowledged turn is still there.
        let msgs = store.list("c", dir.path()).await.unwrap();
        for round in 0..4 {
            let marker = format!("after abort {round}");
            assert!(msgs.iter().any(|m| m.text == marker), "{marker} missing");
        }
    }

    #[tokio::test]
    async fn idle_conversation_locks_are_pruned() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::new(None);
        for id in ["a", "b", "c"] {
            store.append(id, dir.path(), ChatMessage::user("hi")).await.unwrap();
            store.list(id, dir.path()).await.unwrap();
        }
        store.clear("a", dir.path()).await.unwrap();
        assert_eq!(store.tracked_conversations(), 0);
    }
}
