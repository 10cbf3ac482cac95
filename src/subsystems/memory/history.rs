//! `history.json`: one conversation's ordered message log on disk.
//!
//! ```text
//! {data_dir}/
//! └── conversations/
//!     └── {conversation}/
//!         └── history.json      { "messages": [ ... ] }
//! ```
//!
//! Every write replaces the whole file through `history.json.tmp` + rename,
//! so a reader sees either the old log or the new one, never half a turn.
//! All functions here are blocking; [`MessageStore`](super::MessageStore)
//! runs them on the blocking pool.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StorageError;
use super::types::{ChatMessage, Role};

const CONVERSATIONS_DIR: &str = "conversations";
const HISTORY_FILENAME: &str = "history.json";
const HISTORY_TMP_FILENAME: &str = "history.json.tmp";
const MAX_PLAIN_NAME_LEN: usize = 64;

/// On-disk shape of `history.json`.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct HistoryDoc {
    messages: Vec<ChatMessage>,
}

/// Directory name for a conversation id.
///
/// Ids made of ASCII alphanumerics and `-` are used verbatim.  Anything else
/// becomes `_` + a sha256 prefix; `_` never appears in a verbatim name, so
/// the two forms cannot collide.
pub(crate) fn conversation_dir_name(conversation_id: &str) -> String {
    let plain = !conversation_id.is_empty()
        && conversation_id.len() <= MAX_PLAIN_NAME_LEN
        && conversation_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if plain {
        return conversation_id.to_string();
    }
    let digest = Sha256::digest(conversation_id.as_bytes());
    format!("_{}", &hex::encode(digest)[..32])
}

/// Location of one conversation's history inside a storage directory.
#[derive(Debug, Clone)]
pub(crate) struct HistoryFile {
    dir: PathBuf,
    path: PathBuf,
}

impl HistoryFile {
    pub(crate) fn new(data_dir: &Path, conversation_id: &str) -> Self {
        let dir = data_dir
            .join(CONVERSATIONS_DIR)
            .join(conversation_dir_name(conversation_id));
        let path = dir.join(HISTORY_FILENAME);
        Self { dir, path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// All messages in append order; empty when the file does not exist.
    pub(crate) fn read(&self) -> Result<Vec<ChatMessage>, StorageError> {
        let text = match retry_once(&self.path, None, || fs::read_to_string(&self.path)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let doc: HistoryDoc = serde_json::from_str(&text)
            .map_err(|source| StorageError::Malformed { path: self.path.clone(), source })?;
        Ok(doc.messages)
    }

    /// Append `messages` as one atomic replace.  With `cap`, the oldest
    /// messages beyond the cap are dropped (FIFO), always up to the next user
    /// message so the log never opens with half a turn.
    pub(crate) fn append(
        &self,
        messages: &[ChatMessage],
        cap: Option<usize>,
    ) -> Result<(), StorageError> {
        let mut all = self.read()?;
        all.extend_from_slice(messages);
        if let Some(cap) = cap {
            let mut excess = all.len().saturating_sub(cap);
            if excess > 0 {
                while excess < all.len() && all[excess].role != Role::User {
                    excess += 1;
                }
                all.drain(..excess);
            }
        }
        self.write(&HistoryDoc { messages: all })
    }

    /// Remove the log.  Missing files are not an error.
    pub(crate) fn clear(&self) -> Result<(), StorageError> {
        match retry_once(&self.path, None, || fs::remove_file(&self.path)) {
            Ok(()) => {
                debug!(path = %self.path.display(), "history cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    fn write(&self, doc: &HistoryDoc) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(doc)
            .map_err(|source| StorageError::Malformed { path: self.path.clone(), source })?;
        let tmp = self.dir.join(HISTORY_TMP_FILENAME);

        retry_once(&self.path, Some(self.dir.as_path()), || {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&data)?;
            f.sync_all()?;
            fs::rename(&tmp, &self.path)
        })
        .map_err(|e| StorageError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            messages = doc.messages.len(),
            "history written"
        );
        Ok(())
    }
}

/// Failures worth one more attempt: a missing directory (created before the
/// retry when `create_dir` is given) or an interrupted/slow syscall.
fn is_transient(e: &io::Error, can_create_dir: bool) -> bool {
    match e.kind() {
        ErrorKind::NotFound => can_create_dir,
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => true,
        _ => false,
    }
}

fn retry_once<T>(
    path: &Path,
    create_dir: Option<&Path>,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    match op() {
        Err(e) if is_transient(&e, create_dir.is_some()) => {
            warn!(path = %path.display(), error = %e, "transient storage failure, retrying once");
            if let Some(dir) = create_dir {
                fs::create_dir_all(dir)?;
            }
            op()
        }
        other => other,
    }
}
