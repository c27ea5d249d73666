use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::{ConversationRecord, Mention, Message};
use crate::policy;

const CONVERSATIONS_DIR: &str = "conversations";
const REPLIED_MENTIONS_FILE: &str = "replied_mentions.json";

/// Reads a JSON file, falling back to `T::default()` when it is missing or unreadable.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => {
                error!("Corrupt state file {:?}, starting empty: {}", path, e);
                T::default()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            error!("Failed to read {:?}, starting empty: {}", path, e);
            T::default()
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(value)?;
    let mut file = fs::File::create(path)?;
    file.write_all(data.as_bytes())?;
    Ok(())
}

/// Maps a handle to a file stem that stays inside the conversations directory.
/// The mapping is reversible so distinct handles never share a file.
fn file_stem_for(handle: &str) -> String {
    let mut stem = String::with_capacity(handle.len());
    for (i, c) in handle.chars().enumerate() {
        match c {
            '%' => stem.push_str("%25"),
            '/' => stem.push_str("%2F"),
            '\\' => stem.push_str("%5C"),
            ':' => stem.push_str("%3A"),
            '\0' => stem.push_str("%00"),
            '.' if i == 0 => stem.push_str("%2E"),
            c => stem.push(c),
        }
    }
    stem
}

/// Inverse of `file_stem_for`. Unknown escapes are kept as written.
fn handle_for_stem(stem: &str) -> String {
    let mut handle = String::with_capacity(stem.len());
    let mut rest = stem;
    while let Some(pos) = rest.find('%') {
        handle.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3).unwrap_or(&rest[pos..]);
        let decoded = match escape {
            "%25" => Some('%'),
            "%2F" => Some('/'),
            "%5C" => Some('\\'),
            "%3A" => Some(':'),
            "%00" => Some('\0'),
            "%2E" => Some('.'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                handle.push(c);
                rest = &rest[pos + escape.len()..];
            }
            None => {
                handle.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    handle.push_str(rest);
    handle
}

/// Per-handle conversation state plus the replied-tweet set, backed by `data/`.
pub struct ConversationMemory {
    data_dir: PathBuf,
    records: HashMap<String, ConversationRecord>,
    replied_tweets: HashSet<String>,
}

impl ConversationMemory {
    /// Loads everything under `data_dir`. Never fails: each unreadable file is
    /// logged and replaced by an empty structure.
    pub fn load(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = fs::create_dir_all(data_dir.join(CONVERSATIONS_DIR)) {
            warn!("Could not create {:?}: {}", data_dir, e);
        }

        let replied: Vec<String> = load_json_or_default(&data_dir.join(REPLIED_MENTIONS_FILE));
        let mut memory = ConversationMemory {
            data_dir,
            records: HashMap::new(),
            replied_tweets: replied.into_iter().collect(),
        };
        memory.load_all_conversations();
        memory
    }

    fn load_all_conversations(&mut self) {
        let dir = self.data_dir.join(CONVERSATIONS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Error loading conversations from {:?}: {}", dir, e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(handle) = path.file_stem().and_then(|s| s.to_str()).map(handle_for_stem) else {
                continue;
            };
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|data| Ok(serde_json::from_str::<ConversationRecord>(&data)?));
            match parsed {
                Ok(record) => {
                    info!("Loaded memory for {}", handle);
                    self.records.insert(handle, record);
                }
                Err(e) => error!("Skipping corrupt conversation file {:?}: {}", path, e),
            }
        }
    }

    fn conversation_path(&self, handle: &str) -> PathBuf {
        self.data_dir
            .join(CONVERSATIONS_DIR)
            .join(format!("{}.json", file_stem_for(handle)))
    }

    pub fn get_or_create(&mut self, handle: &str) -> &mut ConversationRecord {
        self.records
            .entry(handle.to_string())
            .or_insert_with(|| ConversationRecord::new(Utc::now()))
    }

    pub fn handles(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn add_dm(&mut self, handle: &str, message: Message) {
        let record = self.get_or_create(handle);
        record.dms.push(message);
        record.last_interaction = Some(Utc::now());
        record.metadata.total_interactions += 1;
        self.save_conversation(handle);
    }

    pub fn add_mention(&mut self, handle: &str, mention: Mention) {
        let record = self.get_or_create(handle);
        record.mentions.push(mention);
        record.last_interaction = Some(Utc::now());
        record.metadata.total_interactions += 1;
        self.save_conversation(handle);
    }

    /// Most recent `limit` DMs (all of them when `limit` is `None`).
    pub fn dm_history(&self, handle: &str, limit: Option<usize>) -> Vec<Message> {
        self.records
            .get(handle)
            .map(|r| tail(&r.dms, limit))
            .unwrap_or_default()
    }

    pub fn has_replied_to_tweet(&self, tweet_id: &str) -> bool {
        policy::mention_already_handled(&self.replied_tweets, tweet_id)
    }

    pub fn add_tweet_reply(&mut self, tweet_id: &str) {
        self.replied_tweets.insert(tweet_id.to_string());
        self.save_replied_mentions();
    }

    fn save_replied_mentions(&self) {
        let mut ids: Vec<&String> = self.replied_tweets.iter().collect();
        ids.sort();
        if let Err(e) = save_json(&self.data_dir.join(REPLIED_MENTIONS_FILE), &ids) {
            error!("Error saving replied mentions: {}", e);
        }
    }

    pub fn save_conversation(&self, handle: &str) {
        let Some(record) = self.records.get(handle) else {
            return;
        };
        match save_json(&self.conversation_path(handle), record) {
            Ok(_) => info!("Saved memory for {}", handle),
            Err(e) => error!("Error saving conversation for {}: {}", handle, e),
        }
    }

    pub fn save_all_conversations(&self) {
        for handle in self.records.keys() {
            self.save_conversation(handle);
        }
    }
}

fn tail<T: Clone>(items: &[T], limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(n) if n < items.len() => items[items.len() - n..].to_vec(),
        _ => items.to_vec(),
    }
}
