//! Dedup and throttle decisions.
//!
//! The queries here never touch the network or the browser. `UsedLinks` and
//! `TweetHistory` own their files and are saved explicitly by the caller after
//! a successful post.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use similar::TextDiff;
use tracing::{debug, error, info};

use crate::memory::{load_json_or_default, save_json};
use crate::models::{Message, TweetHistoryFile, UsedPost, UsedPosts};

/// Seconds during which a posted generation link may not be posted again.
pub const THROTTLE_WINDOW_SECS: i64 = 3600;

/// Maximum number of tweet texts kept in the rolling history.
pub const TWEET_HISTORY_LIMIT: usize = 10;

const SIMILARITY_THRESHOLD: f32 = 0.9;

/// A mention is handled once its tweet ID is in the replied set.
pub fn mention_already_handled(replied: &HashSet<String>, tweet_id: &str) -> bool {
    replied.contains(tweet_id)
}

/// A DM thread needs a reply iff its most recent message came from the counterparty.
pub fn needs_reply(messages: &[Message]) -> bool {
    messages.last().map_or(false, |m| !m.is_from_us)
}

/// Links posted by the scheduled flow, with the time they were last posted.
pub struct UsedLinks {
    path: PathBuf,
    window: Duration,
    entries: HashMap<String, DateTime<Utc>>,
}

impl UsedLinks {
    pub fn load(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        let path = path.into();
        let stored: UsedPosts = load_json_or_default(&path);
        let mut links = UsedLinks {
            path,
            window: Duration::seconds(THROTTLE_WINDOW_SECS),
            entries: stored.posts.into_iter().map(|p| (p.url, p.timestamp)).collect(),
        };
        links.prune(now);
        links
    }

    /// Drops every entry older than the throttle window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        let before = self.entries.len();
        self.entries.retain(|_, posted| now.signed_duration_since(*posted) <= window);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!("Pruned {} expired links", dropped);
        }
    }

    pub fn is_eligible(&self, link: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(link) {
            None => true,
            Some(posted) => now.signed_duration_since(*posted) > self.window,
        }
    }

    /// Prunes, then answers whether `link` may be posted at `now`.
    pub fn check(&mut self, link: &str, now: DateTime<Utc>) -> bool {
        self.prune(now);
        self.is_eligible(link, now)
    }

    pub fn mark_used(&mut self, link: &str, now: DateTime<Utc>) {
        self.entries.insert(link.to_string(), now);
    }

    pub fn last_posted(&self, link: &str) -> Option<DateTime<Utc>> {
        self.entries.get(link).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn oldest_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.entries
            .values()
            .map(|posted| now.signed_duration_since(*posted))
            .max()
    }

    pub fn save(&self) {
        let mut posts: Vec<UsedPost> = self
            .entries
            .iter()
            .map(|(url, timestamp)| UsedPost { url: url.clone(), timestamp: *timestamp })
            .collect();
        posts.sort_by_key(|p| p.timestamp);
        if let Err(e) = save_json(&self.path, &UsedPosts { posts }) {
            error!("Error saving used URLs: {}", e);
        }
    }
}

/// Rolling record of our own tweets, used to avoid repeats and to pace auto-posts.
pub struct TweetHistory {
    path: PathBuf,
    posted: HashSet<String>,
    recent: Vec<String>,
    last_tweet_time: Option<DateTime<Utc>>,
}

impl TweetHistory {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stored: TweetHistoryFile = load_json_or_default(&path);
        let mut history = TweetHistory {
            path,
            posted: stored.posted_tweets.into_iter().collect(),
            recent: stored.tweet_history,
            last_tweet_time: stored.last_tweet_time,
        };
        history.truncate();
        history
    }

    fn truncate(&mut self) {
        if self.recent.len() > TWEET_HISTORY_LIMIT {
            let excess = self.recent.len() - TWEET_HISTORY_LIMIT;
            self.recent.drain(..excess);
        }
    }

    pub fn record(&mut self, text: &str, now: DateTime<Utc>) {
        self.recent.push(text.to_string());
        self.truncate();
        self.posted.insert(text.to_string());
        self.last_tweet_time = Some(now);
    }

    /// Exact repeat of anything we posted, or a near-copy of a recent tweet.
    pub fn is_duplicate(&self, text: &str) -> bool {
        if self.posted.contains(text) {
            return true;
        }
        let candidate = text.to_lowercase();
        self.recent.iter().any(|previous| {
            let previous = previous.to_lowercase();
            TextDiff::from_chars(previous.as_str(), candidate.as_str()).ratio() >= SIMILARITY_THRESHOLD
        })
    }

    pub fn should_tweet(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_tweet_time {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                if elapsed < interval {
                    info!(
                        "Not time to tweet yet. {} minutes remaining.",
                        (interval - elapsed).num_minutes()
                    );
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn save(&self) {
        let mut posted_tweets: Vec<String> = self.posted.iter().cloned().collect();
        posted_tweets.sort();
        let file = TweetHistoryFile {
            posted_tweets,
            tweet_history: self.recent.clone(),
            last_tweet_time: self.last_tweet_time,
        };
        if let Err(e) = save_json(&self.path, &file) {
            error!("Error saving tweet history: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_738_108_800 + secs, 0).unwrap()
    }

    fn dm(from_us: bool) -> Message {
        if from_us {
            Message::outgoing("ours", false)
        } else {
            Message::incoming("theirs")
        }
    }

    #[test]
    fn test_needs_reply_follows_last_message() {
        assert!(needs_reply(&[dm(true), dm(false)]));
        assert!(!needs_reply(&[dm(false), dm(true)]));
        assert!(!needs_reply(&[]));
    }

    #[test]
    fn test_mention_dedup() {
        let replied: HashSet<String> = ["42".to_string()].into_iter().collect();
        assert!(mention_already_handled(&replied, "42"));
        assert!(!mention_already_handled(&replied, "43"));
    }

    #[test]
    fn test_throttle_window() {
        let dir = tempdir().unwrap();
        let mut links = UsedLinks::load(dir.path().join("used_urls.json"), at(0));
        let link = "https://cdn.example/a.png";

        assert!(links.check(link, at(0)));
        links.mark_used(link, at(0));

        assert!(!links.check(link, at(1800)));
        assert!(!links.check(link, at(3600)));
        assert!(links.check(link, at(3601)));
        assert!(links.check("https://cdn.example/other.png", at(10)));
    }

    #[test]
    fn test_pruning_bounds_entry_age() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("used_urls.json");
        let mut links = UsedLinks::load(&path, at(0));
        links.mark_used("old", at(0));
        links.mark_used("mid", at(2000));
        links.mark_used("new", at(5000));
        links.save();

        let reloaded = UsedLinks::load(&path, at(5000));
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.last_posted("old").is_none());
        assert!(reloaded.oldest_age(at(5000)).unwrap() <= Duration::seconds(THROTTLE_WINDOW_SECS));

        let mut links = reloaded;
        links.check("anything", at(7000));
        assert_eq!(links.len(), 1);
        assert!(links.oldest_age(at(7000)).unwrap() <= Duration::seconds(THROTTLE_WINDOW_SECS));
    }

    #[test]
    fn test_used_links_file_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("used_urls.json");
        let mut links = UsedLinks::load(&path, at(0));
        links.mark_used("https://cdn.example/x.mp4", at(0));
        links.save();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["posts"][0]["url"], "https://cdn.example/x.mp4");
        assert!(raw["posts"][0]["timestamp"].as_str().unwrap().starts_with("2025-01-29T00:00:00"));
    }

    #[test]
    fn test_history_is_bounded() {
        let dir = tempdir().unwrap();
        let mut history = TweetHistory::load(dir.path().join("tweet_history.json"));
        for i in 0..11 {
            history.record(&format!("tweet number {}", i), at(i));
        }

        assert_eq!(history.recent.len(), TWEET_HISTORY_LIMIT);
        assert_eq!(history.recent[0], "tweet number 1");
        assert_eq!(history.recent[9], "tweet number 10");
        assert_eq!(history.last_tweet_time, Some(at(10)));
    }

    #[test]
    fn test_history_duplicates_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tweet_history.json");
        let mut history = TweetHistory::load(&path);
        history.record("Check out this neon city by @alice #AIart", at(0));
        history.save();

        let history = TweetHistory::load(&path);
        assert!(history.is_duplicate("Check out this neon city by @alice #AIart"));
        assert!(history.is_duplicate("Check out this neon city by @alice #AIArt!"));
        assert!(!history.is_duplicate("A quiet forest at dawn, dreamed up by @bob"));
        assert_eq!(history.last_tweet_time, Some(at(0)));
    }

    #[test]
    fn test_should_tweet_interval() {
        let dir = tempdir().unwrap();
        let mut history = TweetHistory::load(dir.path().join("tweet_history.json"));
        let interval = Duration::minutes(20);

        assert!(history.should_tweet(at(0), interval));
        history.record("first", at(0));
        assert!(!history.should_tweet(at(600), interval));
        assert!(history.should_tweet(at(1200), interval));
    }
}
