use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    #[serde(rename = "dm")]
    Dm,
}

/// A single direct message, stored in chronological order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_from_us: bool,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_image: Option<bool>,
}

impl Message {
    pub fn incoming(text: &str) -> Self {
        Message {
            text: text.to_string(),
            timestamp: Utc::now(),
            is_from_us: false,
            message_type: MessageType::Dm,
            has_image: None,
        }
    }

    pub fn outgoing(text: &str, has_image: bool) -> Self {
        Message {
            text: text.to_string(),
            timestamp: Utc::now(),
            is_from_us: true,
            message_type: MessageType::Dm,
            has_image: has_image.then_some(true),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Mention {
    pub tweet_id: String,
    pub text: String,
    #[serde(default)]
    pub reply: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_from_us: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationMetadata {
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub total_interactions: u64,
}

/// Everything we know about one counterparty, keyed by handle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationRecord {
    #[serde(default)]
    pub dms: Vec<Message>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub last_interaction: Option<DateTime<Utc>>,
    pub metadata: ConversationMetadata,
}

impl ConversationRecord {
    pub fn new(first_seen: DateTime<Utc>) -> Self {
        ConversationRecord {
            dms: Vec::new(),
            mentions: Vec::new(),
            last_interaction: None,
            metadata: ConversationMetadata {
                first_seen,
                total_interactions: 0,
            },
        }
    }
}

// On-disk shapes

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UsedPost {
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct UsedPosts {
    #[serde(default)]
    pub posts: Vec<UsedPost>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct TweetHistoryFile {
    #[serde(default)]
    pub posted_tweets: Vec<String>,
    #[serde(default)]
    pub tweet_history: Vec<String>,
    #[serde(default)]
    pub last_tweet_time: Option<DateTime<Utc>>,
}

// Values exchanged with the external collaborators

/// A mention as scraped from the notifications page.
#[derive(Clone, Debug, PartialEq)]
pub struct MentionCandidate {
    pub tweet_id: String,
    pub handle: String,
    pub text: String,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Successful response of the generation API.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Generation {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// A curated creation pulled for the scheduled posting flow.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Creation {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl Creation {
    pub fn is_complete(&self) -> bool {
        [&self.prompt, &self.display_name, &self.link]
            .iter()
            .all(|field| field.as_deref().map_or(false, |v| !v.trim().is_empty()))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ResponsePair {
    pub confirmation: String,
    pub share_prompt: String,
}
