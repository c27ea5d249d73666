use async_trait::async_trait;
use rig::agent::Agent as RigAgent;
use rig::completion::Prompt;
use rig::providers::anthropic::completion::CompletionModel;
use rig::providers::anthropic::{self, CLAUDE_3_HAIKU};
use tracing::{error, info, warn};

use crate::models::{Creation, Generation, ResponsePair};

pub const SAFETY_REFUSAL: &str = "I apologize, but I cannot generate content for that prompt as it may violate our safety guidelines. Please try a different prompt! 🙏";

const ENGAGEMENT_FALLBACK: &str = "Hi there! 👋 I'm an AI assistant that helps create amazing designs!\n\n\
To get started:\n\
1️⃣ Connect your X account on our platform\n\
2️⃣ Try a prompt like 'Generate a sunset over mountains'\n\n\
Can't wait to see what we create together! ✨";

const CLASSIFIER_PREAMBLE: &str = "You classify messages sent to an AI content generation account.\n\
Decide whether the message asks for an image, video or design to be generated.\n\
Answer with exactly one word: true or false.\n\
Requests look like: \"can you create an image of...\", \"generate a picture of...\", \
\"make me an illustration of...\", \"design a scene with...\".";

const ENHANCER_PREAMBLE: &str = "You clean up content generation prompts.\n\
Strip mentions, greetings, filler words and stray symbols, keeping only what the user wants generated.\n\
Return only the cleaned prompt, no explanations.";

const SAFETY_PREAMBLE: &str = "You screen content generation prompts for NSFW material.\n\
Answer with exactly one word: SAFE or UNSAFE.\n\
Be conservative: if in doubt, answer UNSAFE. Consider explicit content and subtle implications.";

const RESPONSE_PREAMBLE: &str = "You write friendly replies for users whose generation just finished.\n\
Write two short messages:\n\
1. confirmation: a nice note about their generation (the media is attached to it)\n\
2. share_prompt: encourage them to share their creation (a link is appended after it)\n\
Keep them casual and enthusiastic, emojis welcome.\n\
Respond with a single JSON object and nothing else, for example:\n\
{\"confirmation\": \"...\", \"share_prompt\": \"...\"}";

const ENGAGEMENT_PREAMBLE: &str = "You are the assistant of an AI design generation platform, replying to someone who cannot generate yet.\n\
Acknowledge their message, explain that you generate unique AI designs, suggest an example prompt that fits their interests, \
and tell them how to start: connect their X account on the platform, then send a prompt like the example.\n\
Keep it friendly, two or three sentences per point, with a few emojis and a clear call to action.\n\
Return only the reply text.";

const NSFW_PREAMBLE: &str = "You screen community creations before they are republished.\n\
Given the creation's prompt and media link, answer with exactly one word: TRUE if it is likely NSFW, FALSE otherwise.\n\
If in doubt, answer TRUE.";

const TWEET_PREAMBLE: &str = "You are a social media writer presenting community creations.\n\
Write one tweet under 100 characters that builds excitement about the artwork, with a relevant hashtag or two.\n\
Credit the creator by name. The media is attached separately, so never include a URL.\n\
Return only the tweet text.";

/// The LLM-backed decisions the flows depend on.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn is_generation_request(&self, text: &str) -> bool;

    /// `false` on anything but an explicit SAFE verdict.
    async fn is_safe_prompt(&self, prompt: &str) -> bool;

    /// Falls back to the original prompt when the model is unavailable.
    async fn enhance_prompt(&self, prompt: &str) -> String;

    async fn generate_responses(&self, generation: &Generation) -> ResponsePair;

    async fn generate_engagement_response(&self, text: &str) -> String;

    /// `true` when the creation should not be republished.
    async fn is_trending_nsfw(&self, creation: &Creation) -> bool;

    async fn generate_tweet(&self, creation: &Creation) -> Option<String>;
}

pub struct CreateAgent {
    classifier: RigAgent<CompletionModel>,
    enhancer: RigAgent<CompletionModel>,
    safety: RigAgent<CompletionModel>,
    responder: RigAgent<CompletionModel>,
    engager: RigAgent<CompletionModel>,
    nsfw: RigAgent<CompletionModel>,
    tweeter: RigAgent<CompletionModel>,
}

impl CreateAgent {
    pub fn new(anthropic_api_key: &str) -> Self {
        let client = anthropic::ClientBuilder::new(anthropic_api_key).build();
        let build = |preamble: &str, temperature: f64| {
            client
                .agent(CLAUDE_3_HAIKU)
                .preamble(preamble)
                .temperature(temperature)
                .max_tokens(4096)
                .build()
        };

        CreateAgent {
            classifier: build(CLASSIFIER_PREAMBLE, 0.3),
            enhancer: build(ENHANCER_PREAMBLE, 0.7),
            safety: build(SAFETY_PREAMBLE, 0.3),
            responder: build(RESPONSE_PREAMBLE, 0.7),
            engager: build(ENGAGEMENT_PREAMBLE, 0.7),
            nsfw: build(NSFW_PREAMBLE, 0.3),
            tweeter: build(TWEET_PREAMBLE, 0.7),
        }
    }

    async fn ask(agent: &RigAgent<CompletionModel>, role: &str, input: &str) -> Option<String> {
        match agent.prompt(input).await {
            Ok(response) => Some(response.trim().to_string()),
            Err(e) => {
                error!("{} agent failed: {}", role, e);
                None
            }
        }
    }
}

#[async_trait]
impl Assistant for CreateAgent {
    async fn is_generation_request(&self, text: &str) -> bool {
        let verdict = Self::ask(&self.classifier, "Classifier", text).await;
        let is_request = verdict.as_deref().map_or(false, parse_true_false);
        info!("Generation request: {} ({:?})", is_request, verdict);
        is_request
    }

    async fn is_safe_prompt(&self, prompt: &str) -> bool {
        match Self::ask(&self.safety, "Safety", prompt).await {
            Some(verdict) => match parse_safety_verdict(&verdict) {
                Some(safe) => safe,
                None => {
                    error!("Invalid safety check response: {}", verdict);
                    false
                }
            },
            None => false,
        }
    }

    async fn enhance_prompt(&self, prompt: &str) -> String {
        match Self::ask(&self.enhancer, "Prompt enhancer", prompt).await {
            Some(enhanced) if !enhanced.is_empty() => enhanced,
            _ => prompt.to_string(),
        }
    }

    async fn generate_responses(&self, generation: &Generation) -> ResponsePair {
        let context = format!("prompt: {}", generation.prompt.as_deref().unwrap_or_default());
        let raw = Self::ask(&self.responder, "Response", &context).await;
        match raw.as_deref().and_then(decode_response_pair) {
            Some(pair) => pair,
            None => {
                warn!("Using fallback messages, could not decode: {:?}", raw);
                fallback_response_pair(generation)
            }
        }
    }

    async fn generate_engagement_response(&self, text: &str) -> String {
        match Self::ask(&self.engager, "Engagement", text).await {
            Some(reply) if !reply.is_empty() => reply,
            _ => ENGAGEMENT_FALLBACK.to_string(),
        }
    }

    async fn is_trending_nsfw(&self, creation: &Creation) -> bool {
        let input = format!(
            "Prompt: {}\nMedia: {}\nIs this NSFW? Reply TRUE or FALSE:",
            creation.prompt.as_deref().unwrap_or_default(),
            creation.link.as_deref().unwrap_or_default()
        );
        match Self::ask(&self.nsfw, "NSFW", &input).await {
            // Only an explicit FALSE clears the creation.
            Some(verdict) => !verdict.trim().trim_end_matches('.').eq_ignore_ascii_case("false"),
            None => true,
        }
    }

    async fn generate_tweet(&self, creation: &Creation) -> Option<String> {
        let input = format!(
            "Write a tweet for this creation.\nPrompt: {}\nCreator: {}",
            creation.prompt.as_deref().unwrap_or_default(),
            creation.display_name.as_deref().unwrap_or_default()
        );
        Self::ask(&self.tweeter, "Tweet", &input)
            .await
            .and_then(|t| clean_tweet(&t))
    }
}

fn parse_true_false(response: &str) -> bool {
    response
        .trim()
        .trim_end_matches('.')
        .eq_ignore_ascii_case("true")
}

/// `Some(true)` for SAFE, `Some(false)` for UNSAFE, `None` for anything else.
fn parse_safety_verdict(response: &str) -> Option<bool> {
    match response.trim().trim_end_matches('.').to_uppercase().as_str() {
        "SAFE" => Some(true),
        "UNSAFE" => Some(false),
        _ => None,
    }
}

/// One strict decode of the whole reply; blank fields count as a failure.
pub fn decode_response_pair(raw: &str) -> Option<ResponsePair> {
    let pair: ResponsePair = serde_json::from_str(raw.trim()).ok()?;
    if pair.confirmation.trim().is_empty() || pair.share_prompt.trim().is_empty() {
        return None;
    }
    Some(pair)
}

pub fn fallback_response_pair(generation: &Generation) -> ResponsePair {
    ResponsePair {
        confirmation: format!(
            "I've created your design! 🎨\n\nPrompt: {}",
            generation.prompt.as_deref().unwrap_or_default()
        ),
        share_prompt: "Use this link to share your creation 🌟".to_string(),
    }
}

fn clean_tweet(raw: &str) -> Option<String> {
    let tweet = raw.trim().trim_matches('"').trim();
    (!tweet.is_empty()).then(|| tweet.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_response_pair_strict() {
        let pair = decode_response_pair(
            r#" {"confirmation": "Your koi looks amazing! 🐟", "share_prompt": "Show it off!"} "#,
        )
        .unwrap();
        assert_eq!(pair.confirmation, "Your koi looks amazing! 🐟");
        assert_eq!(pair.share_prompt, "Show it off!");

        assert!(decode_response_pair("Sure! Here you go: {\"confirmation\": \"a\", \"share_prompt\": \"b\"}").is_none());
        assert!(decode_response_pair("```json\n{\"confirmation\": \"a\", \"share_prompt\": \"b\"}\n```").is_none());
        assert!(decode_response_pair(r#"{"confirmation": "a"}"#).is_none());
        assert!(decode_response_pair(r#"{"confirmation": " ", "share_prompt": "b"}"#).is_none());
    }

    #[test]
    fn test_fallback_pair_mentions_prompt() {
        let generation = Generation {
            prompt: Some("a lighthouse at dusk".to_string()),
            share_url: Some("https://create.example/s/9".to_string()),
            ..Default::default()
        };
        let pair = fallback_response_pair(&generation);
        assert!(pair.confirmation.contains("a lighthouse at dusk"));
        assert!(!pair.share_prompt.contains("https://"));
    }

    #[test]
    fn test_verdict_parsing() {
        assert!(parse_true_false("true"));
        assert!(parse_true_false(" True.\n"));
        assert!(!parse_true_false("false"));
        assert!(!parse_true_false("true, because the user asked"));

        assert_eq!(parse_safety_verdict("SAFE"), Some(true));
        assert_eq!(parse_safety_verdict("unsafe"), Some(false));
        assert_eq!(parse_safety_verdict("probably safe"), None);
    }

    #[test]
    fn test_clean_tweet() {
        assert_eq!(clean_tweet("\"Neon koi by carol #AIart\"\n"), Some("Neon koi by carol #AIart".to_string()));
        assert_eq!(clean_tweet("  "), None);
    }
}
