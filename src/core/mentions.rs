use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::core::agent::SAFETY_REFUSAL;
use crate::core::context::{with_link, Context};
use crate::error::ApiError;
use crate::models::{Mention, MentionCandidate};
use crate::providers::media;
use crate::providers::x::Platform;

/// Mentions older than the cutoff are ignored. Without a timestamp a mention
/// only passes when no cutoff is configured.
pub fn is_after_cutoff(posted_at: Option<DateTime<Utc>>, cutoff: Option<DateTime<Utc>>) -> bool {
    match (cutoff, posted_at) {
        (None, _) => true,
        (Some(cutoff), Some(posted_at)) => posted_at >= cutoff,
        (Some(_), None) => false,
    }
}

/// Answers new generation requests among the current mentions.
/// Returns how many mentions were replied to.
pub async fn process_mentions<P: Platform>(ctx: &Context<P>, cutoff: Option<DateTime<Utc>>) -> Result<usize> {
    info!("Processing mentions");
    let candidates = ctx.platform.lock().await.mentions().await?;
    if candidates.is_empty() {
        info!("No mentions found");
        return Ok(0);
    }
    info!("Found {} mentions", candidates.len());

    let mut replied = 0;
    for mention in &candidates {
        match process_mention(ctx, mention, cutoff).await {
            Ok(true) => replied += 1,
            Ok(false) => {}
            Err(e) => error!("Error processing mention {}: {}", mention.tweet_id, e),
        }
    }
    Ok(replied)
}

async fn process_mention<P: Platform>(
    ctx: &Context<P>,
    mention: &MentionCandidate,
    cutoff: Option<DateTime<Utc>>,
) -> Result<bool> {
    if !is_after_cutoff(mention.posted_at, cutoff) {
        debug!("Skipping mention {} from before cutoff", mention.tweet_id);
        return Ok(false);
    }
    if ctx.memory.has_replied_to_tweet(&mention.tweet_id).await {
        debug!("Already replied to tweet {}", mention.tweet_id);
        return Ok(false);
    }
    if !ctx.assistant.is_generation_request(&mention.text).await {
        debug!("Mention {} is not a generation request", mention.tweet_id);
        return Ok(false);
    }

    let (reply, attachment) = if !ctx.assistant.is_safe_prompt(&mention.text).await {
        warn!("Unsafe prompt in mention {}", mention.tweet_id);
        (SAFETY_REFUSAL.to_string(), None)
    } else {
        let prompt = ctx.assistant.enhance_prompt(&mention.text).await;
        let username = mention.handle.trim_start_matches('@');
        match ctx.generator.generate(&prompt, username).await {
            Ok(generation) => {
                let pair = ctx.assistant.generate_responses(&generation).await;
                let reply = with_link(&pair.confirmation, generation.share_url.as_deref());
                (reply, ctx.fetch_media(generation.link.as_deref()).await)
            }
            Err(ApiError::AccountNotLinked) => {
                info!("{} has no linked account, sending engagement response", mention.handle);
                (ctx.assistant.generate_engagement_response(&mention.text).await, None)
            }
            Err(e) => {
                error!("Generation failed for mention {}: {}", mention.tweet_id, e);
                return Ok(false);
            }
        }
    };

    let sent = ctx
        .platform
        .lock()
        .await
        .reply_to_tweet(&mention.tweet_id, &reply, attachment.as_deref())
        .await;
    if let Some(path) = &attachment {
        media::discard(path).await;
    }
    if !sent? {
        warn!("Reply to {} was not posted", mention.tweet_id);
        return Ok(false);
    }

    ctx.memory.add_tweet_reply(&mention.tweet_id).await;
    ctx.memory
        .add_mention(
            &mention.handle,
            Mention {
                tweet_id: mention.tweet_id.clone(),
                text: mention.text.clone(),
                reply,
                timestamp: Utc::now(),
                is_from_us: false,
            },
        )
        .await;
    info!("Replied to mention {} from {}", mention.tweet_id, mention.handle);
    Ok(true)
}
