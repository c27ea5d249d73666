use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::core::agent::SAFETY_REFUSAL;
use crate::core::context::{with_link, Context};
use crate::error::ApiError;
use crate::models::Message;
use crate::policy;
use crate::providers::media;
use crate::providers::x::Platform;

/// Conversations looked at per cycle.
pub const CONVERSATION_LIMIT: usize = 10;

/// Message requests accepted per cycle.
pub const REQUEST_LIMIT: usize = 10;

pub async fn process_message_requests<P: Platform>(ctx: &Context<P>) -> Result<usize> {
    let accepted = ctx
        .platform
        .lock()
        .await
        .accept_message_requests(REQUEST_LIMIT)
        .await?;
    if accepted > 0 {
        info!("Accepted {} message requests", accepted);
    } else {
        debug!("No message requests to accept");
    }
    Ok(accepted)
}

/// Replies to the latest conversations whose last message is not ours.
/// Returns how many conversations were answered.
pub async fn process_dms<P: Platform>(ctx: &Context<P>) -> Result<usize> {
    info!("=== Starting DM processing ===");
    let handles = ctx
        .platform
        .lock()
        .await
        .conversation_handles(CONVERSATION_LIMIT)
        .await?;
    info!("Found {} conversations", handles.len());

    let mut answered = 0;
    for handle in handles {
        match process_conversation(ctx, &handle).await {
            Ok(true) => answered += 1,
            Ok(false) => {}
            Err(e) => error!("Error processing conversation with {}: {}", handle, e),
        }
    }
    Ok(answered)
}

async fn process_conversation<P: Platform>(ctx: &Context<P>, handle: &str) -> Result<bool> {
    let mut platform = ctx.platform.lock().await;
    let messages = platform.open_conversation(handle).await?;

    if !policy::needs_reply(&messages) {
        debug!("No reply needed for {}", handle);
        return Ok(false);
    }
    let Some(last) = messages.last() else {
        return Ok(false);
    };
    let text = last.text.clone();
    record_incoming(ctx, handle, &messages).await;

    if !ctx.assistant.is_generation_request(&text).await {
        info!("Message from {} is not a generation request", handle);
        return Ok(false);
    }

    if !ctx.assistant.is_safe_prompt(&text).await {
        warn!("Unsafe prompt from {}", handle);
        return send_and_record(&mut *platform, ctx, handle, SAFETY_REFUSAL, None).await;
    }

    let username = handle.trim_start_matches('@');
    let generation = match ctx.generator.generate(&text, username).await {
        Ok(generation) => generation,
        Err(ApiError::AccountNotLinked) => {
            info!("{} has no linked account, sending engagement response", handle);
            let reply = ctx.assistant.generate_engagement_response(&text).await;
            return send_and_record(&mut *platform, ctx, handle, &reply, None).await;
        }
        Err(e) => {
            error!("Generation failed for {}: {}", handle, e);
            return Ok(false);
        }
    };

    let pair = ctx.assistant.generate_responses(&generation).await;
    let attachment = ctx.fetch_media(generation.link.as_deref()).await;
    let sent = send_and_record(&mut *platform, ctx, handle, &pair.confirmation, attachment.as_deref()).await;
    if let Some(path) = &attachment {
        media::discard(path).await;
    }
    if !sent? {
        return Ok(false);
    }

    let share = with_link(&pair.share_prompt, generation.share_url.as_deref());
    send_and_record(&mut *platform, ctx, handle, &share, None).await?;
    info!("Replied to {} with their generation", handle);
    Ok(true)
}

/// Stores counterparty messages that memory has not seen yet, matched on
/// text and send time so a repeated reply is still recorded.
async fn record_incoming<P>(ctx: &Context<P>, handle: &str, messages: &[Message]) {
    let stored: HashSet<(String, DateTime<Utc>)> = ctx
        .memory
        .dm_history(handle, None)
        .await
        .into_iter()
        .filter(|m| !m.is_from_us)
        .map(|m| (m.text, m.timestamp))
        .collect();

    for message in messages
        .iter()
        .filter(|m| !m.is_from_us && !stored.contains(&(m.text.clone(), m.timestamp)))
    {
        ctx.memory.add_dm(handle, message.clone()).await;
    }
}

async fn send_and_record<P: Platform>(
    platform: &mut P,
    ctx: &Context<P>,
    handle: &str,
    text: &str,
    attachment: Option<&Path>,
) -> Result<bool> {
    if !platform.send_message(text, attachment).await? {
        warn!("Message to {} was not sent", handle);
        return Ok(false);
    }
    ctx.memory
        .add_dm(handle, Message::outgoing(text, attachment.is_some()))
        .await;
    Ok(true)
}
