// src/core/tests/messages_tests.rs

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::tempdir;

use super::fakes::{context, FakeGenerator, FakePlatform, ENGAGEMENT, SHARE_URL};
use crate::core::agent::SAFETY_REFUSAL;
use crate::core::messages::{process_dms, process_message_requests, REQUEST_LIMIT};
use crate::models::Message;

#[tokio::test]
async fn test_generation_request_gets_confirmation_and_share_link() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let platform = FakePlatform::default()
        .with_conversation("@alice", vec![Message::incoming("please draw a red fox")]);
    let (ctx, _memory) = context(dir.path(), platform, generator.clone());

    assert_eq!(process_dms(&ctx).await.unwrap(), 1);

    let sent = ctx.platform.lock().await.sent.clone();
    assert_eq!(
        sent,
        vec![
            ("Here is your art!".to_string(), false),
            (format!("Share it!\n\n{}", SHARE_URL), false),
        ]
    );
    assert_eq!(
        generator.calls(),
        vec![("please draw a red fox".to_string(), "alice".to_string())]
    );

    let history = ctx.memory.dm_history("@alice", None).await;
    assert_eq!(history.len(), 3);
    assert!(!history[0].is_from_us);
    assert!(history[1].is_from_us && history[2].is_from_us);

    // The thread now ends with our message, so a second pass leaves it alone.
    assert_eq!(process_dms(&ctx).await.unwrap(), 0);
    assert_eq!(generator.calls().len(), 1);
}

#[tokio::test]
async fn test_thread_ending_with_our_message_is_skipped() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let platform = FakePlatform::default().with_conversation(
        "@bob",
        vec![
            Message::incoming("draw a boat"),
            Message::outgoing("Here is your art!", true),
        ],
    );
    let (ctx, _memory) = context(dir.path(), platform, generator.clone());

    assert_eq!(process_dms(&ctx).await.unwrap(), 0);
    assert!(ctx.platform.lock().await.sent.is_empty());
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn test_unsafe_prompt_gets_refusal_without_generation() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let platform = FakePlatform::default()
        .with_conversation("@carol", vec![Message::incoming("draw something nsfw")]);
    let (ctx, _memory) = context(dir.path(), platform, generator.clone());

    assert_eq!(process_dms(&ctx).await.unwrap(), 1);
    assert_eq!(
        ctx.platform.lock().await.sent,
        vec![(SAFETY_REFUSAL.to_string(), false)]
    );
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn test_unlinked_account_gets_engagement_response() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let platform = FakePlatform::default()
        .with_conversation("@unlinked", vec![Message::incoming("generate a sunset")]);
    let (ctx, _memory) = context(dir.path(), platform, generator.clone());

    assert_eq!(process_dms(&ctx).await.unwrap(), 1);
    assert_eq!(ctx.platform.lock().await.sent, vec![(ENGAGEMENT.to_string(), false)]);

    let history = ctx.memory.dm_history("@unlinked", None).await;
    assert_eq!(history.last().map(|m| m.text.as_str()), Some(ENGAGEMENT));
}

#[tokio::test]
async fn test_small_talk_is_recorded_but_not_answered() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let platform = FakePlatform::default()
        .with_conversation("@dave", vec![Message::incoming("hello there")]);
    let (ctx, _memory) = context(dir.path(), platform, generator.clone());

    assert_eq!(process_dms(&ctx).await.unwrap(), 0);
    assert!(ctx.platform.lock().await.sent.is_empty());
    assert_eq!(ctx.memory.dm_history("@dave", None).await.len(), 1);

    // Seen messages are not recorded twice.
    process_dms(&ctx).await.unwrap();
    assert_eq!(ctx.memory.dm_history("@dave", None).await.len(), 1);
}

#[tokio::test]
async fn test_same_reply_sent_twice_is_recorded_twice() {
    let dir = tempdir().unwrap();
    let mut first = Message::incoming("yes");
    first.timestamp = Utc::now() - Duration::days(1);
    let mut ours = Message::outgoing("Want another one?", false);
    ours.timestamp = first.timestamp + Duration::minutes(1);
    let platform = FakePlatform::default().with_conversation("@gina", vec![first]);
    let (ctx, _memory) = context(dir.path(), platform, Arc::new(FakeGenerator::default()));

    process_dms(&ctx).await.unwrap();
    assert_eq!(ctx.memory.dm_history("@gina", None).await.len(), 1);

    ctx.platform
        .lock()
        .await
        .conversations
        .get_mut("@gina")
        .unwrap()
        .extend([ours, Message::incoming("yes")]);
    process_dms(&ctx).await.unwrap();
    process_dms(&ctx).await.unwrap();

    let texts: Vec<String> = ctx
        .memory
        .dm_history("@gina", None)
        .await
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["yes", "yes"]);
}

#[tokio::test]
async fn test_generation_failure_sends_nothing() {
    let dir = tempdir().unwrap();
    let generator = Arc::new(FakeGenerator::default());
    let platform = FakePlatform::default()
        .with_conversation("@erin", vec![Message::incoming("draw fail whale")]);
    let (ctx, _memory) = context(dir.path(), platform, generator.clone());

    assert_eq!(process_dms(&ctx).await.unwrap(), 0);
    assert!(ctx.platform.lock().await.sent.is_empty());
    assert_eq!(generator.calls().len(), 1);
}

#[tokio::test]
async fn test_message_requests_are_capped_per_cycle() {
    let dir = tempdir().unwrap();
    let platform = FakePlatform {
        pending_requests: REQUEST_LIMIT + 3,
        ..Default::default()
    };
    let (ctx, _memory) = context(dir.path(), platform, Arc::new(FakeGenerator::default()));

    assert_eq!(process_message_requests(&ctx).await.unwrap(), REQUEST_LIMIT);
    assert_eq!(process_message_requests(&ctx).await.unwrap(), 3);
    assert_eq!(process_message_requests(&ctx).await.unwrap(), 0);
}
