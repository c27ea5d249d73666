// src/core/tests/runtime_tests.rs

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Duration;
use tempfile::tempdir;

use super::fakes::{FakeAssistant, FakeGenerator, FakePlatform};
use crate::config::Config;
use crate::core::runtime::Runtime;
use crate::memory::ConversationMemory;
use crate::models::{MentionCandidate, Message};

fn config(root: &Path) -> Config {
    Config {
        x_username: "createbot".to_string(),
        x_password: "hunter2".to_string(),
        anthropic_api_key: "test".to_string(),
        generation_api_key: "test".to_string(),
        generation_api_url: "http://localhost:3000".to_string(),
        data_dir: root.join("data"),
        temp_dir: root.join("temp"),
        headless: true,
        post_interval: Duration::seconds(3600),
        scheduler_tick: Duration::seconds(60),
        tweet_interval: Duration::minutes(20),
        step_delay: Duration::zero(),
        cycle_delay: Duration::zero(),
        error_delay: Duration::zero(),
        login_retry_attempts: 1,
        login_retry_max_delay: Duration::seconds(1),
        mention_cutoff: None,
    }
}

#[tokio::test]
async fn test_login_failure_shuts_down_cleanly() {
    let dir = tempdir().unwrap();
    let platform = FakePlatform {
        login_ok: false,
        ..Default::default()
    };
    let closed = platform.closed.clone();

    let runtime = Runtime::new(
        config(dir.path()),
        platform,
        Arc::new(FakeAssistant),
        Arc::new(FakeGenerator::default()),
    );
    let result = runtime.run().await;

    assert!(result.is_err());
    assert!(closed.load(Ordering::SeqCst));
    assert!(dir.path().join("data").join("conversations").is_dir());
}

fn runtime(root: &Path, platform: FakePlatform) -> Runtime<FakePlatform> {
    Runtime::new(
        config(root),
        platform,
        Arc::new(FakeAssistant),
        Arc::new(FakeGenerator::default()),
    )
}

fn fox_mention() -> MentionCandidate {
    MentionCandidate {
        tweet_id: "4242".to_string(),
        handle: "@mo".to_string(),
        text: "@createbot draw a fox".to_string(),
        posted_at: None,
    }
}

#[tokio::test]
async fn test_failed_request_step_does_not_skip_later_steps() {
    let dir = tempdir().unwrap();
    let platform = FakePlatform {
        requests_fail: true,
        ..Default::default()
    }
    .with_mentions(vec![fox_mention()]);
    let runtime = runtime(dir.path(), platform);

    assert!(runtime.run_steps().await.is_ok());

    let platform = runtime.ctx.platform.lock().await;
    assert_eq!(platform.steps, vec!["requests", "conversations", "mentions"]);
    assert_eq!(platform.replies.len(), 1);
    assert_eq!(platform.replies[0].0, "4242");
}

#[tokio::test]
async fn test_steps_run_in_order_and_end_with_a_checkpoint() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    {
        let mut memory = ConversationMemory::load(&data);
        memory.add_dm("@zoe", Message::incoming("hello"));
    }
    let platform = FakePlatform {
        pending_requests: 2,
        ..Default::default()
    }
    .with_conversation("@alice", vec![Message::incoming("draw a heron")])
    .with_mentions(vec![fox_mention()]);
    let runtime = runtime(dir.path(), platform);

    // Only the end-of-cycle checkpoint can bring this file back.
    let zoe = data.join("conversations").join("@zoe.json");
    std::fs::remove_file(&zoe).unwrap();

    assert!(runtime.run_steps().await.is_ok());

    {
        let platform = runtime.ctx.platform.lock().await;
        assert_eq!(platform.steps, vec!["requests", "conversations", "mentions"]);
        assert_eq!(platform.pending_requests, 0);
        assert_eq!(platform.sent.len(), 2);
        assert_eq!(platform.replies.len(), 1);
    }
    assert!(zoe.exists());
    assert!(data.join("conversations").join("@alice.json").exists());
    assert!(data.join("conversations").join("@mo.json").exists());
}

#[tokio::test]
async fn test_failed_cycle_is_followed_by_a_clean_one() {
    let dir = tempdir().unwrap();
    let platform = FakePlatform {
        requests_fail: true,
        conversations_fail: true,
        mentions_fail: true,
        ..Default::default()
    }
    .with_mentions(vec![fox_mention()]);
    let runtime = runtime(dir.path(), platform);

    assert!(!runtime.cycle().await);
    assert!(runtime.ctx.platform.lock().await.replies.is_empty());

    {
        let mut platform = runtime.ctx.platform.lock().await;
        platform.requests_fail = false;
        platform.conversations_fail = false;
        platform.mentions_fail = false;
        platform.steps.clear();
    }

    assert!(runtime.cycle().await);
    let platform = runtime.ctx.platform.lock().await;
    assert_eq!(platform.steps, vec!["requests", "conversations", "mentions"]);
    assert_eq!(platform.replies.len(), 1);
}
