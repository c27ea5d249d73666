use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::core::context::Context;
use crate::core::scheduler::ScheduledJob;
use crate::policy::{TweetHistory, UsedLinks};
use crate::providers::media;
use crate::providers::x::Platform;

/// Candidates tried per scheduled run before giving up until the next one.
pub const MAX_ATTEMPTS: usize = 5;

/// Republishes a random liked creation, subject to the link throttle and
/// tweet pacing.
pub struct PostingFlow<P> {
    ctx: Context<P>,
    used_links: UsedLinks,
    history: TweetHistory,
    tweet_interval: Duration,
}

impl<P: Platform> PostingFlow<P> {
    pub fn new(ctx: Context<P>, used_links: UsedLinks, history: TweetHistory, tweet_interval: Duration) -> Self {
        PostingFlow {
            ctx,
            used_links,
            history,
            tweet_interval,
        }
    }

    /// Returns whether a tweet went out.
    pub async fn post_creation(&mut self) -> bool {
        if !self.history.should_tweet(Utc::now(), self.tweet_interval) {
            return false;
        }
        let now = Utc::now();
        self.used_links.prune(now);
        if let Some(age) = self.used_links.oldest_age(now) {
            debug!(
                "{} links throttled, oldest posted {} minutes ago",
                self.used_links.len(),
                age.num_minutes()
            );
        }

        for attempt in 1..=MAX_ATTEMPTS {
            info!("Creation post attempt {}/{}", attempt, MAX_ATTEMPTS);
            if self.try_candidate().await {
                return true;
            }
        }
        warn!("No postable creation after {} attempts", MAX_ATTEMPTS);
        false
    }

    async fn try_candidate(&mut self) -> bool {
        let Some(creation) = self.ctx.generator.fetch_random_creation().await else {
            warn!("No creation fetched");
            return false;
        };
        if !creation.is_complete() {
            warn!("Creation is missing prompt, creator or link");
            return false;
        }
        let link = creation.link.clone().unwrap_or_default();
        info!(
            "Fetched creation - Prompt: {:?}, Link: {}, Creator: {:?}",
            creation.prompt, link, creation.display_name
        );

        if !self.used_links.check(&link, Utc::now()) {
            if let Some(at) = self.used_links.last_posted(&link) {
                info!("Creation was already posted at {}, trying another", at);
            }
            return false;
        }
        if self.ctx.assistant.is_trending_nsfw(&creation).await {
            warn!("Creation flagged as NSFW, trying another");
            return false;
        }
        let Some(tweet) = self.ctx.assistant.generate_tweet(&creation).await else {
            warn!("No tweet text generated");
            return false;
        };
        if self.history.is_duplicate(&tweet) {
            info!("Generated tweet repeats a recent one, trying another");
            return false;
        }
        let Some(attachment) = self.ctx.fetch_media(Some(&link)).await else {
            return false;
        };

        let posted = self
            .ctx
            .platform
            .lock()
            .await
            .post_tweet(&tweet, Some(&attachment))
            .await;
        media::discard(&attachment).await;

        match posted {
            Ok(true) => {
                let now = Utc::now();
                self.used_links.mark_used(&link, now);
                self.used_links.save();
                self.history.record(&tweet, now);
                self.history.save();
                info!("Posted creation: {}", tweet);
                true
            }
            Ok(false) => {
                warn!("Tweet was not posted");
                false
            }
            Err(e) => {
                error!("Error posting tweet: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl<P: Platform + 'static> ScheduledJob for PostingFlow<P> {
    async fn fire(&mut self) {
        if !self.post_creation().await {
            info!("Scheduled run finished without a post");
        }
    }
}
