use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::{to_std, Config};
use crate::core::agent::{Assistant, CreateAgent};
use crate::core::context::Context;
use crate::core::mentions::process_mentions;
use crate::core::messages::{process_dms, process_message_requests};
use crate::core::posts::PostingFlow;
use crate::core::retry::{retry_operation, RetryPolicy};
use crate::core::scheduler::Scheduler;
use crate::core::state::MemoryActor;
use crate::memory::ConversationMemory;
use crate::policy::{TweetHistory, UsedLinks};
use crate::providers::create_api::{CreateApi, Generator};
use crate::providers::x::{Platform, XBrowser};

const USED_URLS_FILE: &str = "used_urls.json";
const TWEET_HISTORY_FILE: &str = "tweet_history.json";
const BROWSER_PROFILE_DIR: &str = "browser_profile";
const STEP_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoggingIn,
    Cycling,
    ShuttingDown,
}

pub struct Runtime<P> {
    config: Config,
    pub(crate) ctx: Context<P>,
    memory_task: JoinHandle<()>,
}

impl Runtime<XBrowser> {
    pub fn from_config(config: Config) -> Self {
        let platform = XBrowser::new(
            &config.x_username,
            &config.x_password,
            config.headless,
            config.data_dir.join(BROWSER_PROFILE_DIR),
        );
        let assistant = Arc::new(CreateAgent::new(&config.anthropic_api_key));
        let generator = Arc::new(CreateApi::new(&config.generation_api_key, &config.generation_api_url));
        Runtime::new(config, platform, assistant, generator)
    }
}

impl<P: Platform + 'static> Runtime<P> {
    pub fn new(config: Config, platform: P, assistant: Arc<dyn Assistant>, generator: Arc<dyn Generator>) -> Self {
        let memory = ConversationMemory::load(&config.data_dir);
        info!("Loaded {} conversations from {:?}", memory.handles().len(), config.data_dir);
        let (client, memory_task) = MemoryActor::spawn(memory);

        let ctx = Context {
            platform: Arc::new(Mutex::new(platform)),
            assistant,
            generator,
            memory: client,
            http: reqwest::Client::new(),
            temp_dir: config.temp_dir.clone(),
        };

        Runtime {
            config,
            ctx,
            memory_task,
        }
    }

    pub async fn run(self) -> Result<()> {
        info!("=== Starting agent as @{} ===", self.config.x_username);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut scheduler_task: Option<JoinHandle<()>> = None;
        let mut phase = Phase::LoggingIn;
        let mut login_failed = false;

        loop {
            phase = match phase {
                Phase::LoggingIn => {
                    if self.login().await {
                        scheduler_task = Some(self.spawn_scheduler(shutdown_rx.clone()));
                        Phase::Cycling
                    } else {
                        error!("Could not log in after {} attempts", self.config.login_retry_attempts);
                        login_failed = true;
                        Phase::ShuttingDown
                    }
                }
                Phase::Cycling => {
                    tokio::select! {
                        _ = self.cycle() => Phase::Cycling,
                        _ = tokio::signal::ctrl_c() => {
                            info!("Shutdown signal received");
                            Phase::ShuttingDown
                        }
                    }
                }
                Phase::ShuttingDown => break,
            };
        }

        self.shutdown(shutdown_tx, scheduler_task).await;
        if login_failed {
            anyhow::bail!("login failed");
        }
        Ok(())
    }

    async fn login(&self) -> bool {
        let policy = RetryPolicy::new(
            self.config.login_retry_attempts,
            to_std(self.config.login_retry_max_delay),
        );
        let platform = self.ctx.platform.clone();
        retry_operation(&policy, "Login", || {
            let platform = platform.clone();
            async move { platform.lock().await.ensure_logged_in().await }
        })
        .await
        .is_some()
    }

    fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let data_dir = &self.config.data_dir;
        let flow = PostingFlow::new(
            self.ctx.clone(),
            UsedLinks::load(data_dir.join(USED_URLS_FILE), Utc::now()),
            TweetHistory::load(data_dir.join(TWEET_HISTORY_FILE)),
            self.config.tweet_interval,
        );
        let scheduler = Scheduler::new(self.config.post_interval, Utc::now());
        tokio::spawn(scheduler.run(to_std(self.config.scheduler_tick), shutdown, flow))
    }

    /// One pass of the polling loop followed by its pacing delay.
    /// Returns whether the pass completed without a cycle-level failure.
    pub(crate) async fn cycle(&self) -> bool {
        match self.run_steps().await {
            Ok(()) => {
                sleep(to_std(self.config.cycle_delay)).await;
                true
            }
            Err(e) => {
                error!("Error in main loop: {:#}", e);
                self.ctx.memory.save_all().await;
                sleep(to_std(self.config.error_delay)).await;
                false
            }
        }
    }

    /// Requests, DMs and mentions, then a memory checkpoint. A failing step is
    /// logged and the next one still runs. Fails only when every step failed.
    pub(crate) async fn run_steps(&self) -> Result<()> {
        let step_delay = to_std(self.config.step_delay);
        let mut failed = Vec::new();

        match process_message_requests(&self.ctx).await {
            Ok(_) => {}
            Err(e) => {
                error!("Message request step failed: {:#}", e);
                failed.push("requests");
            }
        }
        sleep(step_delay).await;

        match process_dms(&self.ctx).await {
            Ok(answered) => info!("Answered {} conversations", answered),
            Err(e) => {
                error!("DM step failed: {:#}", e);
                failed.push("dms");
            }
        }
        sleep(step_delay).await;

        match process_mentions(&self.ctx, self.config.mention_cutoff).await {
            Ok(replied) => info!("Replied to {} mentions", replied),
            Err(e) => {
                error!("Mention step failed: {:#}", e);
                failed.push("mentions");
            }
        }
        sleep(step_delay).await;

        self.ctx.memory.save_all().await;
        if failed.len() == STEP_COUNT {
            anyhow::bail!("every step failed ({})", failed.join(", "));
        }
        Ok(())
    }

    async fn shutdown(self, shutdown_tx: watch::Sender<bool>, scheduler_task: Option<JoinHandle<()>>) {
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
        if let Some(task) = scheduler_task {
            if let Err(e) = task.await {
                error!("Scheduler task failed: {}", e);
            }
        }

        self.ctx.memory.save_all().await;
        self.ctx.platform.lock().await.close().await;

        let Runtime { ctx, memory_task, .. } = self;
        drop(ctx);
        if let Err(e) = memory_task.await {
            error!("Memory task failed: {}", e);
        }
        info!("Shutdown complete");
    }
}
