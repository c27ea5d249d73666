use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::core::agent::Assistant;
use crate::core::state::MemoryClient;
use crate::providers::create_api::Generator;
use crate::providers::media;

/// Collaborators shared by the polling loop and the scheduler.
pub struct Context<P> {
    /// The single browser-backed platform; each step holds the lock while it drives the page.
    pub platform: Arc<Mutex<P>>,
    pub assistant: Arc<dyn Assistant>,
    pub generator: Arc<dyn Generator>,
    pub memory: MemoryClient,
    pub http: reqwest::Client,
    pub temp_dir: PathBuf,
}

impl<P> Clone for Context<P> {
    fn clone(&self) -> Self {
        Context {
            platform: self.platform.clone(),
            assistant: self.assistant.clone(),
            generator: self.generator.clone(),
            memory: self.memory.clone(),
            http: self.http.clone(),
            temp_dir: self.temp_dir.clone(),
        }
    }
}

impl<P> Context<P> {
    /// Downloads generated media for attaching; `None` when there is no link or the download fails.
    pub async fn fetch_media(&self, link: Option<&str>) -> Option<PathBuf> {
        let link = link?;
        match media::download_media(&self.http, link, &self.temp_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Could not download media {}: {}", link, e);
                None
            }
        }
    }
}

/// `text`, followed by a blank line and the link when there is one.
pub fn with_link(text: &str, link: Option<&str>) -> String {
    match link {
        Some(link) if !link.is_empty() => format!("{}\n\n{}", text, link),
        _ => text.to_string(),
    }
}
