//! A single automated browser session plus the element-lookup helpers the
//! X platform layer is built from.

use std::future::Future;
use std::path::{Path, PathBuf};

use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::BrowserError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Ordered lookup strategies for one UI element. The first strategy that
/// matches wins; running out of strategies is a single `Exhausted` failure.
#[derive(Debug, Clone, Copy)]
pub struct SelectorChain {
    pub name: &'static str,
    pub selectors: &'static [&'static str],
}

impl SelectorChain {
    pub const fn new(name: &'static str, selectors: &'static [&'static str]) -> Self {
        SelectorChain { name, selectors }
    }

    /// Waits up to `per_strategy` on each selector in turn.
    pub async fn find(&self, page: &Page, per_strategy: Duration) -> Result<Element, BrowserError> {
        let found = first_match(self.selectors, |selector| async move {
            wait_for_element(page, selector, per_strategy).await
        })
        .await;
        match found {
            Some((index, element)) => {
                debug!("Found {} with strategy #{}", self.name, index);
                Ok(element)
            }
            None => Err(BrowserError::Exhausted(self.name.to_string())),
        }
    }

    /// All elements for the first selector that matches anything.
    pub async fn find_all(&self, page: &Page, per_strategy: Duration) -> Vec<Element> {
        let found = first_match(self.selectors, |selector| async move {
            wait_for_elements(page, selector, per_strategy).await
        })
        .await;
        match found {
            Some((index, elements)) => {
                info!("Found {} {} using strategy #{}", elements.len(), self.name, index);
                elements
            }
            None => {
                info!("No {} found", self.name);
                Vec::new()
            }
        }
    }

    /// First match inside `parent`, without waiting.
    pub async fn find_in(&self, parent: &Element) -> Option<Element> {
        first_match(self.selectors, |selector| async move {
            parent.find_element(selector).await.ok()
        })
        .await
        .map(|(_, element)| element)
    }

    /// Whether any strategy currently matches.
    pub async fn is_present(&self, page: &Page) -> bool {
        for selector in self.selectors {
            if page.find_element(*selector).await.is_ok() {
                return true;
            }
        }
        false
    }
}

/// Tries `strategies` in order and returns the first success with its index.
pub async fn first_match<'a, T, F, Fut>(strategies: &'a [&'a str], mut attempt: F) -> Option<(usize, T)>
where
    F: FnMut(&'a str) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for (index, strategy) in strategies.iter().enumerate() {
        if let Some(found) = attempt(strategy).await {
            return Some((index, found));
        }
    }
    None
}

async fn wait_for_element(page: &Page, selector: &str, timeout: Duration) -> Option<Element> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Some(element);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_elements(page: &Page, selector: &str, timeout: Duration) -> Option<Vec<Element>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(elements) = page.find_elements(selector).await {
            if !elements.is_empty() {
                return Some(elements);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Random pause in milliseconds, used between UI actions.
pub async fn jitter(min_ms: u64, max_ms: u64) {
    let delay = {
        let mut rng = rand::thread_rng();
        rng.gen_range(min_ms..=max_ms)
    };
    sleep(Duration::from_millis(delay)).await;
}

pub async fn text_of(element: &Element) -> Option<String> {
    element
        .inner_text()
        .await
        .ok()
        .flatten()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Clicks into `element` and types `text` one character at a time.
pub async fn type_like_human(element: &Element, text: &str) -> Result<(), BrowserError> {
    element.click().await?;
    jitter(300, 700).await;
    for c in text.chars() {
        element.type_str(c.to_string()).await?;
        jitter(30, 100).await;
    }
    sleep(Duration::from_secs(1)).await;
    Ok(())
}

pub async fn upload_file(page: &Page, input: &Element, path: &Path) -> Result<(), BrowserError> {
    let absolute = std::fs::canonicalize(path)
        .map_err(|e| BrowserError::Upload(format!("{:?}: {}", path, e)))?;
    info!("Uploading media from {:?}", absolute);
    let params = SetFileInputFilesParams::builder()
        .files(vec![absolute.to_string_lossy().to_string()])
        .backend_node_id(input.backend_node_id)
        .build()
        .map_err(BrowserError::Upload)?;
    page.execute(params).await?;
    Ok(())
}

/// Clicks the first visible button whose text contains `label`.
pub async fn click_button_with_text(page: &Page, label: &str) -> Result<bool, BrowserError> {
    let label_json = serde_json::to_string(label).unwrap_or_else(|_| "\"\"".to_string());
    let js = format!(
        r#"(() => {{
            const label = {};
            const candidates = [...document.querySelectorAll("button, div[role='button']")];
            const target = candidates.find(el => el.offsetParent !== null && el.innerText.includes(label));
            if (!target) return false;
            target.click();
            return true;
        }})()"#,
        label_json
    );
    let clicked = page
        .evaluate(js)
        .await?
        .into_value::<bool>()
        .unwrap_or(false);
    Ok(clicked)
}

/// The browser process and the one page every action runs on.
pub struct BrowserSession {
    browser: Browser,
    handler: Option<JoinHandle<()>>,
    page: Page,
}

impl BrowserSession {
    pub async fn launch(headless: bool, user_data_dir: PathBuf) -> Result<Self, BrowserError> {
        let mode = if headless { HeadlessMode::New } else { HeadlessMode::False };
        let config = BrowserConfig::builder()
            .user_data_dir(user_data_dir)
            .headless_mode(mode)
            .window_size(1200, 800)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-infobars")
            .build()
            .map_err(BrowserError::Setup)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        let _ = page
            .evaluate("Object.defineProperty(navigator, 'webdriver', {get: () => undefined})")
            .await;
        info!("Browser session started (headless: {})", headless);

        Ok(BrowserSession {
            browser,
            handler: Some(handler_task),
            page,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Error closing browser: {}", e);
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        info!("Browser session closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_first_match_short_circuits() {
        let available: HashMap<&str, u32> = [("b", 2), ("c", 3)].into_iter().collect();
        let mut tried = Vec::new();

        let found = first_match(&["a", "b", "c"], |s| {
            tried.push(s);
            let hit = available.get(s).copied();
            async move { hit }
        })
        .await;

        assert_eq!(found, Some((1, 2)));
        assert_eq!(tried, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_first_match_exhausted() {
        let found: Option<(usize, ())> = first_match(&["x", "y"], |_| async { None }).await;
        assert!(found.is_none());
    }
}
