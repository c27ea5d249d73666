use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chromiumoxide::{Element, Page};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::BrowserError;
use crate::models::{MentionCandidate, Message};
use crate::providers::browser::{
    click_button_with_text, jitter, text_of, type_like_human, upload_file, BrowserSession,
    SelectorChain,
};

const HOME_URL: &str = "https://x.com/home";
const LOGIN_URL: &str = "https://x.com/login";
const MESSAGES_URL: &str = "https://x.com/messages";
const REQUESTS_URL: &str = "https://x.com/messages/requests";
const MENTIONS_URL: &str = "https://x.com/notifications/mentions";
const COMPOSE_URL: &str = "https://x.com/compose/post";

/// Class X puts on message bubbles sent by the logged-in account.
const OWN_MESSAGE_CLASS: &str = "r-obd0qt";

const SYSTEM_CELL_MARKERS: [&str; 5] = ["you accepted", "seen", "sent", "you joined", "request"];

const USERNAME_INPUT: SelectorChain = SelectorChain::new(
    "username input",
    &["input[autocomplete='username']", "input[name='text']"],
);
const PASSWORD_INPUT: SelectorChain = SelectorChain::new(
    "password input",
    &["input[name='password']", "input[type='password']"],
);
const ACCOUNT_MENU: SelectorChain = SelectorChain::new(
    "account menu",
    &["[data-testid='SideNav_AccountSwitcher_Button']"],
);
const CONVERSATIONS: SelectorChain = SelectorChain::new(
    "conversations",
    &["[data-testid='conversation']", "[data-testid='cellInnerDiv']"],
);
const REQUEST_ROWS: SelectorChain = SelectorChain::new(
    "message requests",
    &[
        "div[data-testid='conversation']",
        "div[data-testid='cellInnerDiv']",
        "div[role='row']",
    ],
);
const MESSAGE_CELLS: SelectorChain =
    SelectorChain::new("message cells", &["[data-testid='cellInnerDiv']"]);
const MESSAGE_ENTRY: SelectorChain =
    SelectorChain::new("message entry", &["[data-testid='messageEntry']"]);
const DM_INPUT: SelectorChain = SelectorChain::new(
    "message input",
    &[
        "div[data-testid='dmComposerTextInput'][role='textbox']",
        "div[data-testid='dmComposerTextInput']",
    ],
);
const DM_SEND: SelectorChain = SelectorChain::new(
    "send button",
    &["[data-testid='dmComposerSendButton']", "button[aria-label='Send']"],
);
const FILE_INPUT: SelectorChain = SelectorChain::new(
    "file input",
    &["input[data-testid='fileInput']", "input[type='file']"],
);
const ATTACHMENTS: SelectorChain =
    SelectorChain::new("attachment preview", &["[data-testid='attachments']"]);
const TWEETS: SelectorChain = SelectorChain::new(
    "tweets",
    &[
        "[data-testid='tweet']",
        "article[role='article']",
        "[data-testid='cellInnerDiv']",
    ],
);
const REPLY_BUTTON: SelectorChain = SelectorChain::new(
    "reply button",
    &[
        "[data-testid='reply']",
        "[aria-label*='Reply']",
        "[role='button'][aria-label*='Reply']",
    ],
);
const COMPOSER: SelectorChain = SelectorChain::new(
    "tweet composer",
    &[
        "div[role='dialog'] div[data-testid='tweetTextarea_0'][role='textbox']",
        "div[data-testid='tweetTextarea_0'][role='textbox']",
    ],
);
const COMPOSER_FILE_INPUT: SelectorChain = SelectorChain::new(
    "composer file input",
    &[
        "div[role='dialog'] input[data-testid='fileInput']",
        "input[data-testid='fileInput']",
    ],
);
const POST_BUTTON: SelectorChain = SelectorChain::new(
    "post button",
    &[
        "div[role='dialog'] button[data-testid='tweetButton']",
        "button[data-testid='tweetButton']",
        "button[data-testid='tweetButtonInline']",
    ],
);

/// The social platform as seen by the agent. Every action that touches the
/// platform goes through here so the flows can be driven by a fake in tests.
#[async_trait]
pub trait Platform: Send {
    /// Reuses the existing session when possible, otherwise logs in.
    async fn ensure_logged_in(&mut self) -> Result<(), BrowserError>;

    /// Accepts up to `limit` pending message requests; returns how many were accepted.
    async fn accept_message_requests(&mut self, limit: usize) -> Result<usize, BrowserError>;

    /// Handles (with leading '@') of the most recent conversations.
    async fn conversation_handles(&mut self, limit: usize) -> Result<Vec<String>, BrowserError>;

    /// Opens the conversation with `handle` and reads its messages, oldest first.
    async fn open_conversation(&mut self, handle: &str) -> Result<Vec<Message>, BrowserError>;

    /// Sends into the currently open conversation.
    async fn send_message(&mut self, text: &str, media: Option<&Path>) -> Result<bool, BrowserError>;

    async fn mentions(&mut self) -> Result<Vec<MentionCandidate>, BrowserError>;

    async fn reply_to_tweet(
        &mut self,
        tweet_id: &str,
        text: &str,
        media: Option<&Path>,
    ) -> Result<bool, BrowserError>;

    async fn post_tweet(&mut self, text: &str, media: Option<&Path>) -> Result<bool, BrowserError>;

    async fn close(&mut self);
}

/// `Platform` backed by a real browser session on x.com.
pub struct XBrowser {
    session: Option<BrowserSession>,
    username: String,
    password: String,
    headless: bool,
    profile_dir: PathBuf,
}

impl XBrowser {
    pub fn new(username: &str, password: &str, headless: bool, profile_dir: PathBuf) -> Self {
        XBrowser {
            session: None,
            username: username.to_string(),
            password: password.to_string(),
            headless,
            profile_dir,
        }
    }

    async fn session(&mut self) -> Result<&BrowserSession, BrowserError> {
        if self.session.is_none() {
            let session = BrowserSession::launch(self.headless, self.profile_dir.clone()).await?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| BrowserError::Setup("browser session unavailable".to_string()))
    }

    async fn login(&self, session: &BrowserSession) -> Result<(), BrowserError> {
        info!("Starting login process");
        session.navigate(LOGIN_URL).await?;
        sleep(Duration::from_secs(3)).await;
        let page = session.page();

        let username_input = USERNAME_INPUT.find(page, Duration::from_secs(10)).await?;
        type_like_human(&username_input, &self.username).await?;
        if !click_button_with_text(page, "Next").await? {
            return Err(BrowserError::Login("next button not found".to_string()));
        }
        sleep(Duration::from_secs(2)).await;

        let password_input = PASSWORD_INPUT.find(page, Duration::from_secs(10)).await?;
        type_like_human(&password_input, &self.password).await?;
        if !click_button_with_text(page, "Log in").await? {
            return Err(BrowserError::Login("log in button not found".to_string()));
        }
        sleep(Duration::from_secs(5)).await;

        ACCOUNT_MENU
            .find(page, Duration::from_secs(10))
            .await
            .map_err(|_| BrowserError::Login("home timeline did not load".to_string()))?;
        info!("Login successful");
        Ok(())
    }

    /// Types into the open composer, attaches media and submits.
    async fn submit_composer(page: &Page, text: &str, media: Option<&Path>) -> Result<bool, BrowserError> {
        let composer = COMPOSER.find(page, Duration::from_secs(5)).await?;
        type_like_human(&composer, text).await?;

        if let Some(path) = media {
            let input = COMPOSER_FILE_INPUT.find(page, Duration::from_secs(5)).await?;
            upload_file(page, &input, path).await?;
            ATTACHMENTS
                .find(page, Duration::from_secs(30))
                .await
                .map_err(|_| BrowserError::Upload("attachment preview never appeared".to_string()))?;
            sleep(Duration::from_secs(2)).await;
        }

        let button = POST_BUTTON.find(page, Duration::from_secs(5)).await?;
        button.click().await?;

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            sleep(Duration::from_secs(1)).await;
            if page
                .find_element("div[role='dialog'] div[data-testid='tweetTextarea_0']")
                .await
                .is_err()
            {
                return Ok(true);
            }
        }
        warn!("Composer still open after posting");
        Ok(false)
    }

    async fn read_messages(page: &Page) -> Vec<Message> {
        sleep(Duration::from_secs(2)).await;
        let cells = MESSAGE_CELLS.find_all(page, Duration::from_secs(5)).await;
        let mut scraped = Vec::new();

        for cell in cells {
            let cell_text = text_of(&cell).await.unwrap_or_default();
            let Some(entry) = MESSAGE_ENTRY.find_in(&cell).await else {
                if is_system_cell(&cell_text) {
                    debug!("Skipping system notification: {}", truncate(&cell_text, 30));
                }
                continue;
            };
            let Some(raw) = text_of(&entry).await else {
                continue;
            };
            let text = first_line(&raw).to_string();

            let class = entry.attribute("class").await.ok().flatten().unwrap_or_default();
            let message = if is_own_message(&class) {
                Message::outgoing(&text, false)
            } else {
                Message::incoming(&text)
            };
            scraped.push((message, time_of(&cell).await));
        }
        let messages = dedup_messages(backfill_timestamps(scraped));

        if let Some(last) = messages.last() {
            info!(
                "Read {} messages, last: {} {}",
                messages.len(),
                if last.is_from_us { "[US]" } else { "[THEM]" },
                truncate(&last.text, 50)
            );
        }
        messages
    }

    async fn mention_from(element: &Element) -> Option<MentionCandidate> {
        let tweet_id = match element.find_elements("a[href*='/status/']").await {
            Ok(links) => {
                let mut id = None;
                for link in links {
                    if let Some(href) = link.attribute("href").await.ok().flatten() {
                        id = tweet_id_from_href(&href);
                        if id.is_some() {
                            break;
                        }
                    }
                }
                id?
            }
            Err(_) => return None,
        };

        let user_name = element.find_element("[data-testid='User-Name']").await.ok()?;
        let handle = handle_from_user_name(&text_of(&user_name).await?)?;
        let text_el = element.find_element("[data-testid='tweetText']").await.ok()?;
        let text = text_of(&text_el).await?;

        Some(MentionCandidate {
            tweet_id,
            handle,
            text,
            posted_at: time_of(element).await,
        })
    }
}

#[async_trait]
impl Platform for XBrowser {
    async fn ensure_logged_in(&mut self) -> Result<(), BrowserError> {
        let session = self.session().await?;
        session.navigate(HOME_URL).await?;
        sleep(Duration::from_secs(3)).await;

        let url = session.current_url().await.unwrap_or_default();
        if !url.contains("login") && !url.contains("/i/flow") && ACCOUNT_MENU.is_present(session.page()).await {
            info!("Already logged in");
            return Ok(());
        }

        let session = self
            .session
            .as_ref()
            .ok_or_else(|| BrowserError::Setup("browser session unavailable".to_string()))?;
        self.login(session).await
    }

    async fn accept_message_requests(&mut self, limit: usize) -> Result<usize, BrowserError> {
        let session = self.session().await?;
        let page = session.page();
        let mut accepted = 0;

        while accepted < limit {
            session.navigate(REQUESTS_URL).await?;
            sleep(Duration::from_secs(4)).await;

            let rows = REQUEST_ROWS.find_all(page, Duration::from_secs(5)).await;
            let Some(row) = rows.into_iter().next() else {
                break;
            };
            row.click().await?;
            sleep(Duration::from_secs(2)).await;

            if !click_button_with_text(page, "Accept").await? {
                warn!("Accept button not found, stopping request processing");
                break;
            }
            accepted += 1;
            info!("Accepted message request {}/{}", accepted, limit);
            jitter(1000, 2000).await;
        }

        if accepted > 0 {
            session.navigate(MESSAGES_URL).await?;
            sleep(Duration::from_secs(2)).await;
        }
        Ok(accepted)
    }

    async fn conversation_handles(&mut self, limit: usize) -> Result<Vec<String>, BrowserError> {
        let session = self.session().await?;
        session.navigate(MESSAGES_URL).await?;
        sleep(Duration::from_secs(2)).await;

        let conversations = CONVERSATIONS.find_all(session.page(), Duration::from_secs(5)).await;
        let mut handles = Vec::new();
        for conversation in conversations.into_iter().take(limit) {
            let text = text_of(&conversation).await.unwrap_or_default();
            match handle_in_preview(&text) {
                Some(handle) if !handles.contains(&handle) => {
                    info!("Found conversation with {}", handle);
                    handles.push(handle);
                }
                Some(_) => {}
                None => debug!("No handle in conversation preview"),
            }
        }
        Ok(handles)
    }

    async fn open_conversation(&mut self, handle: &str) -> Result<Vec<Message>, BrowserError> {
        let session = self.session().await?;
        let page = session.page();
        session.navigate(MESSAGES_URL).await?;
        sleep(Duration::from_secs(2)).await;

        for conversation in CONVERSATIONS.find_all(page, Duration::from_secs(5)).await {
            let text = text_of(&conversation).await.unwrap_or_default();
            if handle_in_preview(&text).as_deref() == Some(handle) {
                conversation.click().await?;
                return Ok(Self::read_messages(page).await);
            }
        }
        Err(BrowserError::Exhausted(format!("conversation with {}", handle)))
    }

    async fn send_message(&mut self, text: &str, media: Option<&Path>) -> Result<bool, BrowserError> {
        let session = self.session().await?;
        let page = session.page();

        if let Some(path) = media {
            let input = FILE_INPUT.find(page, Duration::from_secs(5)).await?;
            upload_file(page, &input, path).await?;
            if ATTACHMENTS.find(page, Duration::from_secs(30)).await.is_err() {
                error!("Media preview did not appear");
                return Ok(false);
            }
            sleep(Duration::from_secs(2)).await;
        }

        let input = DM_INPUT.find(page, Duration::from_secs(5)).await?;
        type_like_human(&input, text).await?;

        let send = DM_SEND.find(page, Duration::from_secs(5)).await?;
        send.click().await?;
        sleep(Duration::from_secs(2)).await;
        info!("Message sent");
        Ok(true)
    }

    async fn mentions(&mut self) -> Result<Vec<MentionCandidate>, BrowserError> {
        let session = self.session().await?;
        session.navigate(MENTIONS_URL).await?;
        sleep(Duration::from_secs(3)).await;

        let mut candidates = Vec::new();
        for element in TWEETS.find_all(session.page(), Duration::from_secs(10)).await {
            match Self::mention_from(&element).await {
                Some(candidate) => candidates.push(candidate),
                None => debug!("Skipping mention without id, handle or text"),
            }
        }
        Ok(candidates)
    }

    async fn reply_to_tweet(
        &mut self,
        tweet_id: &str,
        text: &str,
        media: Option<&Path>,
    ) -> Result<bool, BrowserError> {
        let session = self.session().await?;
        let page = session.page();
        session.navigate(&format!("https://x.com/i/status/{}", tweet_id)).await?;
        sleep(Duration::from_secs(3)).await;

        let marker = format!("/status/{}", tweet_id);
        let mut target = None;
        for tweet in TWEETS.find_all(page, Duration::from_secs(10)).await {
            let selector = format!("a[href*='{}']", marker);
            if tweet.find_element(selector).await.is_ok() {
                target = Some(tweet);
                break;
            }
        }
        let Some(tweet) = target else {
            return Err(BrowserError::Exhausted(format!("tweet {}", tweet_id)));
        };

        let button = REPLY_BUTTON
            .find_in(&tweet)
            .await
            .ok_or_else(|| BrowserError::Exhausted(REPLY_BUTTON.name.to_string()))?;
        button.scroll_into_view().await?;
        sleep(Duration::from_secs(1)).await;
        button.click().await?;
        sleep(Duration::from_secs(1)).await;

        Self::submit_composer(page, text, media).await
    }

    async fn post_tweet(&mut self, text: &str, media: Option<&Path>) -> Result<bool, BrowserError> {
        let session = self.session().await?;
        session.navigate(COMPOSE_URL).await?;
        sleep(Duration::from_secs(3)).await;
        Self::submit_composer(session.page(), text, media).await
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

/// X only stamps the last bubble of a group, so an untimed message takes the
/// time of the next stamped one (or the previous, at the end of the thread).
fn backfill_timestamps(scraped: Vec<(Message, Option<DateTime<Utc>>)>) -> Vec<Message> {
    let times: Vec<Option<DateTime<Utc>>> = scraped.iter().map(|(_, t)| *t).collect();
    scraped
        .into_iter()
        .enumerate()
        .map(|(i, (mut message, _))| {
            let stamp = times[i..]
                .iter()
                .flatten()
                .next()
                .or_else(|| times[..i].iter().rev().flatten().next());
            if let Some(stamp) = stamp {
                message.timestamp = *stamp;
            }
            message
        })
        .collect()
}

/// Drops repeated renderings of the same bubble, keeping first occurrences.
fn dedup_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .filter(|m| seen.insert((m.text.clone(), m.timestamp, m.is_from_us)))
        .collect()
}

async fn time_of(element: &Element) -> Option<DateTime<Utc>> {
    let time = element.find_element("time").await.ok()?;
    let raw = time.attribute("datetime").await.ok().flatten()?;
    parse_datetime(&raw)
}

pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn is_own_message(class: &str) -> bool {
    class.contains(OWN_MESSAGE_CLASS)
}

pub fn is_system_cell(text: &str) -> bool {
    let lower = text.to_lowercase();
    SYSTEM_CELL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Extracts the id from a link like `/alice/status/123?s=20`.
pub fn tweet_id_from_href(href: &str) -> Option<String> {
    let rest = href.split("status/").nth(1)?;
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!id.is_empty()).then_some(id)
}

/// "Display Name @handle · 2h" -> "@handle"
pub fn handle_from_user_name(text: &str) -> Option<String> {
    let after = text.split('@').nth(1)?;
    let name = after.split_whitespace().next()?;
    let name = name.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
    (!name.is_empty()).then(|| format!("@{}", name))
}

/// First line of a conversation preview that is an @handle.
pub fn handle_in_preview(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('@'))
        .and_then(handle_from_user_name)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text).trim()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
