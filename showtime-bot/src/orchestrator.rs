//! Message orchestration.
//!
//! For each direct text message: answer commands locally, otherwise fetch
//! the listings (cached, single-flight, retried), look up details for any
//! listed title the user mentions, generate a reply from the bounded
//! history and send it through whatever session is live at send time. The
//! exchange is remembered only once the reply went out.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use showtime_common::Config;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::cache::{Cached, TtlCache};
use crate::catalog::{mentioned_titles, upcoming, CatalogSource, DetailSource, MovieDetails, Showtime};
use crate::conversation::ConversationStore;
use crate::dispatch::MessageHandler;
use crate::error::{BotError, BotResult};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::message::InboundMessage;
use crate::prompt::PromptBuilder;
use crate::retry::RetryPolicy;
use crate::schedule::{RefreshAction, RefreshTarget};
use crate::session::{SessionHandle, SessionState};

const CATALOG_KEY: &str = "listings";
const MAX_DETAIL_LOOKUPS: usize = 3;

pub const CATALOG_UNAVAILABLE: &str =
    "Sorry, I can't reach the showtime listings right now. Please try again in a few minutes.";
pub const STALE_NOTE: &str =
    "(Heads up: I couldn't refresh the listings, so this may be slightly out of date.)";
pub const GENERATION_APOLOGY: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a moment.";
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong on our side. Please try again later.";
pub const HELP_TEXT: &str = "Ask me about movies and showtimes.\n\
Commands:\n\
!ping - check that I'm alive\n\
!status - connection status\n\
!reset - forget our conversation\n\
!help - this message";

/// A reply plus the generated answer to remember once it is delivered.
struct Answer {
    text: String,
    remember: Option<String>,
}

impl Answer {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            remember: None,
        }
    }
}

/// External collaborators of the orchestrator.
pub struct Sources {
    pub catalog: Arc<dyn CatalogSource>,
    pub details: Option<Arc<dyn DetailSource>>,
    pub generator: Arc<dyn TextGenerator>,
}

pub struct MessageOrchestrator {
    sources: Sources,
    session: SessionHandle,
    catalog_cache: TtlCache<&'static str, Vec<Showtime>>,
    detail_cache: TtlCache<String, MovieDetails>,
    conversations: Arc<ConversationStore>,
    catalog_retry: RetryPolicy,
    detail_retry: RetryPolicy,
    generation_retry: RetryPolicy,
    prompt: PromptBuilder,
    utc_offset_hours: i32,
}

impl MessageOrchestrator {
    pub fn new(config: &Config, sources: Sources, session: SessionHandle) -> Self {
        Self {
            sources,
            session,
            catalog_cache: TtlCache::new("catalog", config.cache.catalog_ttl()),
            detail_cache: TtlCache::with_capacity(
                "details",
                config.cache.detail_ttl(),
                config.cache.detail_capacity,
            ),
            conversations: Arc::new(ConversationStore::new(
                config.conversation.max_pairs,
                config.conversation.idle_expiry(),
                config.conversation.max_identities,
            )),
            catalog_retry: RetryPolicy::from_config("catalog", &config.retry),
            detail_retry: RetryPolicy::from_config("details", &config.retry),
            generation_retry: RetryPolicy::from_config("generation", &config.retry),
            prompt: PromptBuilder::new(
                config.llm.system_prompt.clone(),
                config.catalog.max_listings,
                config.catalog.utc_offset_hours,
            ),
            utc_offset_hours: config.catalog.utc_offset_hours,
        }
    }

    pub fn conversations(&self) -> Arc<ConversationStore> {
        Arc::clone(&self.conversations)
    }

    pub fn detail_cache(&self) -> TtlCache<String, MovieDetails> {
        self.detail_cache.clone()
    }

    pub fn catalog_cache(&self) -> TtlCache<&'static str, Vec<Showtime>> {
        self.catalog_cache.clone()
    }

    /// Handle one inbound message and send the reply.
    pub async fn on_inbound_message(&self, message: &InboundMessage) {
        if !message.direct {
            debug!(identity = %message.identity, "Ignoring message not sent directly to the bot");
            return;
        }
        let Some(text) = message.text_content().map(str::trim) else {
            debug!(identity = %message.identity, "Ignoring non-text message");
            return;
        };
        if text.is_empty() {
            return;
        }

        let identity = &message.identity;
        let answer = self.answer(identity, text).await;
        if self.send_reply(identity, &answer.text).await {
            self.remember(identity, text, answer);
        }
    }

    /// Produce the reply text for `text` from `identity` and remember the
    /// exchange, for callers that deliver the reply themselves.
    pub async fn respond(&self, identity: &str, text: &str) -> String {
        let answer = self.answer(identity, text).await;
        let reply = answer.text.clone();
        self.remember(identity, text, answer);
        reply
    }

    async fn answer(&self, identity: &str, text: &str) -> Answer {
        if let Some(reply) = self.command(identity, text) {
            return Answer::plain(reply);
        }

        match self.converse(identity, text).await {
            Ok(answer) => answer,
            Err(e) if e.is_transient() => {
                warn!(identity, error = %e, "Text generation failed after retries");
                Answer::plain(GENERATION_APOLOGY)
            }
            Err(e) => {
                error!(identity, error = %e, "Failed to answer message");
                Answer::plain(GENERIC_FAILURE)
            }
        }
    }

    fn remember(&self, identity: &str, text: &str, answer: Answer) {
        if let Some(reply) = answer.remember {
            self.conversations.append(identity, text, &reply);
        }
    }

    /// Fetch the listings ahead of the first message.
    pub async fn prewarm(&self) {
        match self.listings().await {
            Ok(cached) => info!(count = cached.value.len(), "Catalog cache prewarmed"),
            Err(e) => warn!(error = %e, "Catalog prewarm failed"),
        }
    }

    /// Prewarm every time the session becomes ready.
    pub fn spawn_prewarm(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = self.session.watch();
        tokio::spawn(async move {
            let mut was_ready = rx.borrow_and_update().state == SessionState::Ready;
            if was_ready {
                this.prewarm().await;
            }
            while rx.changed().await.is_ok() {
                let ready = rx.borrow_and_update().state == SessionState::Ready;
                if ready && !was_ready {
                    this.prewarm().await;
                }
                was_ready = ready;
            }
        })
    }

    fn command(&self, identity: &str, text: &str) -> Option<String> {
        let command = text.split_whitespace().next()?.to_lowercase();
        let reply = match command.as_str() {
            "!ping" => "pong".to_string(),
            "!help" => HELP_TEXT.to_string(),
            "!status" => {
                let snapshot = self.session.snapshot();
                let mut status = format!("Session: {}", snapshot.state);
                if snapshot.reconnect_attempts > 0 {
                    status.push_str(&format!(" (reconnect attempt {})", snapshot.reconnect_attempts));
                }
                status.push_str(&format!(
                    "\nActive conversations: {}\nListings cached: {}",
                    self.conversations.len(),
                    if self.catalog_cache.get(&CATALOG_KEY).is_some() { "yes" } else { "no" }
                ));
                status
            }
            "!reset" => {
                self.conversations.remove(identity);
                "Done, I've forgotten our conversation.".to_string()
            }
            _ => return None,
        };
        debug!(identity, command = %command, "Answered command");
        Some(reply)
    }

    async fn converse(&self, identity: &str, text: &str) -> BotResult<Answer> {
        let listings = match self.listings().await {
            Ok(listings) => listings,
            Err(e) => {
                warn!(identity, error = %e, "Catalog unavailable and nothing cached");
                return Ok(Answer::plain(CATALOG_UNAVAILABLE));
            }
        };

        let now = Utc::now();
        let shows = upcoming(&listings.value, now, self.utc_offset_hours);
        let details = self.details_for(&shows, text).await;

        let request = GenerationRequest {
            system: self.prompt.build(now, &shows, &details),
            history: self.conversations.history(identity),
            user_text: text.to_string(),
        };

        let generator = &self.sources.generator;
        let reply = self
            .generation_retry
            .execute(|| generator.generate(&request))
            .await?;

        let text = if listings.is_stale() {
            format!("{reply}\n\n{STALE_NOTE}")
        } else {
            reply.clone()
        };
        Ok(Answer {
            text,
            remember: Some(reply),
        })
    }

    async fn listings(&self) -> BotResult<Cached<Vec<Showtime>>> {
        let source = Arc::clone(&self.sources.catalog);
        let retry = self.catalog_retry.clone();
        self.catalog_cache
            .get_or_fetch(CATALOG_KEY, move || async move {
                retry.execute(|| source.list()).await
            })
            .await
    }

    async fn details_for(&self, shows: &[Showtime], text: &str) -> Vec<(String, MovieDetails)> {
        if self.sources.details.is_none() {
            return Vec::new();
        }
        let mut titles = mentioned_titles(shows, text);
        titles.truncate(MAX_DETAIL_LOOKUPS);

        join_all(titles.into_iter().map(|title| self.detail(title)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn detail(&self, title: String) -> Option<(String, MovieDetails)> {
        let source = Arc::clone(self.sources.details.as_ref()?);
        let retry = self.detail_retry.clone();
        let query = title.clone();

        let result = self
            .detail_cache
            .get_or_fetch(title.to_lowercase(), move || async move {
                retry.execute(|| source.details(&query)).await
            })
            .await;

        match result {
            Ok(cached) => Some((title, cached.value)),
            Err(e) => {
                warn!(title = %title, error = %e, "Detail lookup failed, skipping");
                None
            }
        }
    }

    /// Send through the session that is live now, if any. Returns whether
    /// the reply was handed to the transport.
    async fn send_reply(&self, identity: &str, text: &str) -> bool {
        let Some(session) = self.session.current_session() else {
            warn!(identity, "No ready session, dropping reply");
            return false;
        };
        match session.reply(identity, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(identity, error = %e, "Failed to send reply");
                false
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MessageOrchestrator {
    async fn handle(&self, message: InboundMessage) {
        let span = tracing::info_span!(
            "message",
            trace_id = %message.trace_id,
            identity = %message.identity
        );
        self.on_inbound_message(&message).instrument(span).await;
    }
}

/// Scheduled refreshes fetch straight from the source and overwrite the
/// cached entry, so a failed refresh leaves the previous value in place.
#[async_trait]
impl RefreshAction for MessageOrchestrator {
    async fn refresh(&self, target: &RefreshTarget) -> BotResult<String> {
        match target {
            RefreshTarget::Listings => {
                let source = &self.sources.catalog;
                let rows = self.catalog_retry.execute(|| source.list()).await?;
                let count = rows.len();
                self.catalog_cache.insert(CATALOG_KEY, rows);
                Ok(format!("{count} listings"))
            }
            RefreshTarget::Details { title } => {
                let source = self
                    .sources
                    .details
                    .as_ref()
                    .ok_or_else(|| BotError::Config("no details source configured".into()))?;
                let details = self.detail_retry.execute(|| source.details(title)).await?;
                self.detail_cache.insert(title.to_lowercase(), details);
                Ok(format!("details for {title}"))
            }
        }
    }
}
