//! Showtime catalog and movie detail sources.
//!
//! Listings come from a JSON endpoint returning an array of showtimes with
//! venue-local start times. Details are looked up per title and change
//! rarely, so they sit behind a long-TTL cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{BotError, BotResult};
use crate::http::http_client;

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Showtime {
    pub title: String,
    pub venue: String,
    #[serde(default)]
    pub room: Option<String>,
    /// Venue-local start time
    pub starts_at: NaiveDateTime,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Slow-changing metadata for a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub rating: Option<String>,
}

/// Source of the current showtime listings.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &str;

    async fn list(&self) -> BotResult<Vec<Showtime>>;
}

/// Source of per-title details.
#[async_trait]
pub trait DetailSource: Send + Sync {
    fn name(&self) -> &str;

    async fn details(&self, title: &str) -> BotResult<MovieDetails>;
}

/// Venue-local "now" for a fixed UTC offset.
pub fn venue_now(now_utc: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDateTime {
    (now_utc + ChronoDuration::hours(i64::from(utc_offset_hours))).naive_utc()
}

/// Enabled showtimes that have not started yet, in start order.
pub fn upcoming(showtimes: &[Showtime], now_utc: DateTime<Utc>, utc_offset_hours: i32) -> Vec<Showtime> {
    let local_now = venue_now(now_utc, utc_offset_hours);
    let mut rows: Vec<Showtime> = showtimes
        .iter()
        .filter(|s| s.enabled && s.starts_at > local_now)
        .cloned()
        .collect();
    rows.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
    rows
}

/// Distinct titles mentioned (case-insensitively) in `text`.
pub fn mentioned_titles(showtimes: &[Showtime], text: &str) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut titles: Vec<String> = Vec::new();
    for show in showtimes {
        let title = show.title.trim();
        if title.is_empty() || titles.iter().any(|t| t == title) {
            continue;
        }
        if haystack.contains(&title.to_lowercase()) {
            titles.push(title.to_string());
        }
    }
    titles
}

/// Listings fetched from a JSON endpoint.
pub struct HttpCatalogSource {
    url: String,
    client: Client,
}

impl HttpCatalogSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> BotResult<Self> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    fn name(&self) -> &str {
        "http-catalog"
    }

    async fn list(&self) -> BotResult<Vec<Showtime>> {
        let resp = self.client.get(&self.url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::from_status(status.as_u16(), body));
        }

        let body = resp.text().await?;
        let showtimes: Vec<Showtime> = serde_json::from_str(&body)?;
        debug!(count = showtimes.len(), "Fetched catalog listings");
        Ok(showtimes)
    }
}

/// Details fetched from `{url}?title=...`.
pub struct HttpDetailSource {
    url: String,
    client: Client,
}

impl HttpDetailSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> BotResult<Self> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl DetailSource for HttpDetailSource {
    fn name(&self) -> &str {
        "http-details"
    }

    async fn details(&self, title: &str) -> BotResult<MovieDetails> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("title", title)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::from_status(status.as_u16(), body));
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn show(title: &str, starts_at: &str, enabled: bool) -> Showtime {
        Showtime {
            title: title.into(),
            venue: "Centro".into(),
            room: None,
            starts_at: NaiveDateTime::parse_from_str(starts_at, "%Y-%m-%d %H:%M").unwrap(),
            price: Some(4500.0),
            duration_minutes: None,
            enabled,
        }
    }

    #[test]
    fn upcoming_applies_offset_and_filters() {
        // 21:00 UTC is 18:00 at UTC-3
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 21, 0, 0).unwrap();
        let rows = vec![
            show("Late", "2026-03-10 22:00", true),
            show("Started", "2026-03-10 17:30", true),
            show("Soon", "2026-03-10 18:30", true),
            show("Hidden", "2026-03-10 20:00", false),
        ];

        let upcoming = upcoming(&rows, now, -3);
        let titles: Vec<&str> = upcoming.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Soon", "Late"]);
    }

    #[test]
    fn mentioned_titles_are_case_insensitive_and_distinct() {
        let rows = vec![
            show("Dune", "2026-03-10 22:00", true),
            show("Dune", "2026-03-11 22:00", true),
            show("Alien", "2026-03-10 22:00", true),
        ];
        let titles = mentioned_titles(&rows, "what time is DUNE tonight?");
        assert_eq!(titles, vec!["Dune".to_string()]);
    }

    #[tokio::test]
    async fn http_catalog_parses_listings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/listings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "title": "Dune", "venue": "Centro", "starts_at": "2026-03-10T22:00:00", "price": 4500.0 },
                { "title": "Alien", "venue": "Norte", "starts_at": "2026-03-10T23:15:00", "enabled": false }
            ])))
            .mount(&server)
            .await;

        let source =
            HttpCatalogSource::new(format!("{}/listings", server.uri()), Duration::from_secs(5))
                .unwrap();
        let rows = source.list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].price, Some(4500.0));
        assert!(!rows[1].enabled);
    }

    #[tokio::test]
    async fn http_catalog_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let source = HttpCatalogSource::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = source.list().await.unwrap_err();
        assert!(matches!(err, BotError::RateLimited(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn http_catalog_rejects_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"a list\"}"))
            .mount(&server)
            .await;

        let source = HttpCatalogSource::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = source.list().await.unwrap_err();
        assert!(matches!(err, BotError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn http_details_queries_by_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/details"))
            .and(query_param("title", "Dune"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "synopsis": "Spice.",
                "cast": ["Timothée Chalamet"],
                "director": "Denis Villeneuve",
                "genres": ["sci-fi"],
                "rating": "PG-13"
            })))
            .mount(&server)
            .await;

        let source =
            HttpDetailSource::new(format!("{}/details", server.uri()), Duration::from_secs(5))
                .unwrap();
        let details = source.details("Dune").await.unwrap();
        assert_eq!(details.director.as_deref(), Some("Denis Villeneuve"));
        assert_eq!(details.genres, vec!["sci-fi".to_string()]);
    }
}
