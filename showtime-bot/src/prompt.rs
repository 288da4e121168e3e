//! System prompt assembly.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::catalog::{venue_now, MovieDetails, Showtime};

const DEFAULT_INSTRUCTIONS: &str = "You are the assistant of a cinema. Answer questions about \
what is showing using only the listings below. If a movie or time is not listed, say so. \
Keep answers short and friendly, and reply in the language the user writes in.";

/// Builds the system prompt from the instructions, listings and details.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    instructions: String,
    max_listings: usize,
    utc_offset_hours: i32,
}

impl PromptBuilder {
    pub fn new(instructions: Option<String>, max_listings: usize, utc_offset_hours: i32) -> Self {
        Self {
            instructions: instructions.unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            max_listings,
            utc_offset_hours,
        }
    }

    /// `upcoming` is expected filtered and sorted; rows past `max_listings`
    /// are left out.
    pub fn build(
        &self,
        now_utc: DateTime<Utc>,
        upcoming: &[Showtime],
        details: &[(String, MovieDetails)],
    ) -> String {
        let mut prompt = self.instructions.clone();
        let now = venue_now(now_utc, self.utc_offset_hours);
        let _ = write!(prompt, "\n\nCurrent local time: {}", now.format("%A %d/%m/%Y %H:%M"));

        prompt.push_str("\n\nUpcoming showtimes:");
        if upcoming.is_empty() {
            prompt.push_str("\n(none)");
        }
        for show in upcoming.iter().take(self.max_listings) {
            let _ = write!(
                prompt,
                "\n- {} | {}",
                show.title,
                show.starts_at.format("%a %d/%m %H:%M")
            );
            match &show.room {
                Some(room) => {
                    let _ = write!(prompt, " | {} ({room})", show.venue);
                }
                None => {
                    let _ = write!(prompt, " | {}", show.venue);
                }
            }
            if let Some(minutes) = show.duration_minutes {
                let _ = write!(prompt, " | {minutes} min");
            }
            if let Some(price) = show.price {
                let _ = write!(prompt, " | ${price:.2}");
            }
        }
        if upcoming.len() > self.max_listings {
            let _ = write!(prompt, "\n(+{} more)", upcoming.len() - self.max_listings);
        }

        for (title, info) in details {
            let _ = write!(prompt, "\n\nAbout \"{title}\":");
            if !info.synopsis.is_empty() {
                let _ = write!(prompt, "\nSynopsis: {}", info.synopsis);
            }
            if let Some(director) = &info.director {
                let _ = write!(prompt, "\nDirector: {director}");
            }
            if !info.cast.is_empty() {
                let _ = write!(prompt, "\nCast: {}", info.cast.join(", "));
            }
            if !info.genres.is_empty() {
                let _ = write!(prompt, "\nGenres: {}", info.genres.join(", "));
            }
            if let Some(rating) = &info.rating {
                let _ = write!(prompt, "\nRating: {rating}");
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    fn show(title: &str, at: &str) -> Showtime {
        Showtime {
            title: title.into(),
            venue: "Centro".into(),
            room: Some("Sala 2".into()),
            starts_at: NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M").unwrap(),
            price: Some(4500.0),
            duration_minutes: Some(155),
            enabled: true,
        }
    }

    #[test]
    fn test_listings_are_capped() {
        let builder = PromptBuilder::new(Some("Be brief.".into()), 2, -3);
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 21, 0, 0).unwrap();
        let rows = vec![
            show("Dune", "2026-03-10 19:00"),
            show("Alien", "2026-03-10 20:00"),
            show("Heat", "2026-03-10 21:00"),
        ];

        let prompt = builder.build(now, &rows, &[]);
        assert!(prompt.starts_with("Be brief."));
        assert!(prompt.contains("Current local time: Tuesday 10/03/2026 18:00"));
        assert!(prompt.contains("- Dune | Tue 10/03 19:00 | Centro (Sala 2) | 155 min | $4500.00"));
        assert!(prompt.contains("Alien"));
        assert!(!prompt.contains("Heat"));
        assert!(prompt.contains("(+1 more)"));
    }

    #[test]
    fn test_empty_listings_and_details() {
        let builder = PromptBuilder::new(None, 10, 0);
        let details = vec![(
            "Dune".to_string(),
            MovieDetails {
                synopsis: "Spice.".into(),
                cast: vec!["Zendaya".into()],
                director: Some("Denis Villeneuve".into()),
                genres: vec![],
                rating: None,
            },
        )];

        let prompt = builder.build(Utc::now(), &[], &details);
        assert!(prompt.contains("(none)"));
        assert!(prompt.contains("About \"Dune\":\nSynopsis: Spice.\nDirector: Denis Villeneuve\nCast: Zendaya"));
        assert!(!prompt.contains("Genres"));
    }
}
