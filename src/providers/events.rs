//! Local event extraction through Gemini `generateContent` with Google Search grounding.
//!
//! The model answers in free text that should contain a JSON array of days. Parsing
//! is lenient: code fences are stripped, a lone object is wrapped into an array, and
//! event fields accept the English keys as well as the French ones the service
//! historically used. Anything unreadable degrades to "no events".

use crate::client::{HttpClient, ProviderError};
use crate::models::demand::{EventCategory, ImpactEvent, RestaurantConfig, VenueType};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

const UNKNOWN_EVENT_NAME: &str = "Unknown";
const DEFAULT_DISTANCE_METERS: f64 = 5000.0;

const INSTRUCTIONS: &str = r#"You are a strict data extractor specialised in restaurant demand.
For EACH date listed below, use Google Search to find significant events (sport, concerts,
business fairs, popular festivities, strikes) near the given address.
- Special days (Valentine's Day, Mother's Day, national holiday celebrations...) are events of category "SPECIAL".
- Do not report school vacations or public holidays that involve no festive outing.
- For each event decide whether it takes place INDOOR or OUTDOOR.
- When nothing is found for a date, return an empty event list for that date.
Answer ONLY with a JSON array, one object per date:
[{"date":"YYYY-MM-DD","events":[{"name":"string","category":"SPORT|CONCERT|BUSINESS|FAMILY|CULTURE|FETE|SPECIAL|OTHER","venue_type":"INDOOR|OUTDOOR","expected_attendance":0,"distance_meters":0,"start_time":"HH:MM"}]}]"#;

/// What the prompt tells the model about one day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayContext {
    pub date: NaiveDate,
    pub weather_code: i32,
    pub tmax: f64,
}

// ---- wire types ----

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    tools: [Tool; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

// ---- model answer ----

#[derive(Debug, Deserialize)]
struct DayAnswer {
    date: Option<String>,
    #[serde(default)]
    events: Vec<EventAnswer>,
}

#[derive(Debug, Deserialize)]
struct EventAnswer {
    #[serde(default, alias = "nom")]
    name: Option<String>,
    #[serde(default, alias = "categorie")]
    category: Option<EventCategory>,
    #[serde(default, alias = "type_lieu")]
    venue_type: Option<VenueType>,
    #[serde(default, alias = "distance_metres")]
    distance_meters: Option<f64>,
    #[serde(default, alias = "horaire_debut")]
    start_time: Option<String>,
    #[serde(default, alias = "affluence_estimee_personnes")]
    expected_attendance: Option<f64>,
}

impl From<EventAnswer> for ImpactEvent {
    fn from(e: EventAnswer) -> Self {
        ImpactEvent {
            name: e
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_EVENT_NAME.to_string()),
            category: e.category.unwrap_or(EventCategory::Other),
            venue_type: e.venue_type.unwrap_or_default(),
            distance_meters: e
                .distance_meters
                .filter(|d| d.is_finite())
                .unwrap_or(DEFAULT_DISTANCE_METERS),
            start_time: e.start_time,
            expected_attendance: e
                .expected_attendance
                .filter(|a| a.is_finite() && *a >= 0.0)
                .map(|a| a.min(u32::MAX as f64) as u32),
        }
    }
}

/// Strip markdown fences and wrap a lone object so the answer parses as an array.
pub fn normalize_answer(raw: &str) -> String {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    if cleaned.starts_with('{') {
        format!("[{cleaned}]")
    } else {
        cleaned.to_string()
    }
}

/// Events keyed by date; entries with unreadable dates are dropped.
pub fn parse_answer(raw: &str) -> Result<BTreeMap<NaiveDate, Vec<ImpactEvent>>, ProviderError> {
    let normalized = normalize_answer(raw);
    let mut de = serde_json::Deserializer::from_str(&normalized);
    let days: Vec<DayAnswer> = serde_path_to_error::deserialize(&mut de).map_err(|e| ProviderError::Decode {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })?;

    let mut out: BTreeMap<NaiveDate, Vec<ImpactEvent>> = BTreeMap::new();
    for day in days {
        let Some(date) = day
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        else {
            debug!("Events: dropping answer entry without a usable date");
            continue;
        };
        out.entry(date)
            .or_default()
            .extend(day.events.into_iter().map(ImpactEvent::from));
    }
    Ok(out)
}

pub fn build_prompt(config: &RestaurantConfig, days: &[DayContext]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    let _ = write!(
        prompt,
        "\n\nAddress: {}\nContext: {}, {}\nDates:\n",
        config.full_address,
        config.urban_context.as_str(),
        config.restaurant_type
    );
    for day in days {
        let _ = writeln!(
            prompt,
            "- Date: {} ({}), weather code {}, max {:.1}°C",
            day.date,
            day.date.format("%A"),
            day.weather_code,
            day.tmax
        );
    }
    prompt
}

pub struct EventExtractor {
    client: HttpClient,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl EventExtractor {
    pub fn new(client: HttpClient, api_key: Option<String>, model: &str) -> Self {
        EventExtractor {
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn upcoming_events(
        &self,
        config: &RestaurantConfig,
        days: &[DayContext],
    ) -> Result<BTreeMap<NaiveDate, Vec<ImpactEvent>>, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::Disabled("GEMINI_API_KEY not set"));
        };
        if days.is_empty() {
            return Ok(BTreeMap::new());
        }

        let prompt = build_prompt(config, days);
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: &prompt }],
            }],
            tools: [Tool {
                google_search: GoogleSearch {},
            }],
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!("Events: asking {} about {} day(s)", self.model, days.len());
        let res: GenerateResponse = self
            .client
            .post_json(&url, &[("x-goog-api-key", api_key)], &request)?;

        let text = res.text();
        if text.trim().is_empty() {
            warn!("Events: model returned no text");
            return Ok(BTreeMap::new());
        }
        let events = parse_answer(&text)?;
        debug!(
            "Events: {} event(s) over {} day(s)",
            events.values().map(Vec::len).sum::<usize>(),
            events.len()
        );
        Ok(events)
    }
}
