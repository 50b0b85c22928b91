//! Address lookup through Nominatim (`/search?format=json&limit=1`).

use crate::client::{HttpClient, ProviderError};
use crate::models::demand::Coordinates;
use log::debug;
use serde::Deserialize;

pub const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
}

pub struct Geocoder {
    client: HttpClient,
    url: String,
}

impl Geocoder {
    pub fn new(client: HttpClient) -> Self {
        Geocoder {
            client,
            url: NOMINATIM_SEARCH_URL.to_string(),
        }
    }

    /// `Ok(None)` when the address matched nothing.
    pub fn locate(&self, address: &str) -> Result<Option<Coordinates>, ProviderError> {
        let query = [
            ("q", address.to_string()),
            ("format", "json".to_string()),
            ("limit", "1".to_string()),
        ];
        let places: Vec<Place> = self.client.get_json(&self.url, &query)?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let coords = parse_place(&place)?;
        debug!(
            "Geocoding: '{}' -> {:.4},{:.4} ({})",
            address,
            coords.latitude,
            coords.longitude,
            place.display_name.as_deref().unwrap_or("-")
        );
        Ok(Some(coords))
    }
}

fn parse_place(place: &Place) -> Result<Coordinates, ProviderError> {
    let parse = |raw: &str, what: &str| {
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ProviderError::Unexpected(format!("invalid {what} '{raw}'")))
    };
    Ok(Coordinates {
        latitude: parse(&place.lat, "latitude")?,
        longitude: parse(&place.lon, "longitude")?,
    })
}
