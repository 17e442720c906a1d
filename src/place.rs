//! The place records read from the input file and written to the output file.

use crate::utils::validate_url;
use crate::{ItemResult, WorkItem};
use serde::{Deserialize, Serialize};

/// One input row. Columns are matched by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Place {
    pub id: String,
    pub order: String,
    pub name: String,
    pub province: String,
    pub city: String,
    pub code: String,
    pub active: String,
    pub google_map_url: String,
}

impl Place {
    /// The map URL with its first `/review` segment removed.
    pub fn place_url(&self) -> String {
        self.google_map_url.replacen("/review", "", 1).trim().to_string()
    }
}

impl WorkItem for Place {
    fn target(&self) -> Option<String> {
        let url = self.place_url();
        if url.is_empty() {
            return None;
        }
        validate_url(&url).map(|_| url)
    }

    fn label(&self) -> String {
        if self.name.is_empty() {
            format!("#{}", self.id)
        } else {
            self.name.clone()
        }
    }
}

/// One output row: the input columns plus the extracted rating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatedPlace {
    pub id: String,
    pub order: String,
    pub name: String,
    pub province: String,
    pub city: String,
    pub code: String,
    pub active: String,
    pub google_map_url: String,
    pub rating: Option<String>,
}

impl From<ItemResult<Place, String>> for RatedPlace {
    fn from(result: ItemResult<Place, String>) -> Self {
        let ItemResult {
            item,
            target,
            outcome,
            ..
        } = result;

        Self {
            google_map_url: target.unwrap_or(item.google_map_url),
            id: item.id,
            order: item.order,
            name: item.name,
            province: item.province,
            city: item.city,
            code: item.code,
            active: item.active,
            rating: outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemStatus, ScrapeError};
    use std::time::Duration;

    fn place(url: &str) -> Place {
        Place {
            id: "17".to_string(),
            name: "Café Central".to_string(),
            city: "Madrid".to_string(),
            google_map_url: url.to_string(),
            ..Default::default()
        }
    }

    fn result(
        place: Place,
        outcome: Option<&str>,
        status: ItemStatus,
    ) -> ItemResult<Place, String> {
        ItemResult {
            target: place.target(),
            item: place,
            outcome: outcome.map(str::to_string),
            status,
            worker_id: 0,
            sequence: 1,
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_target_strips_first_review_segment() {
        let p = place("https://www.google.com/maps/place/abc/review/review");
        assert_eq!(
            p.target().as_deref(),
            Some("https://www.google.com/maps/place/abc/review")
        );
    }

    #[test]
    fn test_target_without_review_is_unchanged() {
        let p = place("https://www.google.com/maps/place/abc");
        assert_eq!(p.target().as_deref(), Some("https://www.google.com/maps/place/abc"));
    }

    #[test]
    fn test_empty_or_invalid_target() {
        assert_eq!(place("").target(), None);
        assert_eq!(place("/review").target(), None);
        assert_eq!(place("   ").target(), None);
        assert_eq!(place("maps/place/abc").target(), None);
    }

    #[test]
    fn test_label_falls_back_to_id() {
        assert_eq!(place("").label(), "Café Central");
        let unnamed = Place {
            id: "9".to_string(),
            ..Default::default()
        };
        assert_eq!(unnamed.label(), "#9");
    }

    #[test]
    fn test_rated_place_uses_derived_url() {
        let row: RatedPlace = result(
            place("https://www.google.com/maps/place/abc/review"),
            Some("4.6"),
            ItemStatus::Completed,
        )
        .into();

        assert_eq!(row.google_map_url, "https://www.google.com/maps/place/abc");
        assert_eq!(row.rating.as_deref(), Some("4.6"));
        assert_eq!(row.name, "Café Central");
    }

    #[test]
    fn test_degraded_row_keeps_original_url() {
        let row: RatedPlace = result(place("/review"), None, ItemStatus::Skipped).into();
        assert_eq!(row.google_map_url, "/review");
        assert_eq!(row.rating, None);

        let row: RatedPlace = result(
            place("https://www.google.com/maps/place/abc"),
            None,
            ItemStatus::Failed(ScrapeError::RatingNotFound("abc".to_string())),
        )
        .into();
        assert_eq!(row.rating, None);
    }

    #[test]
    fn test_deserialize_camel_case_header() {
        let json = r#"{"id":"1","name":"Museo","googleMapUrl":"https://maps.google.com/x"}"#;
        let p: Place = serde_json::from_str(json).unwrap();
        assert_eq!(p.google_map_url, "https://maps.google.com/x");
        assert_eq!(p.province, "");
    }
}
