//! Wire and domain types for the restaurant backend.
//!
//! Detection responses come back in more than one shape: a flat list of
//! ingredients, or an analysis object with `detected_objects` and a per-label
//! `summary`. [`WireIngredients`] accepts all of them and
//! [`Detection::from_wire`] folds them into one internal shape straight away,
//! so nothing past the API boundary has to care.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DefaultOnError, DisplayFromStr, PickFirst, VecSkipError, serde_as};

/// Freshness of a detected ingredient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    #[default]
    Fresh,
    Spoiled,
    Unknown,
}

impl Freshness {
    /// Map a classifier label such as `Fresh_apple` or `Rotten_banana`
    pub fn from_health_status(status: &str) -> Self {
        if status.starts_with("Fresh") {
            Freshness::Fresh
        } else if status.starts_with("Rotten") || status.starts_with("Spoiled") {
            Freshness::Spoiled
        } else {
            Freshness::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Fresh => "Fresh",
            Freshness::Spoiled => "At Risk",
            Freshness::Unknown => "Unknown",
        }
    }
}

/// One row of a detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedIngredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub status: Freshness,
}

/// Counts across a whole detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionTotals {
    pub items: u32,
    pub fresh: u32,
    pub spoiled: u32,
}

/// Normalised detection result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub ingredients: Vec<DetectedIngredient>,
    pub totals: DetectionTotals,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.ingredients.is_empty()
    }

    /// Fold any accepted wire shape into a [`Detection`]. Missing or
    /// unrecognised payloads become an empty detection.
    pub fn from_wire(wire: Option<WireIngredients>) -> Self {
        match wire {
            Some(WireIngredients::List(items)) => Self::from_list(items),
            Some(WireIngredients::Analysis(analysis)) => Self::from_analysis(analysis),
            Some(WireIngredients::Other(_)) | None => Self::default(),
        }
    }

    fn from_list(items: Vec<WireIngredient>) -> Self {
        let ingredients: Vec<DetectedIngredient> = items
            .into_iter()
            .map(|item| DetectedIngredient {
                name: item.name,
                quantity: item.quantity,
                unit: item.unit,
                status: if item.spoiled.unwrap_or(false) {
                    Freshness::Spoiled
                } else {
                    Freshness::Fresh
                },
            })
            .collect();

        let spoiled = ingredients
            .iter()
            .filter(|i| i.status == Freshness::Spoiled)
            .count() as u32;
        let items = ingredients.len() as u32;
        Self {
            ingredients,
            totals: DetectionTotals {
                items,
                fresh: items - spoiled,
                spoiled,
            },
        }
    }

    fn from_analysis(analysis: WireAnalysis) -> Self {
        let mut counts: BTreeMap<String, StatusCounts> = BTreeMap::new();

        for (label, value) in analysis.summary {
            if SUMMARY_META_KEYS.contains(&label.as_str()) {
                continue;
            }
            if let Ok(parsed) = serde_json::from_value::<StatusCounts>(value) {
                counts.insert(label, parsed);
            }
        }

        // Older backends only send the raw objects
        if counts.is_empty() {
            for object in &analysis.detected_objects {
                let entry = counts.entry(object.ingredient.clone()).or_default();
                match Freshness::from_health_status(&object.health_status) {
                    Freshness::Fresh => entry.fresh += 1,
                    Freshness::Spoiled => entry.spoiled += 1,
                    Freshness::Unknown => entry.unknown += 1,
                }
            }
        }

        let ingredients: Vec<DetectedIngredient> = counts
            .iter()
            .map(|(name, c)| DetectedIngredient {
                name: name.clone(),
                quantity: f64::from(c.fresh + c.spoiled + c.unknown),
                unit: "items".to_string(),
                status: if c.spoiled > c.fresh {
                    Freshness::Spoiled
                } else {
                    Freshness::Fresh
                },
            })
            .collect();

        let summed_fresh = counts.values().map(|c| c.fresh).sum();
        let summed_spoiled = counts.values().map(|c| c.spoiled).sum();
        let summed_items = counts
            .values()
            .map(|c| c.fresh + c.spoiled + c.unknown)
            .sum();

        Self {
            ingredients,
            totals: DetectionTotals {
                items: analysis.total_items.unwrap_or(summed_items),
                fresh: analysis.total_fresh.unwrap_or(summed_fresh),
                spoiled: analysis.total_spoiled.unwrap_or(summed_spoiled),
            },
        }
    }

    /// Per-label fresh/spoiled counts, the shape `/daily_specials` expects
    pub fn summary(&self) -> BTreeMap<String, StatusCounts> {
        self.ingredients
            .iter()
            .map(|i| {
                let n = i.quantity.max(0.0).round() as u32;
                let counts = match i.status {
                    Freshness::Fresh => StatusCounts {
                        fresh: n,
                        ..Default::default()
                    },
                    Freshness::Spoiled => StatusCounts {
                        spoiled: n,
                        ..Default::default()
                    },
                    Freshness::Unknown => StatusCounts {
                        unknown: n,
                        ..Default::default()
                    },
                };
                (i.name.clone(), counts)
            })
            .collect()
    }
}

const SUMMARY_META_KEYS: [&str; 3] = ["total_fresh", "total_items", "total_spoiled"];

/// Any `ingredients` payload the detection endpoints return
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireIngredients {
    /// Rows that are not objects at all are skipped
    List(#[serde_as(as = "VecSkipError<_>")] Vec<WireIngredient>),
    Analysis(WireAnalysis),
    Other(Value),
}

/// One list row. A null or mistyped field falls back to its default instead
/// of failing the row, and numeric text such as `"200"` is accepted.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct WireIngredient {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default, alias = "ingredient")]
    pub name: String,
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub quantity: f64,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub unit: String,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default)]
    pub spoiled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAnalysis {
    #[serde(default)]
    pub detected_objects: Vec<WireDetectedObject>,
    #[serde(default)]
    pub summary: BTreeMap<String, Value>,
    #[serde(default)]
    pub total_items: Option<u32>,
    #[serde(default)]
    pub total_fresh: Option<u32>,
    #[serde(default)]
    pub total_spoiled: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDetectedObject {
    #[serde(default)]
    pub ingredient: String,
    #[serde(default)]
    pub detection_confidence: f64,
    #[serde(default)]
    pub health_status: String,
    #[serde(default)]
    pub health_confidence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    #[serde(rename = "Fresh", default)]
    pub fresh: u32,
    #[serde(rename = "Spoiled", default)]
    pub spoiled: u32,
    #[serde(rename = "Unknown", default)]
    pub unknown: u32,
}

/// Envelope of `/upload_image`, `/upload_live_frame`, `/upload_video`
/// and `/analyze-image`
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionEnvelope {
    #[serde(default)]
    pub ingredients: Option<WireIngredients>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Ingredient line of a dish recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub photo: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dishes: Vec<Dish>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Where a new dish's photo comes from
#[derive(Debug, Clone)]
pub enum DishPhoto {
    Url(String),
    File { bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct NewDish {
    pub name: String,
    pub price: f64,
    pub ingredients: Vec<Ingredient>,
    pub photo: Option<DishPhoto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMenu {
    pub name: String,
    pub description: String,
    /// Dish ids
    pub dishes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationType {
    Inventory,
    Custom,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateDishesRequest {
    #[serde(rename = "type")]
    pub generation_type: GenerationType,
    pub message: String,
    pub ingredients: Vec<String>,
}

/// Consumption row returned by `/upload_csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRow {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub ingredient: String,
    #[serde(default)]
    pub consumption: f64,
    #[serde(rename = "type", default)]
    pub period: String,
    #[serde(default)]
    pub high_risk: bool,
}

/// `/upload_csv` answers with rows, with forecast fields, or with both
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CsvUploadResponse {
    Rows(Vec<ConsumptionRow>),
    Forecast(serde_json::Map<String, Value>),
}

impl CsvUploadResponse {
    /// Rows carried by the response, wherever they were put
    pub fn rows(&self) -> Vec<ConsumptionRow> {
        match self {
            CsvUploadResponse::Rows(rows) => rows.clone(),
            CsvUploadResponse::Forecast(fields) => fields
                .get("data")
                .or_else(|| fields.get("rows"))
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        }
    }

    /// Non-row fields, rendered as-is
    pub fn forecast_fields(&self) -> serde_json::Map<String, Value> {
        match self {
            CsvUploadResponse::Rows(_) => serde_json::Map::new(),
            CsvUploadResponse::Forecast(fields) => fields
                .iter()
                .filter(|(k, _)| k.as_str() != "data" && k.as_str() != "rows")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// The `{ success, data, message }` shape several endpoints share
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceReply<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DishesReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub dishes: Vec<Dish>,
    #[serde(default)]
    pub dish: Option<Dish>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MenusReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub menus: Vec<Menu>,
    #[serde(default)]
    pub menu: Option<Menu>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GraphsReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub graphs: BTreeMap<String, String>,
}
