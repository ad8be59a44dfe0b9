//! Country reference data keyed by ISO 3166 alpha-3 code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MapreelError, MapreelResult};
use crate::math::LngLat;

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn south_west(&self) -> LngLat {
        LngLat::new(self.west, self.south)
    }

    pub fn north_east(&self) -> LngLat {
        LngLat::new(self.east, self.north)
    }

    pub fn center(&self) -> LngLat {
        LngLat::new((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }
}

/// Replacement box for countries whose naive bounding box is dominated by
/// distant territories, plus an empirical icon shrink factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsOverride {
    pub bbox: BoundingBox,
    pub icon_adjustment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryData {
    pub name: String,
    pub alpha2: String,
    pub alpha3: String,
    pub coordinates: LngLat,
    pub zoom_level: f64,
    #[serde(default)]
    pub visual_center: Option<LngLat>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub bounds_override: Option<BoundsOverride>,
}

impl CountryData {
    /// Point the camera should aim at: the curated visual center if present.
    pub fn focus(&self) -> LngLat {
        self.visual_center.unwrap_or(self.coordinates)
    }

    /// Bounding box used for fitting and icon sizing.
    pub fn effective_bbox(&self) -> Option<BoundingBox> {
        self.bounds_override.map(|o| o.bbox).or(self.bbox)
    }
}

#[allow(clippy::too_many_arguments)]
fn country(
    name: &str,
    alpha2: &str,
    alpha3: &str,
    center: (f64, f64),
    zoom_level: f64,
    bbox: (f64, f64, f64, f64),
    visual_center: Option<(f64, f64)>,
    bounds_override: Option<((f64, f64, f64, f64), f64)>,
) -> CountryData {
    CountryData {
        name: name.to_string(),
        alpha2: alpha2.to_string(),
        alpha3: alpha3.to_string(),
        coordinates: LngLat::new(center.0, center.1),
        zoom_level,
        visual_center: visual_center.map(|(lng, lat)| LngLat::new(lng, lat)),
        bbox: Some(BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3)),
        bounds_override: bounds_override.map(|(b, icon_adjustment)| BoundsOverride {
            bbox: BoundingBox::new(b.0, b.1, b.2, b.3),
            icon_adjustment,
        }),
    }
}

fn builtin_countries() -> Vec<CountryData> {
    vec![
        country(
            "United States",
            "US",
            "USA",
            (-98.58, 39.83),
            3.2,
            (-179.15, 18.91, 179.77, 71.39),
            Some((-98.58, 39.83)),
            Some(((-124.85, 24.40, -66.88, 49.38), 0.65)),
        ),
        country(
            "Russia",
            "RU",
            "RUS",
            (105.32, 61.52),
            2.4,
            (-180.0, 41.19, 180.0, 81.86),
            Some((96.0, 62.0)),
            Some(((27.3, 41.19, 180.0, 77.7), 0.6)),
        ),
        country(
            "France",
            "FR",
            "FRA",
            (2.21, 46.23),
            4.8,
            (-61.8, -21.4, 55.8, 51.1),
            Some((2.35, 46.6)),
            Some(((-5.14, 41.33, 9.56, 51.09), 0.8)),
        ),
        country(
            "Norway",
            "NO",
            "NOR",
            (8.47, 60.47),
            3.8,
            (4.6, 57.9, 31.3, 80.8),
            Some((9.5, 61.5)),
            Some(((4.6, 57.9, 31.1, 71.2), 0.75)),
        ),
        country(
            "New Zealand",
            "NZ",
            "NZL",
            (174.89, -40.90),
            4.3,
            (-176.2, -52.6, 178.6, -29.2),
            Some((172.5, -41.5)),
            Some(((166.4, -47.3, 178.6, -34.4), 0.8)),
        ),
        country(
            "Chile",
            "CL",
            "CHL",
            (-71.54, -35.68),
            3.3,
            (-109.5, -56.0, -66.4, -17.5),
            Some((-71.0, -33.5)),
            Some(((-75.7, -56.0, -66.4, -17.5), 0.7)),
        ),
        country(
            "Germany",
            "DE",
            "DEU",
            (10.45, 51.17),
            5.2,
            (5.87, 47.27, 15.04, 55.06),
            None,
            None,
        ),
        country(
            "Brazil",
            "BR",
            "BRA",
            (-51.93, -14.24),
            3.2,
            (-73.99, -33.75, -34.79, 5.27),
            None,
            None,
        ),
        country(
            "Japan",
            "JP",
            "JPN",
            (138.25, 36.20),
            4.4,
            (122.93, 24.04, 153.99, 45.55),
            None,
            None,
        ),
        country(
            "India",
            "IN",
            "IND",
            (78.96, 20.59),
            3.8,
            (68.18, 6.75, 97.40, 35.50),
            None,
            None,
        ),
        country(
            "Australia",
            "AU",
            "AUS",
            (133.78, -25.27),
            3.4,
            (113.34, -43.63, 153.57, -10.67),
            None,
            None,
        ),
        country(
            "Canada",
            "CA",
            "CAN",
            (-106.35, 56.13),
            2.8,
            (-141.0, 41.68, -52.62, 83.11),
            None,
            None,
        ),
        country(
            "Egypt",
            "EG",
            "EGY",
            (30.80, 26.82),
            5.0,
            (24.70, 22.0, 36.87, 31.67),
            None,
            None,
        ),
        country(
            "Kenya",
            "KE",
            "KEN",
            (37.91, -0.02),
            5.6,
            (33.89, -4.68, 41.86, 5.51),
            None,
            None,
        ),
        country(
            "United Kingdom",
            "GB",
            "GBR",
            (-3.44, 55.38),
            5.0,
            (-8.65, 49.86, 1.77, 60.86),
            Some((-2.0, 53.5)),
            None,
        ),
    ]
}

/// Read-only lookup table of country reference data.
#[derive(Debug, Clone, Default)]
pub struct CountryRegistry {
    countries: HashMap<String, CountryData>,
}

impl CountryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled reference countries.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for c in builtin_countries() {
            registry.insert(c);
        }
        registry
    }

    /// Load an external dataset: a JSON array of country records.
    pub fn from_json(json: &str) -> MapreelResult<Self> {
        let records: Vec<CountryData> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for c in records {
            if c.alpha3.len() != 3 {
                return Err(MapreelError::InvalidArgument(format!(
                    "country '{}' has malformed alpha-3 code '{}'",
                    c.name, c.alpha3
                )));
            }
            registry.insert(c);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, country: CountryData) {
        self.countries
            .insert(country.alpha3.to_ascii_uppercase(), country);
    }

    /// Case-insensitive alpha-3 lookup.
    pub fn get(&self, alpha3: &str) -> Option<&CountryData> {
        self.countries.get(&alpha3.to_ascii_uppercase())
    }

    pub fn require(&self, alpha3: &str) -> MapreelResult<&CountryData> {
        self.get(alpha3)
            .ok_or_else(|| MapreelError::UnknownCountry(alpha3.to_string()))
    }

    /// All countries sorted by alpha-3 code.
    pub fn all(&self) -> Vec<&CountryData> {
        let mut list: Vec<&CountryData> = self.countries.values().collect();
        list.sort_by(|a, b| a.alpha3.cmp(&b.alpha3));
        list
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}
