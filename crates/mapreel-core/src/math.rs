use serde::{Deserialize, Serialize};

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// The null island origin, used as the neutral center.
    pub fn origin() -> Self {
        Self { lng: 0.0, lat: 0.0 }
    }

    /// Whether both components are finite and inside the valid WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }

    /// Linear interpolation between two coordinates.
    pub fn lerp(&self, other: &LngLat, t: f64) -> LngLat {
        LngLat {
            lng: self.lng + (other.lng - self.lng) * t,
            lat: self.lat + (other.lat - self.lat) * t,
        }
    }
}

impl Default for LngLat {
    fn default() -> Self {
        Self::origin()
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

/// A point in screen (pixel) space, as returned by a map projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }
}

impl Default for ScreenPoint {
    fn default() -> Self {
        Self::zero()
    }
}

/// A 2D size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size2D {
    pub width: f64,
    pub height: f64,
}

impl Size2D {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Size of the axis-aligned box spanned by two projected corners.
    pub fn between(a: ScreenPoint, b: ScreenPoint) -> Self {
        Self {
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    /// Compute the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0.0 {
            return 0.0;
        }
        self.width / self.height
    }

    /// Ratio of the longer side to the shorter side (always >= 1 for non-empty sizes).
    pub fn elongation(&self) -> f64 {
        let short = self.width.min(self.height);
        if short <= 0.0 {
            return 0.0;
        }
        self.width.max(self.height) / short
    }
}
