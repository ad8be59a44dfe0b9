//! Icon sizing and placement over the highlighted country.

use serde::{Deserialize, Serialize};

use mapreel_core::country::CountryData;
use mapreel_core::easing::smoothstep;
use mapreel_core::math::{LngLat, ScreenPoint, Size2D};
use mapreel_core::settings::IconSettings;
use mapreel_core::timeline::PhaseState;

/// Elongation above which a country without an explicit override still gets
/// the weighted sizing.
const ELONGATED_THRESHOLD: f64 = 3.0;
const DEFAULT_ELONGATED_ADJUSTMENT: f64 = 0.85;

/// Pixel size of the icon for a country whose bounding box projects to
/// `projected`.
///
/// Compact countries use the smaller projected dimension. Countries with an
/// override box (`adjustment`) or an extreme aspect ratio blend the two
/// dimensions 80/20 toward the smaller one and then shrink by the empirical
/// adjustment factor.
pub fn icon_size(projected: Size2D, settings: &IconSettings, adjustment: Option<f64>) -> f64 {
    let short = projected.width.min(projected.height);
    let long = projected.width.max(projected.height);
    let elongated = adjustment.is_some() || projected.elongation() > ELONGATED_THRESHOLD;

    let dimension = if elongated {
        0.8 * short + 0.2 * long
    } else {
        short
    };
    let mut size = dimension * settings.coverage_percent / 100.0 * settings.scale_factor;
    if elongated {
        size *= adjustment.unwrap_or(DEFAULT_ELONGATED_ADJUSTMENT);
    }
    if !size.is_finite() {
        return settings.min_size;
    }
    size.clamp(settings.min_size, settings.max_size).round()
}

/// Where the icon sits and how large it is, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IconGeometry {
    pub center: ScreenPoint,
    pub size: f64,
}

impl IconGeometry {
    /// Measure the icon for `country` through a map projection.
    ///
    /// Returns `None` when the country has no bounding box.
    pub fn measure<P>(country: &CountryData, settings: &IconSettings, project: P) -> Option<Self>
    where
        P: Fn(LngLat) -> ScreenPoint,
    {
        let bbox = country.effective_bbox()?;
        let projected = Size2D::between(project(bbox.south_west()), project(bbox.north_east()));
        let adjustment = country.bounds_override.map(|o| o.icon_adjustment);
        Some(Self {
            center: project(country.focus()),
            size: icon_size(projected, settings, adjustment),
        })
    }
}

/// Freezes icon geometry once the map view has settled, so that the icon
/// does not jitter while the camera keeps easing.
#[derive(Debug, Clone, Default)]
pub struct IconStabilizer {
    frozen: Option<IconGeometry>,
}

impl IconStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stabilized geometry. Frames before the view settles show nothing,
    /// even once geometry is frozen, so the answer does not depend on render
    /// order. On the first settled call `measure` runs once and its result
    /// is kept.
    pub fn observe<F>(&mut self, settled: bool, measure: F) -> Option<IconGeometry>
    where
        F: FnOnce() -> Option<IconGeometry>,
    {
        if !settled {
            return None;
        }
        if self.frozen.is_none() {
            self.frozen = measure();
            if let Some(geometry) = &self.frozen {
                tracing::debug!(size = geometry.size, "icon geometry stabilized");
            }
        }
        self.frozen
    }

    pub fn frozen(&self) -> Option<IconGeometry> {
        self.frozen
    }

    /// Forget the frozen geometry, e.g. after the country changes.
    pub fn reset(&mut self) {
        self.frozen = None;
    }
}

/// Overlay drawn on top of the map for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    pub icon: Option<IconGeometry>,
    pub icon_opacity: f64,
    pub info_opacity: Option<f64>,
}

impl OverlayState {
    /// Icon opacity follows label-phase progress through smoothstep.
    pub fn at(phase: &PhaseState, icon: Option<IconGeometry>, info_opacity: Option<f64>) -> Self {
        let icon_opacity = match icon {
            Some(_) => smoothstep(phase.label_progress),
            None => 0.0,
        };
        Self {
            icon,
            icon_opacity,
            info_opacity,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.icon.is_some() && self.icon_opacity > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapreel_core::country::CountryRegistry;
    use mapreel_core::timeline::{derive_phase, Timeline};

    #[test]
    fn test_usa_override_weighted_and_adjusted() {
        let size = icon_size(Size2D::new(1000.0, 400.0), &IconSettings::default(), Some(0.65));
        // (0.8 * 400 + 0.2 * 1000) * 0.5 * 0.65
        assert_eq!(size, 169.0);
        assert!(size >= 20.0);
    }

    #[test]
    fn test_compact_country_uses_smaller_side() {
        let size = icon_size(Size2D::new(300.0, 200.0), &IconSettings::default(), None);
        assert_eq!(size, 100.0);
    }

    #[test]
    fn test_elongated_without_override_uses_default_shrink() {
        let size = icon_size(Size2D::new(100.0, 400.0), &IconSettings::default(), None);
        // (0.8 * 100 + 0.2 * 400) * 0.5 * 0.85
        assert_eq!(size, 68.0);
    }

    #[test]
    fn test_size_is_clamped() {
        let settings = IconSettings::default();
        assert_eq!(icon_size(Size2D::new(10.0, 10.0), &settings, None), 20.0);
        assert_eq!(icon_size(Size2D::new(5000.0, 4000.0), &settings, None), 400.0);
        assert_eq!(icon_size(Size2D::new(f64::NAN, 10.0), &settings, None), 20.0);
    }

    #[test]
    fn test_scale_factor_applies() {
        let settings = IconSettings {
            scale_factor: 1.5,
            ..IconSettings::default()
        };
        assert_eq!(icon_size(Size2D::new(300.0, 200.0), &settings, None), 150.0);
    }

    #[test]
    fn test_measure_uses_override_box_and_visual_center() {
        let registry = CountryRegistry::builtin();
        let usa = registry.require("USA").unwrap();
        let project = |p: LngLat| ScreenPoint::new(p.lng * 10.0, -p.lat * 10.0);
        let geometry = IconGeometry::measure(usa, &IconSettings::default(), project).unwrap();
        assert_eq!(geometry.center, project(usa.focus()));
        // Override box is about 580 x 250 px under this projection.
        assert!(geometry.size < 125.0);
        assert!(geometry.size >= 20.0);
    }

    #[test]
    fn test_stabilizer_freezes_after_settle() {
        let mut stabilizer = IconStabilizer::new();
        let geometry = |size| IconGeometry {
            center: ScreenPoint::new(1.0, 2.0),
            size,
        };
        assert_eq!(stabilizer.observe(false, || Some(geometry(50.0))), None);
        assert_eq!(stabilizer.observe(true, || Some(geometry(60.0))), Some(geometry(60.0)));
        assert_eq!(stabilizer.observe(true, || Some(geometry(90.0))), Some(geometry(60.0)));
        // An earlier frame rendered afterwards still shows no icon.
        assert_eq!(stabilizer.observe(false, || Some(geometry(90.0))), None);
        assert_eq!(stabilizer.frozen(), Some(geometry(60.0)));
        stabilizer.reset();
        assert_eq!(stabilizer.frozen(), None);
    }

    #[test]
    fn test_overlay_opacity_follows_label_phase() {
        let frames = Timeline::default().frames(0);
        let icon = Some(IconGeometry {
            center: ScreenPoint::zero(),
            size: 80.0,
        });

        let before = OverlayState::at(&derive_phase(frames.label_start, &frames), icon, None);
        assert_eq!(before.icon_opacity, 0.0);
        assert!(!before.is_visible());

        let midpoint = (frames.label_start + frames.label_complete) / 2;
        let mid = OverlayState::at(&derive_phase(midpoint, &frames), icon, None);
        assert!((mid.icon_opacity - 0.5).abs() < 1e-12);

        let after = OverlayState::at(&derive_phase(frames.label_complete, &frames), icon, None);
        assert_eq!(after.icon_opacity, 1.0);
        assert!(after.is_visible());
    }
}
