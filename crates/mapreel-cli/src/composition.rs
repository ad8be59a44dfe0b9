//! Shared `--config/--country/...` arguments and their resolution into a
//! `ResolvedComposition`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use mapreel_core::config::{CompositionConfig, ResolvedComposition};
use mapreel_core::country::CountryRegistry;
use mapreel_core::settings::{MotionPreset, Projection};

#[derive(Args, Debug, Clone, Default)]
pub struct CompositionArgs {
    /// Composition TOML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// ISO alpha-3 country code (overrides the config file)
    #[arg(long)]
    pub country: Option<String>,

    /// Theme: light, dark, satellite, minimal
    #[arg(long)]
    pub theme: Option<String>,

    /// Motion preset: cinematic, dynamic, subtle, static
    #[arg(long)]
    pub preset: Option<MotionPreset>,

    /// Projection: mercator or globe
    #[arg(long)]
    pub projection: Option<Projection>,

    /// JSON country dataset replacing the built-in table
    #[arg(long)]
    pub countries: Option<PathBuf>,
}

impl CompositionArgs {
    pub fn registry(&self) -> Result<CountryRegistry> {
        match &self.countries {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read country data: {}", path.display()))?;
                CountryRegistry::from_json(&json)
                    .with_context(|| format!("invalid country data: {}", path.display()))
            }
            None => Ok(CountryRegistry::builtin()),
        }
    }

    /// The composition config after applying command-line overrides.
    pub fn config(&self) -> Result<CompositionConfig> {
        let mut config = match &self.config {
            Some(path) => CompositionConfig::load_from_file(path)
                .with_context(|| format!("failed to load composition: {}", path.display()))?,
            None => {
                let country = self
                    .country
                    .clone()
                    .context("either --config or --country is required")?;
                CompositionConfig::for_country(country)
            }
        };
        if let Some(country) = &self.country {
            config.country = country.clone();
        }
        if let Some(theme) = &self.theme {
            config.theme = theme.clone();
        }
        if let Some(preset) = self.preset {
            config.motion_preset = preset;
        }
        if let Some(projection) = self.projection {
            config.projection = projection;
        }
        Ok(config)
    }

    pub fn resolve(&self) -> Result<(ResolvedComposition, CountryRegistry)> {
        let registry = self.registry()?;
        let resolved = self
            .config()?
            .resolve(&registry)
            .context("invalid composition")?;
        Ok((resolved, registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_flag_without_config() {
        let args = CompositionArgs {
            country: Some("nor".into()),
            preset: Some(MotionPreset::Static),
            ..Default::default()
        };
        let (resolved, _) = args.resolve().unwrap();
        assert_eq!(resolved.country.alpha3, "NOR");
        assert_eq!(resolved.motion, MotionPreset::Static.settings());
    }

    #[test]
    fn test_missing_country_is_an_error() {
        let err = CompositionArgs::default().config().unwrap_err();
        assert!(err.to_string().contains("--country"));
    }

    #[test]
    fn test_unknown_country_fails_resolution() {
        let args = CompositionArgs {
            country: Some("XXX".into()),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}
