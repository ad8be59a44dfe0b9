//! Core error types for mapreel.

/// A specialized Result type for mapreel operations.
pub type MapreelResult<T> = Result<T, MapreelError>;

/// Top-level error type encompassing all mapreel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum MapreelError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown country code: {0}")]
    UnknownCountry(String),

    #[error("unknown motion preset: {0}")]
    UnknownPreset(String),

    #[error("unknown theme: {0}")]
    UnknownTheme(String),

    #[error("map error: {0}")]
    Map(String),

    #[error("style load error: {message} ({url})")]
    StyleLoad { message: String, url: String },

    #[error("illegal map status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MapreelError {
    /// Create a style load error.
    pub fn style_load(message: impl Into<String>, url: impl Into<String>) -> Self {
        MapreelError::StyleLoad {
            message: message.into(),
            url: url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_load_error_display() {
        let err = MapreelError::style_load("style never loaded", "mapbox://styles/dark");
        assert_eq!(
            err.to_string(),
            "style load error: style never loaded (mapbox://styles/dark)"
        );
    }

    #[test]
    fn test_illegal_transition_display() {
        let err = MapreelError::IllegalTransition {
            from: "error".into(),
            to: "BeginInit".into(),
        };
        assert_eq!(err.to_string(), "illegal map status transition: error -> BeginInit");
    }
}
