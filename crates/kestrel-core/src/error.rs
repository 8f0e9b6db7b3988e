//! Error types for Kestrel Core

use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (returned synchronously, never emitted as events)
    #[error("Speed must be >= 0.0 and <= 2.0")]
    UnsupportedSpeed { speed: f64 },

    #[error("This video cannot be played fast forward")]
    UnsupportedFastForward { speed: f64 },

    #[error("This video cannot be played slow forward")]
    UnsupportedSlowForward { speed: f64 },

    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    // Host routing errors
    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("Player creation failed: {0}")]
    PlayerCreation(String),

    #[error("Unknown texture id {0}")]
    UnknownTexture(i64),

    #[error("Session {0} has shut down")]
    SessionClosed(i64),

    // Source errors
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Failed to load track metadata: {0}")]
    MetadataUnavailable(String),

    // Cache errors
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to parse playlist {url}: {reason}")]
    PlaylistParse { url: String, reason: String },

    #[error("URL is not routed through the cache proxy: {0}")]
    NotProxied(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Returns true for errors rejected synchronously at the control surface
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedSpeed { .. }
                | Error::UnsupportedFastForward { .. }
                | Error::UnsupportedSlowForward { .. }
                | Error::InvalidArgument { .. }
        )
    }

    /// Returns the wire code reported to the host
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedSpeed { .. } => "unsupported_speed",
            Error::UnsupportedFastForward { .. } => "unsupported_fast_forward",
            Error::UnsupportedSlowForward { .. } => "unsupported_slow_forward",
            Error::InvalidArgument { .. } => "invalid_argument",
            Error::NotImplemented(_) => "not_implemented",
            Error::PlayerCreation(_) => "player_creation_failed",
            Error::UnknownTexture(_) => "unknown_texture",
            Error::SessionClosed(_) => "session_closed",
            Error::AssetNotFound(_) => "asset_not_found",
            Error::MetadataUnavailable(_) => "metadata_unavailable",
            Error::Fetch { .. } => "fetch_failed",
            Error::PlaylistParse { .. } => "playlist_parse",
            Error::NotProxied(_) => "not_proxied",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Url(_) => "invalid_url",
            Error::Network(_) => "network",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_errors_are_validation() {
        assert!(Error::UnsupportedSpeed { speed: 2.5 }.is_validation());
        assert!(Error::UnsupportedFastForward { speed: 1.5 }.is_validation());
        assert!(!Error::SessionClosed(1).is_validation());
    }

    #[test]
    fn test_codes() {
        assert_eq!(Error::UnsupportedSpeed { speed: 2.5 }.code(), "unsupported_speed");
        assert_eq!(
            Error::UnsupportedSlowForward { speed: 0.5 }.code(),
            "unsupported_slow_forward"
        );
        assert_eq!(Error::NotImplemented("foo".into()).code(), "not_implemented");
    }
}
