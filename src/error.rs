//! Error types surfaced by the tile engine.
//!
//! Every public operation returns [`TileError`]. The byte-range and TIFF plumbing
//! underneath works with [`AnyResult`] and is converted into a typed error at the
//! raster-access boundary.

use thiserror::Error;

/// Boxed error used by the low-level range reader and TIFF plumbing.
pub type AnyResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, TileError>;

/// Failure kinds returned to the caller of a tile request.
///
/// The type is `Clone` because a single failed in-flight production is shared by
/// every caller waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TileError {
    /// The raster could not be opened or reached.
    #[error("failed to open raster source {source_id}: {message}")]
    SourceOpen { source_id: String, message: String },

    /// The raster has no usable overview levels or malformed pyramid descriptors.
    #[error("unusable metadata for {source_id}: {message}")]
    Metadata { source_id: String, message: String },

    /// The raster-access library failed to read or resample a window.
    #[error("failed to decode window from {source_id}: {message}")]
    Decode { source_id: String, message: String },

    /// Tile address or tile size outside the supported range.
    #[error("invalid tile request: {0}")]
    InvalidRequest(String),

    /// A renderer strategy rejected or mis-sized its output.
    #[error("renderer failed: {0}")]
    Render(String),
}

impl TileError {
    pub fn source_open(source_id: &str, message: impl ToString) -> Self {
        Self::SourceOpen {
            source_id: source_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn metadata(source_id: &str, message: impl ToString) -> Self {
        Self::Metadata {
            source_id: source_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn decode(source_id: &str, message: impl ToString) -> Self {
        Self::Decode {
            source_id: source_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_request(message: impl ToString) -> Self {
        Self::InvalidRequest(message.to_string())
    }

    /// Short machine-friendly name of the error kind, used as a log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceOpen { .. } => "source_open",
            Self::Metadata { .. } => "metadata",
            Self::Decode { .. } => "decode",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Render(_) => "render",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_source() {
        let err = TileError::source_open("https://example.com/a.tif", "connection refused");
        let text = err.to_string();
        assert!(text.contains("https://example.com/a.tif"));
        assert!(text.contains("connection refused"));
        assert_eq!(err.kind(), "source_open");
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = TileError::decode("a.tif", "corrupt chunk");
        assert_eq!(err.clone(), err);
    }

    fn parse_block_size(text: &str) -> AnyResult<u32> {
        Ok(text.trim().parse::<u32>()?)
    }

    #[test]
    fn test_any_result_boxes_foreign_errors() {
        assert_eq!(parse_block_size(" 65536 ").unwrap(), 65536);

        let err = parse_block_size("lots").unwrap_err();
        let typed = TileError::source_open("a.tif", err);
        assert!(typed.to_string().contains("invalid digit"));
    }
}
