//! ABI type definitions
//!
//! This module defines the error codes returned across the plugin ABI and
//! the runtime limits governing an instance. Every import returns a small
//! negative integer on failure because the plugin's import trampolines
//! expect synchronous, non-throwing returns.

use std::time::Duration;

/// Errors returned by the `std` import namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StdError {
    #[error("invalid descriptor")]
    InvalidDescriptor,
    #[error("invalid buffer size")]
    InvalidBufferSize,
    #[error("failed to write plugin memory")]
    FailedMemoryWrite,
    #[error("invalid string")]
    InvalidString,
    #[error("invalid date string")]
    InvalidDateString,
}

impl StdError {
    pub fn code(self) -> i32 {
        match self {
            StdError::InvalidDescriptor => -1,
            StdError::InvalidBufferSize => -2,
            StdError::FailedMemoryWrite => -3,
            StdError::InvalidString => -4,
            StdError::InvalidDateString => -5,
        }
    }
}

/// Errors returned by the `net` import namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    #[error("invalid descriptor")]
    InvalidDescriptor,
    #[error("invalid string")]
    InvalidString,
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid url")]
    InvalidUrl,
    #[error("invalid html")]
    InvalidHtml,
    #[error("invalid buffer size")]
    InvalidBufferSize,
    #[error("missing data")]
    MissingData,
    #[error("missing response")]
    MissingResponse,
    #[error("missing url")]
    MissingUrl,
    #[error("request error")]
    RequestError,
    #[error("failed to write plugin memory")]
    FailedMemoryWrite,
    #[error("response is not an image")]
    NotAnImage,
}

impl NetError {
    pub fn code(self) -> i32 {
        match self {
            NetError::InvalidDescriptor => -1,
            NetError::InvalidString => -2,
            NetError::InvalidMethod => -3,
            NetError::InvalidUrl => -4,
            NetError::InvalidHtml => -5,
            NetError::InvalidBufferSize => -6,
            NetError::MissingData => -7,
            NetError::MissingResponse => -8,
            NetError::MissingUrl => -9,
            NetError::RequestError => -10,
            NetError::FailedMemoryWrite => -11,
            NetError::NotAnImage => -12,
        }
    }
}

/// Errors returned by the `html` import namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HtmlError {
    #[error("invalid descriptor")]
    InvalidDescriptor,
    #[error("invalid string")]
    InvalidString,
    #[error("invalid html")]
    InvalidHtml,
    #[error("invalid query")]
    InvalidQuery,
    #[error("no result")]
    NoResult,
    #[error("selector engine error")]
    BackendError,
}

impl HtmlError {
    pub fn code(self) -> i32 {
        match self {
            HtmlError::InvalidDescriptor => -1,
            HtmlError::InvalidString => -2,
            HtmlError::InvalidHtml => -3,
            HtmlError::InvalidQuery => -4,
            HtmlError::NoResult => -5,
            HtmlError::BackendError => -6,
        }
    }
}

/// Errors returned by the `canvas` import namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CanvasError {
    #[error("invalid context")]
    InvalidContext,
    #[error("invalid image pointer")]
    InvalidImagePointer,
    #[error("invalid image")]
    InvalidImage,
    #[error("invalid source rect")]
    InvalidSrcRect,
    #[error("invalid result")]
    InvalidResult,
    #[error("invalid bounds")]
    InvalidBounds,
    #[error("invalid path")]
    InvalidPath,
    #[error("invalid style")]
    InvalidStyle,
    #[error("invalid string")]
    InvalidString,
    #[error("invalid font")]
    InvalidFont,
    #[error("font load failed")]
    FontLoadFailed,
}

impl CanvasError {
    pub fn code(self) -> i32 {
        match self {
            CanvasError::InvalidContext => -1,
            CanvasError::InvalidImagePointer => -2,
            CanvasError::InvalidImage => -3,
            CanvasError::InvalidSrcRect => -4,
            CanvasError::InvalidResult => -5,
            CanvasError::InvalidBounds => -6,
            CanvasError::InvalidPath => -7,
            CanvasError::InvalidStyle => -8,
            CanvasError::InvalidString => -9,
            CanvasError::InvalidFont => -10,
            CanvasError::FontLoadFailed => -11,
        }
    }
}

/// Errors returned by the `js` import namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JsAbiError {
    #[error("missing result")]
    MissingResult,
    #[error("invalid context")]
    InvalidContext,
    #[error("invalid string")]
    InvalidString,
}

impl JsAbiError {
    pub fn code(self) -> i32 {
        match self {
            JsAbiError::MissingResult => -1,
            JsAbiError::InvalidContext => -2,
            JsAbiError::InvalidString => -3,
        }
    }
}

/// Result codes a modern export can return in place of a payload pointer
pub const RESULT_ERROR: i32 = -1;
pub const RESULT_UNIMPLEMENTED: i32 = -2;
pub const RESULT_REQUEST_ERROR: i32 = -3;

/// Error surface of host-driven plugin calls
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The export returned a generic error code.
    #[error("plugin call failed (code {0})")]
    Plugin(i32),

    /// The export is present but reported itself unimplemented.
    #[error("operation not implemented by plugin")]
    Unimplemented,

    /// The export reported a failed network request.
    #[error("network request failed inside plugin")]
    Request,

    /// The plugin called `env.abort`.
    #[error("[{source_id}] Abort: {message} at {file}:{line}:{column}")]
    Abort {
        source_id: String,
        message: String,
        file: String,
        line: u32,
        column: u32,
    },

    #[error("export `{0}` is missing")]
    MissingExport(&'static str),

    #[error("plugin exports no linear memory")]
    MissingMemory,

    #[error("wasm execution failed: {0}")]
    Wasm(#[from] anyhow::Error),

    #[error("scope already disposed")]
    ScopeDisposed,
}

/// Limits and housekeeping thresholds for one plugin instance
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Maximum guest memory in bytes (default: 64MB)
    pub max_memory: usize,
    /// Zero-refcount descriptors older than this are swept (default: 5 min)
    pub descriptor_max_age: Duration,
    /// Request descriptors older than this are swept (default: 10 min)
    pub request_max_age: Duration,
    /// Hard cap on live descriptors (default: 10000)
    pub descriptor_cap: usize,
    /// Hard cap on live request descriptors (default: 1000)
    pub request_cap: usize,
    /// Minimum interval between sweeps (default: 1 min)
    pub sweep_interval: Duration,
    /// User-Agent installed on every new request
    pub default_user_agent: String,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024,
            descriptor_max_age: Duration::from_secs(5 * 60),
            request_max_age: Duration::from_secs(10 * 60),
            descriptor_cap: 10_000,
            request_cap: 1_000,
            sweep_interval: Duration::from_secs(60),
            default_user_agent: concat!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
                "AppleWebKit/605.1.15 (KHTML, like Gecko) ",
                "Version/17.4 Safari/605.1.15"
            )
            .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(StdError::InvalidDateString.code(), -5);
        assert_eq!(NetError::NotAnImage.code(), -12);
        assert_eq!(HtmlError::BackendError.code(), -6);
        assert_eq!(CanvasError::FontLoadFailed.code(), -11);
        assert_eq!(JsAbiError::InvalidString.code(), -3);
    }
}
