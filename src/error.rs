//! Error types for element resolution and scroll reconciliation.

use thiserror::Error;

/// Failure of a geometry operation against a live page.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Hit-testing found nothing at the point.
    #[error("No element at point ({x}, {y})")]
    NoElementAtPoint { x: f64, y: f64 },

    /// The point lies outside `[0, width) x [0, height)`.
    #[error("Point ({x}, {y}) is outside the {width}x{height} viewport")]
    OutsideViewport {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },

    /// None of the sampled points of a region resolved to an element.
    #[error("No element resolved inside region")]
    RegionUnresolved,

    /// The iframe's source URL matched no live frame.
    #[error("Frame not found with url: {url}. And regex: {regex}")]
    FrameNotFound { url: String, regex: String },

    /// The frame half of a composite selector matched no element.
    #[error("Frame element not found: {selector}")]
    FrameElementMissing { selector: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    /// The element was removed from the document between measurements.
    #[error("Element is no longer attached to the document")]
    Detached,

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl ResolveError {
    /// True when nothing usable was resolved, so no screenshot or action
    /// may be produced from this call.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::NoElementAtPoint { .. }
                | Self::OutsideViewport { .. }
                | Self::RegionUnresolved
                | Self::ElementNotFound { .. }
                | Self::Detached
        )
    }
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
