//! Render-tree access used by the geometry core.
//!
//! The resolver and scroll reconciler only talk to a page through
//! [`DomHost`]. The browser module implements it over CDP; tests use an
//! in-memory page.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Size};

#[cfg(test)]
pub mod testing;

/// Opaque handle to an element, valid for the operation that obtained it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layout facts about an attached element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Client rect in the element's own document viewport.
    pub rect: Rect,
    /// The element embeds a document (iframe/frame).
    pub is_frame: bool,
    #[serde(default)]
    pub tag: String,
}

/// Vertical overflow state used to find scroll containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_height: f64,
    pub client_height: f64,
    #[serde(default)]
    pub overflow_y: String,
}

impl ScrollMetrics {
    /// Content overflows vertically and the overflow is not hidden.
    pub fn is_scrollable(&self) -> bool {
        self.scroll_height > self.client_height && !self.overflow_y.contains("hidden")
    }
}

/// Host render tree.
///
/// A `scope` argument names the iframe element whose content document is
/// addressed; `None` is the top document. Methods taking a [`NodeId`]
/// return `None` (or an error-free default) when the element is no longer
/// attached.
#[async_trait]
pub trait DomHost: Send + Sync {
    /// Top-level visual viewport size.
    async fn viewport(&self) -> Result<Size>;

    /// Topmost element at `point`, given in the scoped document's coordinates.
    async fn element_from_point(&self, scope: Option<NodeId>, point: Point)
        -> Result<Option<NodeId>>;

    async fn node_info(&self, node: NodeId) -> Result<Option<NodeInfo>>;

    /// The iframe element whose document contains `node`, `None` if `node`
    /// lives in the top document.
    async fn owner_frame(&self, node: NodeId) -> Result<Option<NodeId>>;

    /// Parent element in the same document.
    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>>;

    /// `<body>` of the scoped document, `None` if it is not reachable.
    async fn body(&self, scope: Option<NodeId>) -> Result<Option<NodeId>>;

    /// Resolve a CSS or XPath selector inside the scoped document.
    async fn query_selector(&self, scope: Option<NodeId>, selector: &str)
        -> Result<Option<NodeId>>;

    async fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>>;

    /// URLs of the page's live child frames (the main frame is excluded).
    async fn frame_urls(&self) -> Result<Vec<String>>;

    async fn scroll_metrics(&self, node: NodeId) -> Result<Option<ScrollMetrics>>;

    /// Scroll the minimum needed to reveal `node`, without centering.
    async fn scroll_into_view_if_needed(&self, node: NodeId) -> Result<()>;

    /// Resolve after the next animation frame so layout reflects DOM writes.
    async fn next_frame(&self) -> Result<()>;

    /// `ancestor` is `node` or one of its ancestors.
    async fn contains(&self, ancestor: NodeId, node: NodeId) -> Result<bool>;

    /// Set (or with `None` remove) the inline outline style.
    async fn set_outline(&self, node: NodeId, outline: Option<&str>) -> Result<()>;

    /// Activate the element as a user click would.
    async fn click(&self, node: NodeId) -> Result<()>;

    /// Trimmed, non-empty text node contents below `node`, in document order.
    async fn text_fragments(&self, node: NodeId) -> Result<Vec<String>>;

    /// Currently focused element, descending into focused frames.
    async fn focused_element(&self) -> Result<Option<NodeId>>;
}
