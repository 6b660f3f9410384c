//! Hover highlighting.

use anyhow::Result;

use crate::dom::{DomHost, NodeId};

/// Owner of the "last highlighted element".
///
/// Only this session writes outlines, and [`HighlightSession::clear`] is the
/// single way to drop the reference, so handlers never observe a half
/// updated highlight.
#[derive(Debug)]
pub struct HighlightSession {
    current: Option<NodeId>,
    outline: String,
}

impl HighlightSession {
    pub fn new(outline: impl Into<String>) -> Self {
        Self {
            current: None,
            outline: outline.into(),
        }
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    /// Move the highlight to `node`. Returns false when it already was there.
    pub async fn update<H: DomHost + ?Sized>(&mut self, host: &H, node: NodeId) -> Result<bool> {
        if self.current == Some(node) {
            return Ok(false);
        }
        if let Some(prev) = self.current.take() {
            host.set_outline(prev, None).await?;
        }
        host.set_outline(node, Some(&self.outline)).await?;
        self.current = Some(node);
        Ok(true)
    }

    /// Remove the outline and forget the element.
    pub async fn clear<H: DomHost + ?Sized>(&mut self, host: &H) -> Result<Option<NodeId>> {
        let prev = self.current.take();
        if let Some(node) = prev {
            host.set_outline(node, None).await?;
        }
        Ok(prev)
    }
}
