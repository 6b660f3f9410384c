//! [`DomHost`] over a live Chrome page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{FrameTree, GetFrameTreeParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::scripts;
use crate::dom::{DomHost, NodeId, NodeInfo, ScrollMetrics};
use crate::geometry::{Point, Size};

/// Render-tree access through `Runtime.evaluate` on the page's top frame.
#[derive(Clone)]
pub struct CdpHost {
    page: Page,
}

impl CdpHost {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Evaluate a raw expression, awaiting promises, and parse the result.
    pub async fn eval<T: DeserializeOwned>(&self, expression: String) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build evaluate params: {}", e))?;

        self.page
            .evaluate_expression(params)
            .await
            .context("Page evaluation failed")?
            .into_value()
            .context("Unexpected evaluation result")
    }

    pub(crate) async fn call<T: DeserializeOwned>(&self, body: &str, args: Value) -> Result<T> {
        let boxed: Boxed<T> = self.eval(scripts::call_expression(body, &args)).await?;
        Ok(boxed.v)
    }
}

#[derive(Deserialize)]
struct Boxed<T> {
    v: T,
}

fn collect_child_urls(tree: &FrameTree, out: &mut Vec<String>) {
    for child in tree.child_frames.iter().flatten() {
        let mut url = child.frame.url.clone();
        if let Some(fragment) = &child.frame.url_fragment {
            url.push_str(fragment);
        }
        out.push(url);
        collect_child_urls(child, out);
    }
}

#[async_trait]
impl DomHost for CdpHost {
    async fn viewport(&self) -> Result<Size> {
        self.call(scripts::VIEWPORT, Value::Null).await
    }

    async fn element_from_point(
        &self,
        scope: Option<NodeId>,
        point: Point,
    ) -> Result<Option<NodeId>> {
        self.call(
            scripts::ELEMENT_FROM_POINT,
            json!({ "scope": scope, "x": point.x, "y": point.y }),
        )
        .await
    }

    async fn node_info(&self, node: NodeId) -> Result<Option<NodeInfo>> {
        self.call(scripts::NODE_INFO, json!({ "id": node })).await
    }

    async fn owner_frame(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.call(scripts::OWNER_FRAME, json!({ "id": node })).await
    }

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.call(scripts::PARENT, json!({ "id": node })).await
    }

    async fn body(&self, scope: Option<NodeId>) -> Result<Option<NodeId>> {
        self.call(scripts::BODY, json!({ "scope": scope })).await
    }

    async fn query_selector(
        &self,
        scope: Option<NodeId>,
        selector: &str,
    ) -> Result<Option<NodeId>> {
        self.call(
            scripts::QUERY_SELECTOR,
            json!({ "scope": scope, "selector": selector }),
        )
        .await
        .with_context(|| format!("Failed to query '{}'", selector))
    }

    async fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        self.call(scripts::ATTRIBUTE, json!({ "id": node, "name": name }))
            .await
    }

    async fn frame_urls(&self) -> Result<Vec<String>> {
        let tree = self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .context("Failed to get frame tree")?;
        let mut urls = Vec::new();
        collect_child_urls(&tree.frame_tree, &mut urls);
        Ok(urls)
    }

    async fn scroll_metrics(&self, node: NodeId) -> Result<Option<ScrollMetrics>> {
        self.call(scripts::SCROLL_METRICS, json!({ "id": node })).await
    }

    async fn scroll_into_view_if_needed(&self, node: NodeId) -> Result<()> {
        let attached: bool = self
            .call(scripts::SCROLL_INTO_VIEW, json!({ "id": node }))
            .await?;
        if !attached {
            tracing::debug!("Scroll skipped, {} is detached", node);
        }
        Ok(())
    }

    async fn next_frame(&self) -> Result<()> {
        let _: bool = self.call(scripts::NEXT_FRAME, Value::Null).await?;
        Ok(())
    }

    async fn contains(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        self.call(
            scripts::CONTAINS,
            json!({ "ancestor": ancestor, "node": node }),
        )
        .await
    }

    async fn set_outline(&self, node: NodeId, outline: Option<&str>) -> Result<()> {
        let _: bool = self
            .call(scripts::SET_OUTLINE, json!({ "id": node, "outline": outline }))
            .await?;
        Ok(())
    }

    async fn click(&self, node: NodeId) -> Result<()> {
        let clicked: bool = self.call(scripts::CLICK, json!({ "id": node })).await?;
        if !clicked {
            anyhow::bail!("Element {} is not clickable", node);
        }
        Ok(())
    }

    async fn text_fragments(&self, node: NodeId) -> Result<Vec<String>> {
        self.call(scripts::TEXT_FRAGMENTS, json!({ "id": node }))
            .await
    }

    async fn focused_element(&self) -> Result<Option<NodeId>> {
        self.call(scripts::FOCUSED_ELEMENT, Value::Null).await
    }
}
