//! Scroll reconciliation: bring an element into view with the minimal
//! scroll and report what moved.

use super::normalize::{normalize, FrameContext};
use super::rect::Rect;
use super::resolve::context_for_scope;
use super::selector::{find_frame_url, CompositeSelector};
use crate::dom::{DomHost, NodeId};
use crate::error::{ResolveError, ResolveResult};
use crate::models::ScrollOutcome;

/// Nearest ancestor of `node` (or `node` itself) that scrolls vertically,
/// falling back to the `<body>` of the document `scope` names.
pub async fn scrollable_ancestor<H: DomHost + ?Sized>(
    host: &H,
    node: NodeId,
    scope: Option<NodeId>,
) -> ResolveResult<NodeId> {
    let body = host.body(scope).await?;
    let mut cur = Some(node);

    while let Some(n) = cur {
        if Some(n) == body {
            break;
        }
        let metrics = host
            .scroll_metrics(n)
            .await?
            .ok_or(ResolveError::Detached)?;
        if metrics.is_scrollable() {
            return Ok(n);
        }
        cur = host.parent(n).await?;
    }

    body.ok_or(ResolveError::Detached)
}

/// Element located by a composite selector, with the context it lives in.
#[derive(Debug, Clone, Copy)]
pub struct Located {
    pub node: NodeId,
    pub ctx: FrameContext,
}

/// Resolve a (possibly composite) selector to an element.
///
/// A frame locator must name an iframe whose `src` matches one of the live
/// frames; otherwise this fails with [`ResolveError::FrameNotFound`] and
/// never falls back to the top document.
pub async fn locate<H: DomHost + ?Sized>(
    host: &H,
    selector: &CompositeSelector,
) -> ResolveResult<Located> {
    let viewport = host.viewport().await?;

    let scope = match &selector.frame {
        Some(frame_selector) => {
            let frame = host
                .query_selector(None, frame_selector)
                .await?
                .ok_or_else(|| ResolveError::FrameElementMissing {
                    selector: frame_selector.clone(),
                })?;
            let src = host.attribute(frame, "src").await?.unwrap_or_default();
            let urls = host.frame_urls().await?;
            let url = find_frame_url(&src, &urls)?;
            tracing::debug!("Frame locator '{}' matched {}", frame_selector, url);
            Some(frame)
        }
        None => None,
    };

    let ctx = context_for_scope(host, scope, viewport).await?;
    let node = host
        .query_selector(scope, &selector.element)
        .await?
        .ok_or_else(|| ResolveError::ElementNotFound {
            selector: selector.element.clone(),
        })?;

    Ok(Located { node, ctx })
}

async fn measure<H: DomHost + ?Sized>(
    host: &H,
    node: NodeId,
    ctx: &FrameContext,
) -> ResolveResult<Rect> {
    let info = host.node_info(node).await?.ok_or(ResolveError::Detached)?;
    Ok(ctx.to_top(info.rect))
}

/// Scroll the element named by `selector` into view if needed.
///
/// One scroll attempt and one before/after comparison; no retries.
pub async fn scroll_into_view<H: DomHost + ?Sized>(
    host: &H,
    selector: &str,
) -> ResolveResult<ScrollOutcome> {
    let selector: CompositeSelector = selector.parse()?;
    let Located { node, ctx } = locate(host, &selector).await?;
    let parent = scrollable_ancestor(host, node, ctx.frame).await?;

    let before = measure(host, node, &ctx).await?;
    let parent_before = measure(host, parent, &ctx).await?;
    tracing::debug!(
        "Before scroll: element {:?}, parent {} {:?}",
        before,
        parent,
        parent_before
    );

    host.scroll_into_view_if_needed(node).await?;
    host.next_frame().await?;

    // The enclosing frames may have moved too.
    let ctx_after = if ctx.is_top() {
        ctx
    } else {
        context_for_scope(host, ctx.frame, ctx.viewport).await?
    };
    let after = measure(host, node, &ctx_after).await?;
    let parent_after = measure(host, parent, &ctx_after).await?;
    tracing::debug!("After scroll: element {:?}, parent {:?}", after, parent_after);

    let outcome = ScrollOutcome {
        is_element_scrolled: before.y != after.y,
        is_parent_scrolled: ctx.is_top() && parent_before.y != parent_after.y,
        is_scrolled_up: before.y < after.y,
        el_bbox_after_scroll: normalize(after, &ctx_after),
        parent_bbox_before_scroll: normalize(parent_before, &ctx),
    };
    tracing::debug!("Scroll outcome: {:?}", outcome);
    Ok(outcome)
}
