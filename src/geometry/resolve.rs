//! Geometry resolver: map a viewport point or region to the topmost element.

use serde::Serialize;

use super::normalize::{normalize, FrameContext};
use super::rect::{BoundingBox, Point, Rect, Size};
use crate::dom::{DomHost, NodeId};
use crate::error::{ResolveError, ResolveResult};

/// An element found on screen, with its box in top-viewport coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedElement {
    pub node: NodeId,
    #[serde(skip)]
    pub frame: FrameContext,
    /// Raw client rect translated into the top viewport.
    pub rect: Rect,
    /// `rect` clipped to the visible area of `frame` and rounded.
    pub bbox: BoundingBox,
    pub tag: String,
}

/// Hit-test `point` (top-viewport coordinates), descending into iframes.
///
/// When a frame's document cannot be reached (cross-origin, not loaded) the
/// frame element itself is returned.
pub async fn element_at_point<H: DomHost + ?Sized>(
    host: &H,
    point: Point,
) -> ResolveResult<ResolvedElement> {
    let viewport = host.viewport().await?;
    element_at_point_in(host, point, viewport).await
}

pub(crate) async fn element_at_point_in<H: DomHost + ?Sized>(
    host: &H,
    point: Point,
    viewport: Size,
) -> ResolveResult<ResolvedElement> {
    if !viewport.contains(point) {
        return Err(ResolveError::OutsideViewport {
            x: point.x,
            y: point.y,
            width: viewport.width,
            height: viewport.height,
        });
    }

    let no_element = || ResolveError::NoElementAtPoint {
        x: point.x,
        y: point.y,
    };

    let mut ctx = FrameContext::top(viewport);
    let mut hit = host
        .element_from_point(None, point)
        .await?
        .ok_or_else(no_element)?;

    loop {
        let info = host.node_info(hit).await?.ok_or(ResolveError::Detached)?;

        if info.is_frame {
            let inner_ctx = ctx.enter(hit, info.rect);
            let local = inner_ctx.to_local(point);
            if let Some(inner) = host.element_from_point(Some(hit), local).await? {
                ctx = inner_ctx;
                hit = inner;
                continue;
            }
            tracing::debug!("Frame {} has no reachable document at {:?}", hit, local);
        }

        let rect = ctx.to_top(info.rect);
        return Ok(ResolvedElement {
            node: hit,
            frame: ctx,
            rect,
            bbox: normalize(rect, &ctx),
            tag: info.tag,
        });
    }
}

/// Index of the candidate closest to `region` by summed nearest-corner
/// distance. Index 0 is the default and only loses to a strictly smaller
/// score.
pub fn closest_candidate(region: &Rect, candidates: &[Rect]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in candidates.iter().enumerate() {
        let score = region.corner_distance(c);
        match best {
            Some((_, s)) if score >= s => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Sample points for a region: the centroid first, then the four corners
/// pulled one pixel inside so they land on the region rather than its
/// neighbours.
fn region_samples(region: &Rect) -> [Point; 5] {
    let ix = (region.width / 2.0).min(1.0);
    let iy = (region.height / 2.0).min(1.0);
    [
        region.center(),
        Point::new(region.x + ix, region.y + iy),
        Point::new(region.right() - ix, region.y + iy),
        Point::new(region.x + ix, region.bottom() - iy),
        Point::new(region.right() - ix, region.bottom() - iy),
    ]
}

/// Pick the element that best represents `region`.
///
/// Hit-tests the centroid and the four corners and keeps the candidate whose
/// box is closest to the region; the centroid hit wins ties.
pub async fn element_in_region<H: DomHost + ?Sized>(
    host: &H,
    region: Rect,
) -> ResolveResult<ResolvedElement> {
    let viewport = host.viewport().await?;
    let mut candidates: Vec<ResolvedElement> = Vec::with_capacity(5);

    for p in region_samples(&region) {
        match element_at_point_in(host, p, viewport).await {
            Ok(found) => {
                if !candidates.iter().any(|c| c.node == found.node) {
                    candidates.push(found);
                }
            }
            Err(e) if e.is_resolution_failure() => {
                tracing::debug!("Region sample {:?} skipped: {}", p, e);
            }
            Err(e) => return Err(e),
        }
    }

    let rects: Vec<Rect> = candidates.iter().map(|c| c.rect).collect();
    let best = closest_candidate(&region, &rects).ok_or(ResolveError::RegionUnresolved)?;
    Ok(candidates.swap_remove(best))
}

/// [`element_in_region`] for a rectangle given by two opposite corners.
pub async fn element_in_corners<H: DomHost + ?Sized>(
    host: &H,
    a: Point,
    b: Point,
) -> ResolveResult<ResolvedElement> {
    element_in_region(host, Rect::from_corners(a, b)).await
}

/// Frame context of the document `scope` (an iframe element) hosts,
/// rebuilt from the current layout of every enclosing frame.
pub async fn context_for_scope<H: DomHost + ?Sized>(
    host: &H,
    scope: Option<NodeId>,
    viewport: Size,
) -> ResolveResult<FrameContext> {
    let mut chain = Vec::new();
    let mut cur = scope;
    while let Some(frame) = cur {
        chain.push(frame);
        cur = host.owner_frame(frame).await?;
    }

    let mut ctx = FrameContext::top(viewport);
    for frame in chain.into_iter().rev() {
        let info = host
            .node_info(frame)
            .await?
            .ok_or(ResolveError::Detached)?;
        ctx = ctx.enter(frame, info.rect);
    }
    Ok(ctx)
}

/// Resolve an already known element to its on-screen box.
pub async fn describe<H: DomHost + ?Sized>(
    host: &H,
    node: NodeId,
) -> ResolveResult<ResolvedElement> {
    let viewport = host.viewport().await?;
    let scope = host.owner_frame(node).await?;
    let ctx = context_for_scope(host, scope, viewport).await?;
    let info = host.node_info(node).await?.ok_or(ResolveError::Detached)?;
    let rect = ctx.to_top(info.rect);
    Ok(ResolvedElement {
        node,
        frame: ctx,
        rect,
        bbox: normalize(rect, &ctx),
        tag: info.tag,
    })
}
