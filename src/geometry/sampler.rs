//! Grid sampling of a region, used to collect every element (and its text)
//! painted inside a bounding box.

use std::collections::HashSet;
use std::iter::FusedIterator;

use super::normalize::{intersect, FrameContext};
use super::rect::{Point, Rect};
use super::resolve::{element_at_point_in, ResolvedElement};
use crate::dom::DomHost;
use crate::error::ResolveResult;

/// Smallest accepted stride, in pixels.
const MIN_STRIDE: f64 = 1.0;

/// Points over `[x, right) x [y, bottom)` at a fixed stride, column by
/// column. Single pass: once exhausted it stays exhausted.
#[derive(Debug, Clone)]
pub struct GridSampler {
    region: Rect,
    stride: f64,
    x: f64,
    y: f64,
}

impl GridSampler {
    pub fn new(region: Rect, stride: f64) -> Self {
        let stride = if stride.is_finite() {
            stride.max(MIN_STRIDE)
        } else {
            MIN_STRIDE
        };
        Self {
            region,
            stride,
            x: region.x,
            y: region.y,
        }
    }
}

impl Iterator for GridSampler {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        if self.y >= self.region.bottom() {
            self.x += self.stride;
            self.y = self.region.y;
        }
        if self.x >= self.region.right() || self.y >= self.region.bottom() {
            // Park on the exhausted state.
            self.x = self.region.right();
            return None;
        }
        let p = Point::new(self.x, self.y);
        self.y += self.stride;
        Some(p)
    }
}

impl FusedIterator for GridSampler {}

/// Every distinct element hit while sampling `region`, in first-hit order.
/// Only the on-screen part of `region` is sampled; samples that resolve to
/// nothing are skipped.
pub async fn elements_in_region<H: DomHost + ?Sized>(
    host: &H,
    region: Rect,
    stride: f64,
) -> ResolveResult<Vec<ResolvedElement>> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    let viewport = host.viewport().await?;
    let visible = intersect(&region, &FrameContext::top(viewport).clip);

    for p in GridSampler::new(visible, stride) {
        match element_at_point_in(host, p, viewport).await {
            Ok(el) => {
                if seen.insert(el.node) {
                    found.push(el);
                }
            }
            Err(e) if e.is_resolution_failure() => continue,
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(
        "Sampled {} distinct elements in {:?} (stride {})",
        found.len(),
        visible,
        stride
    );
    Ok(found)
}

/// Deduplicated text fragments of the elements painted inside `region`.
pub async fn text_in_region<H: DomHost + ?Sized>(
    host: &H,
    region: Rect,
    stride: f64,
) -> ResolveResult<Vec<String>> {
    let mut texts: Vec<String> = Vec::new();
    for el in elements_in_region(host, region, stride).await? {
        for t in host.text_fragments(el.node).await? {
            if !t.is_empty() && !texts.contains(&t) {
                texts.push(t);
            }
        }
    }
    Ok(texts)
}
