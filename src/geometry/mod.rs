//! Viewport-relative element resolution.
//!
//! Geometry Resolver, Visibility Normalizer and Scroll Reconciler. All of
//! it runs against [`crate::dom::DomHost`] and never touches a browser
//! directly.

pub mod normalize;
pub mod rect;
pub mod resolve;
pub mod sampler;
pub mod scroll;
pub mod selector;

pub use normalize::{clamp_frame, normalize, FrameContext};
pub use rect::{BoundingBox, Point, Rect, Size};
pub use resolve::{
    closest_candidate, context_for_scope, describe, element_at_point, element_in_corners,
    element_in_region, ResolvedElement,
};
pub use sampler::{elements_in_region, text_in_region, GridSampler};
pub use scroll::{locate, scroll_into_view, scrollable_ancestor, Located};
pub use selector::{find_frame_url, frame_url_pattern, CompositeSelector, FRAME_DELIMITER};
