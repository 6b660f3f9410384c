//! Composite `<frame-selector> >>> <element-selector>` locators.

use regex::Regex;
use std::str::FromStr;

use crate::error::ResolveError;

/// Separates the iframe locator from the element locator.
pub const FRAME_DELIMITER: &str = ">>>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeSelector {
    /// Locator of the iframe element in the top document.
    pub frame: Option<String>,
    /// Locator of the target inside the frame (or the top document).
    pub element: String,
}

impl FromStr for CompositeSelector {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (frame, element) = match s.split_once(FRAME_DELIMITER) {
            Some((frame, element)) => {
                let frame = frame.trim();
                if frame.is_empty() {
                    return Err(ResolveError::InvalidSelector(format!(
                        "empty frame locator in '{}'",
                        s
                    )));
                }
                (Some(frame.to_string()), element.trim())
            }
            None => (None, s.trim()),
        };

        if element.is_empty() {
            return Err(ResolveError::InvalidSelector(format!(
                "empty element locator in '{}'",
                s
            )));
        }

        Ok(Self {
            frame,
            element: element.to_string(),
        })
    }
}

/// Pattern matching any frame URL that contains `src` literally.
pub fn frame_url_pattern(src: &str) -> Result<Regex, ResolveError> {
    Regex::new(&format!(".*{}.*", regex::escape(src)))
        .map_err(|e| ResolveError::InvalidSelector(format!("frame url pattern: {}", e)))
}

/// Return the URL that `src` identifies among the live frame URLs.
///
/// An empty `src` identifies nothing: it would match every frame.
pub fn find_frame_url<'a>(src: &str, frame_urls: &'a [String]) -> Result<&'a str, ResolveError> {
    let pattern = frame_url_pattern(src)?;
    frame_urls
        .iter()
        .find(|url| !src.is_empty() && pattern.is_match(url))
        .map(String::as_str)
        .ok_or_else(|| ResolveError::FrameNotFound {
            url: src.to_string(),
            regex: pattern.as_str().to_string(),
        })
}
