//! Data models for task recording and replay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::geometry::BoundingBox;

/// Action kinds understood by the task-recording server.
///
/// Closed set shared with the server; every match over it is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ClickAtBbox,
    KeyboardInput,
    ScrollDown,
    ScrollUp,
    ScrollDownAtBbox,
    ScrollUpAtBbox,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::ClickAtBbox,
        ActionType::KeyboardInput,
        ActionType::ScrollDown,
        ActionType::ScrollUp,
        ActionType::ScrollDownAtBbox,
        ActionType::ScrollUpAtBbox,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ClickAtBbox => "click_at_bbox",
            ActionType::KeyboardInput => "keyboard_input",
            ActionType::ScrollDown => "scroll_down",
            ActionType::ScrollUp => "scroll_up",
            ActionType::ScrollDownAtBbox => "scroll_down_at_bbox",
            ActionType::ScrollUpAtBbox => "scroll_up_at_bbox",
        }
    }

    /// Human-readable keyword shown to annotators.
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::ClickAtBbox => "Click At BBox",
            ActionType::KeyboardInput => "Keyboard Input",
            ActionType::ScrollDown => "Scroll Down",
            ActionType::ScrollUp => "Scroll Up",
            ActionType::ScrollDownAtBbox => "Scroll Down At BBox",
            ActionType::ScrollUpAtBbox => "Scroll Up At BBox",
        }
    }

    pub fn scroll(direction: ScrollDirection, at_bbox: bool) -> Self {
        match (direction, at_bbox) {
            (ScrollDirection::Up, false) => ActionType::ScrollUp,
            (ScrollDirection::Down, false) => ActionType::ScrollDown,
            (ScrollDirection::Up, true) => ActionType::ScrollUpAtBbox,
            (ScrollDirection::Down, true) => ActionType::ScrollDownAtBbox,
        }
    }

    /// Direction of a scroll action, `None` for the other kinds.
    pub fn scroll_direction(&self) -> Option<ScrollDirection> {
        match self {
            ActionType::ScrollUp | ActionType::ScrollUpAtBbox => Some(ScrollDirection::Up),
            ActionType::ScrollDown | ActionType::ScrollDownAtBbox => Some(ScrollDirection::Down),
            ActionType::ClickAtBbox | ActionType::KeyboardInput => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown action type: {}", s))
    }
}

/// Vertical scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// Direction of a wheel or scroll-position delta. Negative moves the
    /// view towards the top of the document.
    pub fn from_delta_y(dy: f64) -> Self {
        if dy < 0.0 {
            ScrollDirection::Up
        } else {
            ScrollDirection::Down
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            other => anyhow::bail!("Unknown scroll direction: {} (expected up or down)", other),
        }
    }
}

/// Action document posted to the recording server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    pub action: ActionType,
    /// PNG screenshot as a `data:` URL.
    pub screenshot: String,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_instruction: Option<String>,
    #[serde(
        rename = "keySequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_sequence: Option<String>,
}

/// Result of one scroll reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollOutcome {
    pub is_element_scrolled: bool,
    pub is_parent_scrolled: bool,
    pub is_scrolled_up: bool,
    pub el_bbox_after_scroll: BoundingBox,
    pub parent_bbox_before_scroll: BoundingBox,
}

impl ScrollOutcome {
    /// Direction the view moved, if anything moved.
    pub fn direction(&self) -> Option<ScrollDirection> {
        if !self.is_element_scrolled {
            return None;
        }
        Some(if self.is_scrolled_up {
            ScrollDirection::Up
        } else {
            ScrollDirection::Down
        })
    }
}

/// Screenshot response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotResult {
    /// `data:image/png;base64,...`
    pub data_url: String,
    /// Viewport dimensions the screenshot covers
    pub width: u32,
    pub height: u32,
}

/// Navigation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// Final URL after navigation
    pub url: String,
    /// Page title
    pub title: String,
}

/// Browser session info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Whether live recording is attached to this session
    pub recording: bool,
}

/// Click replay result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickResult {
    pub success: bool,
    /// Tag of the element that received the click
    pub element: String,
    pub bbox: BoundingBox,
}
