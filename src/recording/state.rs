//! Recording state machine and its persisted flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording { task_id: String },
    Paused { task_id: String },
}

/// Flags as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingFlags {
    pub recording: bool,
    pub paused: bool,
    #[serde(rename = "hoverDisabled")]
    pub hover_disabled: bool,
    #[serde(rename = "taskID")]
    pub task_id: Option<String>,
}

/// State machine plus the hover flag, written through to `path` on every
/// change when a path is set.
#[derive(Debug)]
pub struct RecordingStateStore {
    state: RecordingState,
    hover_disabled: bool,
    path: Option<PathBuf>,
}

impl RecordingStateStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            hover_disabled: false,
            path: None,
        }
    }

    /// Load flags from `path` (missing file means idle) and persist there.
    pub fn load(path: &Path) -> Result<Self> {
        let flags = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read state {}", path.display()))?;
            serde_json::from_str::<RecordingFlags>(&content)
                .with_context(|| format!("Invalid state {}", path.display()))?
        } else {
            RecordingFlags::default()
        };

        let state = match (flags.task_id, flags.recording, flags.paused) {
            (Some(task_id), true, _) => RecordingState::Recording { task_id },
            (Some(task_id), false, true) => RecordingState::Paused { task_id },
            _ => RecordingState::Idle,
        };
        tracing::debug!("Loaded recording state {:?} from {}", state, path.display());

        Ok(Self {
            state,
            hover_disabled: flags.hover_disabled,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecordingState::Recording { .. })
    }

    pub fn task_id(&self) -> Option<&str> {
        match &self.state {
            RecordingState::Recording { task_id } | RecordingState::Paused { task_id } => {
                Some(task_id)
            }
            RecordingState::Idle => None,
        }
    }

    pub fn hover_disabled(&self) -> bool {
        self.hover_disabled
    }

    pub fn flags(&self) -> RecordingFlags {
        RecordingFlags {
            recording: self.is_recording(),
            paused: matches!(self.state, RecordingState::Paused { .. }),
            hover_disabled: self.hover_disabled,
            task_id: self.task_id().map(str::to_string),
        }
    }

    pub fn start(&mut self, task_id: &str) -> Result<()> {
        if let Some(current) = self.task_id() {
            anyhow::bail!("Already recording task {}", current);
        }
        self.state = RecordingState::Recording {
            task_id: task_id.to_string(),
        };
        self.persist()
    }

    pub fn pause(&mut self) -> Result<()> {
        match &self.state {
            RecordingState::Recording { task_id } => {
                self.state = RecordingState::Paused {
                    task_id: task_id.clone(),
                };
                self.persist()
            }
            other => anyhow::bail!("Cannot pause while {:?}", other),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match &self.state {
            RecordingState::Paused { task_id } => {
                self.state = RecordingState::Recording {
                    task_id: task_id.clone(),
                };
                self.persist()
            }
            other => anyhow::bail!("Cannot resume while {:?}", other),
        }
    }

    /// Stop recording; returns the task that was active.
    pub fn stop(&mut self) -> Result<String> {
        let task_id = self
            .task_id()
            .map(str::to_string)
            .context("Not recording")?;
        self.state = RecordingState::Idle;
        self.persist()?;
        Ok(task_id)
    }

    pub fn set_hover_disabled(&mut self, disabled: bool) -> Result<()> {
        self.hover_disabled = disabled;
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.flags())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write state {}", path.display()))
    }
}

impl Default for RecordingStateStore {
    fn default() -> Self {
        Self::new()
    }
}
