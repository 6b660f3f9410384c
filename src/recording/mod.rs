//! Live task recording.

pub mod api;
pub mod highlight;
pub mod recorder;
pub mod state;

pub use api::{ActionSink, TaskApiClient};
pub use highlight::HighlightSession;
pub use recorder::{run, PageEvent, Recorder, RecordingSurface};
pub use state::{RecordingFlags, RecordingState, RecordingStateStore};
