//! [`RecordingSurface`] backed by the recording page itself.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::client::capture_viewport;
use super::host::CdpHost;
use super::scripts;
use crate::recording::RecordingSurface;

/// Screenshots come from CDP; the instruction prompt is a page `prompt()`,
/// so the operator answers it in the window they are recording.
pub struct BrowserSurface {
    host: CdpHost,
}

impl BrowserSurface {
    pub fn new(host: CdpHost) -> Self {
        Self { host }
    }
}

#[async_trait]
impl RecordingSurface for BrowserSurface {
    async fn screenshot(&self) -> Result<String> {
        capture_viewport(self.host.page()).await
    }

    async fn ask_instruction(&self) -> Result<Option<String>> {
        let answer: Option<String> = self.host.call(scripts::ASK_INSTRUCTION, Value::Null).await?;
        Ok(answer.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
    }
}
