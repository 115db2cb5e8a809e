//! Transcript download: a Markdown document with one paragraph per turn.

use crate::transcript::RenderedTurn;
use chrono::{DateTime, Local};
use std::path::Path;

pub const TRANSCRIPT_HEADING: &str = "Conversation Transcript";

#[derive(Debug, Clone)]
pub struct TranscriptDocument {
    paragraphs: Vec<(String, String)>,
    created_at: DateTime<Local>,
}

impl TranscriptDocument {
    pub fn from_rendered(turns: &[RenderedTurn]) -> Self {
        Self {
            paragraphs: turns
                .iter()
                .map(|t| (t.name.clone(), t.text.clone()))
                .collect(),
            created_at: Local::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", TRANSCRIPT_HEADING);
        for (name, text) in &self.paragraphs {
            out.push_str(&format!("**{}:** {}\n\n", name, text.trim()));
        }
        out
    }

    /// `transcript-YYYYmmdd-HHMMSS.md`
    pub fn default_file_name(&self) -> String {
        format!("transcript-{}.md", self.created_at.format("%Y%m%d-%H%M%S"))
    }

    /// Write the document, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_markdown()).await
    }
}
