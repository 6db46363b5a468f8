use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;

const OCR_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads printed text off an image. Returns an empty string when nothing can be read.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn extract_text(&self, image_path: &Path) -> String;
}

/// Shells out to the Tesseract CLI with the Simplified Chinese and English models.
pub struct TesseractOcr {
    command: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tesseract_cmd.clone())
    }

    async fn run(&self, image_path: &Path) -> anyhow::Result<String> {
        let child = Command::new(&self.command)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", "chi_sim+eng"])
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(OCR_TIMEOUT, child).await??;
        if !output.status.success() {
            anyhow::bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl TextRecognizer for TesseractOcr {
    async fn extract_text(&self, image_path: &Path) -> String {
        match self.run(image_path).await {
            Ok(text) => {
                debug!(chars = text.chars().count(), "OCR finished");
                text
            }
            Err(e) => {
                warn!(command = %self.command, "OCR unavailable: {}", e);
                String::new()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_yields_empty_text() {
        let ocr = TesseractOcr::new("/nonexistent/qizhen-tesseract");
        let dir = tempfile::tempdir().unwrap();
        let text = ocr.extract_text(&dir.path().join("none.png")).await;
        assert!(text.is_empty());
    }
}
