//! Operator checkpoints between session steps.
//!
//! At a checkpoint the session shows the operator a console URL (where to
//! push device configuration, where to read device state) and waits before
//! moving on. [`ConsoleCheckpoint`] waits for Enter; [`AutoCheckpoint`]
//! logs the URL and continues, optionally after a pause.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Cancelled while waiting for the operator")]
    Cancelled,

    #[error("Failed to read operator input: {0}")]
    Io(#[from] std::io::Error),
}

/// What the operator is asked to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub message: String,
    pub url: String,
    pub action: String,
}

impl Prompt {
    pub fn new(message: impl Into<String>, url: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            url: url.into(),
            action: action.into(),
        }
    }
}

#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn confirm(&self, prompt: &Prompt, cancel: &CancellationToken) -> Result<(), CheckpointError>;
}

/// Prints the prompt and waits for a line on stdin.
#[derive(Debug, Default)]
pub struct ConsoleCheckpoint;

#[async_trait]
impl Checkpoint for ConsoleCheckpoint {
    async fn confirm(&self, prompt: &Prompt, cancel: &CancellationToken) -> Result<(), CheckpointError> {
        println!("{}", prompt.message);
        println!("\t{}", console::style(&prompt.url).cyan().underlined());
        println!("{}", console::style(&prompt.action).bold());

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(CheckpointError::Cancelled),
            read = stdin.read_line(&mut line) => {
                if read? == 0 {
                    warn!("Operator input closed, continuing");
                }
                Ok(())
            }
        }
    }
}

/// Logs the prompt and continues without operator input.
#[derive(Debug, Default)]
pub struct AutoCheckpoint {
    pause: Duration,
}

impl AutoCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits `pause` at every checkpoint, e.g. to give time for console actions.
    pub fn with_pause(pause: Duration) -> Self {
        Self { pause }
    }
}

#[async_trait]
impl Checkpoint for AutoCheckpoint {
    async fn confirm(&self, prompt: &Prompt, cancel: &CancellationToken) -> Result<(), CheckpointError> {
        info!(url = %prompt.url, "{}", prompt.message);
        if self.pause.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(CheckpointError::Cancelled),
            _ = tokio::time::sleep(self.pause) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn prompt() -> Prompt {
        Prompt::new("Try setting configuration in:", "https://example.test/reg", "Press enter to continue")
    }

    #[tokio::test]
    #[traced_test]
    async fn test_auto_checkpoint_logs_url() {
        AutoCheckpoint::new()
            .confirm(&prompt(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(logs_contain("https://example.test/reg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_checkpoint_pause_is_cancellable() {
        let cancel = CancellationToken::new();
        let checkpoint = AutoCheckpoint::with_pause(Duration::from_secs(3600));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = checkpoint.confirm(&prompt(), &cancel).await;
        assert!(matches!(result, Err(CheckpointError::Cancelled)));
    }
}
