//! Clipboard backed by an external command that reads the text on stdin.

use std::process::Stdio;

use futures::FutureExt;
use hostbridge_core::{CapabilityError, CapabilityFuture, Clipboard};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct CommandClipboard {
    command: String,
}

impl CommandClipboard {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Clipboard for CommandClipboard {
    /// Feeds `text` to the command on stdin. Succeeds only when the command
    /// read it and exited cleanly.
    fn set_text(&self, label: &str, text: &str) -> CapabilityFuture<()> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .env("HOSTBRIDGE_CLIPBOARD_LABEL", label)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        let text = text.to_string();

        async move {
            let mut child = command.spawn()?;
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| CapabilityError::Failed("clipboard command has no stdin".into()))?;
            let written = stdin.write_all(text.as_bytes()).await;
            drop(stdin);
            let status = child.wait().await?;

            if let Err(err) = written {
                warn!(
                    component = "clipboard",
                    event = "clipboard.write_failed",
                    error = %err,
                    "Clipboard command did not take the text"
                );
                return Err(CapabilityError::Io(err));
            }
            if !status.success() {
                warn!(
                    component = "clipboard",
                    event = "clipboard.command_failed",
                    status = ?status.code(),
                    "Clipboard command failed"
                );
                return Err(CapabilityError::Failed(match status.code() {
                    Some(code) => format!("clipboard command exited with {code}"),
                    None => "clipboard command was killed".to_string(),
                }));
            }

            debug!(
                component = "clipboard",
                event = "clipboard.copied",
                bytes = text.len(),
                "Copied text"
            );
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_is_piped_to_command() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("clip.txt");
        let clipboard = CommandClipboard::new(format!(
            "printf '%s:' \"$HOSTBRIDGE_CLIPBOARD_LABEL\" > '{0}'; cat >> '{0}'",
            out.display()
        ));

        clipboard.set_text("hostbridge", "p@ss word").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "hostbridge:p@ss word"
        );
    }

    #[tokio::test]
    async fn failing_command_is_reported() {
        let clipboard = CommandClipboard::new("cat > /dev/null; exit 1");
        let err = clipboard
            .set_text("hostbridge", "secret")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "clipboard command exited with 1");
    }
}
