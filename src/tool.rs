use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::config::ToolCommand;

/// One metadata payload from the external tool's `info` subcommand.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<ToolFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolFormat {
    pub format_id: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub label: Option<String>,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    pub abr: Option<f32>,
}

#[derive(Debug)]
pub enum ToolError {
    /// The child process could not be started at all.
    Spawn(String),
    /// The tool reported a failure through its JSON `error` field.
    Failed { message: String },
    /// The tool produced output that does not satisfy the JSON contract.
    Output { raw: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Spawn(message) => write!(f, "{message}"),
            ToolError::Failed { message } => write!(f, "{message}"),
            ToolError::Output { raw } => write!(f, "unreadable tool output: {raw}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Capability interface over the external media tool. The real implementation
/// shells out; tests substitute a fake.
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn fetch_info(&self, url: &str, cookies: Option<&Path>) -> Result<MediaInfo, ToolError>;

    async fn download(
        &self,
        url: &str,
        format_id: &str,
        out_path: &Path,
        is_audio: bool,
        cookies: Option<&Path>,
    ) -> Result<(), ToolError>;
}

/// Spawns the configured interpreter + script once per call, buffers both
/// output streams fully, then parses stdout as a single JSON object.
pub struct ToolRunner {
    command: ToolCommand,
}

impl ToolRunner {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    async fn run(&self, call_args: Vec<String>) -> Result<Value, ToolError> {
        debug!("Invoking media tool: {} {:?}", self.command.program, call_args);

        let output = Command::new(&self.command.program)
            .args(&self.command.args)
            .args(&call_args)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ToolError::Spawn(format!(
                        "Media tool `{}` is not installed or not on PATH.",
                        self.command.program
                    ))
                } else {
                    ToolError::Spawn(format!("Could not start media tool: {error}"))
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(failure_from_streams(&stdout, &stderr));
        }

        let value: Value = serde_json::from_str(stdout.trim()).map_err(|_| ToolError::Output {
            raw: combined_output(&stdout, &stderr),
        })?;

        if let Some(message) = error_field(&value) {
            return Err(ToolError::Failed { message });
        }

        Ok(value)
    }
}

#[async_trait]
impl MediaTool for ToolRunner {
    async fn fetch_info(&self, url: &str, cookies: Option<&Path>) -> Result<MediaInfo, ToolError> {
        let mut args = vec!["info".to_string(), url.to_string()];
        if let Some(path) = cookies {
            args.push(path.to_string_lossy().into_owned());
        }

        let value = self.run(args).await?;
        serde_json::from_value(value.clone()).map_err(|_| ToolError::Output {
            raw: value.to_string(),
        })
    }

    async fn download(
        &self,
        url: &str,
        format_id: &str,
        out_path: &Path,
        is_audio: bool,
        cookies: Option<&Path>,
    ) -> Result<(), ToolError> {
        let mut args = vec![
            "download".to_string(),
            url.to_string(),
            format_id.to_string(),
            out_path.to_string_lossy().into_owned(),
            is_audio.to_string(),
        ];
        if let Some(path) = cookies {
            args.push(path.to_string_lossy().into_owned());
        }

        self.run(args).await.map(|_| ())
    }
}

/// Non-zero exit: prefer a JSON `error` field from stdout, then stderr, then
/// fall back to the raw combined text.
fn failure_from_streams(stdout: &str, stderr: &str) -> ToolError {
    if let Some(message) = parse_error_payload(stdout).or_else(|| parse_error_payload(stderr)) {
        return ToolError::Failed { message };
    }

    ToolError::Output {
        raw: combined_output(stdout, stderr),
    }
}

fn parse_error_payload(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    error_field(&value)
}

fn error_field(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn combined_output(stdout: &str, stderr: &str) -> String {
    let mut raw = stdout.trim().to_string();
    let err = stderr.trim();
    if !err.is_empty() {
        if !raw.is_empty() {
            raw.push('\n');
        }
        raw.push_str(err);
    }
    if raw.is_empty() {
        raw.push_str("media tool produced no output");
    }
    raw
}
