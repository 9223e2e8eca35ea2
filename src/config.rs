use std::path::PathBuf;

/// How to invoke the external media tool: an interpreter plus the script it
/// runs. Per-call arguments are appended by the bridge.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub production: bool,
    pub allowed_origins: Vec<String>,
    pub temp_dir: PathBuf,
    pub tool: ToolCommand,
}

impl Config {
    pub fn from_env() -> Self {
        let production = std::env::var("APP_ENV")
            .map(|value| value.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let temp_dir = std::env::var("TEMP_DIR")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("temp"));

        Self {
            bind_addr: resolve_bind_addr(),
            production,
            allowed_origins: configured_origins(),
            temp_dir,
            tool: resolve_tool_command(),
        }
    }

    pub fn environment(&self) -> &'static str {
        if self.production {
            "production"
        } else {
            "development"
        }
    }
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:3000".to_string()
}

fn configured_origins() -> Vec<String> {
    std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| split_origins(&value))
        .unwrap_or_default()
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn resolve_tool_command() -> ToolCommand {
    let program = std::env::var("MEDIA_TOOL_CMD")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
        .unwrap_or_else(|| default_interpreter().to_string());

    let script = std::env::var("MEDIA_TOOL_SCRIPT")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
        .unwrap_or_else(|| "yt_dlp_api.py".to_string());

    ToolCommand {
        program,
        args: vec![script],
    }
}

#[cfg(windows)]
fn default_interpreter() -> &'static str {
    "python"
}

#[cfg(not(windows))]
fn default_interpreter() -> &'static str {
    "python3"
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_rejects_whitespace() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty(" https://a "), Some("https://a"));
    }

    #[test]
    fn split_origins_trims_and_drops_blanks() {
        let origins = split_origins("https://a.example, , https://b.example ,");
        assert_eq!(origins, vec!["https://a.example", "https://b.example"]);
    }
}
