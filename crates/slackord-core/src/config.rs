use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::ExportMode,
    errors::Error,
    export::{
        aggregate::DEFAULT_LARGE_CHANNEL_FILES,
        scanner::{CHANNELS_FILE, USERS_FILE},
        users::DisplayPolicy,
    },
    formatting::TimestampFormat,
    messaging::throttled::ThrottleConfig,
    reconstruct::RetryPolicy,
    Result,
};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
const MIN_TOKEN_LEN: usize = 30;

/// Typed configuration loaded from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub discord: DiscordConfig,
    /// Export to import when none is given on the command line.
    pub export_path: Option<PathBuf>,
    pub export_mode: ExportMode,
    pub import: ImportSettings,
}

#[derive(Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub guild_id: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Run-level settings handed to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportSettings {
    pub display_policy: DisplayPolicy,
    pub timestamp_format: TimestampFormat,
    /// Upper bound for one delivery; the target's own limit still applies.
    pub message_limit: usize,
    /// Channels with more files than this get a "please be patient" log line.
    pub large_channel_files: usize,
    pub users_file_name: String,
    pub channels_file_name: String,
    pub throttle: ThrottleConfig,
    pub retry: RetryPolicy,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            display_policy: DisplayPolicy::default(),
            timestamp_format: TimestampFormat::default(),
            message_limit: DISCORD_MESSAGE_LIMIT,
            large_channel_files: DEFAULT_LARGE_CHANNEL_FILES,
            users_file_name: USERS_FILE.to_string(),
            channels_file_name: CHANNELS_FILE.to_string(),
            throttle: ThrottleConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in [`Config::load`]).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = get("DISCORD_BOT_TOKEN").unwrap_or_default().trim().to_string();
        if token.is_empty() {
            return Err(Error::Config(
                "DISCORD_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if token.len() < MIN_TOKEN_LEN {
            return Err(Error::Config(
                "DISCORD_BOT_TOKEN does not look like a bot token".to_string(),
            ));
        }

        let guild_id = get("DISCORD_GUILD_ID").unwrap_or_default().trim().to_string();
        if guild_id.is_empty() || !guild_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Config(
                "DISCORD_GUILD_ID must be a numeric server id".to_string(),
            ));
        }

        let api_base = get("DISCORD_API_BASE")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let request_timeout =
            Duration::from_millis(parse_u64(&get, "DISCORD_REQUEST_TIMEOUT_MS").unwrap_or(30_000));

        let export_path = get("SLACKORD_EXPORT_PATH")
            .and_then(non_empty)
            .map(PathBuf::from);
        let export_mode = ExportMode::from_full_flag(parse_bool(&get, "SLACKORD_FULL_EXPORT").unwrap_or(true));

        let mut import = ImportSettings::default();
        if let Some(s) = get("SLACKORD_USER_FORMAT").and_then(non_empty) {
            import.display_policy = s.parse()?;
        }
        if let Some(s) = get("SLACKORD_TIMESTAMP_FORMAT").and_then(non_empty) {
            import.timestamp_format = s.parse()?;
        }
        if let Some(n) = parse_usize(&get, "SLACKORD_MESSAGE_LIMIT") {
            import.message_limit = n.clamp(1, DISCORD_MESSAGE_LIMIT);
        }
        if let Some(n) = parse_usize(&get, "SLACKORD_LARGE_CHANNEL_FILES") {
            import.large_channel_files = n;
        }
        if let Some(ms) = parse_u64(&get, "SLACKORD_GLOBAL_SEND_INTERVAL_MS") {
            import.throttle.global_min_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&get, "SLACKORD_CHANNEL_SEND_INTERVAL_MS") {
            import.throttle.per_channel_min_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_u64(&get, "SLACKORD_MAX_RETRIES") {
            import.retry.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = parse_u64(&get, "SLACKORD_RETRY_BASE_MS") {
            import.retry.base_delay = Duration::from_millis(ms);
        }

        Ok(Self {
            discord: DiscordConfig {
                token,
                guild_id,
                api_base,
                request_timeout,
            },
            export_path,
            export_mode,
            import,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    get(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    get(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_usize(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    get(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
