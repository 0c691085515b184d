use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Full bot configuration, loaded once at startup from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub reddit: RedditConfig,
    pub osu: OsuConfig,
    #[serde(default)]
    pub bot: BotConfig,
    pub template: TemplateConfig,
    /// Optional lookup tables translating raw API field values into
    /// display strings, keyed by the template field name they produce.
    #[serde(default)]
    pub template_extras: HashMap<String, TemplateExtra>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub subreddit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsuConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Comments fetched per poll; also sizes the seen-comment cache.
    pub max_comments: u32,
    /// Submissions fetched per poll; also sizes the seen-submission cache.
    pub max_submissions: u32,
    /// Capacity of the osu! API response cache.
    pub osu_cache: usize,
    /// Sleep between successful poll iterations.
    pub poll_interval_secs: u64,
    /// Sleep after a failed poll iteration.
    pub backoff_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            max_comments: 100,
            max_submissions: 50,
            osu_cache: 256,
            poll_interval_secs: 3,
            backoff_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub header: String,
    pub footer: String,
    /// Template for a single difficulty, `{field}` placeholders.
    pub map: String,
    /// Template for a whole mapset.
    pub mapset: String,
    /// Separator between map blocks in one reply.
    #[serde(default = "default_sep")]
    pub sep: String,
}

fn default_sep() -> String {
    "\n\n".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateExtra {
    /// Which raw API field the table is keyed on.
    pub key: String,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [reddit]
        client_id = "id"
        client_secret = "secret"
        username = "beatmapbot"
        password = "hunter2"
        user_agent = "beatmapbot/1.0"
        subreddit = "osugame"

        [osu]
        api_key = "key"

        [template]
        header = "Beatmap info:"
        footer = "^I'm ^a ^bot"
        map = "{artist} - {title} [{version}]"
        mapset = "{artist} - {title}"

        [template_extras.approved_status]
        key = "approved"
        [template_extras.approved_status.values]
        "1" = "Ranked"
        "-2" = "Graveyard"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.reddit.subreddit, "osugame");
        assert_eq!(config.osu.api_key, "key");
        assert_eq!(config.template.sep, "\n\n");

        let extra = &config.template_extras["approved_status"];
        assert_eq!(extra.key, "approved");
        assert_eq!(extra.values["1"], "Ranked");
    }

    #[test]
    fn test_bot_section_defaults() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.bot.max_comments, 100);
        assert_eq!(config.bot.max_submissions, 50);
        assert_eq!(config.bot.osu_cache, 256);
        assert_eq!(config.bot.poll_interval_secs, 3);
        assert_eq!(config.bot.backoff_secs, 15);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = AppConfig::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
