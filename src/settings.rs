use config::{Config, Environment, File};
use serde::Deserialize;

/// Keeps the retention window well inside chrono's date range.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Telegram {
    pub bot_token: String,
    pub bot_username: String,
    pub api_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub invite_link: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Admin {
    pub user_id: String,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Referrals {
    pub required: usize,
    pub points: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    pub data_file: String,
    pub backup_dir: String,
    pub max_backups: usize,
    pub retention_days: i64,
    pub sweep_interval_hours: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    pub listen: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub telegram: Telegram,
    pub channel: Channel,
    pub admin: Admin,
    pub referrals: Referrals,
    pub storage: Storage,
    pub http: Http,
}

impl Settings {
    /// Loads defaults, then `path` (if it exists), then `REFGATE__SECTION__KEY`
    /// environment overrides, and validates the result.
    pub fn load(path: &str) -> Result<Self, SettingsError> {
        dotenv::dotenv().ok();

        let config = Config::builder()
            .set_default("telegram.bot_token", "")?
            .set_default("telegram.bot_username", "DeshiMediaHub_bot")?
            .set_default("telegram.api_url", "https://api.telegram.org")?
            .set_default("telegram.request_timeout_secs", 10)?
            .set_default("channel.channel_id", "")?
            .set_default("channel.invite_link", "https://t.me/+stC4uP28SixmMThl")?
            .set_default("admin.user_id", "")?
            .set_default("referrals.required", 3)?
            .set_default("referrals.points", 1)?
            .set_default("storage.data_file", "user_data.json")?
            .set_default("storage.backup_dir", "backups")?
            .set_default("storage.max_backups", 5)?
            .set_default("storage.retention_days", 7)?
            .set_default("http.listen", "0.0.0.0:8080")?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("REFGATE").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let required = [
            ("telegram.bot_token", &self.telegram.bot_token),
            ("channel.channel_id", &self.channel.channel_id),
            ("admin.user_id", &self.admin.user_id),
        ];

        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(SettingsError::Missing(key));
            }
        }

        if self.telegram.bot_token.contains("YOUR_BOT_TOKEN") {
            return Err(SettingsError::Invalid(
                "telegram.bot_token",
                "placeholder token".to_string(),
            ));
        }
        if self.referrals.required == 0 {
            return Err(SettingsError::Invalid(
                "referrals.required",
                "must be at least 1".to_string(),
            ));
        }
        if self.storage.max_backups == 0 {
            return Err(SettingsError::Invalid(
                "storage.max_backups",
                "must be at least 1".to_string(),
            ));
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.storage.retention_days) {
            return Err(SettingsError::Invalid(
                "storage.retention_days",
                format!("must be between 0 and {}", MAX_RETENTION_DAYS),
            ));
        }

        Ok(())
    }

    pub fn referral_link(&self, user_id: &str) -> String {
        format!("https://t.me/{}?start={}", self.telegram.bot_username, user_id)
    }
}
