//! Notification channel settings.
//!
//! Stored at `{state_dir}/config.json`. A default file with every channel
//! disabled is written on first start so users have something to edit.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeishuSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub encrypt_key: String,
    #[serde(default)]
    pub verification_token: String,
    /// Recipient open ids
    #[serde(default)]
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    /// Recipient chat ids
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub feishu: FeishuSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
}

impl ChannelSettings {
    /// Load settings, creating a default file if none exists.
    ///
    /// An unreadable or malformed file falls back to defaults with a warning.
    pub fn load_or_init(path: &Path) -> Self {
        if !path.exists() {
            let defaults = Self::default();
            match defaults.save(path) {
                Ok(()) => tracing::info!("Created default config: {}", path.display()),
                Err(e) => tracing::warn!(
                    "Failed to write default config {}: {}",
                    path.display(),
                    e
                ),
            }
            return defaults;
        }

        match Self::load_from_path(path) {
            Ok(s) => {
                tracing::info!("Loaded channel settings from {}", path.display());
                s
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load settings from {}: {}, using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    fn load_from_path(path: &Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, contents + "\n")
    }

    /// Feishu settings if the channel is enabled and fully configured.
    pub fn active_feishu(&self) -> Option<&FeishuSettings> {
        let feishu = &self.feishu;
        if !feishu.enabled {
            return None;
        }
        if feishu.app_id.is_empty() || feishu.app_secret.is_empty() {
            tracing::warn!("Feishu enabled but appId/appSecret missing");
            return None;
        }
        if feishu.allow_from.is_empty() {
            tracing::warn!("Feishu enabled but allowFrom is empty");
            return None;
        }
        Some(feishu)
    }

    /// Telegram settings if the channel is enabled and fully configured.
    pub fn active_telegram(&self) -> Option<&TelegramSettings> {
        let telegram = &self.telegram;
        if !telegram.enabled {
            return None;
        }
        if telegram.token.is_empty() {
            tracing::warn!("Telegram enabled but token missing");
            return None;
        }
        if telegram.allow_from.is_empty() {
            tracing::warn!("Telegram enabled but allowFrom is empty");
            return None;
        }
        Some(telegram)
    }
}
