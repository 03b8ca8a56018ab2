//! Notification presentation: footer link and the two channel buttons.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

use crate::{
    errors::Error,
    persist::{load_json_or_default, JsonFileWriter},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresentationSettings {
    pub footer_text: String,
    pub footer_link: String,
    pub number_button_text: String,
    pub number_button_url: String,
    pub backup_button_text: String,
    pub backup_button_url: String,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            footer_text: "⚡ DEV".to_string(),
            footer_link: "https://t.me/Cryptoistaken".to_string(),
            number_button_text: "♻️ Number".to_string(),
            number_button_url: "https://t.me/number_panel_kst".to_string(),
            backup_button_text: "‼️ Backup".to_string(),
            backup_button_url: "https://t.me/tg_account_method".to_string(),
        }
    }
}

/// One editable field of [`PresentationSettings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SettingKey {
    FooterText,
    FooterLink,
    NumberButtonText,
    NumberButtonUrl,
    BackupButtonText,
    BackupButtonUrl,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::FooterText,
        SettingKey::FooterLink,
        SettingKey::NumberButtonText,
        SettingKey::NumberButtonUrl,
        SettingKey::BackupButtonText,
        SettingKey::BackupButtonUrl,
    ];

    pub fn is_url(self) -> bool {
        matches!(
            self,
            SettingKey::FooterLink | SettingKey::NumberButtonUrl | SettingKey::BackupButtonUrl
        )
    }

    /// Stable identifier used in callback data.
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::FooterText => "footer_text",
            SettingKey::FooterLink => "footer_link",
            SettingKey::NumberButtonText => "btn_num_text",
            SettingKey::NumberButtonUrl => "btn_num_url",
            SettingKey::BackupButtonText => "btn_bak_text",
            SettingKey::BackupButtonUrl => "btn_bak_url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SettingKey::FooterText => "Footer Text",
            SettingKey::FooterLink => "Footer Link",
            SettingKey::NumberButtonText => "Number Button Text",
            SettingKey::NumberButtonUrl => "Number Button URL",
            SettingKey::BackupButtonText => "Backup Button Text",
            SettingKey::BackupButtonUrl => "Backup Button URL",
        })
    }
}

impl PresentationSettings {
    pub fn get(&self, key: SettingKey) -> &str {
        match key {
            SettingKey::FooterText => &self.footer_text,
            SettingKey::FooterLink => &self.footer_link,
            SettingKey::NumberButtonText => &self.number_button_text,
            SettingKey::NumberButtonUrl => &self.number_button_url,
            SettingKey::BackupButtonText => &self.backup_button_text,
            SettingKey::BackupButtonUrl => &self.backup_button_url,
        }
    }

    fn slot(&mut self, key: SettingKey) -> &mut String {
        match key {
            SettingKey::FooterText => &mut self.footer_text,
            SettingKey::FooterLink => &mut self.footer_link,
            SettingKey::NumberButtonText => &mut self.number_button_text,
            SettingKey::NumberButtonUrl => &mut self.number_button_url,
            SettingKey::BackupButtonText => &mut self.backup_button_text,
            SettingKey::BackupButtonUrl => &mut self.backup_button_url,
        }
    }

    /// Blank fields in a hand-edited file fall back to the defaults.
    fn fill_blanks(mut self) -> Self {
        let defaults = Self::default();
        for key in SettingKey::ALL {
            if self.get(key).trim().is_empty() {
                *self.slot(key) = defaults.get(key).to_string();
            }
        }
        self
    }
}

/// Validate a new value for `key`: non-empty, and an http(s) URL for link fields.
pub fn validate_setting(key: SettingKey, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config(format!("{key} must not be empty")));
    }
    if key.is_url() {
        let url = Url::parse(value).map_err(|e| Error::InvalidUrl(format!("{value}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https" | "tg") {
            return Err(Error::InvalidUrl(format!("{value}: unsupported scheme")));
        }
    }
    Ok(value.to_string())
}

/// In-memory settings backed by `SETTINGS_FILE`.
pub struct SettingsRepository {
    current: RwLock<PresentationSettings>,
    writer: JsonFileWriter,
}

impl SettingsRepository {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded: PresentationSettings = load_json_or_default(&path, "settings");
        Self {
            current: RwLock::new(loaded.fill_blanks()),
            writer: JsonFileWriter::spawn(path),
        }
    }

    pub async fn snapshot(&self) -> PresentationSettings {
        self.current.read().await.clone()
    }

    /// Validate, persist, then publish. A failed write leaves the old value live.
    pub async fn update(&self, key: SettingKey, value: &str) -> Result<PresentationSettings> {
        let value = validate_setting(key, value)?;
        let mut guard = self.current.write().await;
        let mut next = guard.clone();
        *next.slot(key) = value;

        self.writer.write(&next).await?;
        *guard = next.clone();
        info!(category = "CONFIG", setting = key.as_str(), "presentation setting updated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_keys_round_trip_through_callback_ids() {
        for key in SettingKey::ALL {
            assert_eq!(SettingKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(SettingKey::parse("api_url"), None);
    }

    #[test]
    fn link_fields_require_a_url() {
        assert!(validate_setting(SettingKey::FooterText, "  ").is_err());
        assert!(validate_setting(SettingKey::FooterLink, "not a url").is_err());
        assert!(validate_setting(SettingKey::FooterLink, "javascript:alert(1)").is_err());
        assert_eq!(
            validate_setting(SettingKey::NumberButtonUrl, " https://t.me/x ").unwrap(),
            "https://t.me/x"
        );
        assert_eq!(
            validate_setting(SettingKey::NumberButtonText, "📞 Numbers").unwrap(),
            "📞 Numbers"
        );
    }

    #[tokio::test]
    async fn missing_file_gives_defaults_and_blank_fields_are_filled() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsRepository::open(dir.path().join("settings.json"));
        assert_eq!(repo.snapshot().await, PresentationSettings::default());

        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"footerText":"","footerLink":"https://example.com"}"#).unwrap();
        let repo = SettingsRepository::open(&path);
        let s = repo.snapshot().await;
        assert_eq!(s.footer_text, "⚡ DEV");
        assert_eq!(s.footer_link, "https://example.com");
    }

    #[tokio::test]
    async fn update_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let repo = SettingsRepository::open(&path);

        let s = repo.update(SettingKey::FooterText, "🚀 Team").await.unwrap();
        assert_eq!(s.footer_text, "🚀 Team");
        assert!(repo.update(SettingKey::BackupButtonUrl, "nope").await.is_err());

        let reopened = SettingsRepository::open(&path);
        let s = reopened.snapshot().await;
        assert_eq!(s.footer_text, "🚀 Team");
        assert_eq!(s.backup_button_url, PresentationSettings::default().backup_button_url);
    }
}
