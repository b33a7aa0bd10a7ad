//! Console presentation settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Store;

/// File name under the data directory
const STORE_NAME: &str = "settings";

/// Console color scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Theme {
    #[default]
    Light,
    Dark,
    /// Follow the system preference.
    Auto,
}

impl Theme {
    /// Parse a theme tag as sent by the backend. Unknown tags map to `None`
    /// so the stored choice is kept.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "auto" => Some(Theme::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SettingsRecord {
    pub theme: Theme,
    /// BCP 47 language tag for the console UI.
    pub language: String,
    pub sidebar_collapsed: bool,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            language: "en-US".to_string(),
            sidebar_collapsed: false,
        }
    }
}

pub type SettingsStore = Store<SettingsRecord>;

impl Store<SettingsRecord> {
    /// Open the settings store under `dir`.
    pub async fn open_settings(dir: &Path) -> Self {
        Store::open(dir, STORE_NAME).await
    }
}
