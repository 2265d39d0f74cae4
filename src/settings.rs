use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const VISION_ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Runtime settings: defaults, then `card_scanner.toml`, then `CARDSCAN_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_path: PathBuf,
    pub ocr_endpoint: String,
    pub ocr_api_key: Option<String>,
    pub ocr_language_hints: Vec<String>,
    pub crm_endpoint: Option<String>,
    pub crm_api_key: Option<String>,
    pub crm_concurrency: usize,
    pub max_retries: u32,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("card_scanner").required(false))
                .add_source(env_source()),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        builder
            .set_default("database_path", "data/contacts.sqlite")?
            .set_default("ocr_endpoint", VISION_ANNOTATE_URL)?
            .set_default("ocr_language_hints", vec!["en"])?
            .set_default("crm_concurrency", 4)?
            .set_default("max_retries", 3)?
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
}

/// `CARDSCAN_*` variables. List values are comma separated: `CARDSCAN_OCR_LANGUAGE_HINTS=en,de`.
fn env_source() -> Environment {
    Environment::with_prefix("CARDSCAN")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("ocr_language_hints")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(s.database_path, PathBuf::from("data/contacts.sqlite"));
        assert_eq!(s.ocr_endpoint, VISION_ANNOTATE_URL);
        assert_eq!(s.ocr_language_hints, vec!["en".to_string()]);
        assert!(s.ocr_api_key.is_none());
        assert!(s.crm_endpoint.is_none());
        assert_eq!(s.crm_concurrency, 4);
        assert_eq!(s.max_retries, 3);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let builder = Config::builder()
            .set_override("crm_endpoint", "http://localhost:9000/contacts")
            .unwrap()
            .set_override("crm_concurrency", 8)
            .unwrap();
        let s = Settings::from_builder(builder).unwrap();
        assert_eq!(s.crm_endpoint.as_deref(), Some("http://localhost:9000/contacts"));
        assert_eq!(s.crm_concurrency, 8);
    }

    #[test]
    fn env_vars_parse_lists_and_numbers() {
        let vars = config::Map::from([
            ("CARDSCAN_OCR_LANGUAGE_HINTS".to_string(), "en,de".to_string()),
            ("CARDSCAN_CRM_CONCURRENCY".to_string(), "8".to_string()),
            ("CARDSCAN_OCR_API_KEY".to_string(), "secret".to_string()),
        ]);
        let builder = Config::builder().add_source(env_source().source(Some(vars)));
        let s = Settings::from_builder(builder).unwrap();
        assert_eq!(s.ocr_language_hints, vec!["en".to_string(), "de".to_string()]);
        assert_eq!(s.crm_concurrency, 8);
        assert_eq!(s.ocr_api_key.as_deref(), Some("secret"));
    }
}
