use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub raw_images_dir: String,
    pub images_dir: String,
    pub spreadsheet_path: String,
    pub output_path: String,
    pub cache_path: String,
    pub allowed_extensions: HashSet<String>,
    pub max_edge: u32,
    pub target_size_kb: u64,
    pub quality_start: u8,
    pub quality_floor: u8,
    pub quality_step: u8,
    pub geocoder_url: String,
    pub geocoder_language: String,
    pub geocoder_zoom: u8,
    pub geocoder_user_agent: String,
    pub request_timeout_secs: u64,
    pub rate_limit_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .build()?;

        s.try_deserialize()
    }
}
