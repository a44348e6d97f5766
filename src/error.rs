use exif::Error as ExifError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Image container error: {0}")]
    Container(#[from] img_parts::Error),

    #[error("EXIF error: {0}")]
    Exif(#[from] ExifError),

    #[cfg(feature = "heic")]
    #[error("HEIC error: {0}")]
    Heif(#[from] libheif_rs::HeifError),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Generic error: {0}")]
    Generic(String),
}
