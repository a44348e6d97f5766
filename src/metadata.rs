use crate::error::AppError;
use crate::record::GpsCoord;
use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub date: Option<String>,
    pub location: Option<GpsCoord>,
}

/// Never errors: an unreadable file or missing tags produce `None` fields
/// and a warning in the log, not a failure.
pub fn extract_metadata(path: &Path) -> PhotoMetadata {
    match read_exif(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            log::warn!("Could not read EXIF from {:?}: {}", path, e);
            PhotoMetadata::default()
        }
    }
}

fn read_exif(path: &Path) -> Result<PhotoMetadata, AppError> {
    let file = File::open(path)?;
    let mut buf_reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut buf_reader)?;

    let date = capture_date(&exif);
    let location = gps_location(&exif);
    log::trace!("Extracted from {:?}: date={:?}, location={:?}", path, date, location);
    Ok(PhotoMetadata { date, location })
}

fn capture_date(exif: &Exif) -> Option<String> {
    for tag in [Tag::DateTimeOriginal, Tag::DateTime] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            if let Some(raw) = ascii_value(&field.value) {
                match NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S") {
                    Ok(dt) => return Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    Err(e) => {
                        log::warn!("Unparseable EXIF timestamp {:?}: {}", raw, e);
                    }
                }
            }
        }
    }
    None
}

fn gps_location(exif: &Exif) -> Option<GpsCoord> {
    let lat = dms_field(exif, Tag::GPSLatitude)?;
    let lng = dms_field(exif, Tag::GPSLongitude)?;

    let lat = apply_hemisphere(lat, hemisphere(exif, Tag::GPSLatitudeRef), 'S');
    let lng = apply_hemisphere(lng, hemisphere(exif, Tag::GPSLongitudeRef), 'W');

    Some(GpsCoord {
        lat: round4(lat),
        lng: round4(lng),
    })
}

fn dms_field(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(ref parts) = field.value {
        if parts.len() >= 3 {
            return Some(dms_to_decimal(
                parts[0].to_f64(),
                parts[1].to_f64(),
                parts[2].to_f64(),
            ));
        }
        log::warn!("GPS tag {} has {} components, expected 3", tag, parts.len());
    }
    None
}

fn apply_hemisphere(value: f64, reference: Option<char>, negative: char) -> f64 {
    match reference {
        Some(c) if c == negative => -value,
        _ => value,
    }
}

fn hemisphere(exif: &Exif, tag: Tag) -> Option<char> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    ascii_value(&field.value)?
        .trim()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
}

fn ascii_value(value: &Value) -> Option<String> {
    if let Value::Ascii(ref v) = value {
        if let Some(bytes) = v.first() {
            return String::from_utf8(bytes.clone()).ok();
        }
    }
    None
}

pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
