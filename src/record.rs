// src/record.rs

use crate::geocode::PlaceInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GpsCoord {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Sign {
    pub text: String,
    pub pictograms: Vec<String>,
    pub language: Vec<String>,
    pub form: Vec<String>,
}

// One output object per distinct source image, in group-encounter order.
#[derive(Debug, Serialize, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub image: String,
    pub signs: Vec<Sign>,
    pub date: Option<String>,
    pub location: Option<GpsCoord>,
    pub location_info: Option<PlaceInfo>,
    pub original_image: String,
    pub notes: Option<String>,
    pub link: Option<String>,
}
