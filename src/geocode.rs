use crate::config::AppConfig;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlaceInfo {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
}

// Deliberately lossy: fixing both coordinates to 4 decimals lets nearby
// points share one cache entry.
pub fn cache_key(lat: f64, lng: f64) -> String {
    format!("{:.4}_{:.4}", lat, lng)
}

pub struct GeocodeCache {
    path: PathBuf,
    entries: HashMap<String, PlaceInfo>,
}

impl GeocodeCache {
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Geocode cache {:?} is corrupt, starting empty: {}", path, e);
                    HashMap::new()
                }
            },
            Err(e) => {
                log::debug!("No geocode cache at {:?} ({}), starting empty", path, e);
                HashMap::new()
            }
        };
        log::info!("Loaded {} cached geocode entries from {:?}", entries.len(), path);
        GeocodeCache {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&PlaceInfo> {
        self.entries.get(key)
    }

    /// Inserts and persists immediately. Save failures are logged and
    /// swallowed so a read-only disk never aborts a run.
    pub fn store(&mut self, key: String, info: PlaceInfo) {
        self.entries.insert(key, info);
        if let Err(e) = self.save() {
            log::warn!("Could not persist geocode cache to {:?}: {}", self.path, e);
        }
    }

    fn save(&self) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: HashMap<String, String>,
}

pub struct ReverseGeocoder {
    client: reqwest::blocking::Client,
    url: String,
    language: String,
    zoom: u8,
    pause: Duration,
}

impl ReverseGeocoder {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        Self::with_params(
            &config.geocoder_url,
            &config.geocoder_language,
            config.geocoder_zoom,
            &config.geocoder_user_agent,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.rate_limit_secs),
        )
    }

    fn with_params(
        url: &str,
        language: &str,
        zoom: u8,
        user_agent: &str,
        timeout: Duration,
        pause: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()?;
        Ok(ReverseGeocoder {
            client,
            url: url.to_string(),
            language: language.to_string(),
            zoom,
            pause,
        })
    }

    /// A cache hit returns with no network access. On a miss exactly one
    /// request is made, the result is written through to the cache, and the
    /// pacing delay is observed before returning. Failures yield `None` and
    /// are never cached, so a later run can heal the gap.
    pub fn resolve(&self, cache: &mut GeocodeCache, lat: f64, lng: f64) -> Option<PlaceInfo> {
        let key = cache_key(lat, lng);
        if let Some(hit) = cache.lookup(&key) {
            log::debug!("Geocode cache hit for {}", key);
            return Some(hit.clone());
        }

        log::debug!("Geocode cache miss for {}, querying {}", key, self.url);
        match self.fetch(lat, lng) {
            Ok(info) => {
                log::info!("Resolved {} -> {:?}", key, info.country);
                cache.store(key, info.clone());
                std::thread::sleep(self.pause);
                Some(info)
            }
            Err(e) => {
                log::warn!("Reverse geocoding failed for {}: {}", key, e);
                None
            }
        }
    }

    fn fetch(&self, lat: f64, lng: f64) -> Result<PlaceInfo, AppError> {
        let params = [
            ("format", "json".to_string()),
            ("lat", lat.to_string()),
            ("lon", lng.to_string()),
            ("language", self.language.clone()),
            ("zoom", self.zoom.to_string()),
            ("addressdetails", "1".to_string()),
        ];
        let response: ReverseResponse = self
            .client
            .get(&self.url)
            .query(&params)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(place_from_address(&response.address))
    }
}

fn place_from_address(address: &HashMap<String, String>) -> PlaceInfo {
    let get = |key: &str| address.get(key).cloned();
    PlaceInfo {
        country: get("country"),
        country_code: get("country_code"),
        province: get("province"),
        city: get("city").or_else(|| get("town")).or_else(|| get("village")),
        district: get("city_district").or_else(|| get("neighbourhood")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_place() -> PlaceInfo {
        PlaceInfo {
            country: Some("日本".to_string()),
            country_code: Some("jp".to_string()),
            province: Some("奈良県".to_string()),
            city: Some("奈良市".to_string()),
            district: None,
        }
    }

    // Unroutable endpoint: any request fails fast, so a returned value can
    // only have come from the cache.
    fn offline_geocoder() -> ReverseGeocoder {
        ReverseGeocoder::with_params(
            "http://127.0.0.1:1/reverse",
            "ja",
            10,
            "signscape-test",
            Duration::from_millis(200),
            Duration::ZERO,
        )
        .unwrap()
    }

    #[test]
    fn cache_key_quantizes_to_four_decimals() {
        assert_eq!(cache_key(34.6937, 135.7834), "34.6937_135.7834");
        assert_eq!(cache_key(34.69374, 135.78336), "34.6937_135.7834");
        assert_eq!(cache_key(-33.8678, -151.2073), "-33.8678_-151.2073");
        assert_eq!(cache_key(21.0, 105.0), "21.0000_105.0000");
    }

    #[test]
    fn cache_key_is_deterministic() {
        assert_eq!(cache_key(22.318, 113.937), cache_key(22.318, 113.937));
    }

    #[test]
    fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = GeocodeCache::load(&path);
        assert!(cache.is_empty());
        cache.store(cache_key(34.6937, 135.7834), sample_place());

        let reloaded = GeocodeCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.lookup("34.6937_135.7834"),
            Some(&sample_place())
        );
    }

    #[test]
    fn corrupt_cache_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json at all").unwrap();

        let cache = GeocodeCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_hit_avoids_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = GeocodeCache::load(&path);
        cache.store(cache_key(34.6937, 135.7834), sample_place());

        let geocoder = offline_geocoder();
        // The endpoint is unreachable, so this can only succeed via the cache.
        let resolved = geocoder.resolve(&mut cache, 34.6937, 135.7834);
        assert_eq!(resolved, Some(sample_place()));
    }

    #[test]
    fn failed_lookup_yields_none_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = GeocodeCache::load(&path);

        let geocoder = offline_geocoder();
        assert_eq!(geocoder.resolve(&mut cache, 34.6937, 135.7834), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn address_parsing_prefers_city_then_town_then_village() {
        let mut address = HashMap::new();
        address.insert("country".to_string(), "Việt Nam".to_string());
        address.insert("country_code".to_string(), "vn".to_string());
        address.insert("village".to_string(), "Xã Nội Bài".to_string());

        let place = place_from_address(&address);
        assert_eq!(place.city.as_deref(), Some("Xã Nội Bài"));

        address.insert("town".to_string(), "Sóc Sơn".to_string());
        assert_eq!(place_from_address(&address).city.as_deref(), Some("Sóc Sơn"));

        address.insert("city".to_string(), "Thành phố Hà Nội".to_string());
        assert_eq!(
            place_from_address(&address).city.as_deref(),
            Some("Thành phố Hà Nội")
        );
    }

    #[test]
    fn address_parsing_falls_back_to_neighbourhood_for_district() {
        let mut address = HashMap::new();
        address.insert("neighbourhood".to_string(), "本子守町".to_string());
        assert_eq!(
            place_from_address(&address).district.as_deref(),
            Some("本子守町")
        );

        address.insert("city_district".to_string(), "奈良市中央".to_string());
        assert_eq!(
            place_from_address(&address).district.as_deref(),
            Some("奈良市中央")
        );
    }

    #[test]
    fn empty_address_parses_to_all_absent_fields() {
        let place = place_from_address(&HashMap::new());
        assert_eq!(place, PlaceInfo {
            country: None,
            country_code: None,
            province: None,
            city: None,
            district: None,
        });
    }
}
