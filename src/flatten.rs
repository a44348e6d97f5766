use crate::config::AppConfig;
use crate::error::AppError;
use crate::geocode::{GeocodeCache, ReverseGeocoder};
use crate::metadata;
use crate::record::{ImageRecord, Sign};
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 7] = [
    "img",
    "sign_idx",
    "text",
    "pictograms",
    "language",
    "form",
    "notes",
];

// Cells already stringified; `link` is empty when the optional column is
// absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub img: String,
    pub text: String,
    pub pictograms: String,
    pub language: String,
    pub form: String,
    pub notes: String,
    pub link: String,
}

pub fn run(config: &AppConfig) -> Result<(), AppError> {
    let rows = read_rows(Path::new(&config.spreadsheet_path))?;
    log::info!("Read {} rows from {}", rows.len(), config.spreadsheet_path);

    let groups = group_rows(rows);
    log::info!("Grouped into {} images", groups.len());

    let mut cache = GeocodeCache::load(Path::new(&config.cache_path));
    let geocoder = ReverseGeocoder::new(config)?;

    let mut records = Vec::with_capacity(groups.len());
    for (img_name, group) in groups {
        records.push(build_record(config, &geocoder, &mut cache, img_name, &group));
    }

    write_records(&records, Path::new(&config.output_path))?;
    log::info!("Generated {} ({} records)", config.output_path, records.len());
    Ok(())
}

// A missing required column aborts the whole run; rows with an empty `img`
// cell are skipped.
pub fn read_rows(path: &Path) -> Result<Vec<SheetRow>, AppError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Generic(format!("{:?} contains no worksheets", path)))??;

    let mut row_iter = range.rows();
    let header = row_iter
        .next()
        .ok_or_else(|| AppError::Generic(format!("{:?} has no header row", path)))?;

    let columns: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| {
            let name = cell_text(cell);
            if name.is_empty() {
                None
            } else {
                Some((name, i))
            }
        })
        .collect();
    log::debug!("Spreadsheet columns: {:?}", columns.keys().collect::<Vec<_>>());

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !columns.contains_key(**c))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(AppError::MissingColumns(missing.join(", ")));
    }

    let col = |name: &str| columns[name];
    let link_col = columns.get("link").copied();

    let mut rows = Vec::new();
    for cells in row_iter {
        let img = cell_at(cells, col("img"));
        if img.is_empty() {
            log::trace!("Skipping row without an image id");
            continue;
        }
        rows.push(SheetRow {
            img,
            text: cell_at(cells, col("text")),
            pictograms: cell_at(cells, col("pictograms")),
            language: cell_at(cells, col("language")),
            form: cell_at(cells, col("form")),
            notes: cell_at(cells, col("notes")),
            link: link_col.map(|i| cell_at(cells, i)).unwrap_or_default(),
        });
    }
    Ok(rows)
}

fn cell_at(cells: &[Data], index: usize) -> String {
    cells.get(index).map(cell_text).unwrap_or_default()
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::DateTime(_) => cell.to_string(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

// Preserves first-seen group order and source row order within each group.
pub fn group_rows(rows: Vec<SheetRow>) -> Vec<(String, Vec<SheetRow>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<SheetRow>)> = Vec::new();
    for row in rows {
        match index.get(&row.img) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(row.img.clone(), groups.len());
                groups.push((row.img.clone(), vec![row]));
            }
        }
    }
    groups
}

fn build_record(
    config: &AppConfig,
    geocoder: &ReverseGeocoder,
    cache: &mut GeocodeCache,
    img_name: String,
    group: &[SheetRow],
) -> ImageRecord {
    let id = Path::new(&img_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| img_name.clone());
    let normalized_name = format!("{}.JPG", id);
    let image_path = Path::new(&config.images_dir).join(&normalized_name);

    let photo = metadata::extract_metadata(&image_path);
    let location_info = photo
        .location
        .as_ref()
        .and_then(|loc| geocoder.resolve(cache, loc.lat, loc.lng));

    if photo.date.is_none() || photo.location.is_none() {
        log::warn!(
            "Missing metadata for {:?}: date={:?}, location={:?}",
            image_path,
            photo.date,
            photo.location
        );
    }

    let signs = group
        .iter()
        .map(|row| Sign {
            text: row.text.clone(),
            pictograms: split_pipe_separated(&row.pictograms),
            language: split_pipe_separated(&row.language),
            form: split_pipe_separated(&row.form),
        })
        .collect();

    ImageRecord {
        id,
        image: format!("images/{}", normalized_name),
        signs,
        date: photo.date,
        location: photo.location,
        location_info,
        original_image: img_name,
        notes: first_non_empty(group.iter().map(|r| r.notes.as_str())),
        link: first_non_empty(group.iter().map(|r| r.link.as_str())),
    }
}

// An empty cell or the literal string `None` yields an empty list.
pub fn split_pipe_separated(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.is_empty() || value == "None" {
        return Vec::new();
    }
    value
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// First non-empty value wins; later values in the group are ignored.
fn first_non_empty<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    values
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(String::from)
}

// UTF-8, 2-space indent, non-ASCII characters left unescaped.
fn write_records(records: &[ImageRecord], path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}
