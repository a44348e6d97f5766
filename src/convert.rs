use crate::config::AppConfig;
use crate::error::AppError;
use exif::{Field, In, Reader, Tag};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

struct ConvertOutcome {
    size_kb: u64,
    quality: u8,
}

pub fn run(config: &AppConfig, force: bool) -> Result<(), AppError> {
    let out_dir = Path::new(&config.images_dir);
    std::fs::create_dir_all(out_dir)?;

    let mut paths: Vec<PathBuf> = WalkDir::new(&config.raw_images_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .map(|ext| config.allowed_extensions.contains(&ext.to_lowercase()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        log::info!("No image files found in {}", config.raw_images_dir);
        return Ok(());
    }
    log::info!("Processing {} images", paths.len());

    let mut converted = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for path in &paths {
        let output = output_path_for(out_dir, path);
        if output.exists() && !force {
            log::debug!("Skipping {:?}, output already exists", path);
            skipped += 1;
            continue;
        }

        match process_image(config, path, &output) {
            Ok(outcome) => {
                log::info!(
                    "Converted {:?} -> {:?} ({} KB, Q{})",
                    path.file_name().unwrap_or_default(),
                    output.file_name().unwrap_or_default(),
                    outcome.size_kb,
                    outcome.quality
                );
                converted += 1;
            }
            Err(e) => {
                log::warn!("Failed to convert {:?}: {}", path, e);
                failed += 1;
            }
        }
    }

    log::info!(
        "Conversion complete: {} converted, {} skipped, {} failed",
        converted,
        skipped,
        failed
    );
    Ok(())
}

fn output_path_for(out_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    out_dir.join(format!("{}.JPG", stem))
}

fn process_image(config: &AppConfig, input: &Path, output: &Path) -> Result<ConvertOutcome, AppError> {
    log::trace!("Decoding {:?}", input);
    let (decoded, already_oriented) = decode_image(input)?;

    // HEIC decoding applies the container's transforms itself; for the other
    // formats the EXIF orientation hint still has to be honored here.
    let orientation = if already_oriented {
        None
    } else {
        read_orientation(input)
    };
    let normalized = normalize(decoded, orientation, config.max_edge);
    log::debug!(
        "Normalized {:?} to {}x{}",
        input,
        normalized.width(),
        normalized.height()
    );

    // The orientation hint was applied above, so it must not be carried into
    // the output where a viewer would apply it a second time.
    let exif_payload = carry_over_exif(input);
    let (bytes, quality) = encode_to_budget(
        &normalized,
        exif_payload.as_deref(),
        config.quality_start,
        config.quality_floor,
        config.quality_step,
        config.target_size_kb,
    )?;

    let size_kb = bytes.len() as u64 / 1024;
    write_output(output, &bytes)?;
    Ok(ConvertOutcome { size_kb, quality })
}

/// Writes via a temp file and renames into place, so a failure can never
/// leave a partial file or clobber a previously converted output.
fn write_output(output: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp = output.with_extension("JPG.tmp");
    if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, output)) {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            log::debug!("No temp output to clean up at {:?}: {}", tmp, cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}

fn is_heic(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|s| s.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("heic") | Some("heif")
    )
}

// Returns the decoded image and whether orientation was already applied.
fn decode_image(path: &Path) -> Result<(DynamicImage, bool), AppError> {
    if is_heic(path) {
        return Ok((decode_heic(path)?, true));
    }
    Ok((image::open(path)?, false))
}

#[cfg(feature = "heic")]
fn decode_heic(path: &Path) -> Result<DynamicImage, AppError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let path_str = path
        .to_str()
        .ok_or_else(|| AppError::Generic(format!("non-UTF-8 path: {:?}", path)))?;
    let lib_heif = LibHeif::new();
    let context = HeifContext::read_from_file(path_str)?;
    let handle = context.primary_image_handle()?;
    let decoded = lib_heif.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| AppError::Generic("HEIC decode returned no interleaved plane".into()))?;

    let width = plane.width;
    let height = plane.height;
    let row_bytes = width as usize * 3;
    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for row in plane.data.chunks(plane.stride) {
        data.extend_from_slice(&row[..row_bytes]);
    }

    let buffer = RgbImage::from_raw(width, height, data)
        .ok_or_else(|| AppError::Generic("HEIC plane size mismatch".into()))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

#[cfg(not(feature = "heic"))]
fn decode_heic(path: &Path) -> Result<DynamicImage, AppError> {
    Err(AppError::Generic(format!(
        "HEIC support is not compiled in (enable the `heic` feature): {:?}",
        path
    )))
}

fn read_orientation(path: &Path) -> Option<u32> {
    let file = File::open(path).ok()?;
    let mut buf_reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut buf_reader).ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

fn normalize(image: DynamicImage, orientation: Option<u32>, max_edge: u32) -> RgbImage {
    let image = match orientation {
        Some(o) if o > 1 => {
            log::trace!("Applying EXIF orientation {}", o);
            apply_orientation(image, o)
        }
        _ => image,
    };

    let (width, height) = (image.width(), image.height());
    let image = if width.max(height) > max_edge {
        image.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        image
    };

    image.to_rgb8()
}

fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Re-encodes stepping quality down from `start` by `step` until the result
/// fits `ceiling_kb`. The budget is checked on the final bytes with the EXIF
/// segment attached; the floor-quality encoding is accepted unconditionally.
fn encode_to_budget(
    image: &RgbImage,
    exif_payload: Option<&[u8]>,
    start: u8,
    floor: u8,
    step: u8,
    ceiling_kb: u64,
) -> Result<(Vec<u8>, u8), AppError> {
    let mut quality = start;
    loop {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(image)?;
        let buf = match exif_payload {
            Some(payload) => attach_exif(buf, payload)?,
            None => buf,
        };
        let size_kb = buf.len() as u64 / 1024;

        if buf.len() as u64 <= ceiling_kb * 1024 {
            log::trace!("Encoded at Q{} ({} KB), within budget", quality, size_kb);
            return Ok((buf, quality));
        }
        if quality <= floor {
            log::debug!("Accepting floor quality Q{} at {} KB", quality, size_kb);
            return Ok((buf, quality));
        }
        log::trace!("Q{} produced {} KB, stepping down", quality, size_kb);
        quality = quality.saturating_sub(step).max(floor);
    }
}

/// Rebuilds a minimal EXIF block from the source so capture metadata survives
/// re-encoding. The orientation tag is intentionally never copied, and maker
/// notes are skipped because their offsets would be stale after rewriting.
fn carry_over_exif(input: &Path) -> Option<Vec<u8>> {
    let file = File::open(input).ok()?;
    let mut buf_reader = BufReader::new(file);
    let exif = Reader::new().read_from_container(&mut buf_reader).ok()?;

    let fields: Vec<Field> = exif
        .fields()
        .filter(|f| f.ifd_num == In::PRIMARY)
        .filter(|f| f.tag != Tag::Orientation && f.tag != Tag::MakerNote)
        .map(|f| Field {
            tag: f.tag,
            ifd_num: f.ifd_num,
            value: f.value.clone(),
        })
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut writer = exif::experimental::Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut cursor = Cursor::new(Vec::new());
    match writer.write(&mut cursor, false) {
        Ok(()) => Some(cursor.into_inner()),
        Err(e) => {
            log::warn!("Could not rebuild EXIF for {:?}: {}", input, e);
            None
        }
    }
}

fn attach_exif(encoded: Vec<u8>, payload: &[u8]) -> Result<Vec<u8>, AppError> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(encoded))?;
    jpeg.set_exif(Some(Bytes::copy_from_slice(payload)));
    Ok(jpeg.encoder().bytes().to_vec())
}
