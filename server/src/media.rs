//! Content-addressed media storage.
//!
//! Files are named by the SHA-256 hash of their contents and sharded into nested directories derived from
//! the first four hex digits of the hash (e.g. `ab/cd/abcd1234....jpg`), keeping any single directory from
//! growing unboundedly.  Thumbnails mirror the same layout under a separate root, always as JPEG.

use {
    crate::warp_util::bad_request,
    anyhow::{anyhow, Result},
    image::ImageOutputFormat,
    sha2::{Digest, Sha256},
    std::{
        io::Cursor,
        path::{Path, PathBuf},
    },
    tokio::{fs, task},
    tracing::warn,
};

const THUMBNAIL_BOUND: u32 = 600;

const JPEG_QUALITY: u8 = 85;

static ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// The nested directory prefix for `filename`, derived from the first four characters of its stem.
///
/// Returns an empty path for stems shorter than four characters, placing such files at the root.
pub fn nested_prefix(filename: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("");

    if stem.len() >= 4 {
        PathBuf::from(&stem[0..2]).join(&stem[2..4])
    } else {
        PathBuf::new()
    }
}

/// Path of the stored file relative to the media (or thumbnail) root.
pub fn relative_path(filename: &str) -> PathBuf {
    nested_prefix(filename).join(filename)
}

/// The thumbnail filename corresponding to `filename` (same stem, always `.jpg`).
pub fn thumbnail_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);

    format!("{stem}.jpg")
}

fn extension(original_name: &str) -> Result<String> {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(if extension == "jpeg" {
            "jpg".to_owned()
        } else {
            extension
        })
    } else {
        Err(bad_request(format!(
            "unsupported file type: {original_name}"
        )))
    }
}

/// Decode `content` and write a bounded JPEG thumbnail to `path`.
///
/// Decoding and re-encoding are CPU-bound, so they run under [task::block_in_place] to avoid stalling the
/// async executor.
async fn write_thumbnail(content: &[u8], path: &Path) -> Result<()> {
    let encoded = task::block_in_place(|| {
        let image = image::load_from_memory(content)?;
        let thumbnail = image.thumbnail(THUMBNAIL_BOUND, THUMBNAIL_BOUND);

        let mut encoded = Cursor::new(Vec::new());
        thumbnail
            .into_rgb8()
            .write_to(&mut encoded, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;

        Ok::<_, anyhow::Error>(encoded.into_inner())
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(path, encoded).await?;

    Ok(())
}

/// The content address of an uploaded file: its stored filename and hash.
///
/// This validates the file without touching the filesystem, so callers can check for an already-known hash
/// before calling [store_image].
pub fn content_address(original_name: &str, content: &[u8]) -> Result<(String, String)> {
    if content.is_empty() {
        return Err(bad_request(format!("empty file: {original_name}")));
    }

    let extension = extension(original_name)?;
    let hash = hex::encode(Sha256::digest(content));

    Ok((format!("{hash}.{extension}"), hash))
}

/// Write the file `content_address` named, generating a thumbnail alongside.
pub async fn store_image(
    media_dir: &Path,
    thumbnail_dir: &Path,
    filename: &str,
    content: &[u8],
) -> Result<()> {
    let path = media_dir.join(relative_path(filename));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&path, content).await?;

    let thumbnail_path = thumbnail_dir.join(relative_path(&thumbnail_filename(filename)));

    if let Err(e) = write_thumbnail(content, &thumbnail_path).await {
        // An image we cannot decode is not worth keeping.
        fs::remove_file(&path).await.ok();

        return Err(anyhow!("unable to generate thumbnail for {filename}: {e:?}"));
    }

    Ok(())
}

/// Remove the stored file and its thumbnail, logging rather than failing if either is already gone.
pub async fn delete_image_files(media_dir: &Path, thumbnail_dir: &Path, filename: &str) {
    let path = media_dir.join(relative_path(filename));

    if let Err(e) = fs::remove_file(&path).await {
        warn!("unable to remove {}: {e}", path.display());
    }

    let path = thumbnail_dir.join(relative_path(&thumbnail_filename(filename)));

    if let Err(e) = fs::remove_file(&path).await {
        warn!("unable to remove {}: {e}", path.display());
    }
}
