//! Output file handling after a successful generation: moving engine
//! outputs into the per-user storage layout and rendering thumbnails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use atelier_core::types::DbId;

/// Sub-directory (next to the source image) that receives thumbnails.
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// Default longest edge of a thumbnail, in pixels.
pub const DEFAULT_THUMBNAIL_MAX_EDGE: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image error on {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl AssetError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        AssetError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Moves raw engine outputs into the canonical storage layout.
#[async_trait]
pub trait FileOrganizer: Send + Sync {
    /// Returns the new paths, in input order. Any failure fails the call.
    async fn organize(
        &self,
        request_id: DbId,
        user_id: DbId,
        paths: &[String],
    ) -> Result<Vec<String>, AssetError>;
}

/// Renders preview thumbnails for output images.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    /// Returns source path -> thumbnail path.
    async fn thumbnail(
        &self,
        paths: &[String],
        request_id: DbId,
    ) -> Result<BTreeMap<String, String>, AssetError>;
}

// ---------------------------------------------------------------------------
// Filesystem organizer
// ---------------------------------------------------------------------------

/// Lays files out as `<root>/<user_id>/<request_id>/<index>_<filename>`.
#[derive(Debug, Clone)]
pub struct FsFileOrganizer {
    storage_root: PathBuf,
}

impl FsFileOrganizer {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    /// Directory holding all outputs of one request.
    pub fn request_dir(&self, user_id: DbId, request_id: DbId) -> PathBuf {
        self.storage_root
            .join(user_id.to_string())
            .join(request_id.to_string())
    }
}

/// Rename, falling back to copy + delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), AssetError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| AssetError::io(from, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| AssetError::io(from, e))
}

/// A previous attempt moved `source` to `target` but its result was never
/// recorded. The layout is deterministic, so the target is the answer.
async fn already_organized(source: &Path, target: &Path) -> bool {
    let source_exists = tokio::fs::try_exists(source).await.unwrap_or(false);
    let target_exists = tokio::fs::try_exists(target).await.unwrap_or(false);
    !source_exists && target_exists
}

#[async_trait]
impl FileOrganizer for FsFileOrganizer {
    async fn organize(
        &self,
        request_id: DbId,
        user_id: DbId,
        paths: &[String],
    ) -> Result<Vec<String>, AssetError> {
        let dir = self.request_dir(user_id, request_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AssetError::io(&dir, e))?;

        let mut organized = Vec::with_capacity(paths.len());
        for (index, raw) in paths.iter().enumerate() {
            let source = Path::new(raw);
            let file_name = source
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| AssetError::InvalidPath(raw.clone()))?;

            let target = dir.join(format!("{index}_{file_name}"));
            if already_organized(source, &target).await {
                tracing::debug!(
                    request_id,
                    target = %target.display(),
                    "Output already organized, reusing target",
                );
            } else {
                move_file(source, &target).await?;
            }
            organized.push(target.to_string_lossy().into_owned());
        }

        tracing::debug!(
            request_id,
            user_id,
            count = organized.len(),
            dir = %dir.display(),
            "Organized output files",
        );
        Ok(organized)
    }
}

// ---------------------------------------------------------------------------
// Image thumbnailer
// ---------------------------------------------------------------------------

/// Writes `<dir>/thumbnails/<stem>_thumb.png` next to each image.
#[derive(Debug, Clone)]
pub struct ImageThumbnailer {
    max_edge: u32,
}

impl ImageThumbnailer {
    pub fn new(max_edge: u32) -> Self {
        Self { max_edge }
    }

    /// Where the thumbnail for `source` is written.
    pub fn thumbnail_path(source: &Path) -> Result<PathBuf, AssetError> {
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| AssetError::InvalidPath(source.display().to_string()))?;
        let parent = source.parent().unwrap_or_else(|| Path::new(""));
        Ok(parent.join(THUMBNAIL_DIR).join(format!("{stem}_thumb.png")))
    }

    fn render(source: &Path, max_edge: u32) -> Result<PathBuf, AssetError> {
        let target = Self::thumbnail_path(source)?;
        let img = image::open(source).map_err(|e| AssetError::Image {
            path: source.display().to_string(),
            source: e,
        })?;

        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir).map_err(|e| AssetError::io(dir, e))?;
        }

        img.thumbnail(max_edge, max_edge)
            .save_with_format(&target, image::ImageFormat::Png)
            .map_err(|e| AssetError::Image {
                path: target.display().to_string(),
                source: e,
            })?;
        Ok(target)
    }
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_MAX_EDGE)
    }
}

#[async_trait]
impl Thumbnailer for ImageThumbnailer {
    async fn thumbnail(
        &self,
        paths: &[String],
        request_id: DbId,
    ) -> Result<BTreeMap<String, String>, AssetError> {
        let paths = paths.to_vec();
        let max_edge = self.max_edge;

        let thumbnails = tokio::task::spawn_blocking(move || {
            paths
                .into_iter()
                .map(|source| -> Result<(String, String), AssetError> {
                    let target = Self::render(Path::new(&source), max_edge)?;
                    Ok((source, target.to_string_lossy().into_owned()))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
        })
        .await
        .map_err(|e| AssetError::Task(e.to_string()))??;

        tracing::debug!(request_id, count = thumbnails.len(), "Generated thumbnails");
        Ok(thumbnails)
    }
}
