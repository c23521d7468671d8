//! File access capabilities used by the engines
//!
//! The sender reads byte ranges from a `FileSource`; the receiver hands the
//! assembled bytes to a `FileSink`. Filesystem versions are provided.

use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use ferry_common::FALLBACK_FILE_NAME;
use ferry_common::protocol::FileInfo;

/// Suffix of the temporary sibling a sink writes before renaming
const PARTIAL_SUFFIX: &str = ".ferry-partial";

/// Read access to the file being sent
#[async_trait]
pub trait FileSource: Send + Sync {
    fn info(&self) -> &FileInfo;

    /// Read exactly the bytes in `range`
    async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>>;
}

/// Where a received file ends up
#[async_trait]
pub trait FileSink: Send + Sync {
    /// Store a complete file, returning its final path
    async fn persist(&self, file_name: &str, bytes: Vec<u8>) -> io::Result<PathBuf>;
}

// =============================================================================
// Filesystem Source
// =============================================================================

/// A file on disk
#[derive(Debug)]
pub struct FsSource {
    path: PathBuf,
    info: FileInfo,
    file: Mutex<File>,
}

impl FsSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
        let info = FileInfo {
            mime_type: guess_mime_type(&name).to_string(),
            name,
            size: metadata.len(),
        };

        Ok(Self {
            path,
            info,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileSource for FsSource {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let len = usize::try_from(range.end.saturating_sub(range.start))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

// =============================================================================
// Filesystem Sink
// =============================================================================

/// Writes received files into a directory
///
/// Bytes go to a hidden temporary sibling first and are renamed into place,
/// so a failed write never leaves a partial output file. Existing files are
/// not overwritten; a numbered name is chosen instead.
#[derive(Debug, Clone)]
pub struct FsSink {
    dir: PathBuf,
}

impl FsSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FileSink for FsSink {
    async fn persist(&self, file_name: &str, bytes: Vec<u8>) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let name = sanitize_file_name(file_name);
        let target = unique_path(&self.dir, &name).await;
        let temp = self.dir.join(format!(".{name}{PARTIAL_SUFFIX}"));

        let written = async {
            let mut file = File::create(&temp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(target)
    }
}

/// Reduce a peer-supplied name to a single safe path component
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

/// `dir/name`, or `dir/stem (n).ext` if that is taken
async fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// MIME type from the file extension
fn guess_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
