/// H8D image container

/// Extended-format geometry trailer
pub mod descriptor;

pub use descriptor::GeometryDescriptor;

use crate::error::Result;
use crate::format::constants::DESCRIPTOR_LEN;
use crate::format::{detect_kind, FilesystemKind};
use std::path::{Path, PathBuf};

/// A raw sector dump of one disk
///
/// The buffer is loaded once and not modified afterwards. Extended images
/// carry a 32-byte geometry trailer which is split off into `descriptor`.
#[derive(Debug, Clone)]
pub struct DiskImage {
    /// Raw image bytes including any trailer
    pub(crate) bytes: Vec<u8>,
    /// Filesystem found by boot signature
    pub(crate) kind: FilesystemKind,
    /// Display title (upper-case file stem)
    pub(crate) title: String,
    /// Where the image was loaded from
    pub(crate) path: Option<PathBuf>,
    /// Trailer of an extended-format image
    pub(crate) descriptor: Option<GeometryDescriptor>,
}

impl DiskImage {
    /// Wrap an in-memory buffer
    pub fn from_bytes<S: Into<String>>(bytes: Vec<u8>, title: S) -> Self {
        let kind = detect_kind(&bytes);
        let descriptor = GeometryDescriptor::from_image_tail(&bytes);
        Self {
            bytes,
            kind,
            title: title.into(),
            path: None,
            descriptor,
        }
    }

    /// Load an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut image = Self::from_bytes(bytes, title_for_path(path));
        image.path = Some(path.to_path_buf());
        log::debug!(
            "opened {} ({} bytes, {})",
            path.display(),
            image.bytes.len(),
            image.kind
        );
        Ok(image)
    }

    /// Detected filesystem
    pub fn kind(&self) -> FilesystemKind {
        self.kind
    }

    /// Display title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Source path if loaded from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Geometry trailer of an extended image
    pub fn descriptor(&self) -> Option<&GeometryDescriptor> {
        self.descriptor.as_ref()
    }

    /// Whole file contents, trailer included
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Track data only (trailer removed)
    pub fn data(&self) -> &[u8] {
        if self.descriptor.is_some() {
            &self.bytes[..self.bytes.len() - DESCRIPTOR_LEN]
        } else {
            &self.bytes
        }
    }

    /// Length of the track data in bytes
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// True when the image holds no track data
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Consume the image and return the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Display title for an image path: the upper-cased file name without
/// its `.H8D` or `.H37` extension
pub fn title_for_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_uppercase())
        .unwrap_or_default();
    for ext in [".H8D", ".H37"] {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    name
}
