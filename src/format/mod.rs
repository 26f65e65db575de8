/// H8D format detection, geometry and constants

/// Format constants
pub mod constants;
/// Drive geometry codes
pub mod geometry;
/// Sector skew tables
pub mod skew;

pub use constants::*;
pub use geometry::{Density, DiskType, Geometry, GeometryPolicy};
pub use skew::SkewTable;

use std::fmt;

/// Filesystem found on an H8D image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilesystemKind {
    /// Heath Disk Operating System
    Hdos,
    /// CP/M (the fallback when no HDOS boot signature matches)
    Cpm,
    /// Buffer too short to classify
    Unknown,
}

impl FilesystemKind {
    /// Get a human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            FilesystemKind::Hdos => "HDOS",
            FilesystemKind::Cpm => "CP/M",
            FilesystemKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Name of the HDOS boot signature at the start of `buf`, if any
pub fn hdos_signature(buf: &[u8]) -> Option<&'static str> {
    let head = buf.get(..SIGNATURE_LEN)?;
    HDOS_SIGNATURES
        .iter()
        .find(|(_, magic)| head == magic)
        .map(|(name, _)| *name)
}

/// Classify an image by its boot sector signature
///
/// Any known HDOS signature gives `Hdos`. There is no positive CP/M check,
/// everything else long enough to hold a signature is `Cpm`.
pub fn detect_kind(buf: &[u8]) -> FilesystemKind {
    if buf.len() < SIGNATURE_LEN {
        return FilesystemKind::Unknown;
    }

    if hdos_signature(buf).is_some() {
        FilesystemKind::Hdos
    } else {
        FilesystemKind::Cpm
    }
}
