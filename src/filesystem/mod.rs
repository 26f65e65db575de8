/// Filesystem implementations

pub mod cpm;
pub mod hdos;

pub use cpm::{CpmDirEntry, CpmFile, CpmFileSystem, CpmParams};
pub use hdos::{
    decode_date, GroupReferenceTable, GrtPolicy, HdosDirEntry, HdosFileSystem, HdosOptions,
    HdosVolumeHeader, LabelLength,
};

use crate::error::{H8dError, Result};
use crate::format::FilesystemKind;
use crate::image::DiskImage;

/// Unit of the sizes reported by a volume listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    /// 256-byte sectors (HDOS)
    Sectors,
    /// Kilobytes (CP/M)
    Kilobytes,
}

impl SizeUnit {
    /// Suffix appended to sizes in catalog lines
    pub fn suffix(&self) -> &'static str {
        match self {
            SizeUnit::Sectors => "",
            SizeUnit::Kilobytes => "K",
        }
    }
}

/// One file as shown in a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskContentItem {
    /// Filename, space padded to 8 characters
    pub name: String,
    /// Extension, space padded to 3 characters
    pub ext: String,
    /// Size in the listing's unit
    pub size: u32,
    /// Creation date (`DD-MMM-YY`), blank when the filesystem has none
    pub created: String,
    /// Alteration date, blank when not tracked
    pub altered: String,
}

impl DiskContentItem {
    /// `NAME    .EXT` with the padding kept so catalog columns line up
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.name, self.ext)
    }

    /// Check whether this item is `name.ext` (padding and case ignored)
    pub fn matches(&self, name: &str, ext: &str) -> bool {
        names_match(&self.name, &self.ext, name, ext)
    }
}

/// Compare two name/extension pairs ignoring padding and case
pub(crate) fn names_match(a_name: &str, a_ext: &str, b_name: &str, b_ext: &str) -> bool {
    a_name.trim().eq_ignore_ascii_case(b_name.trim())
        && a_ext.trim().eq_ignore_ascii_case(b_ext.trim())
}

/// Directory contents and space accounting of one volume
#[derive(Debug, Clone)]
pub struct VolumeListing {
    /// Filesystem the listing came from
    pub kind: FilesystemKind,
    /// Files sorted by name then extension
    pub items: Vec<DiskContentItem>,
    /// Space used by the listed files
    pub used: u32,
    /// Free space
    pub free: u32,
    /// Unit of `used`, `free` and each item's size
    pub unit: SizeUnit,
}

impl VolumeListing {
    pub(crate) fn sort_items(&mut self) {
        self.items
            .sort_by(|a, b| (&a.name, &a.ext).cmp(&(&b.name, &b.ext)));
    }
}

/// Read access to a mounted volume
pub trait FileSystem {
    /// Filesystem type
    fn kind(&self) -> FilesystemKind;

    /// List the directory with sizes and free space
    fn list_files(&self) -> Result<VolumeListing>;

    /// Read a file's contents
    fn extract_file(&self, name: &str, ext: &str) -> Result<Vec<u8>>;

    /// Volume label, if the filesystem records one
    fn label(&self) -> Option<String> {
        None
    }
}

/// Mount whichever filesystem the image's boot sector indicates
pub fn mount<'a>(image: &'a DiskImage, options: &HdosOptions) -> Result<Box<dyn FileSystem + 'a>> {
    match image.kind() {
        FilesystemKind::Hdos => Ok(Box::new(HdosFileSystem::new(image.data(), options.clone())?)),
        FilesystemKind::Cpm => Ok(Box::new(CpmFileSystem::new(image.data())?)),
        FilesystemKind::Unknown => Err(H8dError::too_short(
            crate::format::constants::SIGNATURE_LEN,
            image.len(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_matches() {
        let item = DiskContentItem {
            name: "PIP     ".into(),
            ext: "COM".into(),
            size: 8,
            created: String::new(),
            altered: String::new(),
        };
        assert!(item.matches("pip", "com"));
        assert!(!item.matches("PIP", "ABS"));
        assert_eq!(item.display_name(), "PIP     .COM");
    }

    #[test]
    fn test_mount_short_image() {
        let image = DiskImage::from_bytes(vec![0xAF, 0xD3], "X");
        assert!(mount(&image, &HdosOptions::default()).is_err());
    }
}
