/// Volume labels and canonical image file names

use crate::error::Result;
use crate::filesystem::{HdosOptions, HdosVolumeHeader};
use crate::format::{detect_kind, FilesystemKind};
use crate::image::DiskImage;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ESC: u8 = 0x1B;

/// Decode a label, dropping terminal control codes
///
/// Bytes below 0x20 and DEL are removed. An ESC also swallows the byte
/// after it (VT52 style sequences such as `ESC p`). The high bit is ignored.
pub fn strip_terminal_codes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut iter = bytes.iter().map(|b| b & 0x7F);
    while let Some(b) = iter.next() {
        match b {
            ESC => {
                iter.next();
            }
            0x00..=0x1F | 0x7F => {}
            _ => out.push(b as char),
        }
    }
    out
}

/// Reduce text to a file-name-safe form
///
/// Runs of anything other than ASCII letters and digits become a single
/// `-`, leading and trailing dashes are removed and letters are upper-cased.
pub fn clean_file_name(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// 16-bit additive checksum of an image
pub fn image_checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}

/// Canonical file stem: cleaned label plus the image checksum
pub fn rename_file_name(label: &str, checksum: u16) -> String {
    let clean = clean_file_name(label);
    if clean.is_empty() {
        format!("DISK_{:04X}", checksum)
    } else {
        format!("{}_{:04X}", clean, checksum)
    }
}

/// HDOS volume label of an image, control codes removed
pub fn disk_label(image: &DiskImage, options: &HdosOptions) -> Option<String> {
    if image.kind() != FilesystemKind::Hdos {
        return None;
    }
    HdosVolumeHeader::parse(image.data(), options.label_length)
        .ok()
        .map(|h| h.label_text())
        .filter(|l| !l.is_empty())
}

/// Short description of a freshly read disk
///
/// HDOS disks show their volume number and label, CP/M disks a fixed tag.
/// Extended CP/M images with 8 or 9 sectors per track are MS-DOS media.
pub fn volume_label(image: &DiskImage, options: &HdosOptions) -> String {
    describe_volume(
        image.data(),
        image.descriptor().map(|d| d.sectors_per_track),
        options,
    )
}

/// Describe a raw buffer, which may hold only the first track
///
/// `extended_spt` is the sectors per track of an extended-format read.
pub fn describe_volume(data: &[u8], extended_spt: Option<u8>, options: &HdosOptions) -> String {
    match detect_kind(data) {
        FilesystemKind::Hdos => match HdosVolumeHeader::parse(data, options.label_length) {
            Ok(header) => format!("{:03} {}", header.serial, header.label_text()),
            Err(_) => "HDOS-DISK".to_string(),
        },
        FilesystemKind::Cpm => match extended_spt {
            Some(8 | 9) => "DOS-DISK".to_string(),
            _ => "CPM-DISK".to_string(),
        },
        FilesystemKind::Unknown => String::new(),
    }
}

/// File name to propose when saving a disk read over the serial link
///
/// The disk's own label is used when its cleaned form is at least 20
/// characters, otherwise the operator's label.
pub fn suggested_save_name(image: &DiskImage, operator_label: &str, options: &HdosOptions) -> String {
    let label = match disk_label(image, options) {
        Some(label) if clean_file_name(&label).len() >= 20 => label,
        Some(label) if operator_label.trim().is_empty() => label,
        _ => operator_label.to_string(),
    };
    let ext = if image.descriptor().is_some() { "H37" } else { "H8D" };
    format!("{}.{}", rename_file_name(&label, image_checksum(image.bytes())), ext)
}

/// Derives unique canonical names for a batch of images
#[derive(Debug, Default)]
pub struct RenameNormalizer {
    options: HdosOptions,
    taken: HashSet<String>,
}

impl RenameNormalizer {
    /// Create a normalizer
    pub fn new(options: HdosOptions) -> Self {
        Self {
            options,
            taken: HashSet::new(),
        }
    }

    /// Canonical file name (stem and extension) for an image
    ///
    /// The HDOS label is preferred; CP/M images and blank labels fall back
    /// to the current file stem. Names repeated within the batch get `_2`,
    /// `_3`, ... appended.
    pub fn normalize(&mut self, image: &DiskImage) -> String {
        let checksum = image_checksum(image.bytes());
        let source = disk_label(image, &self.options).unwrap_or_else(|| {
            let stem = image
                .path()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| image.title().to_string());
            // a stem already carrying this checksum is renamed to itself
            let suffix = format!("_{:04X}", checksum);
            match stem.to_ascii_uppercase().strip_suffix(&suffix) {
                Some(base) => base.to_string(),
                None => stem,
            }
        });
        let stem = rename_file_name(&source, checksum);
        let ext = image
            .path()
            .and_then(|p| p.extension())
            .map(|e| e.to_string_lossy().to_uppercase())
            .unwrap_or_else(|| "H8D".to_string());

        let mut candidate = format!("{}.{}", stem, ext);
        let mut n = 2;
        while !self.taken.insert(candidate.to_ascii_uppercase()) {
            candidate = format!("{}_{}.{}", stem, n, ext);
            n += 1;
        }
        candidate
    }
}

/// Plan renames for a batch without touching the filesystem
///
/// Unreadable files are skipped. Images already carrying their canonical
/// name are left out of the plan.
pub fn plan_renames(paths: &[PathBuf], options: &HdosOptions) -> Vec<(PathBuf, PathBuf)> {
    let mut normalizer = RenameNormalizer::new(options.clone());
    let mut plan = Vec::new();

    for path in paths {
        let image = match DiskImage::open(path) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("{}: {}", path.display(), e);
                continue;
            }
        };
        let name = normalizer.normalize(&image);
        let target = sibling(path, &name);
        if target != *path {
            plan.push((path.clone(), target));
        }
    }
    plan
}

/// Rename every image in a batch to its canonical name
///
/// Returns the (old, new) pairs actually renamed. A target that already
/// exists outside the batch is left alone and the image is skipped.
pub fn rename_all(paths: &[PathBuf], options: &HdosOptions) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut done = Vec::new();
    for (old, new) in plan_renames(paths, options) {
        if new.exists() && !paths.contains(&new) {
            log::warn!("{} already exists, not renaming {}", new.display(), old.display());
            continue;
        }
        std::fs::rename(&old, &new)?;
        log::info!("renamed {} -> {}", old.display(), new.display());
        done.push((old, new));
    }
    Ok(done)
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
