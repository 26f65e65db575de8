/// Disk catalog service
///
/// Builds a flat record stream (header, file rows, footer per image) from a
/// batch of images and renders it as text or HTML.

use crate::error::{H8dError, Result};
use crate::filesystem::{mount, DiskContentItem, HdosOptions, VolumeListing};
use crate::image::DiskImage;
use std::path::{Path, PathBuf};

/// Kind of a catalog record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Image title
    Header,
    /// One file
    FileRow,
    /// Used and free space, or the reason the listing failed
    Footer,
}

/// One line of a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    /// Record kind
    pub kind: RecordKind,
    /// Formatted line
    pub text: String,
    /// Index of the image in the batch
    pub image: usize,
    /// File described by a `FileRow`
    pub item: Option<DiskContentItem>,
}

impl CatalogRecord {
    fn new(kind: RecordKind, text: String, image: usize) -> Self {
        Self {
            kind,
            text,
            image,
            item: None,
        }
    }
}

/// Disk and file totals of a record stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    /// Number of header records
    pub disks: usize,
    /// Number of file rows
    pub files: usize,
}

impl CatalogStats {
    /// Count records by kind
    pub fn from_records(records: &[CatalogRecord]) -> Self {
        records.iter().fold(Self::default(), |mut stats, r| {
            match r.kind {
                RecordKind::Header => stats.disks += 1,
                RecordKind::FileRow => stats.files += 1,
                RecordKind::Footer => {}
            }
            stats
        })
    }
}

/// Format a file row: `NAME    .EXT SIZE DATE`
pub fn format_row(item: &DiskContentItem, listing: &VolumeListing) -> String {
    format!(
        "{} {:04}{} {}",
        item.display_name(),
        item.size,
        listing.unit.suffix(),
        item.created
    )
    .trim_end()
    .to_string()
}

/// Format a footer: `USED=xxxx FREE=yyyy`
pub fn format_footer(listing: &VolumeListing) -> String {
    let suffix = listing.unit.suffix();
    format!(
        "USED={:04}{} FREE={:04}{}",
        listing.used, suffix, listing.free, suffix
    )
}

/// Catalog a batch of images
///
/// Image order is kept. An image that fails to list still gets its header,
/// followed by a footer describing the failure, and the batch carries on.
pub fn catalog(images: &[DiskImage], options: &HdosOptions) -> Vec<CatalogRecord> {
    let mut records = Vec::new();

    for (idx, image) in images.iter().enumerate() {
        records.push(CatalogRecord::new(
            RecordKind::Header,
            image.title().to_string(),
            idx,
        ));

        match mount(image, options).and_then(|fs| fs.list_files()) {
            Ok(listing) => {
                for item in &listing.items {
                    records.push(CatalogRecord {
                        kind: RecordKind::FileRow,
                        text: format_row(item, &listing),
                        image: idx,
                        item: Some(item.clone()),
                    });
                }
                records.push(CatalogRecord::new(
                    RecordKind::Footer,
                    format_footer(&listing),
                    idx,
                ));
            }
            Err(e) => {
                log::warn!("{}: {}", image.title(), e);
                records.push(CatalogRecord::new(
                    RecordKind::Footer,
                    format!("ERROR: {}", e),
                    idx,
                ));
            }
        }
    }

    records
}

/// Render a catalog as plain text
pub fn render_text(records: &[CatalogRecord]) -> String {
    let mut out = String::new();
    for record in records {
        match record.kind {
            RecordKind::Header => {
                out.push_str(&record.text);
                out.push('\n');
            }
            RecordKind::FileRow => {
                out.push_str("  ");
                out.push_str(&record.text);
                out.push('\n');
            }
            RecordKind::Footer => {
                out.push_str("  ");
                out.push_str(&record.text);
                out.push_str("\n\n");
            }
        }
    }

    let stats = CatalogStats::from_records(records);
    out.push_str(&format!("DISKS={} FILES={}\n", stats.disks, stats.files));
    out
}

/// Render a catalog as a minimal HTML document
pub fn render_html(records: &[CatalogRecord]) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>H8D Catalog</title></head>\n<body>\n",
    );
    let mut in_list = false;

    for record in records {
        let text = escape_html(&record.text);
        match record.kind {
            RecordKind::Header => {
                out.push_str(&format!("<h3>{}</h3>\n<pre>\n", text));
                in_list = true;
            }
            RecordKind::FileRow => {
                out.push_str(&text);
                out.push('\n');
            }
            RecordKind::Footer => {
                if in_list {
                    out.push_str("</pre>\n");
                    in_list = false;
                }
                out.push_str(&format!("<p><b>{}</b></p>\n", text));
            }
        }
    }
    if in_list {
        out.push_str("</pre>\n");
    }

    let stats = CatalogStats::from_records(records);
    out.push_str(&format!(
        "<p>DISKS={} FILES={}</p>\n</body>\n</html>\n",
        stats.disks, stats.files
    ));
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Find every disk image under a folder
///
/// Matches `*.?8?` and `*.H37` recursively, ignoring case. The result is
/// sorted and free of duplicates.
pub fn select_working_folder<P: AsRef<Path>>(folder: P) -> Result<Vec<PathBuf>> {
    let base = folder.as_ref();
    if !base.is_dir() {
        return Err(H8dError::FileNotFound(base.display().to_string()));
    }

    let opt = glob::MatchOptions {
        case_sensitive: false,
        require_literal_leading_dot: false,
        require_literal_separator: false,
    };
    log::debug!("scanning {}", base.display());

    let mut found = Vec::new();
    for pattern in ["*.?8?", "*.h37"] {
        let patt = base.join("**").join(pattern);
        let Some(globable) = patt.as_os_str().to_str() else {
            log::warn!("directory {} could not be globbed", base.display());
            continue;
        };
        let paths = glob::glob_with(globable, opt)
            .map_err(|e| H8dError::invalid_format(e.to_string()))?;
        found.extend(paths.filter_map(|entry| entry.ok()).filter(|p| p.is_file()));
    }

    found.sort();
    found.dedup();
    log::info!("there were {} images in {}", found.len(), base.display());
    Ok(found)
}

/// Load images, skipping (and logging) any that cannot be read
pub fn load_images(paths: &[PathBuf]) -> Vec<DiskImage> {
    paths
        .iter()
        .filter_map(|path| match DiskImage::open(path) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("{}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

/// Extract one file from an image
pub fn extract_file(
    image: &DiskImage,
    name: &str,
    ext: &str,
    options: &HdosOptions,
) -> Result<Vec<u8>> {
    let fs = mount(image, options)?;
    fs.extract_file(name, ext)
}

/// Search a batch for a file; returns (image index, item) for every hit
pub fn search(
    images: &[DiskImage],
    name: &str,
    ext: &str,
    options: &HdosOptions,
) -> Vec<(usize, DiskContentItem)> {
    catalog(images, options)
        .into_iter()
        .filter_map(|r| match r.item {
            Some(item) if item.matches(name, ext) => Some((r.image, item)),
            _ => None,
        })
        .collect()
}
