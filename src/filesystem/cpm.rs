/// CP/M filesystem implementation
///
/// H17 CP/M keeps three system tracks, then the directory from track 3
/// sector 0 (0x1E00). Directory and data sectors are stored through the
/// hard-sector skew, so logical sector `n` of a track lives in physical
/// slot `skew[n]`.

use crate::error::{H8dError, Result};
use crate::filesystem::{names_match, DiskContentItem, FileSystem, SizeUnit, VolumeListing};
use crate::format::constants::*;
use crate::format::{DiskType, FilesystemKind, SkewTable};

/// Layout parameters that depend on the medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpmParams {
    /// Allocation block size in bytes
    pub block_size: usize,
    /// Number of 256-byte directory sectors
    pub dir_sectors: usize,
    /// Space unavailable to files (system tracks and directory) in KB
    pub reserved_kb: u32,
}

impl CpmParams {
    /// 40-track media
    pub fn standard() -> Self {
        Self {
            block_size: 1024,
            dir_sectors: 8,
            reserved_kb: 10,
        }
    }

    /// Two-sided 80-track media
    pub fn high_capacity() -> Self {
        Self {
            block_size: 2048,
            dir_sectors: 16,
            reserved_kb: 12,
        }
    }

    /// Pick parameters from the image length
    pub fn for_image_len(len: usize) -> Self {
        if len == DiskType::TwoSide80.h17_image_len() {
            Self::high_capacity()
        } else {
            Self::standard()
        }
    }

    /// Sectors per allocation block
    pub fn sectors_per_block(&self) -> usize {
        self.block_size / SECTOR_SIZE
    }

    /// Extent mask: extra 16 KB logical extents held by one directory entry
    pub fn extent_mask(&self) -> u8 {
        (self.block_size / 1024).saturating_sub(1) as u8
    }
}

/// CP/M directory entry (32 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpmDirEntry {
    /// Status byte (user number, 0xE5 when erased)
    pub status: u8,
    /// Filename
    pub filename: [u8; 8],
    /// Extension with attribute bits cleared
    pub extension: [u8; 3],
    /// Extent number, low byte
    pub extent_low: u8,
    /// Extent number, high byte
    pub extent_high: u8,
    /// Reserved byte
    pub reserved: u8,
    /// Records (128 bytes) in the last logical extent of this entry
    pub record_count: u8,
    /// Allocation block map, 0 for unused slots
    pub allocation: [u8; 16],
}

impl CpmDirEntry {
    /// Parse a directory entry from 32 bytes; `None` for erased entries
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < CPM_DIR_ENTRY_SIZE {
            return None;
        }

        let status = data[0];
        if status == CPM_ERASED || data[1] == CPM_ERASED {
            return None;
        }

        let mut filename = [0u8; 8];
        let mut extension = [0u8; 3];
        let mut allocation = [0u8; 16];
        filename.copy_from_slice(&data[1..9]);
        for (dst, src) in extension.iter_mut().zip(&data[9..12]) {
            *dst = src & 0x7F;
        }
        allocation.copy_from_slice(&data[16..32]);

        Some(Self {
            status,
            filename,
            extension,
            extent_low: data[12],
            extent_high: data[13],
            reserved: data[14],
            record_count: data[15],
            allocation,
        })
    }

    /// Filename padded to 8 characters
    pub fn name(&self) -> String {
        self.filename
            .iter()
            .map(|&b| if b == 0 { ' ' } else { (b & 0x7F) as char })
            .collect()
    }

    /// Extension padded to 3 characters
    pub fn ext(&self) -> String {
        self.extension
            .iter()
            .map(|&b| if b == 0 { ' ' } else { b as char })
            .collect()
    }

    /// Extent number
    pub fn extent_number(&self) -> u16 {
        ((self.extent_high as u16) << 5) | (self.extent_low as u16 & 0x1F)
    }

    /// True for a continuation extent (record count 0x80 or more)
    pub fn is_continuation(&self) -> bool {
        self.record_count as usize >= CPM_RECORDS_PER_EXTENT
    }

    /// Nonzero allocation blocks
    pub fn blocks(&self) -> impl Iterator<Item = u8> + '_ {
        self.allocation.iter().copied().filter(|&b| b != 0)
    }

    /// Bytes of file data described by this entry
    ///
    /// With blocks larger than 1 KB one entry spans several 16 KB logical
    /// extents; the low extent bits count the full ones before the last.
    pub fn data_len(&self, params: &CpmParams) -> usize {
        let records = (self.record_count as usize).min(CPM_RECORDS_PER_EXTENT);
        let full = (self.extent_low & params.extent_mask()) as usize;
        full * CPM_RECORDS_PER_EXTENT * CPM_RECORD_SIZE + records * CPM_RECORD_SIZE
    }

    fn same_file(&self, other: &CpmDirEntry) -> bool {
        self.filename == other.filename && self.extension == other.extension
    }
}

/// A logical file: all directory entries sharing one name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpmFile {
    /// Extents sorted by extent number
    pub extents: Vec<CpmDirEntry>,
    /// Size in KB from the nonzero allocation blocks
    pub size_kb: u32,
    /// False when the scan ended before a terminating extent was seen
    pub complete: bool,
}

impl CpmFile {
    /// Filename padded to 8 characters
    pub fn name(&self) -> String {
        self.extents.first().map(|e| e.name()).unwrap_or_default()
    }

    /// Extension padded to 3 characters
    pub fn ext(&self) -> String {
        self.extents.first().map(|e| e.ext()).unwrap_or_default()
    }
}

/// CP/M filesystem over an image buffer
pub struct CpmFileSystem<'a> {
    buf: &'a [u8],
    params: CpmParams,
    skew: SkewTable,
    directory_entries: Vec<CpmDirEntry>,
}

impl<'a> CpmFileSystem<'a> {
    /// Mount with parameters chosen from the image length
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        Self::with_params(buf, CpmParams::for_image_len(buf.len()))
    }

    /// Mount with explicit parameters
    pub fn with_params(buf: &'a [u8], params: CpmParams) -> Result<Self> {
        let needed = CPM_DIR_OFFSET + SECTOR_SIZE;
        if buf.len() < needed {
            return Err(H8dError::too_short(needed, buf.len()));
        }

        let skew = SkewTable::h17();
        let directory_entries = Self::read_directory(buf, &params, &skew);
        log::debug!(
            "CP/M volume: {} directory entries, {} byte blocks",
            directory_entries.len(),
            params.block_size
        );

        Ok(Self {
            buf,
            params,
            skew,
            directory_entries,
        })
    }

    /// Layout parameters in use
    pub fn params(&self) -> &CpmParams {
        &self.params
    }

    /// Raw directory entries in directory order
    pub fn entries(&self) -> &[CpmDirEntry] {
        &self.directory_entries
    }

    /// Byte offset of a logical sector counted from the start of the disk
    fn sector_offset(&self, logical: usize) -> usize {
        physical_offset(&self.skew, logical)
    }

    /// Read the directory sectors through the skew
    fn read_directory(buf: &[u8], params: &CpmParams, skew: &SkewTable) -> Vec<CpmDirEntry> {
        let first = CPM_SYSTEM_TRACKS * SECTORS_PER_TRACK;
        let mut entries = Vec::new();

        for i in 0..params.dir_sectors {
            let offset = physical_offset(skew, first + i);
            let Some(sector) = buf.get(offset..offset + SECTOR_SIZE) else {
                log::debug!("directory sector {} at {:#X} past end of image", i, offset);
                break;
            };
            log::trace!("directory sector {} at {:#X}", i, offset);
            entries.extend(
                sector
                    .chunks_exact(CPM_DIR_ENTRY_SIZE)
                    .filter_map(CpmDirEntry::parse),
            );
        }

        entries
    }

    /// Group directory entries into files
    ///
    /// Every entry sharing a name belongs to one file, wherever it sits in
    /// the directory. Extents are ordered by extent number and the size is
    /// taken from all their blocks. A file with no extent below 0x80
    /// records is still returned, marked incomplete. Files come out in the
    /// order their first entry appears.
    pub fn files(&self) -> Vec<CpmFile> {
        let block_kb = (self.params.block_size / 1024) as u32;
        let mut groups: Vec<Vec<CpmDirEntry>> = Vec::new();

        for entry in &self.directory_entries {
            match groups.iter_mut().find(|group| group[0].same_file(entry)) {
                Some(group) => group.push(entry.clone()),
                None => groups.push(vec![entry.clone()]),
            }
        }

        groups
            .into_iter()
            .map(|mut extents| {
                extents.sort_by_key(|e| e.extent_number());
                let blocks: usize = extents.iter().map(|e| e.blocks().count()).sum();
                let complete = extents.iter().any(|e| !e.is_continuation());
                if !complete {
                    log::debug!("{} has no closing extent", extents[0].name().trim());
                }
                CpmFile {
                    extents,
                    size_kb: blocks as u32 * block_kb,
                    complete,
                }
            })
            .collect()
    }

    /// Find a file by name and extension
    pub fn find(&self, name: &str, ext: &str) -> Result<CpmFile> {
        self.files()
            .into_iter()
            .find(|f| names_match(&f.name(), &f.ext(), name, ext))
            .ok_or_else(|| H8dError::FileNotFound(format!("{}.{}", name.trim(), ext.trim())))
    }

    /// Read a file's bytes
    ///
    /// Each nonzero block is copied in 128-byte records from the de-skewed
    /// sectors, then the result is cut to the length recorded in the extents.
    pub fn read_file(&self, file: &CpmFile) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for extent in &file.extents {
            for block in extent.blocks() {
                self.read_block(block as usize, &mut data)?;
            }
        }

        let recorded: usize = file
            .extents
            .iter()
            .map(|e| e.data_len(&self.params))
            .sum();
        if data.len() > recorded {
            data.truncate(recorded);
        }
        Ok(data)
    }

    fn read_block(&self, block: usize, out: &mut Vec<u8>) -> Result<()> {
        let per_block = self.params.sectors_per_block();
        let first = CPM_SYSTEM_TRACKS * SECTORS_PER_TRACK + block * per_block;

        for k in 0..per_block {
            let offset = self.sector_offset(first + k);
            for record in 0..SECTOR_SIZE / CPM_RECORD_SIZE {
                let start = offset + record * CPM_RECORD_SIZE;
                let bytes = self.buf.get(start..start + CPM_RECORD_SIZE).ok_or_else(|| {
                    H8dError::corrupt(format!(
                        "block {} at {:#X} lies past the end of the image",
                        block, start
                    ))
                })?;
                out.extend_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Total space on the medium in KB
    pub fn total_kb(&self) -> u32 {
        (self.buf.len() / 1024) as u32
    }

    /// Number of allocation blocks on the medium
    pub fn total_blocks(&self) -> usize {
        let data_start = CPM_SYSTEM_TRACKS * TRACK_SIZE;
        self.buf.len().saturating_sub(data_start) / self.params.block_size
    }

    /// Owner of each allocation block: index into `files()`, `None` when free
    ///
    /// The directory's own blocks are never claimed by a file.
    pub fn block_owners(&self) -> Vec<Option<usize>> {
        let mut owners = vec![None; self.total_blocks()];
        for (idx, file) in self.files().iter().enumerate() {
            for block in file.extents.iter().flat_map(|e| e.blocks()) {
                if let Some(slot) = owners.get_mut(block as usize) {
                    *slot = Some(idx);
                }
            }
        }
        owners
    }
}

/// Offset of a logical sector once the hard-sector skew is applied
fn physical_offset(skew: &SkewTable, logical: usize) -> usize {
    let track = logical / SECTORS_PER_TRACK;
    let sector = logical % SECTORS_PER_TRACK;
    track * TRACK_SIZE + skew.physical(sector) * SECTOR_SIZE
}

impl FileSystem for CpmFileSystem<'_> {
    fn kind(&self) -> FilesystemKind {
        FilesystemKind::Cpm
    }

    fn list_files(&self) -> Result<VolumeListing> {
        let files = self.files();
        let used: u32 = files.iter().map(|f| f.size_kb).sum();
        let items = files
            .iter()
            .map(|f| DiskContentItem {
                name: f.name(),
                ext: f.ext(),
                size: f.size_kb,
                created: String::new(),
                altered: String::new(),
            })
            .collect();

        let mut listing = VolumeListing {
            kind: FilesystemKind::Cpm,
            items,
            used,
            free: self
                .total_kb()
                .saturating_sub(self.params.reserved_kb)
                .saturating_sub(used),
            unit: SizeUnit::Kilobytes,
        };
        listing.sort_items();
        Ok(listing)
    }

    fn extract_file(&self, name: &str, ext: &str) -> Result<Vec<u8>> {
        let file = self.find(name, ext)?;
        self.read_file(&file)
    }
}
