/// HDOS filesystem implementation
///
/// An HDOS volume keeps its header at 0x900, a 256-byte Group Reference Table
/// (GRT) and a linked directory. Each file is a chain of allocation groups;
/// `GRT[g]` is the group following `g` and 0 ends the chain. The free list is
/// the chain that starts at `GRT[0]`.

use crate::error::{H8dError, Result};
use crate::filesystem::{names_match, DiskContentItem, FileSystem, SizeUnit, VolumeListing};
use crate::format::constants::*;
use crate::format::{DiskType, FilesystemKind};
use crate::rename::strip_terminal_codes;
use std::collections::HashSet;

/// Length of the volume label field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelLength {
    /// 60 byte label
    #[default]
    Standard,
    /// 68 byte label used by later volume layouts
    Extended,
}

impl LabelLength {
    /// Label length in bytes
    pub fn len(&self) -> usize {
        match self {
            LabelLength::Standard => 60,
            LabelLength::Extended => 68,
        }
    }
}

/// Range of group numbers a file chain may legally visit
///
/// Groups below `min_group` hold the boot area and directory, groups at or
/// above `max_group` lie past the end of the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrtPolicy {
    /// Lowest valid group number (inclusive)
    pub min_group: u16,
    /// Highest valid group number (exclusive)
    pub max_group: u16,
}

impl Default for GrtPolicy {
    fn default() -> Self {
        Self {
            min_group: 4,
            max_group: 200,
        }
    }
}

impl GrtPolicy {
    /// The wider range accepted by some later tools
    pub fn permissive() -> Self {
        Self {
            min_group: 3,
            max_group: 255,
        }
    }

    /// Check a group number against the range
    pub fn contains(&self, group: u8) -> bool {
        (self.min_group..self.max_group).contains(&(group as u16))
    }
}

/// Options for reading HDOS volumes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HdosOptions {
    /// Label field length
    pub label_length: LabelLength,
    /// Valid group range
    pub grt: GrtPolicy,
}

impl HdosOptions {
    /// Set the label length
    pub fn with_label_length(mut self, label_length: LabelLength) -> Self {
        self.label_length = label_length;
        self
    }

    /// Set the valid group range
    pub fn with_grt_policy(mut self, grt: GrtPolicy) -> Self {
        self.grt = grt;
        self
    }
}

/// HDOS volume header (sector 9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdosVolumeHeader {
    /// Volume serial number
    pub serial: u8,
    /// Packed initialisation date
    pub init_date: u16,
    /// Byte offset of the first directory block
    pub dir_offset: usize,
    /// Byte offset of the GRT
    pub grt_offset: usize,
    /// Sectors per allocation group
    pub sectors_per_group: u8,
    /// Volume type
    pub volume_type: u8,
    /// Version of INIT that built the volume
    pub init_version: u8,
    /// Byte offset of the reserved group table
    pub rgt_offset: usize,
    /// Volume size in sectors
    pub volume_size: u16,
    /// Physical sector size
    pub phys_sector_size: u16,
    /// Volume flags (geometry code in bits 0-1)
    pub flags: u8,
    /// Raw label bytes
    pub label: Vec<u8>,
    /// Reserved word
    pub reserved: u16,
    /// Sectors per track
    pub sectors_per_track: u8,
}

impl HdosVolumeHeader {
    /// Parse the header at 0x900
    pub fn parse(buf: &[u8], label_length: LabelLength) -> Result<Self> {
        let label_len = label_length.len();
        let needed = HDOS_LABEL_OFFSET + label_len + 3;
        if buf.len() < needed {
            return Err(H8dError::too_short(needed, buf.len()));
        }

        let word = |offset: usize| u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        let h = HDOS_HEADER_OFFSET;
        let after_label = HDOS_LABEL_OFFSET + label_len;

        Ok(Self {
            serial: buf[h],
            init_date: word(h + 1),
            dir_offset: word(h + 3) as usize * SECTOR_SIZE,
            grt_offset: word(h + 5) as usize * SECTOR_SIZE,
            sectors_per_group: buf[h + 7],
            volume_type: buf[h + 8],
            init_version: buf[h + 9],
            rgt_offset: word(h + 10) as usize * SECTOR_SIZE,
            volume_size: word(h + 12),
            phys_sector_size: word(h + 14),
            flags: buf[HDOS_FLAGS_OFFSET],
            label: buf[HDOS_LABEL_OFFSET..after_label].to_vec(),
            reserved: word(after_label),
            sectors_per_track: buf[after_label + 2],
        })
    }

    /// Check the directory and GRT pointers address data inside the image
    pub fn validate(&self, image_len: usize) -> Result<()> {
        if self.dir_offset == 0 || self.dir_offset >= image_len {
            return Err(H8dError::corrupt(format!(
                "directory sector {:#X} outside image of {} bytes",
                self.dir_offset, image_len
            )));
        }
        if self.grt_offset + HDOS_GRT_SIZE > image_len {
            return Err(H8dError::corrupt(format!(
                "GRT sector {:#X} outside image of {} bytes",
                self.grt_offset, image_len
            )));
        }
        if self.sectors_per_group == 0 {
            return Err(H8dError::corrupt("zero sectors per group"));
        }
        Ok(())
    }

    /// Label with terminal control codes removed and padding trimmed
    pub fn label_text(&self) -> String {
        strip_terminal_codes(&self.label).trim().to_string()
    }

    /// Geometry recorded in the flags byte
    pub fn disk_type(&self) -> DiskType {
        DiskType::from_code(self.flags)
    }

    /// Bytes per allocation group
    pub fn group_bytes(&self) -> usize {
        self.sectors_per_group as usize * SECTOR_SIZE
    }
}

/// Group Reference Table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReferenceTable {
    table: [u8; HDOS_GRT_SIZE],
}

impl GroupReferenceTable {
    /// Copy the GRT out of an image
    pub fn load(buf: &[u8], header: &HdosVolumeHeader) -> Result<Self> {
        let start = header.grt_offset;
        let bytes = buf.get(start..start + HDOS_GRT_SIZE).ok_or_else(|| {
            H8dError::corrupt(format!("GRT at {:#X} out of range", start))
        })?;
        Ok(Self::from_table(bytes))
    }

    /// Build from raw table bytes (short tables are zero filled)
    pub fn from_table(bytes: &[u8]) -> Self {
        let mut table = [0u8; HDOS_GRT_SIZE];
        let len = bytes.len().min(HDOS_GRT_SIZE);
        table[..len].copy_from_slice(&bytes[..len]);
        Self { table }
    }

    /// Group following `group`, 0 at the end of a chain
    pub fn next(&self, group: u8) -> u8 {
        self.table[group as usize]
    }

    /// Groups of a file chain starting at `first`
    ///
    /// A first group outside the policy range is an empty file. A later step
    /// outside the range, or a chain that does not end within 256 steps, is
    /// directory corruption.
    pub fn chain(&self, first: u8, policy: &GrtPolicy) -> Result<Vec<u8>> {
        if !policy.contains(first) {
            return Ok(Vec::new());
        }

        let mut groups = vec![first];
        let mut group = first;
        while self.next(group) != 0 {
            let next = self.next(group);
            if !policy.contains(next) {
                return Err(H8dError::corrupt(format!(
                    "group {} links to invalid group {}",
                    group, next
                )));
            }
            group = next;
            groups.push(group);
            if groups.len() >= HDOS_GRT_SIZE {
                return Err(H8dError::corrupt(format!(
                    "group chain from {} does not terminate",
                    first
                )));
            }
        }
        Ok(groups)
    }

    /// Groups on the free list, in list order
    pub fn free_list(&self) -> Result<Vec<u8>> {
        let mut groups = Vec::new();
        let mut group = 0u8;
        while self.next(group) != 0 {
            group = self.next(group);
            groups.push(group);
            if groups.len() >= HDOS_GRT_SIZE {
                return Err(H8dError::corrupt("free list does not terminate"));
            }
        }
        Ok(groups)
    }

    /// Number of groups on the free list
    pub fn free_groups(&self) -> Result<usize> {
        Ok(self.free_list()?.len())
    }
}

/// HDOS directory entry (23 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdosDirEntry {
    /// Filename
    pub filename: [u8; 8],
    /// Extension
    pub extension: [u8; 3],
    /// Project number
    pub project: u8,
    /// Version number
    pub version: u8,
    /// Cluster factor
    pub cluster_factor: u8,
    /// File flags
    pub flags: u8,
    /// Second flags byte
    pub flags2: u8,
    /// First group of the file
    pub first_group: u8,
    /// Last group of the file
    pub last_group: u8,
    /// Sectors used in the last group
    pub last_sector_index: u8,
    /// Packed creation date
    pub creation_date: u16,
    /// Packed alteration date
    pub alteration_date: u16,
}

impl HdosDirEntry {
    /// Parse an entry; `None` for empty or deleted slots
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HDOS_DIR_ENTRY_SIZE {
            return None;
        }
        if matches!(data[0], 0x00 | 0xFE | 0xFF) {
            return None;
        }

        let mut filename = [0u8; 8];
        let mut extension = [0u8; 3];
        filename.copy_from_slice(&data[0..8]);
        extension.copy_from_slice(&data[8..11]);

        Some(Self {
            filename,
            extension,
            project: data[11],
            version: data[12],
            cluster_factor: data[13],
            flags: data[14],
            flags2: data[15],
            first_group: data[16],
            last_group: data[17],
            last_sector_index: data[18],
            creation_date: u16::from_le_bytes([data[19], data[20]]),
            alteration_date: u16::from_le_bytes([data[21], data[22]]),
        })
    }

    /// Filename padded to 8 characters, NULs shown as spaces
    pub fn name(&self) -> String {
        display_field(&self.filename)
    }

    /// Extension padded to 3 characters, NULs shown as spaces
    pub fn ext(&self) -> String {
        display_field(&self.extension)
    }
}

fn display_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b == 0 { ' ' } else { (b & 0x7F) as char })
        .collect()
}

/// Decode a packed HDOS date into `DD-MMM-YY`
///
/// Day is bits 0-4, month bits 5-8 and the year bits 9-14 counted from 1970.
/// Day 0 is shown as 01, an unknown month as Jan, year 0 as 09 and years
/// past 1999 as 99.
pub fn decode_date(packed: u16) -> String {
    let day = match packed & 0x001F {
        0 => 1,
        d => d,
    };
    let month = ((packed & 0x01E0) >> 5) as usize;
    let month = if (1..=12).contains(&month) {
        MONTHS[month - 1]
    } else {
        MONTHS[0]
    };
    let year = match (packed & 0x7E00) >> 9 {
        0 => 9,
        y => (y + 70).min(99),
    };
    format!("{:02}-{}-{:02}", day, month, year)
}

/// Pack a date the way HDOS stores it
pub fn encode_date(day: u8, month: u8, year: u16) -> u16 {
    let offset = year.saturating_sub(1970).min(0x3F);
    (day as u16 & 0x1F) | ((month as u16 & 0x0F) << 5) | (offset << 9)
}

/// HDOS filesystem over an image buffer
pub struct HdosFileSystem<'a> {
    buf: &'a [u8],
    header: HdosVolumeHeader,
    grt: GroupReferenceTable,
    options: HdosOptions,
}

impl<'a> HdosFileSystem<'a> {
    /// Mount an HDOS volume
    pub fn new(buf: &'a [u8], options: HdosOptions) -> Result<Self> {
        let header = HdosVolumeHeader::parse(buf, options.label_length)?;
        header.validate(buf.len())?;
        let grt = GroupReferenceTable::load(buf, &header)?;

        log::debug!(
            "HDOS volume {:03} dir={:#X} grt={:#X} spg={}",
            header.serial,
            header.dir_offset,
            header.grt_offset,
            header.sectors_per_group
        );

        Ok(Self {
            buf,
            header,
            grt,
            options,
        })
    }

    /// Volume header
    pub fn header(&self) -> &HdosVolumeHeader {
        &self.header
    }

    /// Group Reference Table
    pub fn grt(&self) -> &GroupReferenceTable {
        &self.grt
    }

    /// Walk the linked directory and return every live entry
    ///
    /// Each directory block holds 22 entries followed by a 6-byte trailer
    /// (max entries, this block, next block). A next block of 0 ends the
    /// directory; revisiting a block also ends it.
    pub fn entries(&self) -> Result<Vec<HdosDirEntry>> {
        let block_len = HDOS_ENTRIES_PER_BLOCK * HDOS_DIR_ENTRY_SIZE + HDOS_DIR_BLOCK_TRAILER;
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let mut offset = self.header.dir_offset;

        loop {
            visited.insert(offset);
            let block = self.buf.get(offset..offset + block_len).ok_or_else(|| {
                H8dError::corrupt(format!("directory block at {:#X} out of range", offset))
            })?;

            entries.extend(
                block
                    .chunks_exact(HDOS_DIR_ENTRY_SIZE)
                    .take(HDOS_ENTRIES_PER_BLOCK)
                    .filter_map(HdosDirEntry::parse),
            );

            let trailer = &block[block_len - HDOS_DIR_BLOCK_TRAILER..];
            let next = u16::from_le_bytes([trailer[4], trailer[5]]) as usize * SECTOR_SIZE;
            log::trace!(
                "directory block {:#X} max={} next={:#X}",
                offset,
                u16::from_le_bytes([trailer[0], trailer[1]]),
                next
            );

            if next == 0 {
                break;
            }
            if visited.contains(&next) {
                log::warn!("directory block {:#X} links back to {:#X}", offset, next);
                break;
            }
            offset = next;
        }

        Ok(entries)
    }

    /// File size in sectors: chain length x sectors per group + last sector index
    pub fn file_sectors(&self, entry: &HdosDirEntry) -> Result<u32> {
        let chain = self.grt.chain(entry.first_group, &self.options.grt)?;
        if chain.is_empty() {
            return Ok(0);
        }
        Ok(chain.len() as u32 * self.header.sectors_per_group as u32
            + entry.last_sector_index as u32)
    }

    /// Free space in sectors
    pub fn free_sectors(&self) -> Result<u32> {
        Ok(self.grt.free_groups()? as u32 * self.header.sectors_per_group as u32)
    }

    /// Read a directory entry's bytes
    ///
    /// Every group of the chain is copied whole, then `last_sector_index`
    /// sectors from the start of the final group are appended, giving
    /// exactly `file_sectors * 256` bytes.
    pub fn extract_entry(&self, entry: &HdosDirEntry) -> Result<Vec<u8>> {
        let chain = self.grt.chain(entry.first_group, &self.options.grt)?;
        let group_bytes = self.header.group_bytes();
        let tail_bytes = entry.last_sector_index as usize * SECTOR_SIZE;

        let mut data = Vec::with_capacity(chain.len() * group_bytes + tail_bytes);
        for &group in &chain {
            data.extend_from_slice(self.group_slice(group, group_bytes)?);
        }
        if let Some(&last) = chain.last() {
            data.extend_from_slice(self.group_slice(last, tail_bytes)?);
        }
        Ok(data)
    }

    fn group_slice(&self, group: u8, len: usize) -> Result<&'a [u8]> {
        let start = group as usize * self.header.group_bytes();
        self.buf.get(start..start + len).ok_or_else(|| {
            H8dError::corrupt(format!(
                "group {} at {:#X} lies past the end of the image",
                group, start
            ))
        })
    }

    /// Find an entry by name and extension
    pub fn find(&self, name: &str, ext: &str) -> Result<HdosDirEntry> {
        self.entries()?
            .into_iter()
            .find(|e| names_match(&e.name(), &e.ext(), name, ext))
            .ok_or_else(|| H8dError::FileNotFound(format!("{}.{}", name.trim(), ext.trim())))
    }

    /// Owner of each group: index into `entries()`, `None` when unowned
    pub fn group_owners(&self) -> Result<Vec<Option<usize>>> {
        let mut owners = vec![None; HDOS_GRT_SIZE];
        for (idx, entry) in self.entries()?.iter().enumerate() {
            for group in self.grt.chain(entry.first_group, &self.options.grt)? {
                owners[group as usize] = Some(idx);
            }
        }
        Ok(owners)
    }
}

impl FileSystem for HdosFileSystem<'_> {
    fn kind(&self) -> FilesystemKind {
        FilesystemKind::Hdos
    }

    fn list_files(&self) -> Result<VolumeListing> {
        let mut items = Vec::new();
        let mut used = 0u32;

        for entry in self.entries()? {
            let size = self.file_sectors(&entry)?;
            used += size;
            items.push(DiskContentItem {
                name: entry.name(),
                ext: entry.ext(),
                size,
                created: decode_date(entry.creation_date),
                altered: String::new(),
            });
        }

        let mut listing = VolumeListing {
            kind: FilesystemKind::Hdos,
            items,
            used,
            free: self.free_sectors()?,
            unit: SizeUnit::Sectors,
        };
        listing.sort_items();
        Ok(listing)
    }

    fn extract_file(&self, name: &str, ext: &str) -> Result<Vec<u8>> {
        let entry = self.find(name, ext)?;
        self.extract_entry(&entry)
    }

    fn label(&self) -> Option<String> {
        Some(self.header.label_text())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a 1S40T HDOS image: directory at sector 10, GRT at sector 8,
    /// two sectors per group
    pub(crate) fn build_image(files: &[(&[u8; 8], &[u8; 3], u8, u8, u16)]) -> Vec<u8> {
        let mut buf = vec![0u8; 102400];
        buf[..4].copy_from_slice(&[0xC3, 0xA0, 0x22, 0x20]);
        let h = HDOS_HEADER_OFFSET;
        buf[h] = 42;
        buf[h + 3..h + 5].copy_from_slice(&10u16.to_le_bytes());
        buf[h + 5..h + 7].copy_from_slice(&8u16.to_le_bytes());
        buf[h + 7] = 2;
        buf[HDOS_FLAGS_OFFSET] = 0;
        let label = b"TEST VOLUME";
        buf[HDOS_LABEL_OFFSET..HDOS_LABEL_OFFSET + label.len()].copy_from_slice(label);
        for b in &mut buf[HDOS_LABEL_OFFSET + label.len()..HDOS_LABEL_OFFSET + 60] {
            *b = b' ';
        }

        let dir = 10 * SECTOR_SIZE;
        for (i, (name, ext, first, lsi, date)) in files.iter().enumerate() {
            let e = dir + i * HDOS_DIR_ENTRY_SIZE;
            buf[e..e + 8].copy_from_slice(*name);
            buf[e + 8..e + 11].copy_from_slice(*ext);
            buf[e + 16] = *first;
            buf[e + 18] = *lsi;
            buf[e + 19..e + 21].copy_from_slice(&date.to_le_bytes());
        }
        buf
    }

    fn set_grt(buf: &mut [u8], links: &[(u8, u8)]) {
        let grt = 8 * SECTOR_SIZE;
        for &(from, to) in links {
            buf[grt + from as usize] = to;
        }
    }

    #[test]
    fn test_decode_date() {
        assert_eq!(decode_date(encode_date(5, 3, 1990)), "05-Mar-90");
        assert_eq!(decode_date(5 | (3 << 5) | (20 << 9)), "05-Mar-90");
    }

    #[test]
    fn test_decode_date_edge_cases() {
        assert_eq!(decode_date(0), "01-Jan-09");
        assert_eq!(decode_date(31 | (13 << 5) | (1 << 9)), "31-Jan-71");
        assert_eq!(decode_date(1 | (12 << 5) | (40 << 9)), "01-Dec-99");
    }

    #[test]
    fn test_grt_chain_size() {
        let grt = GroupReferenceTable::from_table(&{
            let mut t = [0u8; 256];
            t[4] = 7;
            t
        });
        let chain = grt.chain(4, &GrtPolicy::default()).unwrap();
        assert_eq!(chain, vec![4, 7]);

        let mut buf = build_image(&[(b"FILE    ", b"DAT", 4, 3, 0)]);
        buf[8 * 256 + 4] = 7;
        let mut header_spg8 = buf.clone();
        header_spg8[HDOS_HEADER_OFFSET + 7] = 8;
        let fs = HdosFileSystem::new(&header_spg8, HdosOptions::default()).unwrap();
        let entry = fs.find("FILE", "DAT").unwrap();
        assert_eq!(fs.file_sectors(&entry).unwrap(), 2 * 8 + 3);
    }

    #[test]
    fn test_chain_out_of_range_is_corrupt() {
        let mut buf = build_image(&[(b"BAD     ", b"SYS", 10, 1, 0)]);
        set_grt(&mut buf, &[(10, 2)]);
        let fs = HdosFileSystem::new(&buf, HdosOptions::default()).unwrap();
        assert!(matches!(
            fs.list_files(),
            Err(H8dError::DirectoryCorrupt(_))
        ));

        let fs = HdosFileSystem::new(
            &buf,
            HdosOptions::default().with_grt_policy(GrtPolicy {
                min_group: 2,
                max_group: 200,
            }),
        )
        .unwrap();
        assert!(fs.list_files().is_ok());
    }

    #[test]
    fn test_runaway_chain() {
        let mut buf = build_image(&[(b"LOOP    ", b"ABS", 10, 1, 0)]);
        set_grt(&mut buf, &[(10, 11), (11, 10)]);
        let fs = HdosFileSystem::new(&buf, HdosOptions::default()).unwrap();
        assert!(matches!(fs.list_files(), Err(H8dError::DirectoryCorrupt(_))));
    }

    #[test]
    fn test_list_files_sorted_and_accounted() {
        let mut buf = build_image(&[
            (b"ZAP     ", b"ABS", 20, 1, encode_date(1, 1, 1980)),
            (b"EDIT    ", b"ABS", 10, 2, encode_date(5, 3, 1990)),
            (&[0xFF; 8], b"   ", 0, 0, 0),
        ]);
        // EDIT: 10 -> 11, ZAP: 20; free list 0 -> 30 -> 31 -> 32
        set_grt(&mut buf, &[(10, 11), (0, 30), (30, 31), (31, 32)]);
        let fs = HdosFileSystem::new(&buf, HdosOptions::default()).unwrap();
        let listing = fs.list_files().unwrap();

        assert_eq!(listing.unit, SizeUnit::Sectors);
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[0].name, "EDIT    ");
        assert_eq!(listing.items[0].size, 2 * 2 + 2);
        assert_eq!(listing.items[0].created, "05-Mar-90");
        assert_eq!(listing.items[1].name, "ZAP     ");
        assert_eq!(listing.items[1].size, 2 + 1);
        assert_eq!(listing.used, 9);
        assert_eq!(listing.free, 3 * 2);
        assert_eq!(fs.label().as_deref(), Some("TEST VOLUME"));
    }

    #[test]
    fn test_linked_directory_blocks() {
        let mut buf = build_image(&[(b"FIRST   ", b"TXT", 10, 1, 0)]);
        let dir = 10 * SECTOR_SIZE;
        // link block 1 to sector 14
        buf[dir + 506 + 4..dir + 506 + 6].copy_from_slice(&14u16.to_le_bytes());
        let second = 14 * SECTOR_SIZE;
        buf[second..second + 8].copy_from_slice(b"SECOND  ");
        buf[second + 8..second + 11].copy_from_slice(b"TXT");
        buf[second + 16] = 12;
        buf[second + 18] = 1;
        // second block points back to the first
        buf[second + 506 + 4..second + 506 + 6].copy_from_slice(&10u16.to_le_bytes());

        let fs = HdosFileSystem::new(&buf, HdosOptions::default()).unwrap();
        let names: Vec<String> = fs.entries().unwrap().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["FIRST   ", "SECOND  "]);
    }

    #[test]
    fn test_extract_file() {
        let mut buf = build_image(&[(b"DATA    ", b"BIN", 10, 1, 0)]);
        set_grt(&mut buf, &[(10, 11)]);
        let group_bytes = 2 * SECTOR_SIZE;
        for (i, b) in buf[10 * group_bytes..12 * group_bytes].iter_mut().enumerate() {
            *b = (i / SECTOR_SIZE) as u8 + 1;
        }

        let fs = HdosFileSystem::new(&buf, HdosOptions::default()).unwrap();
        let data = fs.extract_file("data", "bin").unwrap();
        assert_eq!(data.len(), 5 * SECTOR_SIZE);
        assert_eq!(&data[..4 * SECTOR_SIZE], &buf[10 * group_bytes..12 * group_bytes]);
        assert!(data[4 * SECTOR_SIZE..].iter().all(|&b| b == 3));
        assert!(matches!(
            fs.extract_file("NOPE", "BIN"),
            Err(H8dError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            HdosVolumeHeader::parse(&[0u8; 0x910], LabelLength::Standard),
            Err(H8dError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_header_pointers_validated() {
        let mut buf = build_image(&[]);
        buf[HDOS_HEADER_OFFSET + 5..HDOS_HEADER_OFFSET + 7].copy_from_slice(&900u16.to_le_bytes());
        assert!(matches!(
            HdosFileSystem::new(&buf, HdosOptions::default()),
            Err(H8dError::DirectoryCorrupt(_))
        ));
    }

    #[test]
    fn test_extended_label() {
        let buf = build_image(&[]);
        let header = HdosVolumeHeader::parse(&buf, LabelLength::Extended).unwrap();
        assert_eq!(header.label.len(), 68);
        assert_eq!(header.disk_type(), DiskType::OneSide40);
        assert_eq!(header.serial, 42);
    }
}
