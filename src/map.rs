/// Allocation map and hex dump visualization

use crate::error::{H8dError, Result};
use crate::filesystem::{CpmFileSystem, HdosFileSystem, HdosOptions};
use crate::format::constants::{HDOS_GRT_SIZE, SECTOR_SIZE};
use crate::format::FilesystemKind;
use crate::image::DiskImage;
use std::fmt::Write;

/// ANSI color codes for the allocation map
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const DARK_RED: &str = "\x1b[2;31m";
}

const BLOCK_NO_DATA: &str = "\u{2591}"; // ░
const BLOCK_HAS_DATA: &str = "\u{2593}"; // ▓
const BLOCK_SYSTEM: &str = "\u{2588}"; // █

/// Cells per map row
const MAP_WIDTH: usize = 64;

/// Bytes per hex dump line
const DUMP_WIDTH: usize = 32;

/// State of one allocation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// On the free list (HDOS) or not claimed by any extent (CP/M)
    Free,
    /// Owned by the file at this index in `AllocationMap::files`
    File(usize),
    /// Boot, directory or other system area
    System,
    /// Neither free nor owned by a file (HDOS only)
    Lost,
}

/// Allocation of every group (HDOS) or block (CP/M) of a volume
#[derive(Debug, Clone)]
pub struct AllocationMap {
    /// Filesystem mapped
    pub kind: FilesystemKind,
    /// `group` or `block`
    pub unit: &'static str,
    /// Bytes per allocation unit
    pub unit_bytes: usize,
    /// State of each unit
    pub cells: Vec<Allocation>,
    /// File names, indexed by `Allocation::File`
    pub files: Vec<String>,
}

impl AllocationMap {
    /// Build the map of an image
    pub fn from_image(image: &DiskImage, options: &HdosOptions) -> Result<Self> {
        match image.kind() {
            FilesystemKind::Hdos => Self::hdos(image.data(), options),
            FilesystemKind::Cpm => Self::cpm(image.data()),
            FilesystemKind::Unknown => Err(H8dError::invalid_format(format!(
                "{} is too short to map",
                image.title()
            ))),
        }
    }

    fn hdos(buf: &[u8], options: &HdosOptions) -> Result<Self> {
        let fs = HdosFileSystem::new(buf, options.clone())?;
        let unit_bytes = fs.header().group_bytes();
        let groups = (buf.len() / unit_bytes).min(HDOS_GRT_SIZE);

        let mut cells: Vec<Allocation> = (0..groups)
            .map(|g| {
                if options.grt.contains(g as u8) {
                    Allocation::Lost
                } else {
                    Allocation::System
                }
            })
            .collect();
        for group in fs.grt().free_list()? {
            if let Some(cell) = cells.get_mut(group as usize) {
                *cell = Allocation::Free;
            }
        }
        for (group, owner) in fs.group_owners()?.into_iter().enumerate() {
            if let (Some(idx), Some(cell)) = (owner, cells.get_mut(group)) {
                *cell = Allocation::File(idx);
            }
        }

        let files = fs
            .entries()?
            .iter()
            .map(|e| format!("{}.{}", e.name().trim(), e.ext().trim()))
            .collect();

        Ok(Self {
            kind: FilesystemKind::Hdos,
            unit: "group",
            unit_bytes,
            cells,
            files,
        })
    }

    fn cpm(buf: &[u8]) -> Result<Self> {
        let fs = CpmFileSystem::new(buf)?;
        let params = fs.params();
        let dir_blocks = (params.dir_sectors * SECTOR_SIZE).div_ceil(params.block_size);

        let cells = fs
            .block_owners()
            .into_iter()
            .enumerate()
            .map(|(block, owner)| match owner {
                _ if block < dir_blocks => Allocation::System,
                Some(idx) => Allocation::File(idx),
                None => Allocation::Free,
            })
            .collect();
        let files = fs
            .files()
            .iter()
            .map(|f| format!("{}.{}", f.name().trim(), f.ext().trim()))
            .collect();

        Ok(Self {
            kind: FilesystemKind::Cpm,
            unit: "block",
            unit_bytes: params.block_size,
            cells,
            files,
        })
    }

    /// Number of units in a given state
    pub fn count(&self, state: impl Fn(&Allocation) -> bool) -> usize {
        self.cells.iter().filter(|c| state(c)).count()
    }

    /// Units owned by a file
    pub fn units_of(&self, file: usize) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Allocation::File(file))
            .map(|(i, _)| i)
            .collect()
    }

    /// Render the map, 64 units per row, optionally with ANSI colors
    pub fn render(&self, color: bool) -> String {
        let mut out = String::new();
        let paint = |code: &str, block: &str| {
            if color {
                format!("{}{}{}", code, block, colors::RESET)
            } else {
                block.to_string()
            }
        };

        let _ = writeln!(
            out,
            "=== {} allocation map ({} {}s of {} bytes) ===",
            self.kind,
            self.cells.len(),
            self.unit,
            self.unit_bytes
        );
        let _ = writeln!(
            out,
            "Legend: {} In Use {} Free {} System {} Lost",
            paint(colors::BRIGHT_WHITE, BLOCK_HAS_DATA),
            paint(colors::DARK_WHITE, BLOCK_NO_DATA),
            paint(colors::BRIGHT_YELLOW, BLOCK_SYSTEM),
            paint(colors::DARK_RED, BLOCK_HAS_DATA),
        );

        for (row, chunk) in self.cells.chunks(MAP_WIDTH).enumerate() {
            let _ = write!(out, "{:>4} ", row * MAP_WIDTH);
            for cell in chunk {
                out.push_str(&match cell {
                    Allocation::File(_) => paint(colors::BRIGHT_WHITE, BLOCK_HAS_DATA),
                    Allocation::Free => paint(colors::DARK_WHITE, BLOCK_NO_DATA),
                    Allocation::System => paint(colors::BRIGHT_YELLOW, BLOCK_SYSTEM),
                    Allocation::Lost => paint(colors::DARK_RED, BLOCK_HAS_DATA),
                });
            }
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "{} files, {} used, {} free, {} lost",
            self.files.len(),
            self.count(|c| matches!(c, Allocation::File(_))),
            self.count(|c| *c == Allocation::Free),
            self.count(|c| *c == Allocation::Lost)
        );
        out
    }
}

/// Print the allocation map of an image
pub fn draw_allocation_map(image: &DiskImage, options: &HdosOptions) -> Result<()> {
    let map = AllocationMap::from_image(image, options)?;
    print!("{}", map.render(true));
    Ok(())
}

/// Classic hex dump: offset, 32 hex bytes, 32 printable characters
///
/// Every eighth byte within a line is preceded by `.` instead of a space.
pub fn hex_dump(data: &[u8], base: usize) -> String {
    let mut out = String::with_capacity(data.len() * 4);

    for (line, chunk) in data.chunks(DUMP_WIDTH).enumerate() {
        let _ = write!(out, "{:04X}: ", base + line * DUMP_WIDTH);
        for (i, byte) in chunk.iter().enumerate() {
            if i > 0 {
                out.push(if i % 8 == 0 { '.' } else { ' ' });
            }
            let _ = write!(out, "{:02X}", byte);
        }
        for i in chunk.len()..DUMP_WIDTH {
            out.push_str(if i > 0 { "   " } else { "  " });
        }
        out.push_str("  ");
        for &byte in chunk {
            out.push(if (0x20..0x7F).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}
