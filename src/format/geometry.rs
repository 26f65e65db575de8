/// Drive geometry codes and image length classification

use crate::format::constants::{bytes_to_size_code, SECTORS_PER_TRACK, SECTOR_SIZE};
use std::fmt;

/// Two-bit disk type code used by the imager firmware and the HDOS flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskType {
    /// Single-sided, 40 tracks
    OneSide40,
    /// Double-sided, 40 tracks
    TwoSide40,
    /// Single-sided, 80 tracks
    OneSide80,
    /// Double-sided, 80 tracks
    TwoSide80,
}

impl DiskType {
    /// All disk types in code order
    pub const ALL: [DiskType; 4] = [
        DiskType::OneSide40,
        DiskType::TwoSide40,
        DiskType::OneSide80,
        DiskType::TwoSide80,
    ];

    /// Decode a two-bit geometry code (higher bits are ignored)
    pub fn from_code(code: u8) -> Self {
        match code & 0x03 {
            0 => DiskType::OneSide40,
            1 => DiskType::TwoSide40,
            2 => DiskType::OneSide80,
            _ => DiskType::TwoSide80,
        }
    }

    /// Build from side and track counts
    pub fn from_layout(sides: u8, tracks: u8) -> Self {
        match (sides >= 2, tracks >= 80) {
            (false, false) => DiskType::OneSide40,
            (true, false) => DiskType::TwoSide40,
            (false, true) => DiskType::OneSide80,
            (true, true) => DiskType::TwoSide80,
        }
    }

    /// Decode the firmware command byte `'4'..='7'`
    pub fn from_command(byte: u8) -> Option<Self> {
        match byte {
            b'4'..=b'7' => Some(Self::from_code(byte - b'4')),
            _ => None,
        }
    }

    /// Two-bit geometry code
    pub fn code(&self) -> u8 {
        match self {
            DiskType::OneSide40 => 0,
            DiskType::TwoSide40 => 1,
            DiskType::OneSide80 => 2,
            DiskType::TwoSide80 => 3,
        }
    }

    /// Command byte selecting this geometry on the client
    pub fn command(&self) -> u8 {
        b'4' + self.code()
    }

    /// Number of sides
    pub fn sides(&self) -> u8 {
        match self {
            DiskType::OneSide40 | DiskType::OneSide80 => 1,
            DiskType::TwoSide40 | DiskType::TwoSide80 => 2,
        }
    }

    /// Tracks per side
    pub fn tracks_per_side(&self) -> u8 {
        match self {
            DiskType::OneSide40 | DiskType::TwoSide40 => 40,
            DiskType::OneSide80 | DiskType::TwoSide80 => 80,
        }
    }

    /// Tracks transferred for a whole disk (tracks x sides)
    pub fn total_tracks(&self) -> usize {
        self.tracks_per_side() as usize * self.sides() as usize
    }

    /// True for geometries that need the high-capacity (SY1) drive
    pub fn is_high_capacity(&self) -> bool {
        *self != DiskType::OneSide40
    }

    /// Drive the baseline firmware expects this geometry on (SY0 or SY1)
    pub fn preferred_drive(&self) -> u8 {
        match self {
            DiskType::OneSide40 | DiskType::TwoSide40 => 0,
            DiskType::OneSide80 | DiskType::TwoSide80 => 1,
        }
    }

    /// Image length of a hard-sectored disk with this geometry
    pub fn h17_image_len(&self) -> usize {
        self.total_tracks() * SECTORS_PER_TRACK * SECTOR_SIZE
    }

    /// Short name such as `2S40T`
    pub fn name(&self) -> &'static str {
        match self {
            DiskType::OneSide40 => "1S40T",
            DiskType::TwoSide40 => "2S40T",
            DiskType::OneSide80 => "1S80T",
            DiskType::TwoSide80 => "2S80T",
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tie-break for an image length shared by 2S40T and 1S80T
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryPolicy {
    /// 204,800 bytes is read as a double-sided 40 track disk
    #[default]
    PreferTwoSided40,
    /// 204,800 bytes is read as a single-sided 80 track disk
    PreferOneSided80,
}

impl GeometryPolicy {
    /// Classify a raw hard-sectored image by its length
    pub fn classify(&self, image_len: usize) -> Option<DiskType> {
        let ambiguous = DiskType::TwoSide40.h17_image_len();
        if image_len == ambiguous {
            return Some(match self {
                GeometryPolicy::PreferTwoSided40 => DiskType::TwoSide40,
                GeometryPolicy::PreferOneSided80 => DiskType::OneSide80,
            });
        }
        DiskType::ALL
            .iter()
            .copied()
            .find(|t| t.h17_image_len() == image_len)
    }
}

/// Recording density
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Density {
    /// Single density
    #[default]
    Fm,
    /// Double density
    Mfm,
}

impl Density {
    /// Decode the density byte sent by the extended controller
    pub fn from_byte(byte: u8) -> Self {
        if byte == 0x04 {
            Density::Mfm
        } else {
            Density::Fm
        }
    }

    /// Density byte understood by the extended controller
    pub fn to_byte(&self) -> u8 {
        match self {
            Density::Fm => 0x00,
            Density::Mfm => 0x04,
        }
    }

    /// Name as written in the geometry trailer
    pub fn name(&self) -> &'static str {
        match self {
            Density::Fm => "FM",
            Density::Mfm => "MFM",
        }
    }
}

/// Full track layout of a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Sides and tracks
    pub disk_type: DiskType,
    /// Sectors per track
    pub sectors_per_track: u8,
    /// Sector size in bytes
    pub sector_size: u16,
    /// Recording density
    pub density: Density,
}

impl Geometry {
    /// Hard-sectored H17 layout (10 x 256 byte sectors, FM)
    pub fn h17(disk_type: DiskType) -> Self {
        Self {
            disk_type,
            sectors_per_track: SECTORS_PER_TRACK as u8,
            sector_size: SECTOR_SIZE as u16,
            density: Density::Fm,
        }
    }

    /// Bytes per track
    pub fn track_size(&self) -> usize {
        self.sectors_per_track as usize * self.sector_size as usize
    }

    /// Controller size code for the sector size
    pub fn size_code(&self) -> u8 {
        bytes_to_size_code(self.sector_size as usize)
    }

    /// Tracks transferred for a whole disk
    pub fn total_tracks(&self) -> usize {
        self.disk_type.total_tracks()
    }

    /// Expected image length without trailer
    pub fn image_len(&self) -> usize {
        self.total_tracks() * self.track_size()
    }

    /// Set the disk type
    pub fn with_disk_type(mut self, disk_type: DiskType) -> Self {
        self.disk_type = disk_type;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        for t in DiskType::ALL {
            assert_eq!(DiskType::from_code(t.code()), t);
            assert_eq!(DiskType::from_command(t.command()), Some(t));
        }
        assert_eq!(DiskType::TwoSide40.command(), b'5');
        assert_eq!(DiskType::from_command(b'Q'), None);
    }

    #[test]
    fn test_track_counts() {
        assert_eq!(DiskType::OneSide40.total_tracks(), 40);
        assert_eq!(DiskType::TwoSide40.total_tracks(), 80);
        assert_eq!(DiskType::OneSide80.total_tracks(), 80);
        assert_eq!(DiskType::TwoSide80.total_tracks(), 160);
    }

    #[test]
    fn test_classify_tie_break() {
        let len = 2560 * 80;
        assert_eq!(
            GeometryPolicy::PreferTwoSided40.classify(len),
            Some(DiskType::TwoSide40)
        );
        assert_eq!(
            GeometryPolicy::PreferOneSided80.classify(len),
            Some(DiskType::OneSide80)
        );
        assert_eq!(
            GeometryPolicy::default().classify(2560 * 160),
            Some(DiskType::TwoSide80)
        );
        assert_eq!(GeometryPolicy::default().classify(102400), Some(DiskType::OneSide40));
        assert_eq!(GeometryPolicy::default().classify(1234), None);
    }

    #[test]
    fn test_geometry_sizes() {
        let g = Geometry::h17(DiskType::TwoSide80);
        assert_eq!(g.track_size(), 2560);
        assert_eq!(g.image_len(), 409600);
        assert_eq!(g.size_code(), 1);
    }
}
