/// Imager command bytes and reply decoding

use crate::error::{H8dError, Result};
use crate::format::constants::size_code_to_bytes;
use crate::format::{Density, DiskType};
use std::fmt;

/// Handshake closing a track that was read with errors
pub const BAD_TRACK: u8 = b'r';

/// Length of the extended controller's track header reply
pub const TRACK_HEADER_LEN: usize = 11;

/// Length of the extended read prefix (length lo, length hi, sectors)
pub const READ_PREFIX_LEN: usize = 3;

/// Single-byte commands sent from host to client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `?` liveness check, also the abort byte
    Liveness,
    /// `3` asks whether the client is the extended (H37) imager
    ProbeExtended,
    /// `0`/`1` select drive SY0/SY1
    SelectDrive(u8),
    /// `A`/`B` select side 0/1
    SelectSide(u8),
    /// `4`..`7` set the disk geometry
    SetGeometry(DiskType),
    /// `Q` query the inserted disk
    Query,
    /// `R` read the next track
    ReadTrack,
    /// `W` write the next track
    WriteTrack,
    /// `V` set the volume number (followed by the number)
    SetVolume,
    /// `T` read a track header (followed by the track number)
    ReadHeader,
    /// `E` examine a raw track (followed by the track number)
    ExamineTrack,
    /// `F` format the disk (followed by spt, size code, density)
    Format,
    /// `9` switch to 9600 baud
    Baud9600,
    /// `(` switch to 19200 baud
    Baud19200,
    /// `S` save the uploaded loader to disk
    SaveLoader,
}

impl Command {
    /// Wire byte
    pub fn byte(&self) -> u8 {
        match self {
            Command::Liveness => b'?',
            Command::ProbeExtended => b'3',
            Command::SelectDrive(drive) => b'0' + (drive & 1),
            Command::SelectSide(side) => b'A' + (side & 1),
            Command::SetGeometry(disk_type) => disk_type.command(),
            Command::Query => b'Q',
            Command::ReadTrack => b'R',
            Command::WriteTrack => b'W',
            Command::SetVolume => b'V',
            Command::ReadHeader => b'T',
            Command::ExamineTrack => b'E',
            Command::Format => b'F',
            Command::Baud9600 => b'9',
            Command::Baud19200 => b'(',
            Command::SaveLoader => b'S',
        }
    }

    /// Decode a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        let command = match byte {
            b'?' => Command::Liveness,
            b'3' => Command::ProbeExtended,
            b'0' | b'1' => Command::SelectDrive(byte - b'0'),
            b'A' | b'B' => Command::SelectSide(byte - b'A'),
            b'4'..=b'7' => Command::SetGeometry(DiskType::from_command(byte)?),
            b'Q' => Command::Query,
            b'R' => Command::ReadTrack,
            b'W' => Command::WriteTrack,
            b'V' => Command::SetVolume,
            b'T' => Command::ReadHeader,
            b'E' => Command::ExamineTrack,
            b'F' => Command::Format,
            b'9' => Command::Baud9600,
            b'(' => Command::Baud19200,
            b'S' => Command::SaveLoader,
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.byte() as char)
    }
}

/// Serial speeds the client can switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    /// 9600 baud
    B9600,
    /// 19200 baud
    B19200,
}

impl BaudRate {
    /// Command selecting this speed
    pub fn command(&self) -> Command {
        match self {
            BaudRate::B9600 => Command::Baud9600,
            BaudRate::B19200 => Command::Baud19200,
        }
    }

    /// Bits per second
    pub fn bps(&self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
        }
    }
}

/// Track header reported by the extended controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackHeader {
    /// Sectors per track
    pub sectors: u8,
    /// Track number from the sector ID
    pub track: u8,
    /// Side from the sector ID
    pub side: u8,
    /// Sector number from the sector ID
    pub sector: u8,
    /// Sector size in bytes
    pub sector_size: u16,
    /// ID field CRC
    pub crc: [u8; 2],
    /// Number of sides
    pub sides: u8,
    /// Track length in bytes
    pub track_len: u16,
    /// Recording density
    pub density: Density,
}

impl TrackHeader {
    /// Decode the 11-byte reply
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TRACK_HEADER_LEN {
            return Err(H8dError::too_short(TRACK_HEADER_LEN, bytes.len()));
        }
        Ok(Self {
            sectors: bytes[0],
            track: bytes[1],
            side: bytes[2],
            sector: bytes[3],
            sector_size: size_code_to_bytes(bytes[4]) as u16,
            crc: [bytes[5], bytes[6]],
            sides: bytes[7],
            track_len: u16::from_le_bytes([bytes[8], bytes[9]]),
            density: Density::from_byte(bytes[10]),
        })
    }
}

impl fmt::Display for TrackHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SPT={} TRK={} SEC={} SIDE={} NSIDES={} SECSIZE={} TRKSIZE={} DENS={}",
            self.sectors,
            self.track,
            self.sector,
            self.side,
            self.sides,
            self.sector_size,
            self.track_len,
            self.density.name()
        )
    }
}

/// Reply to a `Q` query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryReply {
    /// Baseline controller: geometry code of the inserted disk
    DiskType(DiskType),
    /// Extended controller: header of the first track
    Header(TrackHeader),
}

/// Track layouts the extended controller can format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPreset {
    /// Sectors per track
    pub sectors: u8,
    /// Controller sector size code
    pub size_code: u8,
}

impl FormatPreset {
    /// Supported layouts: 5x1024, 8x512, 9x512, 10x256, 16x256
    pub const ALL: [FormatPreset; 5] = [
        FormatPreset { sectors: 5, size_code: 3 },
        FormatPreset { sectors: 8, size_code: 2 },
        FormatPreset { sectors: 9, size_code: 2 },
        FormatPreset { sectors: 10, size_code: 1 },
        FormatPreset { sectors: 16, size_code: 1 },
    ];

    /// Preset for a sector count
    pub fn for_sectors(sectors: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.sectors == sectors)
    }

    /// Sector size in bytes
    pub fn sector_size(&self) -> usize {
        size_code_to_bytes(self.size_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        for byte in b"?30AB4567QRWVTEF9(S1".iter().copied() {
            let command = Command::from_byte(byte).unwrap();
            assert_eq!(command.byte(), byte);
        }
        assert_eq!(Command::from_byte(b'Z'), None);
        assert_eq!(
            Command::SetGeometry(DiskType::TwoSide80).byte(),
            b'7'
        );
    }

    #[test]
    fn test_track_header() {
        let header =
            TrackHeader::parse(&[16, 2, 1, 1, 1, 0xAB, 0xCD, 2, 0x00, 0x10, 0x04]).unwrap();
        assert_eq!(header.sectors, 16);
        assert_eq!(header.sector_size, 256);
        assert_eq!(header.track_len, 4096);
        assert_eq!(header.density, Density::Mfm);
        assert!(header.to_string().contains("DENS=MFM"));
        assert!(TrackHeader::parse(&[0; 5]).is_err());
    }

    #[test]
    fn test_format_presets() {
        assert_eq!(FormatPreset::for_sectors(5).unwrap().sector_size(), 1024);
        assert_eq!(FormatPreset::for_sectors(16).unwrap().size_code, 1);
        assert!(FormatPreset::for_sectors(7).is_none());
    }
}
