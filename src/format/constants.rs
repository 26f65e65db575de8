/// H8D image layout constants

/// Bytes per physical sector on hard-sectored H17 media
pub const SECTOR_SIZE: usize = 256;

/// Sectors per track on hard-sectored H17 media
pub const SECTORS_PER_TRACK: usize = 10;

/// Bytes per track on hard-sectored H17 media
pub const TRACK_SIZE: usize = SECTOR_SIZE * SECTORS_PER_TRACK;

/// Interleave used by HDOS and CP/M on H17 media
pub const H17_INTERLEAVE: usize = 4;

/// Number of leading bytes inspected for a boot signature
pub const SIGNATURE_LEN: usize = 4;

/// Offset of the HDOS volume header (sector 9)
pub const HDOS_HEADER_OFFSET: usize = 0x900;

/// Offset of the HDOS volume serial number
pub const HDOS_SERIAL_OFFSET: usize = HDOS_HEADER_OFFSET;

/// Offset of the HDOS volume flags byte (geometry code in bits 0-1)
pub const HDOS_FLAGS_OFFSET: usize = 0x910;

/// Offset of the HDOS volume label
pub const HDOS_LABEL_OFFSET: usize = 0x911;

/// Size of the Group Reference Table
pub const HDOS_GRT_SIZE: usize = 256;

/// Size of one HDOS directory entry
pub const HDOS_DIR_ENTRY_SIZE: usize = 23;

/// Directory entries between block headers
pub const HDOS_ENTRIES_PER_BLOCK: usize = 22;

/// Size of the trailer closing each HDOS directory block
pub const HDOS_DIR_BLOCK_TRAILER: usize = 6;

/// Start of the CP/M directory on H17 media (track 3, sector 0)
pub const CPM_DIR_OFFSET: usize = 0x1E00;

/// First track of the CP/M data area
pub const CPM_SYSTEM_TRACKS: usize = 3;

/// Size of one CP/M directory entry
pub const CPM_DIR_ENTRY_SIZE: usize = 32;

/// CP/M logical record size
pub const CPM_RECORD_SIZE: usize = 128;

/// Records in one full CP/M extent
pub const CPM_RECORDS_PER_EXTENT: usize = 0x80;

/// Status / filename byte of an erased CP/M entry
pub const CPM_ERASED: u8 = 0xE5;

/// Length of the extended-format geometry trailer
pub const DESCRIPTOR_LEN: usize = 32;

/// Known HDOS boot sector signatures
pub const HDOS_SIGNATURES: [(&str, [u8; 4]); 6] = [
    ("HDOS 1.x", [0xAF, 0xD3, 0x7D, 0xCD]),
    ("HDOS 2.x", [0xC3, 0xA0, 0x22, 0x20]),
    ("HDOS 3.x", [0xC3, 0xA0, 0x22, 0x30]),
    ("HDOS 2.x Super-89", [0xC3, 0x1D, 0x24, 0x20]),
    ("OMDOS", [0x18, 0x1E, 0x13, 0x20]),
    ("OMDOS", [0xC3, 0xD1, 0x23, 0x20]),
];

/// Month abbreviations used by HDOS dates
pub const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Convert a controller sector size code to bytes
#[inline]
pub fn size_code_to_bytes(code: u8) -> usize {
    match code {
        0 => 128,
        1 => 256,
        2 => 512,
        _ => 1024,
    }
}

/// Convert a sector size in bytes to a controller size code
#[inline]
pub fn bytes_to_size_code(bytes: usize) -> u8 {
    match bytes {
        128 => 0,
        256 => 1,
        512 => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_size() {
        assert_eq!(TRACK_SIZE, 2560);
        assert_eq!(HDOS_ENTRIES_PER_BLOCK * HDOS_DIR_ENTRY_SIZE + HDOS_DIR_BLOCK_TRAILER, 512);
    }

    #[test]
    fn test_size_codes() {
        for code in 0..4 {
            assert_eq!(bytes_to_size_code(size_code_to_bytes(code)), code);
        }
        assert_eq!(size_code_to_bytes(7), 1024);
    }
}
