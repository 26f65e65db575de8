/// Geometry trailer appended to extended-format (H37) images
///
/// The trailer is 32 ASCII bytes such as `SPT=16 SSZ=0256 TRK=40 SID=2 MFM`,
/// padded with spaces when the density name is shorter.

use crate::error::{H8dError, Result};
use crate::format::constants::{DESCRIPTOR_LEN, SECTORS_PER_TRACK, SECTOR_SIZE};
use crate::format::{Density, DiskType, Geometry, GeometryPolicy};
use std::fmt;

/// Parsed geometry trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryDescriptor {
    /// Sectors per track
    pub sectors_per_track: u8,
    /// Sector size in bytes
    pub sector_size: u16,
    /// Tracks per side
    pub tracks: u8,
    /// Number of sides
    pub sides: u8,
    /// Recording density
    pub density: Density,
}

impl GeometryDescriptor {
    /// Descriptor for a full geometry
    pub fn from_geometry(geometry: &Geometry) -> Self {
        Self {
            sectors_per_track: geometry.sectors_per_track,
            sector_size: geometry.sector_size,
            tracks: geometry.disk_type.tracks_per_side(),
            sides: geometry.disk_type.sides(),
            density: geometry.density,
        }
    }

    /// Synthesize a descriptor for a plain hard-sectored image
    ///
    /// Used when an `.H8D` image is written through the extended controller.
    /// Returns `None` when the length matches no known geometry.
    pub fn for_h17_image(image_len: usize, policy: GeometryPolicy) -> Option<Self> {
        let disk_type = policy.classify(image_len)?;
        Some(Self {
            sectors_per_track: SECTORS_PER_TRACK as u8,
            sector_size: SECTOR_SIZE as u16,
            tracks: disk_type.tracks_per_side(),
            sides: disk_type.sides(),
            density: Density::Fm,
        })
    }

    /// Parse a trailer
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| H8dError::invalid_format("geometry trailer is not ASCII"))?;
        let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());

        let mut spt = None;
        let mut ssz = None;
        let mut trk = None;
        let mut sid = None;
        let mut density = Density::Fm;

        for field in text.split_whitespace() {
            match field.split_once('=') {
                Some(("SPT", v)) => spt = v.parse::<u8>().ok(),
                Some(("SSZ", v)) => ssz = v.parse::<u16>().ok(),
                Some(("TRK", v)) => trk = v.parse::<u8>().ok(),
                Some(("SID", v)) => sid = v.parse::<u8>().ok(),
                None if field == "MFM" => density = Density::Mfm,
                None if field == "FM" => density = Density::Fm,
                _ => {
                    return Err(H8dError::invalid_format(format!(
                        "unknown geometry field '{}'",
                        field
                    )))
                }
            }
        }

        match (spt, ssz, trk, sid) {
            (Some(sectors_per_track), Some(sector_size), Some(tracks), Some(sides)) => Ok(Self {
                sectors_per_track,
                sector_size,
                tracks,
                sides,
                density,
            }),
            _ => Err(H8dError::invalid_format(format!(
                "incomplete geometry trailer '{}'",
                text
            ))),
        }
    }

    /// Parse the trailer at the end of an image, if one is present
    pub fn from_image_tail(image: &[u8]) -> Option<Self> {
        if image.len() < DESCRIPTOR_LEN {
            return None;
        }
        let tail = &image[image.len() - DESCRIPTOR_LEN..];
        if !tail.starts_with(b"SPT=") {
            return None;
        }
        Self::parse(tail).ok()
    }

    /// Encode as exactly 32 bytes
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut out = [b' '; DESCRIPTOR_LEN];
        let text = self.to_string();
        let len = text.len().min(DESCRIPTOR_LEN);
        out[..len].copy_from_slice(&text.as_bytes()[..len]);
        out
    }

    /// Geometry described by the trailer
    pub fn geometry(&self) -> Geometry {
        Geometry {
            disk_type: DiskType::from_layout(self.sides, self.tracks),
            sectors_per_track: self.sectors_per_track,
            sector_size: self.sector_size,
            density: self.density,
        }
    }
}

impl fmt::Display for GeometryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SPT={:02} SSZ={:04} TRK={:02} SID={} {}",
            self.sectors_per_track,
            self.sector_size,
            self.tracks,
            self.sides,
            self.density.name()
        )
    }
}
