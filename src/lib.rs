/*!
# h8dmanager

A Rust library for cataloguing Heathkit H8/H89 disk images and transferring
them to and from real drives over a serial link.

## Features

- Detect HDOS and CP/M volumes on raw `.H8D` and extended `.H37` images
- List directories with sizes and free space, extract files
- Batch catalogs rendered as text or HTML
- Canonical file names derived from volume labels and image checksums
- Serial imager protocol: query, read, write and format disks

## Quick Start

```rust,no_run
use h8dmanager::{catalog, render_text, select_working_folder, load_images, HdosOptions};

let paths = select_working_folder("disks")?;
let images = load_images(&paths);
let records = catalog(&images, &HdosOptions::default());
print!("{}", render_text(&records));
# Ok::<(), h8dmanager::H8dError>(())
```

Reading a disk from the imager client:

```rust,no_run
use h8dmanager::serial::BaudRate;
use h8dmanager::{Session, SessionConfig};

let mut session = Session::open("/dev/ttyUSB0", BaudRate::B9600, SessionConfig::default())?;
session.connect()?;
let result = session.read_disk()?;
std::fs::write("disk.h8d", &result.image)?;
# Ok::<(), h8dmanager::H8dError>(())
```

## Modules

- `format`: geometry codes, skew tables and format detection
- `image`: image container and the extended geometry trailer
- `filesystem`: HDOS and CP/M directory readers
- `catalog`: batch catalogs and their rendering
- `rename`: volume labels and canonical file names
- `serial`: imager protocol over a serial link
- `map`: allocation maps and hex dumps
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Batch catalogs
pub mod catalog;
/// Error types and Result alias
pub mod error;
/// HDOS and CP/M filesystems
pub mod filesystem;
/// Geometry codes, constants and format detection
pub mod format;
/// Image container
pub mod image;
/// Allocation maps and hex dumps
pub mod map;
/// Volume labels and canonical file names
pub mod rename;
/// Serial imager protocol
pub mod serial;

// Re-export common types
pub use catalog::{
    catalog, extract_file, load_images, render_html, render_text, search, select_working_folder,
    CatalogRecord, CatalogStats, RecordKind,
};
pub use error::{H8dError, Result};
pub use filesystem::{
    mount, CpmFileSystem, DiskContentItem, FileSystem, GrtPolicy, HdosFileSystem, HdosOptions,
    LabelLength, SizeUnit, VolumeListing,
};
pub use format::{detect_kind, Density, DiskType, FilesystemKind, Geometry, GeometryPolicy};
pub use image::{DiskImage, GeometryDescriptor};
pub use map::{hex_dump, AllocationMap};
pub use rename::{rename_all, suggested_save_name, volume_label, RenameNormalizer};
pub use serial::{
    AbortHandle, ControllerVariant, QueryReply, ReadResult, Session, SessionConfig, SessionState,
    WaitPolicy,
};
