/// Integration tests for h8dmanager

use h8dmanager::serial::ScriptedLink;
use h8dmanager::*;
use proptest::prelude::*;
use std::path::PathBuf;

const GRT: usize = 8 * 256;
const DIR: usize = 10 * 256;

/// Single-sided 40 track HDOS image: volume 7, two groups per sector pair
fn hdos_image(label: &str, files: &[(&str, &str, &[u8], u8)]) -> Vec<u8> {
    let mut buf = vec![0u8; 102400];
    buf[..4].copy_from_slice(&[0xC3, 0xA0, 0x22, 0x20]);
    buf[0x900] = 7;
    buf[0x903..0x905].copy_from_slice(&10u16.to_le_bytes());
    buf[0x905..0x907].copy_from_slice(&8u16.to_le_bytes());
    buf[0x907] = 2;
    buf[0x911..0x911 + 60].fill(b' ');
    buf[0x911..0x911 + label.len()].copy_from_slice(label.as_bytes());

    for (i, (name, ext, groups, lsi)) in files.iter().enumerate() {
        let e = DIR + i * 23;
        buf[e..e + 8].copy_from_slice(format!("{:<8}", name).as_bytes());
        buf[e + 8..e + 11].copy_from_slice(format!("{:<3}", ext).as_bytes());
        buf[e + 16] = groups[0];
        buf[e + 18] = *lsi;
        for pair in groups.windows(2) {
            buf[GRT + pair[0] as usize] = pair[1];
        }
        for &g in groups.iter() {
            let start = g as usize * 512;
            buf[start..start + 512].fill(b'A' + i as u8);
        }
    }
    buf
}

/// Single-sided 40 track CP/M image with raw directory entries
fn cpm_image(entries: &[(&str, &str, u8, u8, &[u8])]) -> Vec<u8> {
    let mut buf = vec![0xE5u8; 102400];
    for (i, (name, ext, extent, rc, blocks)) in entries.iter().enumerate() {
        let at = 0x1E00 + i * 32;
        let e = &mut buf[at..at + 32];
        e[0] = 0;
        e[1..9].copy_from_slice(format!("{:<8}", name).as_bytes());
        e[9..12].copy_from_slice(format!("{:<3}", ext).as_bytes());
        e[12] = *extent;
        e[13] = 0;
        e[14] = 0;
        e[15] = *rc;
        e[16..32].fill(0);
        e[16..16 + blocks.len()].copy_from_slice(blocks);
    }
    buf
}

#[test]
fn test_hdos_listing_and_extract() {
    let buf = hdos_image("SYSTEM DISK", &[("EDIT", "ABS", &[10, 11], 1), ("PIP", "ABS", &[30], 2)]);
    let image = DiskImage::from_bytes(buf, "SYS");
    assert_eq!(image.kind(), FilesystemKind::Hdos);

    let fs = mount(&image, &HdosOptions::default()).expect("mount");
    assert_eq!(fs.label().as_deref(), Some("SYSTEM DISK"));
    let listing = fs.list_files().expect("list");
    assert_eq!(listing.unit, SizeUnit::Sectors);
    let sizes: Vec<(String, u32)> = listing
        .items
        .iter()
        .map(|i| (i.name.trim().to_string(), i.size))
        .collect();
    assert_eq!(sizes, vec![("EDIT".to_string(), 5), ("PIP".to_string(), 4)]);
    assert_eq!(listing.used, 9);

    let data = extract_file(&image, "edit", "abs", &HdosOptions::default()).expect("extract");
    assert_eq!(data.len(), 5 * 256);
    assert!(data.iter().all(|&b| b == b'A'));
    assert!(matches!(
        extract_file(&image, "MISSING", "ABS", &HdosOptions::default()),
        Err(H8dError::FileNotFound(_))
    ));
}

#[test]
fn test_cpm_listing() {
    let buf = cpm_image(&[
        ("STAT", "COM", 0, 0x80, &[2, 3, 4, 5, 6, 7, 8, 9]),
        ("STAT", "COM", 1, 0x10, &[10]),
        ("ED", "COM", 0, 0x20, &[11, 12]),
    ]);
    let image = DiskImage::from_bytes(buf, "CPM");
    let records = catalog(&[image], &HdosOptions::default());
    let text: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(
        text,
        vec![
            "CPM",
            "ED      .COM 0004K",
            "STAT    .COM 0009K",
            "USED=0011K FREE=0079K",
        ]
    );
}

#[test]
fn test_folder_catalog_and_rename() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = dir.path().join("first.h8d");
    let b = dir.path().join("second.H8D");
    std::fs::write(&a, hdos_image("GAMES", &[("CHESS", "ABS", &[12], 0)])).unwrap();
    std::fs::write(&b, cpm_image(&[("PIP", "COM", 0, 8, &[2])])).unwrap();
    std::fs::write(dir.path().join("readme.txt"), b"not an image").unwrap();

    let paths = select_working_folder(dir.path()).expect("scan");
    assert_eq!(paths.len(), 2);
    let images = load_images(&paths);
    let text = render_text(&catalog(&images, &HdosOptions::default()));
    assert!(text.contains("FIRST\n  CHESS   .ABS 0002"));
    assert!(text.ends_with("DISKS=2 FILES=2\n"));

    let renamed = rename_all(&paths, &HdosOptions::default()).expect("rename");
    assert_eq!(renamed.len(), 2);
    let names: Vec<String> = renamed
        .iter()
        .map(|(_, new)| new.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names[0].starts_with("GAMES_"));
    assert!(names[0].ends_with(".H8D"));
    assert!(names[1].starts_with("SECOND_"));

    // Already canonical: nothing left to do
    let again: Vec<PathBuf> = renamed.into_iter().map(|(_, new)| new).collect();
    assert!(rename_all(&again, &HdosOptions::default()).unwrap().is_empty());
}

#[test]
fn test_html_catalog() {
    let images = vec![DiskImage::from_bytes(
        hdos_image("<TOOLS>", &[("ASM", "ABS", &[40], 0)]),
        "A&B",
    )];
    let html = render_html(&catalog(&images, &HdosOptions::default()));
    assert!(html.contains("<h3>A&amp;B</h3>"));
    assert!(html.contains("ASM     .ABS 0002"));
}

#[test]
fn test_serial_read_then_write_round_trip() {
    let original = hdos_image("ARCHIVE", &[("DATA", "DAT", &[50, 51, 52], 1)]);

    // Read: connect, select drive, query (1S40T), drive SY0 again, then 40 good tracks
    let mut link = ScriptedLink::new().reply(b"??").reply(&[b'0', b'Q', 0, b'0']);
    for track in original.chunks(2560) {
        link = link.reply(track).reply(b"R");
    }
    let config = SessionConfig::default().with_wait(WaitPolicy::bounded(100));
    let mut session = Session::new(link, config.clone());
    session.connect().expect("connect");
    let read = session.read_disk().expect("read");
    assert_eq!(read.image, original);
    assert_eq!(read.label, "007 ARCHIVE");
    assert!(read.bad_tracks.is_empty());

    let image = read.into_image("ARCHIVE");
    let name = suggested_save_name(&image, "", &HdosOptions::default());
    assert!(name.starts_with("ARCHIVE_") && name.ends_with(".H8D"));

    // Write it back: drive, geometry, volume, then one W per track
    let mut link = ScriptedLink::new().reply(b"??04V");
    for _ in 0..40 {
        link = link.reply(b"W");
    }
    let mut session = Session::new(link, config);
    session.connect().expect("connect");
    let summary = session.write_disk(&image).expect("write");
    assert_eq!(summary.volume, Some(7));
    assert_eq!(summary.tracks, 40);

    let sent = session.link().sent();
    let written: Vec<u8> = sent[7..]
        .chunks(2561)
        .flat_map(|c| c[1..].iter().copied())
        .collect();
    assert_eq!(written, original);
}

#[test]
fn test_allocation_map_and_dump() {
    let image = DiskImage::from_bytes(
        hdos_image("MAP", &[("A", "ABS", &[20, 21, 22], 0)]),
        "MAP",
    );
    let map = AllocationMap::from_image(&image, &HdosOptions::default()).expect("map");
    assert_eq!(map.units_of(0), vec![20, 21, 22]);

    let dump = hex_dump(&image.data()[..64], 0);
    assert_eq!(dump.lines().count(), 2);
    assert!(dump.starts_with("0000: C3 A0 22 20"));
}

proptest! {
    #[test]
    fn prop_catalog_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..12000)) {
        let images = vec![DiskImage::from_bytes(bytes, "FUZZ")];
        let records = catalog(&images, &HdosOptions::default());
        prop_assert_eq!(records[0].kind, RecordKind::Header);
        prop_assert_eq!(records.last().map(|r| r.kind), Some(RecordKind::Footer));
    }

    #[test]
    fn prop_hex_dump_lines(len in 0usize..400) {
        let data = vec![0x41u8; len];
        prop_assert_eq!(hex_dump(&data, 0).lines().count(), len.div_ceil(32));
    }
}
