/// Interactive H8D console application

use dez80::Instruction;

use h8dmanager::catalog::format_row;
use h8dmanager::filesystem::HdosVolumeHeader;
use h8dmanager::format::hdos_signature;
use h8dmanager::rename::plan_renames;
use h8dmanager::serial::{BaudRate, FormatPreset, PortLink, SerialLink};
use h8dmanager::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "baud",
                "catalog",
                "dasm",
                "dir",
                "drive",
                "dump",
                "examine",
                "exit",
                "extract",
                "folder",
                "format",
                "geometry",
                "header",
                "help",
                "images",
                "info",
                "loader",
                "ls",
                "map",
                "open",
                "option",
                "port",
                "query",
                "quit",
                "read-disk",
                "rename",
                "save-loader",
                "search",
                "select",
                "status",
                "volume",
                "write-disk",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only complete the first word (command name)
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".h8dmanager_history");
        p
    })
}

/// Loaded images and the open serial session
struct Workspace {
    paths: Vec<PathBuf>,
    images: Vec<DiskImage>,
    current: Option<usize>,
    options: HdosOptions,
    config: SessionConfig,
    session: Option<Session<PortLink>>,
    abort: AbortHandle,
}

impl Workspace {
    fn new() -> Self {
        Self {
            paths: Vec::new(),
            images: Vec::new(),
            current: None,
            options: HdosOptions::default(),
            config: SessionConfig::default(),
            session: None,
            abort: AbortHandle::new(),
        }
    }

    fn image(&self) -> Option<&DiskImage> {
        self.current.and_then(|i| self.images.get(i))
    }

    fn session(&mut self) -> Option<&mut Session<PortLink>> {
        if self.session.is_none() {
            println!("No port open. Use 'port <device>' first.");
        }
        self.session.as_mut()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== H8DManager ===");
    println!("Interactive console for Heathkit H8/H89 disk images and the serial imager.");
    println!("Type 'help' for available commands\n");

    let mut rl = match Editor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to create editor: {}", e);
            return;
        }
    };
    rl.set_helper(Some(CommandCompleter::new()));

    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let mut ws = Workspace::new();

    loop {
        let input = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        if parts.is_empty() {
            continue;
        }
        let command = parts[0].to_lowercase();
        let args = &parts[1..];

        match command.as_str() {
            "help" => print_help(),
            "quit" | "exit" => break,
            "folder" => cmd_folder(&mut ws, args),
            "open" => cmd_open(&mut ws, args),
            "images" => {
                for (i, image) in ws.images.iter().enumerate() {
                    let marker = if Some(i) == ws.current { '*' } else { ' ' };
                    println!("{}{:>3} {:<24} {:>7} {}", marker, i, image.title(), image.len(), image.kind());
                }
            }
            "select" => match args.first().and_then(|a| a.parse::<usize>().ok()) {
                Some(i) if i < ws.images.len() => ws.current = Some(i),
                _ => println!("Usage: select <index>"),
            },
            "catalog" => cmd_catalog(&ws, args),
            "dir" | "ls" => cmd_dir(&ws),
            "info" => match ws.image() {
                Some(img) => print_info(img, &ws.options),
                None => println!("No image selected."),
            },
            "extract" => cmd_extract(&ws, args),
            "search" => match args.first().map(|a| split_name(a)) {
                Some((name, ext)) => {
                    for (idx, item) in search(&ws.images, &name, &ext, &ws.options) {
                        println!("{:<24} {}", ws.images[idx].title(), item.display_name());
                    }
                }
                None => println!("Usage: search <NAME.EXT>"),
            },
            "rename" => cmd_rename(&mut ws, args),
            "map" => match ws.image() {
                Some(img) => {
                    if let Err(e) = map::draw_allocation_map(img, &ws.options) {
                        println!("Error: {}", e);
                    }
                }
                None => println!("No image selected."),
            },
            "dump" | "dasm" => {
                let Some(img) = ws.image() else {
                    println!("No image selected.");
                    continue;
                };
                let offset = args.first().and_then(|s| parse_number(s)).unwrap_or(0);
                let len = args.get(1).and_then(|s| parse_number(s)).unwrap_or(256);
                let data = img.data();
                let start = offset.min(data.len());
                let end = (start + len).min(data.len());
                if command == "dump" {
                    print!("{}", hex_dump(&data[start..end], start));
                } else {
                    disassemble_z80(&data[start..end], start);
                }
            }
            "option" => cmd_option(&mut ws, args),
            "port" => cmd_port(&mut ws, args),
            "status" => match &ws.session {
                Some(s) => println!(
                    "{} {:?} {:?}, drive SY{}",
                    s.link().name(),
                    s.state(),
                    s.variant(),
                    s.config().drive
                ),
                None => println!("No port open."),
            },
            "drive" => match args.first().and_then(|a| a.parse::<u8>().ok()) {
                Some(d) if d < 2 => {
                    ws.config.drive = d;
                    if let Some(s) = ws.session.as_mut() {
                        s.config_mut().drive = d;
                    }
                }
                _ => println!("Usage: drive <0|1>"),
            },
            "geometry" => {
                let geometry = match args.first().map(|a| a.to_uppercase()) {
                    Some(name) if name == "AUTO" => None,
                    Some(name) => match parse_disk_type(&name) {
                        Some(t) => Some(t),
                        None => {
                            println!("Usage: geometry <auto|1S40T|2S40T|1S80T|2S80T>");
                            continue;
                        }
                    },
                    None => {
                        println!("Geometry: {}", describe_geometry(ws.config.geometry));
                        continue;
                    }
                };
                ws.config.geometry = geometry;
                if let Some(s) = ws.session.as_mut() {
                    s.config_mut().geometry = geometry;
                }
            }
            "volume" => {
                let volume = match args.first().map(|a| a.as_str()) {
                    Some("auto") => None,
                    Some(v) => match v.parse::<u8>() {
                        Ok(v) => Some(v),
                        Err(_) => {
                            println!("Usage: volume <0-255|auto>");
                            continue;
                        }
                    },
                    None => {
                        println!("Usage: volume <0-255|auto>");
                        continue;
                    }
                };
                ws.config.volume_override = volume;
                if let Some(s) = ws.session.as_mut() {
                    s.config_mut().volume_override = volume;
                }
            }
            "query" => {
                if let Some(s) = ws.session() {
                    match s.query() {
                        Ok(QueryReply::DiskType(t)) => println!("Disk type: {}", t),
                        Ok(QueryReply::Header(h)) => println!("{}", h),
                        Err(e) => println!("Error: {}", e),
                    }
                }
            }
            "header" | "examine" => {
                let track = args.first().and_then(|a| a.parse::<u8>().ok()).unwrap_or(0);
                let side = args.get(1).and_then(|a| a.parse::<u8>().ok()).unwrap_or(0);
                let examine = command == "examine";
                if let Some(s) = ws.session() {
                    if examine {
                        match s.examine_track(track, side) {
                            Ok(data) => print!("{}", hex_dump(&data, 0)),
                            Err(e) => println!("Error: {}", e),
                        }
                    } else {
                        match s.read_track_header(track, side) {
                            Ok(QueryReply::DiskType(t)) => println!("Disk type: {}", t),
                            Ok(QueryReply::Header(h)) => println!("{}", h),
                            Err(e) => println!("Error: {}", e),
                        }
                    }
                }
            }
            "read-disk" => cmd_read_disk(&mut ws, args),
            "write-disk" => cmd_write_disk(&mut ws, args),
            "format" => cmd_format(&mut ws, args),
            "loader" => {
                let Some(path) = args.first() else {
                    println!("Usage: loader <path>");
                    continue;
                };
                match std::fs::read(path) {
                    Ok(loader) => {
                        if let Some(s) = ws.session() {
                            if let Err(e) = s.send_loader(&loader) {
                                println!("Error: {}", e);
                            }
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "save-loader" => {
                if let Some(s) = ws.session() {
                    if let Err(e) = s.save_loader() {
                        println!("Error: {}", e);
                    }
                }
            }
            "baud" => {
                let rate = match args.first().map(|a| a.as_str()) {
                    Some("9600") => BaudRate::B9600,
                    Some("19200") => BaudRate::B19200,
                    _ => {
                        println!("Usage: baud <9600|19200>");
                        continue;
                    }
                };
                if let Some(s) = ws.session() {
                    match s.set_baud(rate) {
                        Ok(()) => println!(
                            "Client now at {} baud; reconfigure the port and reopen it.",
                            rate.bps()
                        ),
                        Err(e) => println!("Error: {}", e),
                    }
                }
            }
            _ => {
                println!("Unknown command: {}. Type 'help' for available commands.", command);
            }
        }
    }

    if let Some(history_path) = history_path() {
        let _ = rl.save_history(&history_path);
    }
    println!("Goodbye!");
}

fn cmd_folder(ws: &mut Workspace, args: &[String]) {
    let folder = args.first().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    match select_working_folder(&folder) {
        Ok(paths) => {
            ws.images = load_images(&paths);
            ws.paths = ws
                .images
                .iter()
                .filter_map(|i| i.path().map(|p| p.to_path_buf()))
                .collect();
            ws.current = if ws.images.is_empty() { None } else { Some(0) };
            println!("Loaded {} images from {}", ws.images.len(), folder.display());
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_open(ws: &mut Workspace, args: &[String]) {
    let Some(path) = args.first() else {
        println!("Usage: open <path>");
        return;
    };
    match DiskImage::open(path) {
        Ok(img) => {
            println!("Opened: {} ({})", path, img.kind());
            ws.paths.push(PathBuf::from(path));
            ws.images.push(img);
            ws.current = Some(ws.images.len() - 1);
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_catalog(ws: &Workspace, args: &[String]) {
    let records = catalog(&ws.images, &ws.options);
    let html = args.first().is_some_and(|a| a.eq_ignore_ascii_case("html"));
    let out = if html {
        render_html(&records)
    } else {
        render_text(&records)
    };

    match args.get(1) {
        Some(path) => match std::fs::write(path, out) {
            Ok(()) => println!("Catalog saved to {}", path),
            Err(e) => println!("Error: {}", e),
        },
        None => print!("{}", out),
    }
}

fn cmd_dir(ws: &Workspace) {
    let Some(img) = ws.image() else {
        println!("No image selected.");
        return;
    };
    match mount(img, &ws.options).and_then(|fs| fs.list_files()) {
        Ok(listing) => {
            println!("{} ({})", img.title(), listing.kind);
            for item in &listing.items {
                println!("  {}", format_row(item, &listing));
            }
            println!("  {}", catalog::format_footer(&listing));
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_extract(ws: &Workspace, args: &[String]) {
    let (Some(img), Some(file)) = (ws.image(), args.first()) else {
        println!("Usage: extract <NAME.EXT> [output_path]");
        return;
    };
    let (name, ext) = split_name(file);
    let output = args.get(1).cloned().unwrap_or_else(|| file.clone());
    match extract_file(img, &name, &ext, &ws.options) {
        Ok(data) => match std::fs::write(&output, &data) {
            Ok(()) => println!("Exported {} bytes to {}", data.len(), output),
            Err(e) => println!("Error: {}", e),
        },
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_rename(ws: &mut Workspace, args: &[String]) {
    let dry_run = args.first().is_some_and(|a| a == "dry");
    if dry_run {
        for (old, new) in plan_renames(&ws.paths, &ws.options) {
            println!("{} -> {}", old.display(), new.display());
        }
        return;
    }

    match rename_all(&ws.paths, &ws.options) {
        Ok(done) => {
            for (old, new) in &done {
                if let Some(p) = ws.paths.iter_mut().find(|p| *p == old) {
                    *p = new.clone();
                }
            }
            ws.images = load_images(&ws.paths);
            println!("Renamed {} images", done.len());
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_option(ws: &mut Workspace, args: &[String]) {
    match (args.first().map(|a| a.as_str()), args.get(1).map(|a| a.as_str())) {
        (Some("label"), Some("60")) => ws.options.label_length = LabelLength::Standard,
        (Some("label"), Some("68")) => ws.options.label_length = LabelLength::Extended,
        (Some("grt"), Some("strict")) => ws.options.grt = GrtPolicy::default(),
        (Some("grt"), Some("permissive")) => ws.options.grt = GrtPolicy::permissive(),
        (Some("tie"), Some("2s40t")) => ws.config.geometry_policy = GeometryPolicy::PreferTwoSided40,
        (Some("tie"), Some("1s80t")) => ws.config.geometry_policy = GeometryPolicy::PreferOneSided80,
        _ => {
            println!("Usage: option label <60|68> | grt <strict|permissive> | tie <2s40t|1s80t>");
            println!(
                "Current: label {} bytes, GRT groups {}..{}, 204800 bytes reads as {:?}",
                ws.options.label_length.len(),
                ws.options.grt.min_group,
                ws.options.grt.max_group,
                ws.config.geometry_policy
            );
            return;
        }
    }
    ws.config.hdos = ws.options.clone();
    if let Some(s) = ws.session.as_mut() {
        s.config_mut().hdos = ws.options.clone();
        s.config_mut().geometry_policy = ws.config.geometry_policy;
    }
}

fn cmd_port(ws: &mut Workspace, args: &[String]) {
    let rate = match args.get(1).map(|a| a.as_str()) {
        None | Some("9600") => BaudRate::B9600,
        Some("19200") => BaudRate::B19200,
        Some(_) => {
            println!("Usage: port <device> [9600|19200]");
            return;
        }
    };
    let Some(device) = args.first() else {
        println!("Usage: port <device> [9600|19200]");
        return;
    };
    let mut session = match Session::open(device, rate, ws.config.clone()) {
        Ok(s) => s.with_abort_handle(ws.abort.clone()),
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    match session.connect() {
        Ok(variant) => println!("Client ready ({:?})", variant),
        Err(e) => println!("Client not ready: {}", e),
    }
    ws.session = Some(session);
}

fn cmd_read_disk(ws: &mut Workspace, args: &[String]) {
    let operator_label = args.first().cloned().unwrap_or_default();
    let abort = ws.abort.clone();
    let options = ws.options.clone();
    let Some(session) = ws.session() else {
        return;
    };

    let result = with_abort_prompt(&abort, || session.read_disk());
    let read = match result {
        Ok(read) => read,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    if !read.bad_tracks.is_empty() {
        println!("Bad tracks: {:?}", read.bad_tracks);
    }
    println!("Label: {}", read.label);

    let image = read.into_image(operator_label.clone());
    let name = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| suggested_save_name(&image, &operator_label, &options));
    match std::fs::write(&name, image.bytes()) {
        Ok(()) => {
            println!("Saved {}", name);
            ws.paths.push(PathBuf::from(&name));
            ws.images.push(image);
            ws.current = Some(ws.images.len() - 1);
        }
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_write_disk(ws: &mut Workspace, args: &[String]) {
    let image = match args.first() {
        Some(path) => match DiskImage::open(path) {
            Ok(img) => img,
            Err(e) => {
                println!("Error: {}", e);
                return;
            }
        },
        None => match ws.image() {
            Some(img) => img.clone(),
            None => {
                println!("Usage: write-disk [path]");
                return;
            }
        },
    };
    let abort = ws.abort.clone();
    let Some(session) = ws.session() else {
        return;
    };

    match with_abort_prompt(&abort, || session.write_disk(&image)) {
        Ok(summary) => println!(
            "Wrote {} tracks of {} ({})",
            summary.tracks,
            image.title(),
            summary.disk_type
        ),
        Err(e) => println!("Error: {}", e),
    }
}

fn cmd_format(ws: &mut Workspace, args: &[String]) {
    let disk_type = args.first().and_then(|a| parse_disk_type(&a.to_uppercase()));
    let preset = args
        .get(1)
        .and_then(|a| a.parse::<u8>().ok())
        .and_then(FormatPreset::for_sectors);
    let density = match args.get(2).map(|a| a.to_lowercase()) {
        Some(d) if d == "fm" => Density::Fm,
        _ => Density::Mfm,
    };
    let (Some(disk_type), Some(preset)) = (disk_type, preset) else {
        println!("Usage: format <1S40T|2S40T|1S80T|2S80T> <5|8|9|10|16> [fm|mfm]");
        return;
    };
    let abort = ws.abort.clone();
    let Some(session) = ws.session() else {
        return;
    };

    if let Err(e) = with_abort_prompt(&abort, || session.format_disk(disk_type, preset, density)) {
        println!("Error: {}", e);
    }
}

/// Run a long operation while a watcher thread turns Enter into an abort
fn with_abort_prompt<T>(abort: &AbortHandle, op: impl FnOnce() -> T) -> T {
    println!("Press Enter to abort.");
    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let done = done.clone();
        let abort = abort.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            if !done.load(Ordering::SeqCst) {
                abort.trigger();
            }
        })
    };

    let result = op();
    done.store(true, Ordering::SeqCst);
    if !watcher.is_finished() {
        println!("Done. Press Enter to continue.");
    }
    let _ = watcher.join();
    abort.clear();
    result
}

/// Parse command line input, respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(current.clone());
                    current.clear();
                }
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn split_name(file: &str) -> (String, String) {
    match file.split_once('.') {
        Some((name, ext)) => (name.to_string(), ext.to_string()),
        None => (file.to_string(), String::new()),
    }
}

fn parse_number(s: &str) -> Option<usize> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_disk_type(name: &str) -> Option<DiskType> {
    DiskType::ALL.iter().copied().find(|t| t.name() == name)
}

fn describe_geometry(geometry: Option<DiskType>) -> String {
    geometry.map_or_else(|| "auto".to_string(), |t| t.to_string())
}

fn print_help() {
    println!("Available commands:");
    println!("  folder [path]                  - Load every .?8? and .H37 image under a folder");
    println!("  open <path>                    - Open one image (use quotes for paths with spaces)");
    println!("  images                         - List loaded images");
    println!("  select <index>                 - Make an image current");
    println!("  catalog [text|html] [path]     - Catalog all loaded images");
    println!("  dir, ls                        - List files on the current image");
    println!("  info                           - Show image and volume information");
    println!("  extract <NAME.EXT> [path]      - Export a file to the host");
    println!("  search <NAME.EXT>              - Find a file across loaded images");
    println!("  rename [dry]                   - Rename loaded images to label_checksum names");
    println!("  map                            - Visual allocation map");
    println!("  dump [offset] [len]            - Hex dump image bytes");
    println!("  dasm [offset] [len]            - Disassemble image bytes as Z80/8080 code");
    println!("  option <label|grt|tie> <value> - HDOS label length, GRT range, geometry tie-break");
    println!("  port <device> [9600|19200]     - Open the serial port and connect to the client");
    println!("  status                         - Show session state");
    println!("  drive <0|1>                    - Drive for reads and queries");
    println!("  geometry [auto|1S40T|...]      - Geometry for reads");
    println!("  volume <n|auto>                - Volume number written to HDOS disks");
    println!("  query                          - Ask the client what disk is inserted");
    println!("  header <track> <side>          - Read a track header");
    println!("  examine <track> <side>         - Hex dump a raw track");
    println!("  read-disk [label] [path]       - Read a disk into a new image");
    println!("  write-disk [path]              - Write an image (default: current) to disk");
    println!("  format <type> <spt> [fm|mfm]   - Format a disk");
    println!("  loader <path>                  - Upload the client loader");
    println!("  save-loader                    - Save the uploaded loader to disk");
    println!("  baud <9600|19200>              - Switch the client's line speed");
    println!("  help                           - Show this help");
    println!("  quit, exit                     - Exit");
}

fn print_info(image: &DiskImage, options: &HdosOptions) {
    if let Some(path) = image.path() {
        println!("Path: {}", path.display());
    }
    println!("Title: {}", image.title());
    println!("Filesystem: {}", image.kind());
    if let Some(sig) = hdos_signature(image.data()) {
        println!("Boot signature: {}", sig);
    }
    println!("Size: {} bytes", image.len());
    println!("Checksum: {:04X}", rename::image_checksum(image.bytes()));
    match image.descriptor() {
        Some(d) => println!("Geometry trailer: {}", d),
        None => match GeometryPolicy::default().classify(image.len()) {
            Some(t) => println!("Geometry: {} (by size)", t),
            None => println!("Geometry: unknown"),
        },
    }
    println!("Label: {}", volume_label(image, options));

    if image.kind() == FilesystemKind::Hdos {
        if let Ok(h) = HdosVolumeHeader::parse(image.data(), options.label_length) {
            println!("Volume: {:03}", h.serial);
            println!("Initialized: {}", filesystem::decode_date(h.init_date));
            println!("Disk type: {}", h.disk_type());
            println!("Sectors per group: {}", h.sectors_per_group);
            println!("Directory at {:#06X}, GRT at {:#06X}", h.dir_offset, h.grt_offset);
        }
    }
}

fn disassemble_z80(data: &[u8], base: usize) {
    let mut slice: &[u8] = data;
    let mut offset = 0usize;

    while !slice.is_empty() {
        let start_len = slice.len();

        match Instruction::decode_one(&mut slice) {
            Ok(instruction) => {
                let consumed = start_len - slice.len();
                let bytes: Vec<String> = data[offset..offset + consumed]
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect();
                println!("{:04X}  {:<12} {}", base + offset, bytes.join(" "), instruction);
                offset += consumed;
            }
            Err(_) => {
                // Invalid or truncated instruction - show as data byte
                println!("{:04X}  {:02X}           DB {:02X}h", base + offset, slice[0], slice[0]);
                slice = &slice[1..];
                offset += 1;
            }
        }
    }
}
