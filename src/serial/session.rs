/// Imager session state machine
///
/// One `Session` owns the link to the client and runs one operation at a
/// time. Every wait for a reply byte is a poll loop that checks the abort
/// flag first, so an operator abort is seen at the next wait point.

use crate::error::{H8dError, Result};
use crate::filesystem::HdosOptions;
use crate::format::constants::{HDOS_FLAGS_OFFSET, HDOS_SERIAL_OFFSET, TRACK_SIZE};
use crate::format::{Density, DiskType, FilesystemKind, Geometry, GeometryPolicy};
use crate::image::{DiskImage, GeometryDescriptor};
use crate::rename::describe_volume;
use crate::serial::command::{
    BaudRate, Command, FormatPreset, QueryReply, TrackHeader, BAD_TRACK, READ_PREFIX_LEN,
    TRACK_HEADER_LEN,
};
use crate::serial::link::{open_port, PortLink, SerialLink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which imager firmware the client runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerVariant {
    /// Hard-sectored H17 imager: fixed 2560-byte tracks
    #[default]
    Baseline,
    /// Soft-sectored H37 imager: variable geometry, length-prefixed tracks
    Extended,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Client not (yet) answering
    Disconnected,
    /// Ready for an operation
    Idle,
    /// Running a short command or query
    Querying,
    /// Receiving a disk image
    ReadingDisk,
    /// Sending a disk image
    WritingDisk,
    /// Formatting a disk
    FormattingDisk,
    /// Sending the abort byte
    Aborting,
}

/// Cooperative cancel flag shared with the operator
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Create an untriggered handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether an abort is pending
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Drop a pending abort that arrived after the operation ended
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Take the pending abort, clearing it
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// How long to wait for a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Give up after this many empty polls; `None` waits until aborted
    pub max_idle_polls: Option<u64>,
    /// Pause between empty polls
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_idle_polls: None,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl WaitPolicy {
    /// Wait at most `polls` empty polls
    pub fn bounded(polls: u64) -> Self {
        Self {
            max_idle_polls: Some(polls),
            ..Self::default()
        }
    }

    /// Set the pause between polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Session configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Drive for reads and queries (0 = SY0, 1 = SY1)
    pub drive: u8,
    /// Firmware variant, replaced by the probe result on connect
    pub variant: ControllerVariant,
    /// Geometry for reads; `None` asks the client
    pub geometry: Option<DiskType>,
    /// Volume number for baseline writes instead of the image's own
    pub volume_override: Option<u8>,
    /// Reply wait policy
    pub wait: WaitPolicy,
    /// Tie-break for ambiguous image lengths
    pub geometry_policy: GeometryPolicy,
    /// Options for reading labels of received images
    pub hdos: HdosOptions,
}

impl SessionConfig {
    /// Set the drive
    pub fn with_drive(mut self, drive: u8) -> Self {
        self.drive = drive;
        self
    }

    /// Set the firmware variant
    pub fn with_variant(mut self, variant: ControllerVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Fix the read geometry
    pub fn with_geometry(mut self, geometry: DiskType) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Override the volume number written
    pub fn with_volume_override(mut self, volume: u8) -> Self {
        self.volume_override = Some(volume);
        self
    }

    /// Set the wait policy
    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Set the geometry tie-break
    pub fn with_geometry_policy(mut self, policy: GeometryPolicy) -> Self {
        self.geometry_policy = policy;
        self
    }
}

/// A disk received from the client
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// Image bytes, geometry trailer included for extended reads
    pub image: Vec<u8>,
    /// Geometry read
    pub disk_type: DiskType,
    /// Tracks that came back bad or short (zero filled)
    pub bad_tracks: Vec<usize>,
    /// Trailer appended to extended reads
    pub descriptor: Option<GeometryDescriptor>,
    /// Label derived from the first track
    pub label: String,
}

impl ReadResult {
    /// Wrap as an image
    pub fn into_image<S: Into<String>>(self, title: S) -> DiskImage {
        DiskImage::from_bytes(self.image, title)
    }
}

/// Outcome of a completed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Tracks sent
    pub tracks: usize,
    /// Geometry written
    pub disk_type: DiskType,
    /// Volume number sent (baseline only)
    pub volume: Option<u8>,
}

/// A session with an imager client
pub struct Session<L: SerialLink> {
    link: L,
    config: SessionConfig,
    state: SessionState,
    variant: ControllerVariant,
    abort: AbortHandle,
    transferred: usize,
}

impl Session<PortLink> {
    /// Open a serial port and create a disconnected session on it
    pub fn open(path: &str, rate: BaudRate, config: SessionConfig) -> Result<Self> {
        Ok(Session::new(open_port(path, rate)?, config))
    }
}

impl<L: SerialLink> Session<L> {
    /// Create a disconnected session over a link
    pub fn new(link: L, config: SessionConfig) -> Self {
        let variant = config.variant;
        Self {
            link,
            config,
            state: SessionState::Disconnected,
            variant,
            abort: AbortHandle::new(),
            transferred: 0,
        }
    }

    /// Share an existing abort handle, such as one wired to Ctrl-C
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Firmware variant in use
    pub fn variant(&self) -> ControllerVariant {
        self.variant
    }

    /// Configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Change the configuration between operations
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    /// Handle for aborting the running operation
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Image bytes moved by the current or last transfer
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    /// Underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Give back the link
    pub fn into_link(self) -> L {
        self.link
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        log::trace!("-> {:02X?}", bytes);
        self.link.write_bytes(bytes)
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        self.send(&[command.byte()])
    }

    fn pause(&self) {
        if self.config.wait.poll_interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.config.wait.poll_interval);
        }
    }

    /// Wait for one reply byte
    fn wait_byte(&mut self, what: &str) -> Result<u8> {
        let mut idle = 0u64;
        loop {
            if self.abort.is_set() {
                return Err(self.handle_abort());
            }
            if let Some(byte) = self.link.poll_byte()? {
                log::trace!("<- {:02X}", byte);
                return Ok(byte);
            }
            idle += 1;
            if let Some(max) = self.config.wait.max_idle_polls {
                if idle >= max {
                    return Err(H8dError::Timeout(what.to_string()));
                }
            }
            self.pause();
        }
    }

    /// Wait for bytes until `expected` arrives, skipping anything else
    fn wait_for(&mut self, expected: u8, what: &str) -> Result<()> {
        loop {
            let byte = self.wait_byte(what)?;
            if byte == expected {
                return Ok(());
            }
            log::trace!("skipping {:02X} while waiting for {}", byte, what);
        }
    }

    fn check_abort(&mut self) -> Result<()> {
        if self.abort.is_set() {
            Err(self.handle_abort())
        } else {
            Ok(())
        }
    }

    /// Send the abort byte once and drop pending input
    fn handle_abort(&mut self) -> H8dError {
        self.abort.take();
        self.state = SessionState::Aborting;
        self.abort_transfer();
        log::warn!("transfer abort");
        H8dError::Aborted
    }

    fn abort_transfer(&mut self) {
        if let Err(e) = self.send_command(Command::Liveness) {
            log::warn!("could not send abort byte: {}", e);
        }
        if let Err(e) = self.link.discard_input() {
            log::debug!("could not discard input: {}", e);
        }
    }

    /// Send a command and require it echoed back
    ///
    /// The client answers `?` to a command it does not support.
    fn exchange(&mut self, command: Command) -> Result<()> {
        self.send_command(command)?;
        let reply = self.wait_byte(&command.to_string())?;
        if reply == command.byte() {
            Ok(())
        } else if reply == Command::Liveness.byte() {
            Err(H8dError::Unsupported(format!("client rejected {}", command)))
        } else {
            Err(H8dError::mismatch(command.byte(), reply))
        }
    }

    /// Send a command, log a wrong echo and carry on
    fn exchange_lenient(&mut self, command: Command) -> Result<u8> {
        self.send_command(command)?;
        let reply = self.wait_byte(&command.to_string())?;
        if reply != command.byte() {
            log::warn!(
                "{} returned '{}' instead of {}",
                command,
                reply as char,
                command
            );
        }
        Ok(reply)
    }

    /// Run an operation from `Idle`, returning to `Idle` afterwards
    fn run<T>(
        &mut self,
        state: SessionState,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.state == SessionState::Disconnected {
            return Err(H8dError::PortUnavailable(format!(
                "client on {} is not connected",
                self.link.name()
            )));
        }

        self.state = state;
        self.transferred = 0;
        let result = op(self);

        self.state = match &result {
            Err(e) if e.is_fatal_to_session() => SessionState::Disconnected,
            _ => SessionState::Idle,
        };
        if let Err(e) = &result {
            if !matches!(e, H8dError::Aborted) {
                log::warn!("{:?} failed: {}", state, e);
            }
        }
        result
    }

    /// Check the client is alive and probe its variant
    ///
    /// The client echoes `?`. It then echoes `3` only if it is the extended
    /// imager. On failure the session stays disconnected.
    pub fn connect(&mut self) -> Result<ControllerVariant> {
        self.state = SessionState::Querying;
        let result = self.probe_client();
        match &result {
            Ok(variant) => {
                self.variant = *variant;
                self.config.variant = *variant;
                self.state = SessionState::Idle;
                log::info!("client is ready ({:?})", variant);
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                log::warn!("client is not ready: {}", e);
            }
        }
        result
    }

    fn probe_client(&mut self) -> Result<ControllerVariant> {
        self.exchange(Command::Liveness)?;
        self.send_command(Command::ProbeExtended)?;
        let reply = self.wait_byte("variant probe")?;
        Ok(if reply == Command::ProbeExtended.byte() {
            ControllerVariant::Extended
        } else {
            ControllerVariant::Baseline
        })
    }

    /// Select drive SY0 or SY1
    pub fn select_drive(&mut self, drive: u8) -> Result<()> {
        self.run(SessionState::Querying, |s| {
            s.exchange(Command::SelectDrive(drive))
        })
    }

    /// Select side 0 or 1
    pub fn select_side(&mut self, side: u8) -> Result<()> {
        self.run(SessionState::Querying, |s| s.exchange(Command::SelectSide(side)))
    }

    /// Tell the client which geometry to expect
    pub fn set_geometry(&mut self, disk_type: DiskType) -> Result<()> {
        self.run(SessionState::Querying, |s| {
            s.exchange(Command::SetGeometry(disk_type))
        })
    }

    /// Ask the client what disk is in the configured drive
    pub fn query(&mut self) -> Result<QueryReply> {
        self.run(SessionState::Querying, |s| {
            s.exchange(Command::SelectDrive(s.config.drive))?;
            s.exchange(Command::Query)?;
            s.read_query_reply()
        })
    }

    fn read_query_reply(&mut self) -> Result<QueryReply> {
        match self.variant {
            ControllerVariant::Baseline => {
                let code = self.wait_byte("query result")?;
                if code > 3 {
                    log::warn!("query returned unknown disk type {}", code);
                }
                let disk_type = DiskType::from_code(code);
                log::info!("query results: {}", disk_type);
                Ok(QueryReply::DiskType(disk_type))
            }
            ControllerVariant::Extended => Ok(QueryReply::Header(self.read_header_reply()?)),
        }
    }

    fn read_header_reply(&mut self) -> Result<TrackHeader> {
        let mut bytes = [0u8; TRACK_HEADER_LEN];
        for b in bytes.iter_mut() {
            *b = self.wait_byte("track header")?;
        }
        let header = TrackHeader::parse(&bytes)?;
        log::info!("query results: {}", header);
        Ok(header)
    }

    /// Read the header of one track
    pub fn read_track_header(&mut self, track: u8, side: u8) -> Result<QueryReply> {
        self.run(SessionState::Querying, |s| {
            s.exchange(Command::SelectDrive(s.config.drive))?;
            s.exchange(Command::SelectSide(side))?;
            s.exchange(Command::ReadHeader)?;
            log::info!("read header track={} side={}", track, side);
            s.send(&[track])?;
            s.read_query_reply()
        })
    }

    /// Fetch the raw bytes of one track
    pub fn examine_track(&mut self, track: u8, side: u8) -> Result<Vec<u8>> {
        self.run(SessionState::Querying, |s| {
            s.exchange(Command::SelectDrive(s.config.drive))?;
            s.exchange(Command::SelectSide(side))?;
            s.exchange(Command::ExamineTrack)?;
            s.send(&[track])?;
            log::info!("examine track {} side {}", track, side);

            let expected = s.track_prefix()?;
            let mut data = Vec::with_capacity(expected);
            for _ in 0..expected {
                data.push(s.wait_byte("track data")?);
                s.transferred += 1;
            }
            Ok(data)
        })
    }

    /// Byte count of the next track: fixed for the baseline imager, taken
    /// from the 3-byte prefix for the extended one
    fn track_prefix(&mut self) -> Result<usize> {
        match self.variant {
            ControllerVariant::Baseline => Ok(TRACK_SIZE),
            ControllerVariant::Extended => {
                let mut prefix = [0u8; READ_PREFIX_LEN];
                for b in prefix.iter_mut() {
                    *b = self.wait_byte("track length")?;
                }
                let len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
                log::debug!("track of {} bytes, {} sectors", len, prefix[2]);
                Ok(len)
            }
        }
    }

    /// Settle the read geometry
    ///
    /// The baseline imager uses the configured geometry or asks for the
    /// geometry code. The extended imager is always queried, since only the
    /// track header gives its sector count, size and density; a configured
    /// geometry then only fixes sides and tracks.
    fn read_geometry(&mut self) -> Result<Geometry> {
        match self.variant {
            ControllerVariant::Baseline => {
                let disk_type = match self.config.geometry {
                    Some(disk_type) => {
                        self.exchange_lenient(Command::SetGeometry(disk_type))?;
                        disk_type
                    }
                    None => {
                        self.exchange(Command::Query)?;
                        let code = self.wait_byte("query result")?;
                        let disk_type = DiskType::from_code(code);
                        log::info!("query results: {}", disk_type);
                        disk_type
                    }
                };
                Ok(Geometry::h17(disk_type))
            }
            ControllerVariant::Extended => {
                self.exchange(Command::Query)?;
                let header = self.read_header_reply()?;
                let disk_type = self
                    .config
                    .geometry
                    .unwrap_or_else(|| DiskType::from_layout(header.sides, 40));
                self.exchange_lenient(Command::SetGeometry(disk_type))?;
                Ok(Geometry {
                    disk_type,
                    sectors_per_track: header.sectors,
                    sector_size: header.sector_size,
                    density: header.density,
                })
            }
        }
    }

    /// Read a whole disk
    ///
    /// Each track is requested with `R`, received and closed by a handshake
    /// byte: `R` for a good track, `r` for a bad one. Bad or short tracks
    /// (including a handshake that never arrives under a bounded wait) keep
    /// the bytes received, are zero filled to full length and reading
    /// continues.
    pub fn read_disk(&mut self) -> Result<ReadResult> {
        self.run(SessionState::ReadingDisk, |s| s.read_disk_tracks())
    }

    fn read_disk_tracks(&mut self) -> Result<ReadResult> {
        self.exchange(Command::SelectDrive(self.config.drive))?;
        let geometry = self.read_geometry()?;
        let disk_type = geometry.disk_type;
        if self.variant == ControllerVariant::Baseline {
            // 80 track media are read from SY1
            self.exchange(Command::SelectDrive(disk_type.preferred_drive()))?;
        }
        let tracks = geometry.total_tracks();
        let track_size = geometry.track_size();
        let sides = disk_type.sides() as usize;
        log::info!("disk type {}, {} tracks of {} bytes", disk_type, tracks, track_size);

        let mut image = Vec::with_capacity(tracks * track_size);
        let mut bad_tracks = Vec::new();
        let mut label = String::new();

        for track in 0..tracks {
            self.check_abort()?;
            self.send_command(Command::ReadTrack)?;

            let start = image.len();
            let good = self.receive_track(&mut image)?;
            let received = image.len() - start;

            if received < track_size {
                image.resize(start + track_size, 0);
            } else if received > track_size {
                log::warn!("track {} sent {} extra bytes", track, received - track_size);
                image.truncate(start + track_size);
            }

            let (cylinder, side) = (track / sides, track % sides + 1);
            if !good || received < track_size {
                bad_tracks.push(track);
                log::warn!("received track {} side {} BAD TRACK", cylinder, side);
            } else {
                log::info!("received track {} side {}", cylinder, side);
            }

            if track == 0 {
                let spt = match self.variant {
                    ControllerVariant::Extended => Some(geometry.sectors_per_track),
                    ControllerVariant::Baseline => None,
                };
                label = describe_volume(&image, spt, &self.config.hdos);
                log::info!("disk label: {}", label);
            }
        }

        let descriptor = match self.variant {
            ControllerVariant::Extended => {
                let d = GeometryDescriptor::from_geometry(&geometry);
                image.extend_from_slice(&d.to_bytes());
                Some(d)
            }
            ControllerVariant::Baseline => None,
        };
        log::info!("disk image received, {} bad tracks", bad_tracks.len());

        Ok(ReadResult {
            image,
            disk_type,
            bad_tracks,
            descriptor,
            label,
        })
    }

    /// Receive one track into `image`; false when the client flagged it bad
    /// or the handshake timed out
    fn receive_track(&mut self, image: &mut Vec<u8>) -> Result<bool> {
        let expected = match self.track_prefix() {
            Ok(n) => n,
            Err(H8dError::Timeout(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        for _ in 0..expected {
            match self.wait_byte("track data") {
                Ok(b) => {
                    image.push(b);
                    self.transferred += 1;
                }
                Err(H8dError::Timeout(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        match self.wait_byte("read handshake") {
            Ok(b'R') => Ok(true),
            Ok(BAD_TRACK) => Ok(false),
            Ok(other) => {
                log::warn!("unexpected read handshake '{}'", other as char);
                Ok(false)
            }
            Err(H8dError::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Geometry to write an image with
    fn write_geometry(&self, image: &DiskImage) -> Result<Geometry> {
        let data = image.data();
        let unknown = || {
            H8dError::GeometryMismatch(format!(
                "{} bytes matches no known disk geometry",
                data.len()
            ))
        };

        match self.variant {
            ControllerVariant::Extended => {
                let descriptor = match image.descriptor() {
                    Some(d) => *d,
                    None => GeometryDescriptor::for_h17_image(
                        data.len(),
                        self.config.geometry_policy,
                    )
                    .ok_or_else(unknown)?,
                };
                Ok(descriptor.geometry())
            }
            ControllerVariant::Baseline => {
                let disk_type = if image.kind() == FilesystemKind::Hdos
                    && data.len() > HDOS_FLAGS_OFFSET
                {
                    DiskType::from_code(data[HDOS_FLAGS_OFFSET])
                } else {
                    self.config
                        .geometry_policy
                        .classify(data.len())
                        .ok_or_else(unknown)?
                };
                Ok(Geometry::h17(disk_type))
            }
        }
    }

    /// Write an image to the disk in the client's drive
    ///
    /// High-capacity images need drive SY1; a client answering `?` to that
    /// selection has no such drive and the write is refused before any track
    /// is sent.
    pub fn write_disk(&mut self, image: &DiskImage) -> Result<WriteSummary> {
        self.run(SessionState::WritingDisk, |s| s.write_disk_tracks(image))
    }

    fn write_disk_tracks(&mut self, image: &DiskImage) -> Result<WriteSummary> {
        let geometry = self.write_geometry(image)?;
        let disk_type = geometry.disk_type;
        let tracks = geometry.total_tracks();
        let track_size = geometry.track_size();
        let data = image.data();

        if tracks * track_size > data.len() {
            return Err(H8dError::GeometryMismatch(format!(
                "{} needs {} bytes, image holds {}",
                disk_type,
                tracks * track_size,
                data.len()
            )));
        }

        let drive = Command::SelectDrive(disk_type.preferred_drive());
        self.send_command(drive)?;
        let reply = self.wait_byte("drive select")?;
        if reply == Command::Liveness.byte() && disk_type.is_high_capacity() {
            return Err(H8dError::GeometryMismatch(format!(
                "cannot write {} image to drive SY0",
                disk_type
            )));
        }
        log::info!("drive SY{} selected on client", disk_type.preferred_drive());

        let reply = self.exchange_lenient(Command::SetGeometry(disk_type))?;
        if DiskType::from_command(reply).is_some() {
            log::info!("disk type {} set on client", disk_type);
        }

        let volume = match self.variant {
            ControllerVariant::Baseline => {
                let volume = self.config.volume_override.unwrap_or_else(|| {
                    if image.kind() == FilesystemKind::Hdos {
                        data[HDOS_SERIAL_OFFSET]
                    } else {
                        0
                    }
                });
                self.send(&[Command::SetVolume.byte(), volume])?;
                let reply = self.wait_byte("volume")?;
                if reply != Command::SetVolume.byte() {
                    self.abort_transfer();
                    log::warn!("volume assignment failed");
                    return Err(H8dError::mismatch(Command::SetVolume.byte(), reply));
                }
                log::info!("disk volume set to {}", volume);
                Some(volume)
            }
            ControllerVariant::Extended => None,
        };

        self.send_command(Command::WriteTrack)?;
        if self.variant == ControllerVariant::Extended {
            self.wait_for(Command::WriteTrack.byte(), "write ready")?;
            let [hi, lo] = (track_size as u16).to_be_bytes();
            self.send(&[
                geometry.sectors_per_track,
                geometry.size_code(),
                geometry.density.to_byte(),
                hi,
                lo,
            ])?;
        }

        let sides = disk_type.sides() as usize;
        for track in 0..tracks {
            if self.variant == ControllerVariant::Extended {
                let ready = self.wait_byte("track ready")?;
                if ready != Command::WriteTrack.byte() {
                    self.abort_transfer();
                    return Err(H8dError::mismatch(Command::WriteTrack.byte(), ready));
                }
            }
            self.check_abort()?;

            self.send_command(Command::WriteTrack)?;
            let start = track * track_size;
            self.send(&data[start..start + track_size])?;
            self.transferred = start + track_size;

            self.wait_for(Command::WriteTrack.byte(), "track written")?;
            log::info!("track {} side {} sent", track / sides, track % sides + 1);
        }

        log::info!("disk image sent, {} tracks", tracks);
        Ok(WriteSummary {
            tracks,
            disk_type,
            volume,
        })
    }

    /// Format the disk in the configured drive
    pub fn format_disk(
        &mut self,
        disk_type: DiskType,
        preset: FormatPreset,
        density: Density,
    ) -> Result<()> {
        self.run(SessionState::FormattingDisk, |s| {
            s.exchange(Command::SetGeometry(disk_type))?;
            s.exchange(Command::Format)?;
            s.send(&[preset.sectors, preset.size_code, density.to_byte()])?;
            s.wait_for(Command::Format.byte(), "format start")?;
            log::info!(
                "formatting {} {}x{} {}",
                disk_type,
                preset.sectors,
                preset.sector_size(),
                density.name()
            );
            s.wait_for(Command::Format.byte(), "format complete")?;
            log::info!("format complete");
            Ok(())
        })
    }

    /// Upload the client's loader program
    ///
    /// Works before the client answers, since the loader is what makes it
    /// answer. The bytes go out last to first.
    pub fn send_loader(&mut self, loader: &[u8]) -> Result<()> {
        let reversed: Vec<u8> = loader.iter().rev().copied().collect();
        self.link.write_bytes(&reversed)?;
        log::info!("loader sent ({} bytes)", loader.len());
        Ok(())
    }

    /// Ask the client to save the uploaded loader to disk
    pub fn save_loader(&mut self) -> Result<()> {
        self.send_command(Command::SaveLoader)?;
        log::info!("loader saved to disk");
        Ok(())
    }

    /// Switch the client's line speed
    ///
    /// The client changes speed immediately, so the session drops to
    /// `Disconnected` until the port is reopened at the new rate.
    pub fn set_baud(&mut self, rate: BaudRate) -> Result<()> {
        self.send_command(rate.command())?;
        self.state = SessionState::Disconnected;
        log::info!("baud rate set to {}", rate.bps());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::link::ScriptedLink;

    fn config() -> SessionConfig {
        SessionConfig::default()
            .with_wait(WaitPolicy::bounded(50).with_poll_interval(Duration::ZERO))
    }

    fn connected(link: ScriptedLink, variant_reply: u8) -> Session<ScriptedLink> {
        let link = link.reply(&[b'?', variant_reply]);
        let mut session = Session::new(link, config());
        session.connect().unwrap();
        session
    }

    #[test]
    fn test_connect_probes_variant() {
        let mut session = Session::new(ScriptedLink::new().reply(b"?3"), config());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.connect().unwrap(), ControllerVariant::Extended);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.link().sent(), b"?3");

        let session = connected(ScriptedLink::new(), b'?');
        assert_eq!(session.variant(), ControllerVariant::Baseline);
    }

    #[test]
    fn test_connect_failure_stays_disconnected() {
        let mut session = Session::new(ScriptedLink::new().reply(b"x"), config());
        assert!(matches!(
            session.connect(),
            Err(H8dError::ProtocolMismatch { expected: b'?', actual: b'x' })
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.select_drive(0),
            Err(H8dError::PortUnavailable(_))
        ));
    }

    #[test]
    fn test_mismatch_is_recoverable() {
        let mut session = connected(ScriptedLink::new(), b'?');
        session.link.push_reply(b"x");
        assert!(matches!(
            session.select_drive(1),
            Err(H8dError::ProtocolMismatch { expected: b'1', actual: b'x' })
        ));
        assert_eq!(session.state(), SessionState::Idle);
        session.link.push_reply(b"A");
        assert!(session.select_side(0).is_ok());
    }

    #[test]
    fn test_rejected_command_is_unsupported() {
        let mut session = connected(ScriptedLink::new(), b'?');
        session.link.push_reply(b"?");
        assert!(matches!(
            session.select_side(1),
            Err(H8dError::Unsupported(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_timeout() {
        let mut session = connected(ScriptedLink::new(), b'?');
        assert!(matches!(session.query(), Err(H8dError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_baseline_query() {
        let mut session = connected(ScriptedLink::new(), b'?');
        session.link.push_reply(&[b'0', b'Q', 1]);
        assert_eq!(
            session.query().unwrap(),
            QueryReply::DiskType(DiskType::TwoSide40)
        );
    }

    #[test]
    fn test_extended_query() {
        let mut session = connected(ScriptedLink::new(), b'3');
        session
            .link
            .push_reply(&[b'0', b'Q', 16, 0, 0, 1, 1, 0, 0, 2, 0x00, 0x10, 0x04]);
        match session.query().unwrap() {
            QueryReply::Header(h) => {
                assert_eq!(h.sectors, 16);
                assert_eq!(h.sides, 2);
                assert_eq!(h.density, Density::Mfm);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    fn baseline_track(fill: u8, handshake: u8) -> Vec<u8> {
        let mut t = vec![fill; TRACK_SIZE];
        t.push(handshake);
        t
    }

    #[test]
    fn test_read_disk_baseline() {
        let mut link = ScriptedLink::new()
            .reply(&[b'?', b'?'])
            .reply(&[b'0', b'Q', 0, b'0']);
        for track in 0..40u8 {
            let handshake = if track == 7 { BAD_TRACK } else { b'R' };
            link = link.reply(&baseline_track(track, handshake));
        }
        let mut session = Session::new(link, config());
        session.connect().unwrap();

        let result = session.read_disk().unwrap();
        assert_eq!(result.disk_type, DiskType::OneSide40);
        assert_eq!(result.image.len(), 40 * TRACK_SIZE);
        assert_eq!(result.bad_tracks, vec![7]);
        assert_eq!(result.image[TRACK_SIZE * 39], 39);
        // a track flagged bad keeps what the client sent
        assert_eq!(result.image[TRACK_SIZE * 7], 7);
        assert_eq!(result.image[TRACK_SIZE * 8 - 1], 7);
        assert_eq!(result.image[TRACK_SIZE * 8], 8);
        assert_eq!(result.label, "CPM-DISK");
        assert!(result.descriptor.is_none());
        assert_eq!(session.state(), SessionState::Idle);
        let reads = session.link().sent().iter().filter(|&&b| b == b'R').count();
        assert_eq!(reads, 40);
    }

    #[test]
    fn test_read_short_track_zero_filled() {
        let geometry = DiskType::OneSide40;
        let mut link = ScriptedLink::new()
            .reply(&[b'?', b'3'])
            .reply(&[b'0', b'Q', 16, 0, 0, 1, 1, 0, 0, 1, 0x00, 0x10, 0x04])
            .reply(&[geometry.command()]);
        for track in 0..40usize {
            // track 3 comes back 100 bytes short
            let len: u16 = if track == 3 { 4096 - 100 } else { 4096 };
            link = link.reply(&[len as u8, (len >> 8) as u8, 16]);
            link = link.reply(&vec![0xAA; len as usize]);
            link = link.reply(b"R");
        }
        let mut session = Session::new(link, config().with_geometry(geometry));
        session.connect().unwrap();

        let result = session.read_disk().unwrap();
        assert_eq!(result.bad_tracks, vec![3]);
        assert_eq!(result.image.len(), 40 * 4096 + 32);
        assert_eq!(result.image[3 * 4096], 0xAA);
        assert_eq!(result.image[3 * 4096 + 3995], 0xAA);
        assert!(result.image[3 * 4096 + 3996..4 * 4096].iter().all(|&b| b == 0));
        assert_eq!(result.image[4 * 4096], 0xAA);
        assert_eq!(&result.image[40 * 4096..], b"SPT=16 SSZ=0256 TRK=40 SID=1 MFM");
    }

    #[test]
    fn test_read_extended_geometry_from_header() {
        // configured 1S40T, but the disk is 10 x 256 FM
        let mut link = ScriptedLink::new()
            .reply(&[b'?', b'3'])
            .reply(&[b'0', b'Q', 10, 0, 0, 1, 1, 0, 0, 1, 0x00, 0x0A, 0x00])
            .reply(&[DiskType::OneSide40.command()]);
        for track in 0..40u8 {
            link = link.reply(&[0x00, 0x0A, 10]);
            link = link.reply(&vec![track; TRACK_SIZE]);
            link = link.reply(b"R");
        }
        let mut session = Session::new(link, config().with_geometry(DiskType::OneSide40));
        session.connect().unwrap();

        let result = session.read_disk().unwrap();
        assert!(result.bad_tracks.is_empty());
        assert_eq!(result.image.len(), 40 * TRACK_SIZE + 32);
        assert_eq!(result.image[TRACK_SIZE * 39], 39);
        assert!(result.image[40 * TRACK_SIZE..].starts_with(b"SPT=10 SSZ=0256 TRK=40 SID=1 FM"));
        assert_eq!(session.link().remaining(), 0);
    }

    #[test]
    fn test_read_80_track_selects_sy1() {
        let mut link = ScriptedLink::new()
            .reply(&[b'?', b'?'])
            .reply(&[b'0', b'Q', 2, b'1']);
        for track in 0..80u8 {
            link = link.reply(&baseline_track(track, b'R'));
        }
        let mut session = Session::new(link, config());
        session.connect().unwrap();

        let result = session.read_disk().unwrap();
        assert_eq!(result.disk_type, DiskType::OneSide80);
        assert_eq!(result.image.len(), 80 * TRACK_SIZE);
        assert!(result.bad_tracks.is_empty());
        assert_eq!(&session.link().sent()[2..6], &[b'0', b'Q', b'1', b'R']);
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_port_times_out() {
        use crate::serial::link::IoLink;
        use std::os::unix::net::UnixStream;

        let (host, _client) = UnixStream::pair().unwrap();
        host.set_read_timeout(Some(Duration::from_millis(1))).unwrap();
        let mut session = Session::new(IoLink::new(host, "socket"), config());
        assert!(matches!(session.connect(), Err(H8dError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_abort_mid_read() {
        let abort = AbortHandle::new();
        let mut link = ScriptedLink::new()
            .reply(&[b'?', b'?'])
            .reply(&[b'0', b'Q', 0, b'0']);
        for track in 0..40u8 {
            link = link.reply(&baseline_track(track, b'R'));
        }
        // connect (2) + select/query/drive (4) + two tracks and 100 bytes
        let link = link.abort_after(6 + 2 * (TRACK_SIZE + 1) + 100, abort.clone());
        let mut session = Session::new(link, config()).with_abort_handle(abort.clone());
        session.connect().unwrap();
        let sent_before = session.link().sent().len();

        assert!(matches!(session.read_disk(), Err(H8dError::Aborted)));
        assert_eq!(session.transferred(), 2 * TRACK_SIZE + 100);
        assert!(!abort.is_set());
        assert_eq!(session.state(), SessionState::Idle);

        let after = &session.link().sent()[sent_before..];
        assert_eq!(after.iter().filter(|&&b| b == b'?').count(), 1);
        assert_eq!(after.last(), Some(&b'?'));
        assert_eq!(session.link().remaining(), 0);
    }

    fn write_script(tracks: usize) -> ScriptedLink {
        let mut link = ScriptedLink::new()
            .reply(&[b'?', b'?'])
            .reply(b"0")
            .reply(b"5")
            .reply(b"V");
        for _ in 0..tracks {
            link = link.idle(2).reply(b"W");
        }
        link
    }

    #[test]
    fn test_write_2s40t_visits_80_tracks() {
        let data: Vec<u8> = (0..204800usize).map(|i| (i / TRACK_SIZE) as u8).collect();
        let image = DiskImage::from_bytes(data.clone(), "CPM");
        let mut session = Session::new(write_script(80), config());
        session.connect().unwrap();

        let summary = session.write_disk(&image).unwrap();
        assert_eq!(summary.tracks, 80);
        assert_eq!(summary.disk_type, DiskType::TwoSide40);
        assert_eq!(summary.volume, Some(0));
        assert_eq!(session.transferred(), data.len());

        let sent = &session.link().sent()[2..];
        assert_eq!(&sent[..4], &[b'0', b'5', b'V', 0]);
        assert_eq!(sent[4], b'W');
        let body = &sent[5..];
        assert_eq!(body.len(), 80 * (TRACK_SIZE + 1));
        for (track, chunk) in body.chunks(TRACK_SIZE + 1).enumerate() {
            assert_eq!(chunk[0], b'W');
            assert_eq!(&chunk[1..], &data[track * TRACK_SIZE..(track + 1) * TRACK_SIZE]);
        }
    }

    #[test]
    fn test_write_high_capacity_refused() {
        let image = DiskImage::from_bytes(vec![0u8; 409600], "BIG");
        let link = ScriptedLink::new().reply(&[b'?', b'?']).reply(b"?");
        let mut session = Session::new(link, config());
        session.connect().unwrap();

        assert!(matches!(
            session.write_disk(&image),
            Err(H8dError::GeometryMismatch(_))
        ));
        assert_eq!(session.link().sent(), b"?31");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_write_hdos_volume_override() {
        let mut data = vec![0u8; 102400];
        data[..4].copy_from_slice(&[0xC3, 0xA0, 0x22, 0x20]);
        data[HDOS_SERIAL_OFFSET] = 77;
        let image = DiskImage::from_bytes(data, "HDOS");

        let mut link = ScriptedLink::new().reply(&[b'?', b'?', b'0', b'4', b'V']);
        for _ in 0..40 {
            link = link.reply(b"W");
        }
        let mut session = Session::new(link, config().with_volume_override(12));
        session.connect().unwrap();
        let summary = session.write_disk(&image).unwrap();
        assert_eq!(summary.volume, Some(12));
        assert_eq!(summary.tracks, 40);
        assert_eq!(&session.link().sent()[2..6], &[b'0', b'4', b'V', 12]);
    }

    #[test]
    fn test_write_volume_rejected() {
        let image = DiskImage::from_bytes(vec![0u8; 102400], "X");
        let link = ScriptedLink::new().reply(&[b'?', b'?', b'0', b'4', b'?']);
        let mut session = Session::new(link, config());
        session.connect().unwrap();
        assert!(matches!(
            session.write_disk(&image),
            Err(H8dError::ProtocolMismatch { expected: b'V', .. })
        ));
        assert_eq!(session.link().sent().last(), Some(&b'?'));
    }

    #[test]
    fn test_extended_write_preamble() {
        let mut data = vec![0u8; 40 * 4096];
        data.extend_from_slice(b"SPT=16 SSZ=0256 TRK=40 SID=1 MFM");
        let image = DiskImage::from_bytes(data, "H37");

        let mut link = ScriptedLink::new().reply(&[b'?', b'3', b'0', b'4', b'W']);
        for _ in 0..40 {
            link = link.reply(b"WW");
        }
        let mut session = Session::new(link, config());
        session.connect().unwrap();
        let summary = session.write_disk(&image).unwrap();
        assert_eq!(summary.tracks, 40);
        assert_eq!(summary.volume, None);

        let sent = &session.link().sent()[2..];
        assert_eq!(&sent[..3], &[b'0', b'4', b'W']);
        assert_eq!(&sent[3..8], &[16, 1, 0x04, 0x10, 0x00]);
        assert_eq!(sent.len(), 8 + 40 * (4096 + 1));
    }

    #[test]
    fn test_format_disk() {
        let mut session = connected(ScriptedLink::new(), b'3');
        session.link.push_reply(b"5FFF");
        let preset = FormatPreset::for_sectors(9).unwrap();
        session
            .format_disk(DiskType::TwoSide40, preset, Density::Mfm)
            .unwrap();
        assert_eq!(&session.link().sent()[2..], &[b'5', b'F', 9, 2, 0x04]);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_examine_and_header() {
        let mut session = connected(ScriptedLink::new(), b'?');
        session.link.push_reply(b"0AT");
        session.link.push_reply(&[3]);
        assert_eq!(
            session.read_track_header(5, 0).unwrap(),
            QueryReply::DiskType(DiskType::TwoSide80)
        );
        assert_eq!(&session.link().sent()[2..], &[b'0', b'A', b'T', 5]);

        session.link.push_reply(b"0BE");
        session.link.push_reply(&vec![0x5A; TRACK_SIZE]);
        let data = session.examine_track(1, 1).unwrap();
        assert_eq!(data.len(), TRACK_SIZE);
        assert!(data.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_loader_and_baud() {
        let mut session = Session::new(ScriptedLink::new(), config());
        session.send_loader(&[1, 2, 3]).unwrap();
        session.save_loader().unwrap();
        assert_eq!(session.link().sent(), &[3, 2, 1, b'S']);

        let mut session = connected(ScriptedLink::new(), b'?');
        session.set_baud(BaudRate::B19200).unwrap();
        assert_eq!(session.link().sent().last(), Some(&b'('));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
