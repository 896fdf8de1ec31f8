//! Event record writers.
//!
//! Five mutually exclusive formats produce one record per event.  The
//! variable formats carry a header with a field mask so a reader knows
//! which of the fifteen columns follow; the full formats have a fixed
//! schema, binary as a packed little-endian record.

use crate::error::{Error, Result};
use crate::event::Interaction;
use bitflags::bitflags;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Magic number opening the variable-format header.
pub const HEADER_MAGIC: i32 = 0xFFFB;
/// Version of the variable-format schema.
pub const HEADER_VERSION: i32 = 1;

bitflags! {
    /// Which columns a variable-format file carries.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct WriteFlags: u32 {
        /// Event time.
        const TIME = 1 << 0;
        /// Decay identifier.
        const DECAY_ID = 1 << 1;
        /// Photon color.
        const COLOR = 1 << 2;
        /// Interaction kind.
        const KIND = 1 << 3;
        /// Position, three columns.
        const POS = 1 << 4;
        /// Deposited energy.
        const ENERGY = 1 << 5;
        /// Detector id.
        const DET_ID = 1 << 6;
        /// Source id.
        const SRC_ID = 1 << 7;
        /// Material id.
        const MAT_ID = 1 << 8;
        /// Compton-in-phantom scatter flag.
        const SCATTER_COMPTON_PHANTOM = 1 << 9;
        /// Compton-in-detector scatter flag.
        const SCATTER_COMPTON_DETECTOR = 1 << 10;
        /// Rayleigh-in-phantom scatter flag.
        const SCATTER_RAYLEIGH_PHANTOM = 1 << 11;
        /// Rayleigh-in-detector scatter flag.
        const SCATTER_RAYLEIGH_DETECTOR = 1 << 12;
        /// X-ray fluorescence flag.
        const XRAY_FLOURESENCE = 1 << 13;
        /// Coincidence group id.
        const COINC_ID = 1 << 14;
    }
}

impl Default for WriteFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// The five output formats.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Format {
    /// Masked columns as text.
    VarAscii,
    /// Masked columns packed little-endian.
    VarBinary,
    /// Every column as text.
    #[default]
    FullAscii,
    /// The fixed packed record with position.
    FullBinary,
    /// The fixed packed record without position.
    NoPosBinary,
}

impl Format {
    /// Parses a format identifier as used by the scene language.
    ///
    /// # Errors
    ///
    /// Fails on unknown identifiers.
    pub fn parse(identifier: &str) -> Result<Self> {
        match identifier {
            "var_ascii" => Ok(Self::VarAscii),
            "var_binary" => Ok(Self::VarBinary),
            "full_ascii" => Ok(Self::FullAscii),
            "full_binary" => Ok(Self::FullBinary),
            "no_pos_binary" => Ok(Self::NoPosBinary),
            other => Err(Error::General(format!("unknown output format: {other}"))),
        }
    }
}

/// Packs the classification fields into the 32-bit log word of the fixed
/// binary formats.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn make_log_word(kind: i32, color: i32, scatter: i32, mat_id: i32, src_id: i32) -> i32 {
    ((kind << 28) & 0xF000_0000_u32 as i32)
        | ((color << 24) & 0x0F00_0000)
        | ((scatter << 20) & 0x00F0_0000)
        | ((mat_id << 12) & 0x000F_F000)
        | (src_id & 0x0000_0FFF)
}

/// One event-record writer.
pub struct Output {
    writer: BufWriter<Box<dyn Write + Send>>,
    format: Format,
    flags: WriteFlags,
}

impl Output {
    /// Opens `path` for writing.  The header (for the variable formats)
    /// is only written when `write_header` is set, so per-worker segments
    /// can be concatenated.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be created or the header write fails.
    pub fn to_file(
        path: &Path,
        format: Format,
        flags: WriteFlags,
        write_header: bool,
    ) -> Result<Self> {
        let file = File::create(path)
            .map_err(|err| Error::General(format!("{}: {err}", path.display())))?;
        Self::new(Box::new(file), format, flags, write_header)
    }

    /// Wraps an arbitrary sink.
    ///
    /// # Errors
    ///
    /// Fails when the header write fails.
    pub fn new(
        sink: Box<dyn Write + Send>,
        format: Format,
        flags: WriteFlags,
        write_header: bool,
    ) -> Result<Self> {
        let mut output = Self {
            writer: BufWriter::new(sink),
            format,
            flags,
        };
        if write_header {
            output.write_header()?;
        }
        Ok(output)
    }

    fn write_header(&mut self) -> Result<()> {
        let no_fields = i32::try_from(self.flags.iter().count()).unwrap_or(0);
        match self.format {
            Format::VarAscii => {
                writeln!(self.writer, "{} {}", HEADER_MAGIC, HEADER_VERSION)
                    .and_then(|()| {
                        writeln!(self.writer, "{} {}", no_fields, self.flags.bits())
                    })
                    .map_err(io_error)
            }
            Format::VarBinary => {
                let mut buf = Vec::with_capacity(16);
                buf.extend_from_slice(&HEADER_MAGIC.to_le_bytes());
                buf.extend_from_slice(&HEADER_VERSION.to_le_bytes());
                buf.extend_from_slice(&no_fields.to_le_bytes());
                buf.extend_from_slice(&self.flags.bits().to_le_bytes());
                self.writer.write_all(&buf).map_err(io_error)
            }
            // The fixed formats have no header.
            Format::FullAscii | Format::FullBinary | Format::NoPosBinary => Ok(()),
        }
    }

    /// Writes every non-dropped event of the range.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn log_events(&mut self, events: &[Interaction]) -> Result<()> {
        for event in events.iter().filter(|e| !e.dropped) {
            self.write_event(event)?;
        }
        Ok(())
    }

    /// Writes the non-dropped events accepted into a coincidence group.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn log_coinc(&mut self, events: &[Interaction]) -> Result<()> {
        for event in events.iter().filter(|e| !e.dropped && e.coinc_id >= 0) {
            self.write_event(event)?;
        }
        Ok(())
    }

    /// Flushes buffered records to the sink.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(io_error)
    }

    fn write_event(&mut self, event: &Interaction) -> Result<()> {
        match self.format {
            Format::VarAscii => self.write_var_ascii(event),
            Format::VarBinary => self.write_var_binary(event),
            Format::FullAscii => self.write_full_ascii(event),
            Format::FullBinary => self.write_fixed_binary(event, true),
            Format::NoPosBinary => self.write_fixed_binary(event, false),
        }
    }

    fn write_var_ascii(&mut self, event: &Interaction) -> Result<()> {
        let mut fields: Vec<String> = Vec::new();
        if self.flags.contains(WriteFlags::TIME) {
            fields.push(format!("{:.16e}", event.time));
        }
        if self.flags.contains(WriteFlags::DECAY_ID) {
            fields.push(event.decay_id.to_string());
        }
        if self.flags.contains(WriteFlags::COLOR) {
            fields.push(event.color.code().to_string());
        }
        if self.flags.contains(WriteFlags::KIND) {
            fields.push(event.kind.code().to_string());
        }
        if self.flags.contains(WriteFlags::POS) {
            fields.push(format!("{:.9e}", event.pos.x));
            fields.push(format!("{:.9e}", event.pos.y));
            fields.push(format!("{:.9e}", event.pos.z));
        }
        if self.flags.contains(WriteFlags::ENERGY) {
            fields.push(format!("{:.9e}", event.energy));
        }
        if self.flags.contains(WriteFlags::DET_ID) {
            fields.push(event.det_id.to_string());
        }
        if self.flags.contains(WriteFlags::SRC_ID) {
            fields.push(event.src_id.to_string());
        }
        if self.flags.contains(WriteFlags::MAT_ID) {
            fields.push(event.mat_id.to_string());
        }
        for (flag, value) in [
            (WriteFlags::SCATTER_COMPTON_PHANTOM, event.scatter_compton_phantom),
            (WriteFlags::SCATTER_COMPTON_DETECTOR, event.scatter_compton_detector),
            (WriteFlags::SCATTER_RAYLEIGH_PHANTOM, event.scatter_rayleigh_phantom),
            (WriteFlags::SCATTER_RAYLEIGH_DETECTOR, event.scatter_rayleigh_detector),
            (WriteFlags::XRAY_FLOURESENCE, event.xray_flouresence),
        ] {
            if self.flags.contains(flag) {
                fields.push(i32::from(value).to_string());
            }
        }
        if self.flags.contains(WriteFlags::COINC_ID) {
            fields.push(event.coinc_id.to_string());
        }
        writeln!(self.writer, "{}", fields.join(" ")).map_err(io_error)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_var_binary(&mut self, event: &Interaction) -> Result<()> {
        let mut buf: Vec<u8> = Vec::new();
        if self.flags.contains(WriteFlags::TIME) {
            buf.extend_from_slice(&event.time.to_le_bytes());
        }
        if self.flags.contains(WriteFlags::DECAY_ID) {
            buf.extend_from_slice(&(event.decay_id as i32).to_le_bytes());
        }
        if self.flags.contains(WriteFlags::COLOR) {
            buf.extend_from_slice(&event.color.code().to_le_bytes());
        }
        if self.flags.contains(WriteFlags::KIND) {
            buf.extend_from_slice(&event.kind.code().to_le_bytes());
        }
        if self.flags.contains(WriteFlags::POS) {
            buf.extend_from_slice(&(event.pos.x as f32).to_le_bytes());
            buf.extend_from_slice(&(event.pos.y as f32).to_le_bytes());
            buf.extend_from_slice(&(event.pos.z as f32).to_le_bytes());
        }
        if self.flags.contains(WriteFlags::ENERGY) {
            buf.extend_from_slice(&(event.energy as f32).to_le_bytes());
        }
        if self.flags.contains(WriteFlags::DET_ID) {
            buf.extend_from_slice(&event.det_id.to_le_bytes());
        }
        if self.flags.contains(WriteFlags::SRC_ID) {
            buf.extend_from_slice(&event.src_id.to_le_bytes());
        }
        if self.flags.contains(WriteFlags::MAT_ID) {
            buf.extend_from_slice(&event.mat_id.to_le_bytes());
        }
        for (flag, value) in [
            (WriteFlags::SCATTER_COMPTON_PHANTOM, event.scatter_compton_phantom),
            (WriteFlags::SCATTER_COMPTON_DETECTOR, event.scatter_compton_detector),
            (WriteFlags::SCATTER_RAYLEIGH_PHANTOM, event.scatter_rayleigh_phantom),
            (WriteFlags::SCATTER_RAYLEIGH_DETECTOR, event.scatter_rayleigh_detector),
            (WriteFlags::XRAY_FLOURESENCE, event.xray_flouresence),
        ] {
            if self.flags.contains(flag) {
                buf.push(u8::from(value));
            }
        }
        if self.flags.contains(WriteFlags::COINC_ID) {
            buf.extend_from_slice(&(event.coinc_id as i32).to_le_bytes());
        }
        self.writer.write_all(&buf).map_err(io_error)
    }

    fn write_full_ascii(&mut self, event: &Interaction) -> Result<()> {
        writeln!(
            self.writer,
            "{} {} {} {:.16e} {:.9e} {:.9e} {:.9e} {:.9e} {} {} {} {} {} {}",
            event.decay_id,
            event.kind.code(),
            event.color.code(),
            event.time,
            event.pos.x,
            event.pos.y,
            event.pos.z,
            event.energy,
            event.det_id,
            event.src_id,
            event.mat_id,
            event.scatter_code(),
            i32::from(event.xray_flouresence),
            event.coinc_id,
        )
        .map_err(io_error)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_fixed_binary(&mut self, event: &Interaction, with_pos: bool) -> Result<()> {
        let log_word = make_log_word(
            event.kind.code(),
            event.color.code(),
            event.scatter_code(),
            event.mat_id,
            event.src_id,
        );
        let mut buf: Vec<u8> = Vec::with_capacity(36);
        buf.extend_from_slice(&(event.decay_id as i32).to_le_bytes());
        buf.extend_from_slice(&event.time.to_le_bytes());
        buf.extend_from_slice(&(event.energy as f32).to_le_bytes());
        if with_pos {
            buf.extend_from_slice(&(event.pos.x as f32).to_le_bytes());
            buf.extend_from_slice(&(event.pos.y as f32).to_le_bytes());
            buf.extend_from_slice(&(event.pos.z as f32).to_le_bytes());
        }
        buf.extend_from_slice(&event.det_id.to_le_bytes());
        buf.extend_from_slice(&log_word.to_le_bytes());
        self.writer.write_all(&buf).map_err(io_error)
    }
}

fn io_error(err: std::io::Error) -> Error {
    Error::General(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Color, Interaction, Kind, NuclearDecay};
    use crate::vecmath::Vector3;
    use std::sync::{Arc, Mutex};

    /// A sink the test can read back after the writer is dropped.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sample_event() -> Interaction {
        let decay = NuclearDecay::new(7, 1.5e-9, 2, Vector3::new(1.0, 2.0, 3.0), 0.0);
        let mut event = Interaction::from_decay(&decay, 3);
        event.kind = Kind::Photoelectric;
        event.color = Color::Red;
        event.energy = 0.511;
        event.det_id = 12;
        event
    }

    #[test]
    fn log_word_packs_all_fields() {
        let word = make_log_word(3, 1, 0b0010, 5, 17);
        assert_eq!((word >> 28) & 0xF, 3);
        assert_eq!((word >> 24) & 0xF, 1);
        assert_eq!((word >> 20) & 0xF, 0b0010);
        assert_eq!((word >> 12) & 0xFF, 5);
        assert_eq!(word & 0xFFF, 17);
    }

    #[test]
    fn full_binary_record_has_the_fixed_layout() {
        let sink = SharedSink::default();
        let mut output = Output::new(
            Box::new(sink.clone()),
            Format::FullBinary,
            WriteFlags::all(),
            true,
        )
        .unwrap();
        output.log_events(&[sample_event()]).unwrap();
        output.flush().unwrap();

        let bytes = sink.0.lock().unwrap().clone();
        assert_eq!(bytes.len(), 36);
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 7);
        let time = f64::from_le_bytes(bytes[4..12].try_into().unwrap());
        float_cmp::assert_approx_eq!(f64, time, 1.5e-9);
        let det_id = i32::from_le_bytes(bytes[28..32].try_into().unwrap());
        assert_eq!(det_id, 12);
    }

    #[test]
    fn no_pos_binary_omits_the_position() {
        let sink = SharedSink::default();
        let mut output = Output::new(
            Box::new(sink.clone()),
            Format::NoPosBinary,
            WriteFlags::all(),
            true,
        )
        .unwrap();
        output.log_events(&[sample_event()]).unwrap();
        output.flush().unwrap();
        assert_eq!(sink.0.lock().unwrap().len(), 24);
    }

    #[test]
    fn var_binary_header_carries_magic_and_mask() {
        let sink = SharedSink::default();
        let flags = WriteFlags::TIME | WriteFlags::ENERGY;
        let mut output =
            Output::new(Box::new(sink.clone()), Format::VarBinary, flags, true).unwrap();
        output.flush().unwrap();

        let bytes = sink.0.lock().unwrap().clone();
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0xFFFB);
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
        assert_eq!(i32::from_le_bytes(bytes[8..12].try_into().unwrap()), 2);
        assert_eq!(
            u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            flags.bits()
        );
    }

    #[test]
    fn dropped_and_rejected_events_are_skipped() {
        let sink = SharedSink::default();
        let mut output = Output::new(
            Box::new(sink.clone()),
            Format::FullAscii,
            WriteFlags::all(),
            false,
        )
        .unwrap();
        let mut dropped = sample_event();
        dropped.dropped = true;
        let mut rejected = sample_event();
        rejected.coinc_id = -2;
        let mut accepted = sample_event();
        accepted.coinc_id = 0;
        output
            .log_coinc(&[dropped, rejected, accepted])
            .unwrap();
        output.flush().unwrap();

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn format_identifiers_parse() {
        assert_eq!(Format::parse("var_ascii").unwrap(), Format::VarAscii);
        assert_eq!(Format::parse("no_pos_binary").unwrap(), Format::NoPosBinary);
        assert!(Format::parse("csv").is_err());
    }
}
