//! Rover `.ha` ASCII packet dumps.
//!
//! Layout: a 5-line preamble ending with `<BEGIN_DATA_BLOCK>`, then a
//! repeating pattern of 4 header lines per packet (timestamp, spare, packet
//! name, `<LENGTH>` token) followed by the packet body as hex lines of up to
//! 32 bytes each, terminated by `<END_DATA_BLOCK>`.
use std::io::BufRead;

use tracing::trace;

use super::{Packet, PacketRole, SourceKind};
use crate::{Error, Result};

const BEGIN_MARKER: &str = "<BEGIN_DATA_BLOCK>";
const END_MARKER: &str = "<END_DATA_BLOCK>";
const LENGTH_TAG: &str = "<LENGTH>";

/// Packet names of the three fragmented-transfer roles.
const LDT_FIRST: &str = "AB.TM.MRSS0697";
const LDT_MIDDLE: &str = "AB.TM.MRSS0698";
const LDT_END: &str = "AB.TM.MRSS0699";

/// Column at which the packet name starts on its header line.
const NAME_COLUMN: usize = 12;
/// Bytes of one full body line (64 hex characters).
const LINE_BYTES: usize = 32;
/// LDT region offset within the decoded block.
const LDT_OFFSET: usize = 16;
/// Trailing link CRC bytes, stripped and not verified.
const TRAILER_LEN: usize = 2;

/// Iterator of [`Packet`] over one `.ha` capture file.
///
/// The first framing violation ends iteration with an `Err`; per the error
/// policy a malformed capture aborts that file only.
pub struct HaFrames<R> {
    reader: R,
    line: String,
    line_no: usize,
    started: bool,
    done: bool,
}

impl<R> HaFrames<R>
where
    R: BufRead,
{
    pub fn new(reader: R) -> Self {
        HaFrames {
            reader,
            line: String::new(),
            line_no: 0,
            started: false,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<&str>> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        Ok(Some(self.line.trim_end_matches(['\r', '\n'])))
    }

    fn require_line(&mut self, what: &str) -> Result<String> {
        let line_no = self.line_no;
        match self.read_line()? {
            Some(s) => Ok(s.to_string()),
            None => Err(Error::framing(line_no, format!("{what}: line not found"))),
        }
    }

    fn read_preamble(&mut self) -> Result<()> {
        for _ in 0..4 {
            self.require_line("capture header")?;
        }
        let begin = self.require_line(BEGIN_MARKER)?;
        if begin != BEGIN_MARKER {
            return Err(Error::framing(
                self.line_no,
                format!("{BEGIN_MARKER}: line not found"),
            ));
        }
        Ok(())
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        if !self.started {
            self.read_preamble()?;
            self.started = true;
        }

        let first = self.require_line(END_MARKER)?;
        if first == END_MARKER {
            return Ok(None);
        }
        let timestamp = first.trim().to_string();

        self.require_line("packet header")?;
        let name_line = self.require_line("packet name")?;
        let length_line = self.require_line(LENGTH_TAG)?;
        if !length_line.starts_with(LENGTH_TAG) {
            return Err(Error::framing(
                self.line_no,
                format!("{LENGTH_TAG}: line not found"),
            ));
        }
        let len: usize = length_line[LENGTH_TAG.len()..]
            .trim()
            .parse()
            .map_err(|_| Error::framing(self.line_no, "bad <LENGTH> value"))?;

        let name = match name_line.get(NAME_COLUMN..) {
            Some(tail) => tail.trim().to_string(),
            None if name_line.len() < NAME_COLUMN => String::new(),
            // the name column lands inside a multi-byte character
            None => {
                return Err(Error::framing(
                    self.line_no,
                    "packet name line malformed at the name column",
                ))
            }
        };

        let body_lines = len.div_ceil(LINE_BYTES);
        let mut hexbody = String::with_capacity(len * 2);
        for _ in 0..body_lines {
            let line = self.require_line("packet body")?;
            hexbody.push_str(line.trim());
        }
        let bin = hex::decode(&hexbody)
            .map_err(|err| Error::framing(self.line_no, format!("bad hex in packet body: {err}")))?;
        if bin.len() != len {
            return Err(Error::framing(
                self.line_no,
                format!("body is {} bytes, <LENGTH> declared {len}", bin.len()),
            ));
        }

        let role = match name.as_str() {
            LDT_FIRST => PacketRole::First,
            LDT_MIDDLE => PacketRole::Middle,
            LDT_END => PacketRole::End,
            _ => PacketRole::Other,
        };
        trace!(line = self.line_no, %name, ?role, len, "framed packet");

        if role == PacketRole::Other {
            return Ok(Some(Packet {
                unit_id: 0,
                sequence: 0,
                role,
                data: bin,
                timestamp: Some(timestamp),
                source: SourceKind::RoverHa,
            }));
        }

        if bin.len() < LDT_OFFSET + 4 + TRAILER_LEN {
            return Err(Error::framing(
                self.line_no,
                format!("{name} packet too short for LDT header: {} bytes", bin.len()),
            ));
        }
        let unit_id = u16::from_be_bytes([bin[LDT_OFFSET], bin[LDT_OFFSET + 1]]);
        let sequence = u16::from_be_bytes([bin[LDT_OFFSET + 2], bin[LDT_OFFSET + 3]]);
        let data = bin[LDT_OFFSET + 4..bin.len() - TRAILER_LEN].to_vec();

        Ok(Some(Packet {
            unit_id,
            sequence,
            role,
            data,
            timestamp: Some(timestamp),
            source: SourceKind::RoverHa,
        }))
    }
}

impl<R> Iterator for HaFrames<R>
where
    R: BufRead,
{
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
