//! SWIS acquisition log exports.
//!
//! Two dialects of the same tool family:
//!
//! * standard: `<timestamp>] 0x12 0x34 ...` with a 12-byte link header and a
//!   1-byte trailer around the telemetry block;
//! * NSVF: `(<epoch>:<s>:<ms>:<us>) : 12 34 ...` with the same link header
//!   and a 3-byte trailer.
use std::io::BufRead;

use super::{Packet, PacketRole, SourceKind};
use crate::{Error, Result};

/// SpaceWire link header preceding the telemetry block.
const SPW_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwisDialect {
    Standard,
    Nsvf,
}

impl SwisDialect {
    fn separator(self) -> &'static str {
        match self {
            SwisDialect::Standard => "]",
            SwisDialect::Nsvf => " : ",
        }
    }

    fn trailer_len(self) -> usize {
        match self {
            SwisDialect::Standard => 1,
            SwisDialect::Nsvf => 3,
        }
    }
}

/// Iterator of [`Packet`] over one SWIS log export.
pub struct SwisFrames<R> {
    reader: R,
    dialect: SwisDialect,
    line: String,
    line_no: usize,
    done: bool,
}

impl<R> SwisFrames<R>
where
    R: BufRead,
{
    pub fn new(reader: R, dialect: SwisDialect) -> Self {
        SwisFrames {
            reader,
            dialect,
            line: String::new(),
            line_no: 0,
            done: false,
        }
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let Some((time, body)) = line.split_once(self.dialect.separator()) else {
                return Err(Error::framing(self.line_no, "missing frame separator"));
            };
            let hexbody: String = body
                .split_whitespace()
                .map(|tok| tok.trim_start_matches("0x"))
                .collect();
            let frame = hex::decode(&hexbody)
                .map_err(|err| Error::framing(self.line_no, format!("bad hex: {err}")))?;

            let strip = SPW_HEADER_LEN + self.dialect.trailer_len();
            if frame.len() <= strip {
                return Err(Error::framing(
                    self.line_no,
                    format!("frame of {} bytes shorter than link envelope", frame.len()),
                ));
            }
            let data = frame[SPW_HEADER_LEN..frame.len() - self.dialect.trailer_len()].to_vec();

            return Ok(Some(Packet {
                unit_id: 0,
                sequence: 0,
                role: PacketRole::Other,
                data,
                timestamp: Some(time.trim().trim_matches(['(', ')']).to_string()),
                source: SourceKind::Swis,
            }));
        }
    }
}

impl<R> Iterator for SwisFrames<R>
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_dialect_strips_link_envelope() {
        let mut body = String::new();
        for b in 0..16u8 {
            body.push_str(&format!(" 0x{b:02X}"));
        }
        let text = format!("2026-06-01 10:00:00]{body}\n");
        let packets: Vec<Packet> = SwisFrames::new(text.as_bytes(), SwisDialect::Standard)
            .map(Result::unwrap)
            .collect();
        assert_eq!(packets.len(), 1);
        // 12-byte header and 1-byte trailer removed
        assert_eq!(packets[0].data, &[12, 13, 14]);
        assert_eq!(packets[0].timestamp.as_deref(), Some("2026-06-01 10:00:00"));
        assert_eq!(packets[0].source, SourceKind::Swis);
    }

    #[test]
    fn nsvf_dialect_strips_link_envelope() {
        let raw: Vec<u8> = (0..20u8).collect();
        let text = format!("(1700000000:1:22:333) : {}\n", hex::encode(&raw));
        let packets: Vec<Packet> = SwisFrames::new(text.as_bytes(), SwisDialect::Nsvf)
            .map(Result::unwrap)
            .collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data, &[12, 13, 14, 15, 16]);
        assert_eq!(packets[0].timestamp.as_deref(), Some("1700000000:1:22:333"));
    }

    #[test]
    fn short_frame_is_framing_error() {
        let text = "t] 0x01 0x02\n";
        let mut frames = SwisFrames::new(text.as_bytes(), SwisDialect::Standard);
        assert!(matches!(frames.next(), Some(Err(Error::Framing { .. }))));
    }
}
