//! LabView RMAP exports.
//!
//! One frame per line: a timestamp token, the ` \t ` separator, then the
//! frame bytes as whitespace-separated hex pairs. Housekeeping and science
//! exports share the syntax; only the payload size differs.
use std::io::BufRead;

use super::{Packet, PacketRole, SourceKind};
use crate::{Error, Result};

const SEPARATOR: &str = " \t ";

/// Iterator of [`Packet`] over one LabView export file.
pub struct LabViewFrames<R> {
    reader: R,
    line: String,
    line_no: usize,
    done: bool,
}

impl<R> LabViewFrames<R>
where
    R: BufRead,
{
    pub fn new(reader: R) -> Self {
        LabViewFrames {
            reader,
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

            let Some((time, body)) = line.split_once(SEPARATOR) else {
                return Err(Error::framing(self.line_no, "missing frame separator"));
            };
            let hexbody: String = body.split_whitespace().collect();
            let data = hex::decode(&hexbody)
                .map_err(|err| Error::framing(self.line_no, format!("bad hex: {err}")))?;

            return Ok(Some(Packet {
                unit_id: 0,
                sequence: 0,
                role: PacketRole::Other,
                data,
                timestamp: Some(time.trim().to_string()),
                source: SourceKind::LabView,
            }));
        }
    }
}

impl<R> Iterator for LabViewFrames<R>
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
    fn frames_time_and_bytes() {
        let text = "12:00:01.250 \t 00\t01\tDE\tAD\n\n12:00:02.250 \t BE EF\n";
        let packets: Vec<Packet> = LabViewFrames::new(text.as_bytes())
            .map(Result::unwrap)
            .collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data, &[0x00, 0x01, 0xde, 0xad]);
        assert_eq!(packets[0].timestamp.as_deref(), Some("12:00:01.250"));
        assert_eq!(packets[0].role, PacketRole::Other);
        assert_eq!(packets[1].data, &[0xbe, 0xef]);
    }

    #[test]
    fn line_without_separator_is_framing_error() {
        let text = "justonefield\n";
        let mut frames = LabViewFrames::new(text.as_bytes());
        assert!(matches!(frames.next(), Some(Err(Error::Framing { .. }))));
        assert!(frames.next().is_none());
    }

    #[test]
    fn bad_hex_is_framing_error() {
        let text = "t \t ZZ XX\n";
        let mut frames = LabViewFrames::new(text.as_bytes());
        assert!(matches!(frames.next(), Some(Err(Error::Framing { .. }))));
    }
}
