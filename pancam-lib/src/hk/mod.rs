//! Housekeeping block decoding.
//!
//! Housekeeping comes in two fixed-length block flavors sharing an 11-byte
//! header and a common field layout: essential blocks of 72 bytes and
//! non-essential blocks of 88 bytes, where the extra 16 bytes carry the
//! operational context (sol, task, filter wheel drive state). Structural
//! problems drop the block with its raw bytes preserved; field-level
//! problems annotate the kept record.
pub mod camera;

use serde::Serialize;
use tracing::warn;

use crate::bits::unpack;
use crate::report::{Anomaly, RejectReason, Report};
use crate::timecode::{cuc_delta, cuc_epoch, cuc_seconds};

pub use camera::{CameraResponse, MemoryCheck, REGION_LEN};

/// Total length of an essential housekeeping block.
pub const ESSENTIAL_LEN: usize = 72;
/// Total length of a non-essential housekeeping block.
pub const NON_ESSENTIAL_LEN: usize = 88;
/// Header bytes preceding the declared data length.
pub const HEADER_LEN: usize = 11;

const INSTRUMENT_ID: u8 = 5;
const PIU_VERSION: u16 = 288;

/// Expected spacing of consecutive essential blocks, seconds.
const ESSENTIAL_CADENCE: std::ops::RangeInclusive<f64> = 0.8..=1.5;
/// Largest unremarkable gap between non-essential blocks, seconds.
const NON_ESSENTIAL_GAP: f64 = 10.0;

/// Common 11-byte block header.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BlockHeader {
    pub criticality: u8,
    pub mms_destination: bool,
    pub instrument_id: u8,
    pub type_id: u8,
    pub sequence_flags: u8,
    /// 32.16 coarse/fine time, seconds since the mission epoch.
    pub cuc: u64,
    pub declared_len: u32,
}

/// Survival heater state, bytes 38..40.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HeaterStatus {
    pub enabled: bool,
    pub auto_mode: bool,
    pub level: u8,
    pub setpoint: u16,
}

/// One filter wheel status byte.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FilterWheelStatus {
    pub operating: bool,
    pub homed: bool,
    pub at_index: bool,
    pub position: u8,
}

/// Trailing 16 bytes of a non-essential block.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExtendedHousekeeping {
    pub sol: u16,
    pub task_id: u8,
    pub task_run: u8,
    pub camera: u8,
    pub filter_wheel: u8,
    pub image_number: u8,
    pub piu_version: u16,
    pub fwl_rti: u8,
    pub fwl_speed: u8,
    pub fwr_speed: u8,
    pub fwl_current: u16,
    pub fwr_current: u16,
    pub fwr_rti: u8,
    pub fwl_stall: u8,
    pub fwr_stall: u8,
}

/// One decoded housekeeping block.
#[derive(Debug, Clone, Serialize)]
pub struct HousekeepingRecord {
    /// Position in the decoded stream, shared with anomaly entries.
    pub index: usize,
    pub essential: bool,
    pub header: BlockHeader,
    pub cuc_seconds: f64,
    pub utc: String,
    pub voltages: [u16; 3],
    pub temperatures: [u16; 7],
    pub error_cmd: u8,
    pub error_fw: u8,
    pub error_lwac: u8,
    pub error_rwac: u8,
    pub error_hrc: u8,
    pub heater: HeaterStatus,
    pub filter_wheel_left: FilterWheelStatus,
    pub filter_wheel_right: FilterWheelStatus,
    pub cameras_enabled: u8,
    pub cameras_powered: u8,
    /// Raw response region, bytes 44..64.
    pub response_region: [u8; REGION_LEN],
    /// Decoded response, present only when the region latched a new value.
    pub camera: Option<CameraResponse>,
    pub filter_wheel_counts: [u16; 4],
    pub extended: Option<ExtendedHousekeeping>,
    /// Names of fields that violated an invariant in this block.
    pub violations: Vec<&'static str>,
}

fn filter_wheel_status(
    block: &[u8],
    at: usize,
    field: &'static str,
    violations: &mut Vec<&'static str>,
    index: usize,
    report: &mut Report,
) -> FilterWheelStatus {
    let reserved = unpack(block, at, 0, 1);
    if reserved != 0 {
        violations.push(field);
        report.record(Anomaly::FieldInvariantViolation {
            index,
            field,
            value: reserved,
        });
    }
    FilterWheelStatus {
        operating: unpack(block, at, 1, 1) == 1,
        homed: unpack(block, at, 2, 1) == 1,
        at_index: unpack(block, at, 3, 1) == 1,
        position: unpack(block, at, 4, 4) as u8,
    }
}

/// Stateful block decoder for one capture-ordered stream.
///
/// State covers the things a single block cannot know: the previous
/// response region for change detection and the previous timestamps for
/// cadence checks.
#[derive(Debug, Default)]
pub struct HkDecoder {
    index: usize,
    prev_region: Option<[u8; REGION_LEN]>,
    prev_essential_cuc: Option<u64>,
    prev_non_essential_cuc: Option<u64>,
}

impl HkDecoder {
    #[must_use]
    pub fn new() -> Self {
        HkDecoder::default()
    }

    /// Decode one block. `None` means the block was structurally rejected;
    /// the reject and its raw bytes are in `report`.
    pub fn decode(&mut self, block: &[u8], report: &mut Report) -> Option<HousekeepingRecord> {
        let index = self.index;
        self.index += 1;

        let reject = |report: &mut Report, reason: RejectReason| {
            report.record(Anomaly::StructuralReject {
                index,
                reason,
                raw: hex::encode(block),
            });
            None
        };

        let essential = match block.len() {
            ESSENTIAL_LEN => true,
            NON_ESSENTIAL_LEN => false,
            _ => return reject(report, RejectReason::UnknownLength),
        };
        if unpack(block, 0, 0, 1) != 0 {
            return reject(report, RejectReason::WrongBlockType);
        }

        let header = BlockHeader {
            criticality: unpack(block, 0, 1, 2) as u8,
            mms_destination: unpack(block, 0, 3, 1) == 1,
            instrument_id: unpack(block, 0, 4, 4) as u8,
            type_id: unpack(block, 1, 0, 6) as u8,
            sequence_flags: unpack(block, 1, 6, 2) as u8,
            cuc: unpack(block, 2, 0, 48),
            declared_len: unpack(block, 8, 0, 24) as u32,
        };

        if header.declared_len as usize + HEADER_LEN != block.len() {
            return reject(report, RejectReason::LengthMismatch);
        }
        let expected_type = u8::from(!essential);
        if header.type_id != expected_type {
            return reject(report, RejectReason::TypeLengthMismatch);
        }

        let mut violations: Vec<&'static str> = Vec::new();
        let check = |report: &mut Report,
                     violations: &mut Vec<&'static str>,
                     field: &'static str,
                     value: u64,
                     ok: bool| {
            if !ok {
                violations.push(field);
                report.record(Anomaly::FieldInvariantViolation {
                    index,
                    field,
                    value,
                });
            }
        };

        check(
            report,
            &mut violations,
            "instrument_id",
            u64::from(header.instrument_id),
            header.instrument_id == INSTRUMENT_ID,
        );
        check(
            report,
            &mut violations,
            "reserved_byte_11",
            u64::from(block[11]),
            block[11] == 0,
        );
        check(
            report,
            &mut violations,
            "reserved_byte_37",
            u64::from(block[37]),
            block[37] == 0,
        );

        self.check_cadence(essential, header.cuc, index, report);

        let cameras_powered = block[43];
        let mut response_region = [0u8; REGION_LEN];
        response_region.copy_from_slice(&block[44..64]);
        let camera = self.route_camera(&response_region, cameras_powered, index, report);

        let filter_wheel_left =
            filter_wheel_status(block, 40, "fwl_reserved", &mut violations, index, report);
        let filter_wheel_right =
            filter_wheel_status(block, 41, "fwr_reserved", &mut violations, index, report);

        let extended = if essential {
            None
        } else {
            check(
                report,
                &mut violations,
                "reserved_byte_77",
                unpack(block, 77, 0, 1),
                unpack(block, 77, 0, 1) == 0,
            );
            let piu_version = unpack(block, 78, 0, 16) as u16;
            check(
                report,
                &mut violations,
                "piu_version",
                u64::from(piu_version),
                piu_version == PIU_VERSION,
            );
            Some(ExtendedHousekeeping {
                sol: unpack(block, 72, 0, 12) as u16,
                task_id: unpack(block, 73, 4, 7) as u8,
                task_run: unpack(block, 74, 3, 7) as u8,
                camera: unpack(block, 75, 2, 2) as u8,
                filter_wheel: unpack(block, 75, 4, 4) as u8,
                image_number: block[76],
                piu_version,
                fwl_rti: block[80],
                fwl_speed: unpack(block, 81, 0, 4) as u8,
                fwr_speed: unpack(block, 81, 4, 4) as u8,
                fwl_current: unpack(block, 82, 0, 16) as u16,
                fwr_current: unpack(block, 84, 0, 16) as u16,
                fwr_rti: block[86],
                fwl_stall: unpack(block, 87, 0, 4) as u8,
                fwr_stall: unpack(block, 87, 4, 4) as u8,
            })
        };

        Some(HousekeepingRecord {
            index,
            essential,
            cuc_seconds: cuc_seconds(header.cuc),
            utc: cuc_epoch(header.cuc).to_string(),
            header,
            voltages: [
                unpack(block, 12, 0, 16) as u16,
                unpack(block, 14, 0, 16) as u16,
                unpack(block, 16, 0, 16) as u16,
            ],
            temperatures: [
                unpack(block, 18, 0, 16) as u16,
                unpack(block, 20, 0, 16) as u16,
                unpack(block, 22, 0, 16) as u16,
                unpack(block, 24, 0, 16) as u16,
                unpack(block, 26, 0, 16) as u16,
                unpack(block, 28, 0, 16) as u16,
                unpack(block, 30, 0, 16) as u16,
            ],
            error_cmd: block[32],
            error_fw: block[33],
            error_lwac: block[34],
            error_rwac: block[35],
            error_hrc: block[36],
            heater: HeaterStatus {
                enabled: unpack(block, 38, 0, 1) == 1,
                auto_mode: unpack(block, 38, 1, 1) == 1,
                level: unpack(block, 38, 2, 2) as u8,
                setpoint: unpack(block, 38, 4, 12) as u16,
            },
            filter_wheel_left,
            filter_wheel_right,
            cameras_enabled: block[42],
            cameras_powered,
            response_region,
            camera,
            filter_wheel_counts: [
                unpack(block, 64, 0, 16) as u16,
                unpack(block, 66, 0, 16) as u16,
                unpack(block, 68, 0, 16) as u16,
                unpack(block, 70, 0, 16) as u16,
            ],
            extended,
            violations,
        })
    }

    /// Decode every whole block of a reassembled blob. A trailing partial
    /// block is rejected with its bytes preserved.
    pub fn decode_blob(
        &mut self,
        blob: &[u8],
        essential: bool,
        report: &mut Report,
    ) -> Vec<HousekeepingRecord> {
        let block_len = if essential {
            ESSENTIAL_LEN
        } else {
            NON_ESSENTIAL_LEN
        };
        let chunks = blob.chunks_exact(block_len);
        let remainder = chunks.remainder();
        let mut records: Vec<HousekeepingRecord> = chunks
            .filter_map(|block| self.decode(block, report))
            .collect();
        if !remainder.is_empty() {
            let index = self.index;
            self.index += 1;
            report.record(Anomaly::StructuralReject {
                index,
                reason: RejectReason::UnknownLength,
                raw: hex::encode(remainder),
            });
        }
        records.shrink_to_fit();
        records
    }

    fn check_cadence(&mut self, essential: bool, cuc: u64, index: usize, report: &mut Report) {
        if essential {
            if let Some(prev) = self.prev_essential_cuc {
                let delta_secs = cuc_delta(cuc, prev);
                if !ESSENTIAL_CADENCE.contains(&delta_secs) {
                    report.record(Anomaly::CadenceAnomaly {
                        index,
                        essential: true,
                        delta_secs,
                    });
                }
            }
            self.prev_essential_cuc = Some(cuc);
        } else {
            if let Some(prev) = self.prev_non_essential_cuc {
                let delta_secs = cuc_delta(cuc, prev);
                if delta_secs > NON_ESSENTIAL_GAP {
                    report.record(Anomaly::CadenceAnomaly {
                        index,
                        essential: false,
                        delta_secs,
                    });
                }
            }
            self.prev_non_essential_cuc = Some(cuc);
        }
    }

    /// Decode the response region only when it latched a new value.
    fn route_camera(
        &mut self,
        region: &[u8; REGION_LEN],
        powered: u8,
        index: usize,
        report: &mut Report,
    ) -> Option<CameraResponse> {
        let changed = self.prev_region.is_none_or(|prev| prev != *region);
        let previously_seen = self.prev_region.is_some();
        self.prev_region = Some(*region);

        if !changed {
            return None;
        }
        if previously_seen && powered == 0 {
            // the region moved with every camera off; power was cycled
            // between samples
            warn!(index, "camera response changed while unpowered; likely reset");
        }
        if *region == [0u8; REGION_LEN] {
            return None;
        }
        Some(camera::decode_region(region, powered, index, report))
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bits::pack;

    /// Collects formatted log lines so tests can assert on them.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn block(essential: bool, cuc_coarse: u32) -> Vec<u8> {
        let len = if essential {
            ESSENTIAL_LEN
        } else {
            NON_ESSENTIAL_LEN
        };
        let mut b = vec![0u8; len];
        pack(&mut b, 0, 4, 4, u64::from(INSTRUMENT_ID));
        pack(&mut b, 1, 0, 6, u64::from(!essential));
        pack(&mut b, 2, 0, 48, u64::from(cuc_coarse) << 16);
        pack(&mut b, 8, 0, 24, (len - HEADER_LEN) as u64);
        if !essential {
            pack(&mut b, 78, 0, 16, u64::from(PIU_VERSION));
        }
        b
    }

    #[test]
    fn essential_block_decodes_clean() {
        let mut b = block(true, 1000);
        pack(&mut b, 12, 0, 16, 3301);
        pack(&mut b, 14, 0, 16, 1205);
        pack(&mut b, 18, 0, 16, 0x8123);
        b[32] = 2; // command errors
        b[35] = 1;
        pack(&mut b, 38, 0, 1, 1); // heater on
        pack(&mut b, 38, 4, 12, 0x456);
        pack(&mut b, 40, 2, 1, 1); // left wheel homed
        pack(&mut b, 40, 4, 4, 6);
        b[42] = 0x03;
        pack(&mut b, 64, 0, 16, 17);

        let mut report = Report::new();
        let record = HkDecoder::new().decode(&b, &mut report).unwrap();
        assert!(report.is_empty(), "{:?}", report.entries());
        assert!(record.essential);
        assert!(record.extended.is_none());
        assert_eq!(record.header.cuc >> 16, 1000);
        assert_eq!(record.cuc_seconds, 1000.0);
        assert_eq!(record.voltages, [3301, 1205, 0]);
        assert_eq!(record.temperatures[0], 0x8123);
        assert_eq!(record.error_cmd, 2);
        assert_eq!(record.error_rwac, 1);
        assert!(record.heater.enabled);
        assert_eq!(record.heater.setpoint, 0x456);
        assert!(record.filter_wheel_left.homed);
        assert_eq!(record.filter_wheel_left.position, 6);
        assert_eq!(record.cameras_enabled, 0x03);
        assert_eq!(record.filter_wheel_counts[0], 17);
        assert!(record.camera.is_none());
        assert!(record.violations.is_empty());
    }

    #[test]
    fn non_essential_block_has_extended_section() {
        let mut b = block(false, 5);
        pack(&mut b, 72, 0, 12, 123); // sol
        pack(&mut b, 73, 4, 7, 31);
        pack(&mut b, 74, 3, 7, 2);
        pack(&mut b, 75, 2, 2, 1);
        pack(&mut b, 75, 4, 4, 9);
        b[76] = 44;
        pack(&mut b, 82, 0, 16, 150);
        pack(&mut b, 87, 0, 4, 1);

        let mut report = Report::new();
        let record = HkDecoder::new().decode(&b, &mut report).unwrap();
        assert!(report.is_empty(), "{:?}", report.entries());
        let ext = record.extended.unwrap();
        assert_eq!(ext.sol, 123);
        assert_eq!(ext.task_id, 31);
        assert_eq!(ext.task_run, 2);
        assert_eq!(ext.camera, 1);
        assert_eq!(ext.filter_wheel, 9);
        assert_eq!(ext.image_number, 44);
        assert_eq!(ext.piu_version, PIU_VERSION);
        assert_eq!(ext.fwl_current, 150);
        assert_eq!(ext.fwl_stall, 1);
    }

    #[test]
    fn odd_length_is_rejected_with_raw() {
        let mut report = Report::new();
        assert!(HkDecoder::new().decode(&[0u8; 70], &mut report).is_none());
        match &report.entries()[0].anomaly {
            Anomaly::StructuralReject { reason, raw, .. } => {
                assert_eq!(*reason, RejectReason::UnknownLength);
                assert_eq!(raw.len(), 140);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_block_type_is_rejected() {
        let mut b = block(true, 0);
        pack(&mut b, 0, 0, 1, 1);
        let mut report = Report::new();
        assert!(HkDecoder::new().decode(&b, &mut report).is_none());
        assert!(matches!(
            report.entries()[0].anomaly,
            Anomaly::StructuralReject {
                reason: RejectReason::WrongBlockType,
                ..
            }
        ));
    }

    #[test]
    fn declared_length_must_match() {
        let mut b = block(true, 0);
        pack(&mut b, 8, 0, 24, 60);
        let mut report = Report::new();
        assert!(HkDecoder::new().decode(&b, &mut report).is_none());
        assert!(matches!(
            report.entries()[0].anomaly,
            Anomaly::StructuralReject {
                reason: RejectReason::LengthMismatch,
                ..
            }
        ));
    }

    #[test]
    fn type_id_must_agree_with_length() {
        let mut b = block(true, 0);
        pack(&mut b, 1, 0, 6, 1); // claims non-essential in a 72-byte block
        let mut report = Report::new();
        assert!(HkDecoder::new().decode(&b, &mut report).is_none());
        assert!(matches!(
            report.entries()[0].anomaly,
            Anomaly::StructuralReject {
                reason: RejectReason::TypeLengthMismatch,
                ..
            }
        ));
    }

    #[test]
    fn foreign_instrument_id_is_kept_but_flagged() {
        let mut b = block(true, 0);
        pack(&mut b, 0, 4, 4, 3);
        let mut report = Report::new();
        let record = HkDecoder::new().decode(&b, &mut report).unwrap();
        assert_eq!(record.violations, vec!["instrument_id"]);
        assert!(matches!(
            report.entries()[0].anomaly,
            Anomaly::FieldInvariantViolation {
                field: "instrument_id",
                value: 3,
                ..
            }
        ));
    }

    #[test]
    fn stale_piu_version_is_flagged() {
        let mut b = block(false, 0);
        pack(&mut b, 78, 0, 16, 287);
        let mut report = Report::new();
        let record = HkDecoder::new().decode(&b, &mut report).unwrap();
        assert!(record.violations.contains(&"piu_version"));
    }

    #[test]
    fn essential_cadence_window() {
        let mut decoder = HkDecoder::new();
        let mut report = Report::new();
        decoder.decode(&block(true, 100), &mut report);
        decoder.decode(&block(true, 101), &mut report); // 1.0 s, nominal
        decoder.decode(&block(true, 104), &mut report); // 3.0 s gap
        let entries = report.entries();
        assert_eq!(entries.len(), 1);
        match &entries[0].anomaly {
            Anomaly::CadenceAnomaly {
                essential,
                delta_secs,
                index,
            } => {
                assert!(*essential);
                assert_eq!(*delta_secs, 3.0);
                assert_eq!(*index, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_essential_gap_limit() {
        let mut decoder = HkDecoder::new();
        let mut report = Report::new();
        decoder.decode(&block(false, 100), &mut report);
        decoder.decode(&block(false, 109), &mut report); // 9 s, fine
        decoder.decode(&block(false, 120), &mut report); // 11 s gap
        assert_eq!(report.entries().len(), 1);
        assert!(matches!(
            report.entries()[0].anomaly,
            Anomaly::CadenceAnomaly {
                essential: false,
                ..
            }
        ));
    }

    #[test]
    fn camera_decoded_only_on_region_change() {
        let mut region = [0u8; REGION_LEN];
        pack(&mut region, 0, 0, 2, 3); // negative ack
        pack(&mut region, 0, 2, 1, 1);
        pack(&mut region, 1, 0, 8, 9);
        region[15] = crc::Crc::<u8>::new(&camera::CRC_8_WAC).checksum(&region[..15]);

        let blank = block(true, 1);
        let mut with_response = block(true, 2);
        with_response[43] = 1; // left WAC powered
        with_response[44..64].copy_from_slice(&region);
        let mut repeat = block(true, 3);
        repeat[43] = 1;
        repeat[44..64].copy_from_slice(&region);

        let mut decoder = HkDecoder::new();
        let mut report = Report::new();
        // all-zero region on the first record carries no response
        let first = decoder.decode(&blank, &mut report).unwrap();
        assert!(first.camera.is_none());
        let second = decoder.decode(&with_response, &mut report).unwrap();
        assert!(matches!(
            second.camera,
            Some(CameraResponse::WacNegativeAck(_))
        ));
        // unchanged region does not re-latch
        let third = decoder.decode(&repeat, &mut report).unwrap();
        assert!(third.camera.is_none());
        assert!(report.is_empty(), "{:?}", report.entries());
    }

    #[test]
    fn blanked_region_while_unpowered_warns_of_reset() {
        let mut region = [0u8; REGION_LEN];
        pack(&mut region, 0, 0, 2, 1); // housekeeping response
        pack(&mut region, 0, 2, 1, 1); // marker
        pack(&mut region, 0, 3, 2, 1); // memory check passed
        region[15] = crc::Crc::<u8>::new(&camera::CRC_8_WAC).checksum(&region[..15]);

        let mut active = block(true, 1);
        active[43] = 1; // left WAC powered
        active[44..64].copy_from_slice(&region);
        // next sample: region wiped, every camera off
        let blank = block(true, 2);

        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut decoder = HkDecoder::new();
            let mut report = Report::new();
            let first = decoder.decode(&active, &mut report).unwrap();
            assert!(first.camera.is_some());
            let second = decoder.decode(&blank, &mut report).unwrap();
            assert!(second.camera.is_none());
            assert!(report.is_empty(), "{:?}", report.entries());
        });
        let log = capture.contents();
        assert!(log.contains("changed while unpowered"), "{log}");
    }

    #[test]
    fn blob_remainder_is_rejected() {
        let mut blob = block(true, 1);
        blob.extend_from_slice(&block(true, 2));
        blob.extend_from_slice(&[0xaa; 5]);
        let mut report = Report::new();
        let records = HkDecoder::new().decode_blob(&blob, true, &mut report);
        assert_eq!(records.len(), 2);
        assert!(matches!(
            report.entries().last().unwrap().anomaly,
            Anomaly::StructuralReject {
                reason: RejectReason::UnknownLength,
                index: 2,
                ..
            }
        ));
    }
}
