//! Camera response region decoding.
//!
//! Bytes 44..64 of every housekeeping block mirror the last response the
//! processor unit received from whichever camera was powered. The region is
//! routed on the power state: wide-angle cameras prepend a 2-bit command id
//! and protect the first 15 bytes with an 8-bit checksum, the high
//! resolution camera tags its payload with an acknowledge code at byte 7.
//! Offsets below are relative to the start of the region.
use crc::{Algorithm, Crc};
use serde::Serialize;

use crate::bits::unpack;
use crate::report::{Anomaly, Report};

/// Checksum over the first 15 region bytes of wide-angle responses.
pub const CRC_8_WAC: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x4d,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xc3,
    residue: 0x00,
};

const WAC_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_WAC);

/// Length of the response region inside a housekeeping block.
pub const REGION_LEN: usize = 20;

/// Wide-angle self-test verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCheck {
    NotRun,
    Passed,
    Failed,
    /// Encoding outside the defined set.
    Invalid,
}

impl MemoryCheck {
    fn from_raw(value: u64) -> Self {
        match value {
            0 => MemoryCheck::NotRun,
            1 => MemoryCheck::Passed,
            2 => MemoryCheck::Failed,
            _ => MemoryCheck::Invalid,
        }
    }

    /// Failed or undefined verdicts are worth flagging.
    #[must_use]
    pub fn is_alarming(self) -> bool {
        matches!(self, MemoryCheck::Failed | MemoryCheck::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WacInitialAck {
    pub wac_id: u8,
    pub status: u8,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WacHousekeeping {
    pub wac_id: u8,
    pub memory_check: MemoryCheck,
    pub command_timestamp: u64,
    pub last_parameter: u16,
    pub inhibited: bool,
    pub auto_off: bool,
    pub timed_out: bool,
    pub memory_corrected: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WacDataTransfer {
    pub wac_id: u8,
    pub binning: u8,
    pub image_timestamp: u64,
    pub integration: u32,
    pub start_row: u16,
    pub inhibited: bool,
    pub auto_exposure: bool,
    pub padded: bool,
    pub gain: u8,
    pub dark_subtracted: bool,
    pub auto_exposure_stable: bool,
    pub image_crc: u16,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WacNegativeAck {
    pub wac_id: u8,
    pub error: u8,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcHousekeeping {
    pub status: u16,
    pub temperature: u16,
    pub encoder: u16,
    pub encoder_moving: bool,
    pub auto_iteration_active: bool,
    pub autofocus_active: bool,
    pub memory_busy: bool,
    pub frame_count: u8,
    pub gain: u8,
    pub exposure_stable: bool,
    pub image_ready: bool,
    pub encoder_error: bool,
    pub auto_iteration_error: bool,
    pub autofocus_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcRegisterBlock1 {
    pub motor_steps: u16,
    pub max_iterations: u16,
    pub min_iterations: u16,
    pub fpga_version: u8,
    pub firmware_version: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcRegisterBlock2 {
    pub integration: u32,
    pub window_x: u16,
    pub window_y: u16,
    pub subframe: bool,
    pub window_zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcRegisterBlock3 {
    pub readout_start: u16,
    pub pixel_count: u16,
    pub tolerance: u8,
    pub step_count: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcRegisterBlock4 {
    pub image_crc: u16,
    pub shutter: u16,
    pub auto_threshold_1: u16,
    pub auto_threshold_2: u16,
    pub auto_flags: [bool; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcMetadata {
    pub start_row: u16,
    pub integration: u32,
    pub window_x: u16,
    pub window_y: u16,
    pub subframe: bool,
    pub window_zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrcCommandAck {
    pub code: u8,
    pub ack: u8,
}

/// Decoded form of the response region.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum CameraResponse {
    WacInitialAck(WacInitialAck),
    WacHousekeeping(WacHousekeeping),
    WacDataTransfer(WacDataTransfer),
    WacNegativeAck(WacNegativeAck),
    HrcHousekeeping(HrcHousekeeping),
    HrcRegisterBlock1(HrcRegisterBlock1),
    HrcRegisterBlock2(HrcRegisterBlock2),
    HrcRegisterBlock3(HrcRegisterBlock3),
    HrcRegisterBlock4(HrcRegisterBlock4),
    HrcMetadata(HrcMetadata),
    HrcCommandAck(HrcCommandAck),
    /// No camera powered, or a power value that routes nowhere.
    Unrouted,
}

fn check_zero(report: &mut Report, index: usize, field: &'static str, value: u64) {
    if value != 0 {
        report.record(Anomaly::FieldInvariantViolation {
            index,
            field,
            value,
        });
    }
}

/// Route and decode one response region. `power` is the camera power
/// register from the same record. Violations land in `report`; decoding is
/// best effort and always yields a response.
pub(crate) fn decode_region(
    region: &[u8; REGION_LEN],
    power: u8,
    index: usize,
    report: &mut Report,
) -> CameraResponse {
    match power {
        0 => CameraResponse::Unrouted,
        1 | 2 => decode_wac(region, index, report),
        3 => decode_hrc(region, index, report),
        value => {
            report.record(Anomaly::FieldInvariantViolation {
                index,
                field: "camera_power",
                value: u64::from(value),
            });
            CameraResponse::Unrouted
        }
    }
}

fn decode_wac(region: &[u8; REGION_LEN], index: usize, report: &mut Report) -> CameraResponse {
    let cid = unpack(region, 0, 0, 2);
    let marker = unpack(region, 0, 2, 1);
    if marker != 1 {
        report.record(Anomaly::FieldInvariantViolation {
            index,
            field: "wac_marker",
            value: marker,
        });
    }
    let wac_id = unpack(region, 0, 5, 3) as u8;
    let timestamp = unpack(region, 7, 0, 48);

    // data transfers reuse the checksum byte for payload
    if cid != 2 {
        let computed = WAC_CRC.checksum(&region[..15]);
        let declared = region[15];
        if computed != declared {
            report.record(Anomaly::ChecksumMismatch {
                index,
                declared,
                computed,
            });
        }
    }

    match cid {
        0 => {
            check_zero(report, index, "wac_ia_reserved", unpack(region, 1, 0, 48));
            check_zero(report, index, "wac_ia_reserved", unpack(region, 13, 0, 16));
            check_zero(report, index, "wac_ia_reserved", unpack(region, 16, 0, 32));
            CameraResponse::WacInitialAck(WacInitialAck {
                wac_id,
                status: unpack(region, 0, 3, 2) as u8,
                timestamp,
            })
        }
        1 => {
            let memory_check = MemoryCheck::from_raw(unpack(region, 0, 3, 2));
            if memory_check.is_alarming() {
                report.record(Anomaly::FieldInvariantViolation {
                    index,
                    field: "wac_memory_check",
                    value: unpack(region, 0, 3, 2),
                });
            }
            check_zero(report, index, "wac_hk_reserved", unpack(region, 16, 0, 32));
            CameraResponse::WacHousekeeping(WacHousekeeping {
                wac_id,
                memory_check,
                command_timestamp: unpack(region, 1, 0, 48),
                last_parameter: unpack(region, 13, 0, 12) as u16,
                inhibited: unpack(region, 14, 4, 1) == 1,
                auto_off: unpack(region, 14, 5, 1) == 1,
                timed_out: unpack(region, 14, 6, 1) == 1,
                memory_corrected: unpack(region, 14, 7, 1) == 1,
                timestamp,
            })
        }
        2 => {
            check_zero(report, index, "wac_dt_reserved", unpack(region, 17, 7, 1));
            CameraResponse::WacDataTransfer(WacDataTransfer {
                wac_id,
                binning: unpack(region, 0, 3, 2) as u8,
                image_timestamp: unpack(region, 1, 0, 48),
                integration: unpack(region, 13, 0, 20) as u32,
                start_row: unpack(region, 15, 4, 12) as u16,
                inhibited: unpack(region, 17, 0, 1) == 1,
                auto_exposure: unpack(region, 17, 1, 1) == 1,
                padded: unpack(region, 17, 2, 1) == 1,
                gain: unpack(region, 17, 3, 2) as u8,
                dark_subtracted: unpack(region, 17, 5, 1) == 1,
                auto_exposure_stable: unpack(region, 17, 6, 1) == 1,
                image_crc: unpack(region, 18, 0, 16) as u16,
                timestamp,
            })
        }
        _ => {
            check_zero(report, index, "wac_nak_reserved", unpack(region, 0, 3, 2));
            check_zero(report, index, "wac_nak_reserved", unpack(region, 2, 0, 40));
            check_zero(report, index, "wac_nak_reserved", unpack(region, 13, 0, 16));
            check_zero(report, index, "wac_nak_reserved", unpack(region, 16, 0, 32));
            CameraResponse::WacNegativeAck(WacNegativeAck {
                wac_id,
                error: unpack(region, 1, 0, 8) as u8,
                timestamp,
            })
        }
    }
}

fn decode_hrc(region: &[u8; REGION_LEN], index: usize, report: &mut Report) -> CameraResponse {
    let ack = region[7];
    check_zero(report, index, "hrc_reserved", unpack(region, 8, 0, 32));
    check_zero(report, index, "hrc_reserved", unpack(region, 12, 0, 32));
    check_zero(report, index, "hrc_reserved", unpack(region, 16, 0, 32));

    match ack {
        0x02 => CameraResponse::HrcHousekeeping(HrcHousekeeping {
            status: unpack(region, 0, 0, 16) as u16,
            temperature: unpack(region, 2, 0, 10) as u16,
            encoder: unpack(region, 3, 3, 10) as u16,
            encoder_moving: unpack(region, 4, 4, 1) == 1,
            auto_iteration_active: unpack(region, 4, 5, 1) == 1,
            autofocus_active: unpack(region, 4, 6, 1) == 1,
            memory_busy: unpack(region, 4, 7, 1) == 1,
            frame_count: unpack(region, 5, 0, 8) as u8,
            gain: unpack(region, 6, 0, 2) as u8,
            exposure_stable: unpack(region, 6, 2, 1) == 1,
            image_ready: unpack(region, 6, 3, 1) == 1,
            encoder_error: unpack(region, 6, 5, 1) == 1,
            auto_iteration_error: unpack(region, 6, 6, 1) == 1,
            autofocus_error: unpack(region, 6, 7, 1) == 1,
        }),
        0x0c => CameraResponse::HrcRegisterBlock1(HrcRegisterBlock1 {
            motor_steps: unpack(region, 0, 0, 16) as u16,
            max_iterations: unpack(region, 2, 0, 16) as u16,
            min_iterations: unpack(region, 4, 0, 16) as u16,
            fpga_version: unpack(region, 6, 0, 3) as u8,
            firmware_version: unpack(region, 6, 3, 5) as u8,
        }),
        0x0d => {
            check_zero(report, index, "hrc_rb2_reserved", unpack(region, 0, 0, 4));
            check_zero(report, index, "hrc_rb2_reserved", unpack(region, 5, 4, 1));
            check_zero(report, index, "hrc_rb2_reserved", unpack(region, 6, 0, 8));
            CameraResponse::HrcRegisterBlock2(HrcRegisterBlock2 {
                integration: unpack(region, 0, 4, 20) as u32,
                window_x: unpack(region, 3, 0, 10) as u16,
                window_y: unpack(region, 4, 2, 10) as u16,
                subframe: unpack(region, 5, 5, 1) == 1,
                window_zoom: unpack(region, 5, 6, 2) as u8,
            })
        }
        0x10 => {
            check_zero(report, index, "hrc_rb3_reserved", unpack(region, 0, 0, 6));
            CameraResponse::HrcRegisterBlock3(HrcRegisterBlock3 {
                readout_start: unpack(region, 0, 6, 10) as u16,
                pixel_count: unpack(region, 2, 0, 16) as u16,
                tolerance: unpack(region, 4, 0, 8) as u8,
                step_count: unpack(region, 5, 0, 16) as u16,
            })
        }
        0x0e => CameraResponse::HrcRegisterBlock4(HrcRegisterBlock4 {
            image_crc: unpack(region, 0, 0, 16) as u16,
            shutter: unpack(region, 2, 0, 16) as u16,
            auto_threshold_1: unpack(region, 4, 0, 10) as u16,
            auto_threshold_2: unpack(region, 5, 2, 10) as u16,
            auto_flags: [
                unpack(region, 6, 4, 1) == 1,
                unpack(region, 6, 5, 1) == 1,
                unpack(region, 6, 6, 1) == 1,
                unpack(region, 6, 7, 1) == 1,
            ],
        }),
        0xb5 => {
            check_zero(report, index, "hrc_md_reserved", unpack(region, 1, 2, 2));
            check_zero(report, index, "hrc_md_reserved", unpack(region, 6, 4, 1));
            CameraResponse::HrcMetadata(HrcMetadata {
                start_row: unpack(region, 0, 0, 10) as u16,
                integration: unpack(region, 1, 4, 20) as u32,
                window_x: unpack(region, 4, 0, 10) as u16,
                window_y: unpack(region, 5, 2, 10) as u16,
                subframe: unpack(region, 6, 5, 1) == 1,
                window_zoom: unpack(region, 6, 6, 2) as u8,
            })
        }
        code => {
            check_zero(report, index, "hrc_ack_reserved", unpack(region, 1, 0, 48));
            CameraResponse::HrcCommandAck(HrcCommandAck {
                code: region[0],
                ack: code,
            })
        }
    }
}
