use std::fs;
use std::path::{Path, PathBuf};

use pancam::framing::{open_frames, PacketRole, Transport};
use pancam::ldt::{FileSinkFactory, ReassemblyContext};
use tempfile::TempDir;

const LDT_FIRST: &str = "AB.TM.MRSS0697";
const LDT_MIDDLE: &str = "AB.TM.MRSS0698";
const LDT_END: &str = "AB.TM.MRSS0699";

/// Science file id: instrument 5, data type 2, counter 1.
const SCIENCE_FILE_ID: u16 = (5 << 11) | (2 << 9) | 1;

fn ldt_block(unit: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut block = vec![0u8; 16];
    block.extend_from_slice(&unit.to_be_bytes());
    block.extend_from_slice(&seq.to_be_bytes());
    block.extend_from_slice(data);
    block.extend_from_slice(&[0, 0]); // link crc
    block
}

fn first_data(file_id: u16, size: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![1u8];
    data.extend_from_slice(&file_id.to_be_bytes());
    data.extend_from_slice(&size.to_be_bytes());
    data.extend_from_slice(&[0, 0]);
    data.extend_from_slice(payload);
    data
}

fn ha_file(packets: &[(&str, Vec<u8>)]) -> String {
    let mut out = String::new();
    out.push_str("<MISSION> TEST\n<SESSION> 001\n<SOURCE> ROVER\n<VERSION> 1\n");
    out.push_str("<BEGIN_DATA_BLOCK>\n");
    for (name, body) in packets {
        out.push_str("2026-06-01T10:00:00.000\n<SPARE>\n");
        out.push_str(&format!("<PKT_NAME>  {name}\n"));
        out.push_str(&format!("<LENGTH>{}\n", body.len()));
        for chunk in body.chunks(32) {
            out.push_str(&hex::encode_upper(chunk));
            out.push('\n');
        }
    }
    out.push_str("<END_DATA_BLOCK>\n");
    out
}

fn run_capture(dir: &Path, text: &str) -> pancam::ldt::ReassemblyOutput {
    let capture = dir.join("capture.ha");
    fs::write(&capture, text).unwrap();

    let mut ctx = ReassemblyContext::new(FileSinkFactory::new(dir.join("out")));
    ctx.set_context("capture.ha");
    for packet in open_frames(&capture, Transport::RoverHa).unwrap() {
        let packet = packet.unwrap();
        if packet.role != PacketRole::Other {
            ctx.ingest(&packet).unwrap();
        }
    }
    ctx.finalize().unwrap()
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|e| e == ext))
        .collect();
    found.sort();
    found
}

#[test]
fn reordered_capture_reassembles_and_writes_sidecar() {
    let tmp = TempDir::new().unwrap();
    // end arrives before the middle fragment
    let text = ha_file(&[
        (LDT_FIRST, ldt_block(7, 0, &first_data(SCIENCE_FILE_ID, 12, &[0xaa; 4]))),
        (LDT_END, ldt_block(7, 2, &[])),
        (LDT_MIDDLE, ldt_block(7, 1, &[0xbb; 8])),
    ]);
    let out = run_capture(tmp.path(), &text);

    assert_eq!(out.transfers.len(), 1);
    assert!(out.transfers[0].outcome.complete);
    assert_eq!(out.transfers[0].outcome.bytes_written, 12);

    let blobs = files_with_extension(&tmp.path().join("out"), "bin");
    assert_eq!(blobs.len(), 1);
    let mut want = vec![0xaa; 4];
    want.extend_from_slice(&[0xbb; 8]);
    assert_eq!(fs::read(&blobs[0]).unwrap(), want);

    let sidecar: serde_json::Value =
        serde_json::from_slice(&fs::read(blobs[0].with_extension("json")).unwrap()).unwrap();
    assert_eq!(sidecar["unit_id"], 7);
    assert_eq!(sidecar["file_id"], SCIENCE_FILE_ID);
    assert_eq!(sidecar["occurrence"], 1);
    assert_eq!(sidecar["complete"], true);
    assert_eq!(sidecar["classification"], "likely_compressed");
    assert_eq!(sidecar["bytes_written"], 12);

    let summary = out.report.summary();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.counts["sequence_anomaly"], 1);
    assert_eq!(
        out.report.entries()[0].context.as_deref(),
        Some("capture.ha")
    );
}

#[test]
fn transfer_without_end_stays_partial() {
    let tmp = TempDir::new().unwrap();
    let text = ha_file(&[
        (LDT_FIRST, ldt_block(3, 0, &first_data(SCIENCE_FILE_ID, 99, &[1, 2, 3]))),
        (LDT_MIDDLE, ldt_block(3, 1, &[4, 5, 6])),
    ]);
    let out = run_capture(tmp.path(), &text);

    assert_eq!(out.transfers.len(), 1);
    assert!(!out.transfers[0].outcome.complete);

    let partials = files_with_extension(&tmp.path().join("out"), "partial");
    assert_eq!(partials.len(), 1);
    assert_eq!(fs::read(&partials[0]).unwrap(), vec![1, 2, 3, 4, 5, 6]);

    let sidecar: serde_json::Value =
        serde_json::from_slice(&fs::read(partials[0].with_extension("json")).unwrap()).unwrap();
    assert_eq!(sidecar["complete"], false);
    assert_eq!(out.report.summary().counts["incomplete_transfer"], 1);
}

#[test]
fn interleaved_units_do_not_mix() {
    let tmp = TempDir::new().unwrap();
    let text = ha_file(&[
        (LDT_FIRST, ldt_block(1, 0, &first_data(SCIENCE_FILE_ID, 2, &[0x11]))),
        (LDT_FIRST, ldt_block(2, 0, &first_data(SCIENCE_FILE_ID, 2, &[0x21]))),
        (LDT_MIDDLE, ldt_block(2, 1, &[0x22])),
        (LDT_MIDDLE, ldt_block(1, 1, &[0x12])),
        (LDT_END, ldt_block(1, 2, &[])),
        (LDT_END, ldt_block(2, 2, &[])),
    ]);
    let out = run_capture(tmp.path(), &text);

    assert!(out.report.is_empty(), "{:?}", out.report.entries());
    let blobs = files_with_extension(&tmp.path().join("out"), "bin");
    assert_eq!(blobs.len(), 2);
    assert_eq!(fs::read(&blobs[0]).unwrap(), vec![0x11, 0x12]);
    assert_eq!(fs::read(&blobs[1]).unwrap(), vec![0x21, 0x22]);
}

#[test]
fn malformed_capture_surfaces_framing_error() {
    let tmp = TempDir::new().unwrap();
    let capture = tmp.path().join("bad.ha");
    fs::write(&capture, "too\nshort\n").unwrap();

    let mut frames = open_frames(&capture, Transport::RoverHa).unwrap();
    assert!(matches!(frames.next(), Some(Err(pancam::Error::Framing { .. }))));
    assert!(frames.next().is_none());
}
