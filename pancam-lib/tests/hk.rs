use pancam::bits::pack;
use pancam::hk::{
    camera, CameraResponse, HkDecoder, ESSENTIAL_LEN, HEADER_LEN, NON_ESSENTIAL_LEN, REGION_LEN,
};
use pancam::report::{Anomaly, RejectReason, Report};

fn block(essential: bool, cuc_coarse: u32) -> Vec<u8> {
    let len = if essential {
        ESSENTIAL_LEN
    } else {
        NON_ESSENTIAL_LEN
    };
    let mut b = vec![0u8; len];
    pack(&mut b, 0, 4, 4, 5); // instrument id
    pack(&mut b, 1, 0, 6, u64::from(!essential));
    pack(&mut b, 2, 0, 48, u64::from(cuc_coarse) << 16);
    pack(&mut b, 8, 0, 24, (len - HEADER_LEN) as u64);
    if !essential {
        pack(&mut b, 78, 0, 16, 288); // processor software version
    }
    b
}

fn wac_hk_region() -> [u8; REGION_LEN] {
    let mut region = [0u8; REGION_LEN];
    pack(&mut region, 0, 0, 2, 1); // housekeeping response
    pack(&mut region, 0, 2, 1, 1); // marker
    pack(&mut region, 0, 3, 2, 1); // memory check passed
    pack(&mut region, 0, 5, 3, 1); // wac id
    pack(&mut region, 1, 0, 48, 12_345);
    pack(&mut region, 7, 0, 48, 67_890);
    region[15] = crc::Crc::<u8>::new(&camera::CRC_8_WAC).checksum(&region[..15]);
    region
}

#[test]
fn essential_stream_decodes_with_cadence_intact() {
    let mut decoder = HkDecoder::new();
    let mut report = Report::new();
    let mut blob = Vec::new();
    for coarse in [100u32, 101, 102, 103] {
        blob.extend_from_slice(&block(true, coarse));
    }
    let records = decoder.decode_blob(&blob, true, &mut report);

    assert_eq!(records.len(), 4);
    assert!(report.is_empty(), "{:?}", report.entries());
    assert!(records.iter().all(|r| r.essential));
    assert!(records[0].utc.starts_with("2000-01-01T00:01:40"));
    assert_eq!(records[3].cuc_seconds - records[0].cuc_seconds, 3.0);
}

#[test]
fn corrupted_wac_checksum_is_flagged_but_record_kept() {
    let mut b = block(true, 50);
    b[43] = 1; // left WAC powered
    let mut region = wac_hk_region();
    region[5] ^= 0x01; // bit flip inside the protected span
    b[44..64].copy_from_slice(&region);

    let mut report = Report::new();
    let record = HkDecoder::new().decode(&b, &mut report).unwrap();

    // the record survives with a populated response
    match record.camera {
        Some(CameraResponse::WacHousekeeping(ref hk)) => {
            assert_eq!(hk.timestamp, 67_890);
        }
        ref other => panic!("unexpected {other:?}"),
    }
    assert!(report
        .entries()
        .iter()
        .any(|e| matches!(e.anomaly, Anomaly::ChecksumMismatch { .. })));
}

#[test]
fn clean_wac_response_raises_no_anomaly() {
    let mut b = block(true, 50);
    b[43] = 2; // right WAC powered
    b[44..64].copy_from_slice(&wac_hk_region());

    let mut report = Report::new();
    let record = HkDecoder::new().decode(&b, &mut report).unwrap();
    assert!(matches!(
        record.camera,
        Some(CameraResponse::WacHousekeeping(_))
    ));
    assert!(report.is_empty(), "{:?}", report.entries());
}

#[test]
fn mixed_blob_drops_only_bad_blocks() {
    let mut blob = block(false, 10);
    let mut bad = block(false, 11);
    pack(&mut bad, 0, 0, 1, 1); // not a telemetry block
    blob.extend_from_slice(&bad);
    blob.extend_from_slice(&block(false, 12));

    let mut report = Report::new();
    let records = HkDecoder::new().decode_blob(&blob, false, &mut report);

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].index, 0);
    assert_eq!(records[1].index, 2);
    match &report.entries()[0].anomaly {
        Anomaly::StructuralReject { reason, raw, index } => {
            assert_eq!(*reason, RejectReason::WrongBlockType);
            assert_eq!(*index, 1);
            // raw hex preserves the dropped block byte for byte
            assert_eq!(raw.len(), NON_ESSENTIAL_LEN * 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn records_serialize_for_the_table_output() {
    let mut report = Report::new();
    let record = HkDecoder::new()
        .decode(&block(false, 7), &mut report)
        .unwrap();
    let js = serde_json::to_value(&record).unwrap();
    assert_eq!(js["essential"], false);
    assert_eq!(js["header"]["instrument_id"], 5);
    assert_eq!(js["extended"]["piu_version"], 288);
    assert_eq!(js["violations"], serde_json::json!([]));
}
