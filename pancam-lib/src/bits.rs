//! Bit-precise field extraction for fixed-layout telemetry blocks.
//!
//! Telemetry fields live at arbitrary byte + bit offsets with widths from 1
//! to 48 bits. Offsets are big-endian bit order: bit 0 is the most
//! significant bit of the byte.

/// Extract `width` bits starting `bit` bits into `dat[byte]` as an unsigned
/// value.
///
/// # Panics
/// If `width` is 0 or greater than 64, or the field extends past the end of
/// `dat`. Callers validate block lengths before extracting.
#[must_use]
pub fn unpack(dat: &[u8], byte: usize, bit: u32, width: u32) -> u64 {
    assert!(width >= 1 && width <= 64, "field width {width} out of range");
    let start = byte * 8 + bit as usize;
    let end = start + width as usize;
    assert!(
        end <= dat.len() * 8,
        "field [{byte}+{bit}b, {width} wide] extends past {} bytes",
        dat.len()
    );

    let mut val: u64 = 0;
    for pos in start..end {
        let b = (dat[pos / 8] >> (7 - pos % 8)) & 1;
        val = (val << 1) | u64::from(b);
    }
    val
}

/// Extract a signed (two's complement) field.
#[must_use]
pub fn unpack_signed(dat: &[u8], byte: usize, bit: u32, width: u32) -> i64 {
    let raw = unpack(dat, byte, bit, width);
    if width == 64 {
        return raw as i64;
    }
    let sign = 1u64 << (width - 1);
    if raw & sign == 0 {
        raw as i64
    } else {
        (raw as i64) - ((sign as i64) << 1)
    }
}

/// Write `width` bits of `value` starting `bit` bits into `dat[byte]`.
///
/// Used to construct synthetic blocks in tests and fixtures; the inverse of
/// [`unpack`] for all in-range values.
///
/// # Panics
/// Same conditions as [`unpack`], or if `value` does not fit in `width` bits.
pub fn pack(dat: &mut [u8], byte: usize, bit: u32, width: u32, value: u64) {
    assert!(width >= 1 && width <= 64, "field width {width} out of range");
    if width < 64 {
        assert!(
            value < (1u64 << width),
            "value {value:#x} wider than {width} bits"
        );
    }
    let start = byte * 8 + bit as usize;
    let end = start + width as usize;
    assert!(end <= dat.len() * 8);

    for (i, pos) in (start..end).enumerate() {
        let b = ((value >> (width as usize - 1 - i)) & 1) as u8;
        let mask = 1u8 << (7 - pos % 8);
        if b == 1 {
            dat[pos / 8] |= mask;
        } else {
            dat[pos / 8] &= !mask;
        }
    }
}
