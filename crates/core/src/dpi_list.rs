//! Decoder for the compact DPI preset list returned by the DPI features.
//!
//! The list is a sequence of big-endian 16-bit words:
//!   - `0x0000` terminates the list
//!   - `0b111x_xxxx_xxxx_xxxx` is a range marker: the low 13 bits are a step and
//!     the next word is the last value of the range, extending from the
//!     previous value in the list
//!   - anything else is a literal DPI value

/// Top three bits that flag a range marker word.
const RANGE_MARKER: u16 = 0xE000;
/// Step bits of a range marker word.
const RANGE_STEP_MASK: u16 = 0x1FFF;

/// Decode a DPI preset list.
///
/// Decoding is total: truncated, odd-length, or empty input decodes as far as
/// complete words allow. A range marker with nothing before it, or with a zero
/// step, adds nothing.
pub fn decode(bytes: &[u8]) -> Vec<u16> {
    let mut out: Vec<u16> = Vec::new();
    let mut words = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));

    while let Some(word) = words.next() {
        if word == 0 {
            break;
        }

        if word & RANGE_MARKER != RANGE_MARKER {
            out.push(word);
            continue;
        }

        let step = u32::from(word & RANGE_STEP_MASK);
        let Some(last) = words.next() else {
            break;
        };
        let Some(&base) = out.last() else {
            continue;
        };
        if step == 0 {
            continue;
        }

        let mut value = u32::from(base) + step;
        while value <= u32::from(last) {
            // value <= last <= u16::MAX
            out.push(value as u16);
            value += step;
        }
    }

    out
}

/// Whether a collected page stream already holds the list terminator.
pub fn is_terminated(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[bytes.len() - 2..] == [0x00, 0x00]
}
