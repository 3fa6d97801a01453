//! Nick scanline run decoder
//!
//! A scanline arrives as a sequence of 16-pixel groups. Each group starts
//! with a tag byte that selects how many payload bytes follow and how they
//! expand. Decoding always produces exactly [`LINE_WIDTH`] palette indices.

/// Decoded pixels per scanline
pub const LINE_WIDTH: usize = 768;

/// Output pixels produced by one tagged group
pub const GROUP_PIXELS: usize = 16;

/// Largest useful encoded scanline (48 groups of the widest tag)
pub const MAX_LINE_BYTES: usize = (LINE_WIDTH / GROUP_PIXELS) * 9;

/// Blank group, no payload
pub const TAG_BLANK: u8 = 0x00;
/// One colour for all 16 pixels
pub const TAG_FILL1: u8 = 0x01;
/// Two colours, 8 pixels each
pub const TAG_FILL2: u8 = 0x02;
/// Two-colour bitmap, 8 bits each doubled
pub const TAG_BITMAP8: u8 = 0x03;
/// Four colours, 4 pixels each
pub const TAG_FILL4: u8 = 0x04;
/// Two independent two-colour bitmaps of 8 pixels
pub const TAG_BITMAP16: u8 = 0x06;
/// Eight colours, 2 pixels each
pub const TAG_FILL8: u8 = 0x08;

/// Payload bytes following `tag`, or `None` for an unknown tag
#[inline]
pub fn payload_len(tag: u8) -> Option<usize> {
    match tag {
        TAG_BLANK => Some(0),
        TAG_FILL1 => Some(1),
        TAG_FILL2 => Some(2),
        TAG_BITMAP8 => Some(3),
        TAG_FILL4 => Some(4),
        TAG_BITMAP16 => Some(6),
        TAG_FILL8 => Some(8),
        _ => None,
    }
}

#[inline]
fn expand_bits(out: &mut [u8], c0: u8, c1: u8, bits: u8) {
    for (i, px) in out.iter_mut().enumerate() {
        *px = if bits & (0x80 >> i) != 0 { c1 } else { c0 };
    }
}

/// Decode one encoded scanline into `out`
///
/// An unknown tag, or a group whose payload is cut short, ends the data:
/// the rest of the line is filled with palette index 0. Encoded bytes past
/// the last group are ignored.
pub fn decode_line(out: &mut [u8; LINE_WIDTH], encoded: &[u8]) {
    let mut pos = 0;
    let mut src = encoded;

    while pos < LINE_WIDTH {
        let Some(&tag) = src.first() else { break };
        let Some(n) = payload_len(tag) else { break };
        let Some(p) = src.get(1..=n) else { break };
        let group = &mut out[pos..pos + GROUP_PIXELS];

        match tag {
            TAG_BLANK => group.fill(0),
            TAG_FILL1 => group.fill(p[0]),
            TAG_FILL2 => {
                group[..8].fill(p[0]);
                group[8..].fill(p[1]);
            }
            TAG_BITMAP8 => {
                for (i, pair) in group.chunks_exact_mut(2).enumerate() {
                    let c = if p[2] & (0x80 >> i) != 0 { p[1] } else { p[0] };
                    pair.fill(c);
                }
            }
            TAG_FILL4 => {
                for (quad, &c) in group.chunks_exact_mut(4).zip(p) {
                    quad.fill(c);
                }
            }
            TAG_BITMAP16 => {
                let (lo, hi) = group.split_at_mut(8);
                expand_bits(lo, p[0], p[1], p[2]);
                expand_bits(hi, p[3], p[4], p[5]);
            }
            _ => {
                for (pair, &c) in group.chunks_exact_mut(2).zip(p) {
                    pair.fill(c);
                }
            }
        }

        pos += GROUP_PIXELS;
        src = &src[n + 1..];
    }

    out[pos..].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn decoded(encoded: &[u8]) -> Vec<u8> {
        let mut out = [0xEEu8; LINE_WIDTH];
        decode_line(&mut out, encoded);
        out.to_vec()
    }

    #[test]
    fn test_blank_tag_alone_is_all_zero() {
        assert_eq!(decoded(&[0x00]), vec![0u8; LINE_WIDTH]);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        assert_eq!(decoded(&[]), vec![0u8; LINE_WIDTH]);
    }

    #[test]
    fn test_each_tag_layout() {
        let line = decoded(&[
            0x01, 0x11, //
            0x02, 0x21, 0x22, //
            0x03, 0x30, 0x31, 0b1010_0001, //
            0x04, 0x41, 0x42, 0x43, 0x44, //
            0x06, 0x60, 0x61, 0xF0, 0x62, 0x63, 0x0F, //
            0x08, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88,
        ]);
        assert_eq!(&line[0..16], &[0x11; 16]);
        assert_eq!(&line[16..24], &[0x21; 8]);
        assert_eq!(&line[24..32], &[0x22; 8]);
        assert_eq!(
            &line[32..48],
            &[
                0x31, 0x31, 0x30, 0x30, 0x31, 0x31, 0x30, 0x30, //
                0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x31, 0x31
            ]
        );
        assert_eq!(
            &line[48..64],
            &[
                0x41, 0x41, 0x41, 0x41, 0x42, 0x42, 0x42, 0x42, //
                0x43, 0x43, 0x43, 0x43, 0x44, 0x44, 0x44, 0x44
            ]
        );
        assert_eq!(&line[64..68], &[0x61; 4]);
        assert_eq!(&line[68..72], &[0x60; 4]);
        assert_eq!(&line[72..76], &[0x62; 4]);
        assert_eq!(&line[76..80], &[0x63; 4]);
        assert_eq!(&line[80..82], &[0x81; 2]);
        assert_eq!(&line[94..96], &[0x88; 2]);
        // data ran out after six groups
        assert!(line[96..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unknown_tag_blanks_remainder() {
        let line = decoded(&[0x01, 0x55, 0x07, 0x01, 0x66]);
        assert_eq!(&line[..16], &[0x55; 16]);
        assert!(line[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_payload_blanks_remainder() {
        let line = decoded(&[0x01, 0x55, 0x08, 0x01, 0x02]);
        assert_eq!(&line[..16], &[0x55; 16]);
        assert!(line[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overlong_input_stops_at_width() {
        let mut encoded = Vec::new();
        for _ in 0..60 {
            encoded.extend_from_slice(&[0x01, 0x77]);
        }
        assert_eq!(decoded(&encoded), vec![0x77u8; LINE_WIDTH]);
    }

    #[test]
    fn test_random_runs_never_overrun() {
        let mut rng = StdRng::seed_from_u64(0x4E49_434B);
        let tags = [0x00u8, 0x01, 0x02, 0x03, 0x04, 0x06, 0x08, 0x05, 0xFF];
        for _ in 0..2000 {
            let len = rng.gen_range(0..1200);
            let encoded: Vec<u8> = (0..len)
                .map(|_| {
                    if rng.gen_bool(0.3) {
                        tags[rng.gen_range(0..tags.len())]
                    } else {
                        rng.gen()
                    }
                })
                .collect();
            // guard bytes either side of the line must survive
            let mut buf = [0xA5u8; LINE_WIDTH + 32];
            let line: &mut [u8; LINE_WIDTH] = (&mut buf[16..16 + LINE_WIDTH]).try_into().unwrap();
            decode_line(line, &encoded);
            assert!(buf[..16].iter().all(|&b| b == 0xA5));
            assert!(buf[16 + LINE_WIDTH..].iter().all(|&b| b == 0xA5));
        }
    }

    #[test]
    fn test_max_line_bytes_fills_width() {
        let mut encoded = Vec::with_capacity(MAX_LINE_BYTES);
        for g in 0..(LINE_WIDTH / GROUP_PIXELS) as u8 {
            encoded.push(TAG_FILL8);
            encoded.extend_from_slice(&[g; 8]);
        }
        assert_eq!(encoded.len(), MAX_LINE_BYTES);
        let line = decoded(&encoded);
        assert_eq!(line[LINE_WIDTH - 1], 47);
    }
}
