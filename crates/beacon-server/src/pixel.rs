//! The image beacon payload: a 1x1 transparent RGBA PNG.

/// PNG bytes served for every image beacon.
pub const PIXEL: [u8; 89] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x09, 0x70, 0x48, 0x59, 0x73, 0x00, 0x00, 0x0b, 0x12, 0x00, 0x00, 0x0b,
    0x12, 0x01, 0xd2, 0xdd, 0x7e, 0xfc, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x08, 0xd7,
    0x63, 0x60, 0x00, 0x02, 0x00, 0x00, 0x05, 0x00, 0x01, 0xe2, 0x26, 0x05, 0x9b, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Content type of [`PIXEL`].
pub const CONTENT_TYPE: &str = "image/png";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_a_png_with_iend_trailer() {
        assert_eq!(&PIXEL[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(&PIXEL[12..16], b"IHDR");
        assert_eq!(&PIXEL[PIXEL.len() - 8..PIXEL.len() - 4], b"IEND");
    }

    #[test]
    fn is_one_by_one() {
        assert_eq!(&PIXEL[16..20], &[0, 0, 0, 1]);
        assert_eq!(&PIXEL[20..24], &[0, 0, 0, 1]);
    }
}
