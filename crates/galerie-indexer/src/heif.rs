//! Minimal ISO-BMFF box parsing for HEIC/HEIF headers.
//!
//! Pixel decoding for HEIF is out of reach for the pure-Rust stack, but the
//! intrinsic dimensions live in plain `ispe` property boxes that a small box
//! walk can reach without touching any image data. When a file carries
//! several `ispe` boxes (thumbnails, auxiliary images), the largest one is
//! taken as the primary image.

/// Read image dimensions from HEIC/HEIF container bytes.
///
/// Returns `None` when the data is not a parseable ISO-BMFF container or no
/// `ispe` box is present.
pub fn read_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    // Sanity check: the first box must be `ftyp`.
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return None;
    }

    let mut best: Option<(u32, u32)> = None;
    let _ = walk_boxes(data, 0, &mut best);
    best
}

/// Container boxes whose payload is itself a sequence of boxes.
fn is_container(box_type: &[u8]) -> bool {
    matches!(box_type, b"meta" | b"iprp" | b"ipco")
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
}

fn walk_boxes(data: &[u8], depth: u8, best: &mut Option<(u32, u32)>) -> Option<()> {
    // meta/iprp/ipco nesting is three levels; anything deeper is malformed.
    if depth > 4 {
        return None;
    }

    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let size32 = read_u32(data, offset)? as u64;
        let box_type = &data[offset + 4..offset + 8];

        let (size, header_len) = match size32 {
            0 => ((data.len() - offset) as u64, 8usize),
            1 => (read_u64(data, offset + 8)?, 16usize),
            n => (n, 8usize),
        };

        if size < header_len as u64 {
            return None;
        }
        let end = (offset as u64).checked_add(size)?.min(data.len() as u64) as usize;

        if box_type == b"ispe" {
            // FullBox: 4 bytes version/flags, then width and height.
            let payload = &data[offset + header_len..end];
            if payload.len() >= 12 {
                let width = read_u32(payload, 4)?;
                let height = read_u32(payload, 8)?;
                if width > 0 && height > 0 {
                    let area = width as u64 * height as u64;
                    let best_area = best.map(|(w, h)| w as u64 * h as u64).unwrap_or(0);
                    if area > best_area {
                        *best = Some((width, height));
                    }
                }
            }
        } else if is_container(box_type) {
            // `meta` is a FullBox; skip its version/flags before recursing.
            let skip = if box_type == b"meta" { 4 } else { 0 };
            let inner_start = offset + header_len + skip;
            if inner_start < end {
                let _ = walk_boxes(&data[inner_start..end], depth + 1, best);
            }
        }

        offset = end;
    }

    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() as u32 + 8).to_be_bytes()));
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    fn make_full_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut inner = vec![0u8; 4]; // version + flags
        inner.extend_from_slice(payload);
        make_box(box_type, &inner)
    }

    fn make_ispe(width: u32, height: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        make_full_box(b"ispe", &payload)
    }

    fn make_heic(ispe_boxes: Vec<Vec<u8>>) -> Vec<u8> {
        let ipco = make_box(b"ipco", &ispe_boxes.concat());
        let iprp = make_box(b"iprp", &ipco);
        let meta = make_full_box(b"meta", &iprp);

        let mut out = make_box(b"ftyp", b"heic\x00\x00\x00\x00mif1heic");
        out.extend_from_slice(&meta);
        out
    }

    #[test]
    fn test_read_dimensions() {
        let data = make_heic(vec![make_ispe(4032, 3024)]);
        assert_eq!(read_dimensions(&data), Some((4032, 3024)));
    }

    #[test]
    fn test_largest_ispe_wins() {
        // Thumbnail property first, primary image second
        let data = make_heic(vec![make_ispe(240, 180), make_ispe(4032, 3024)]);
        assert_eq!(read_dimensions(&data), Some((4032, 3024)));
    }

    #[test]
    fn test_missing_ftyp() {
        assert_eq!(read_dimensions(b"not a heic file at all"), None);
    }

    #[test]
    fn test_no_ispe_box() {
        let data = make_heic(vec![]);
        assert_eq!(read_dimensions(&data), None);
    }

    #[test]
    fn test_truncated_container() {
        let mut data = make_heic(vec![make_ispe(100, 50)]);
        data.truncate(20);
        assert_eq!(read_dimensions(&data), None);
    }
}
