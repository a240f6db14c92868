//! JFIF header construction for RTP/JPEG frames (RFC 2435 Appendix A, B).
//!
//! RTP/JPEG strips every marker segment and sends only the entropy-coded
//! scan. The receiver rebuilds the headers from the 8-byte main header
//! (type, Q, dimensions) using the standard tables of ITU-T T.81 Annex K.

/// Luminance quantization table in zig-zag order (T.81 Annex K.1).
const LUMA_QUANTIZER: [u8; 64] = [
    16, 11, 12, 14, 12, 10, 16, 14, 13, 14, 18, 17, 16, 19, 24, 40, 26, 24, 22, 22, 24, 49, 35,
    37, 29, 40, 58, 51, 61, 60, 57, 51, 56, 55, 64, 72, 92, 78, 64, 68, 87, 69, 55, 56, 80, 109,
    81, 87, 95, 98, 103, 104, 103, 62, 77, 113, 121, 112, 100, 120, 92, 101, 103, 99,
];

/// Chrominance quantization table in zig-zag order (T.81 Annex K.1).
const CHROMA_QUANTIZER: [u8; 64] = [
    17, 18, 18, 24, 21, 24, 47, 26, 26, 47, 99, 66, 56, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
];

const LUM_DC_CODELENS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const LUM_DC_SYMBOLS: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const LUM_AC_CODELENS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7d];
const LUM_AC_SYMBOLS: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61,
    0x07, 0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xa1, 0x08, 0x23, 0x42, 0xb1, 0xc1, 0x15, 0x52,
    0xd1, 0xf0, 0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0a, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x25,
    0x26, 0x27, 0x28, 0x29, 0x2a, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45,
    0x46, 0x47, 0x48, 0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64,
    0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x83,
    0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99,
    0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6,
    0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3,
    0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe1, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8,
    0xe9, 0xea, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa,
];

const CHM_DC_CODELENS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const CHM_DC_SYMBOLS: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const CHM_AC_CODELENS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
const CHM_AC_SYMBOLS: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61,
    0x71, 0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xa1, 0xb1, 0xc1, 0x09, 0x23, 0x33,
    0x52, 0xf0, 0x15, 0x62, 0x72, 0xd1, 0x0a, 0x16, 0x24, 0x34, 0xe1, 0x25, 0xf1, 0x17, 0x18,
    0x19, 0x1a, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44,
    0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63,
    0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a,
    0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97,
    0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4,
    0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca,
    0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7,
    0xe8, 0xe9, 0xea, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa,
];

pub const SOI: [u8; 2] = [0xff, 0xd8];
pub const EOI: [u8; 2] = [0xff, 0xd9];

/// Scale the standard tables by quality factor `q` (1..=99).
///
/// Returns 128 bytes: luminance then chrominance, both zig-zag ordered.
pub fn make_qtables(q: u8) -> Vec<u8> {
    let factor = q.clamp(1, 99) as u32;
    let scale = if factor < 50 {
        5000 / factor
    } else {
        200 - factor * 2
    };

    let scaled = |v: u8| ((v as u32 * scale + 50) / 100).clamp(1, 255) as u8;
    let mut tables = Vec::with_capacity(128);
    tables.extend(LUMA_QUANTIZER.iter().map(|&v| scaled(v)));
    tables.extend(CHROMA_QUANTIZER.iter().map(|&v| scaled(v)));
    tables
}

fn segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.extend_from_slice(&[0xff, marker]);
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
}

/// APP0 JFIF 1.1 segment with square pixels and no thumbnail.
fn app0(out: &mut Vec<u8>) {
    segment(
        out,
        0xe0,
        &[b'J', b'F', b'I', b'F', 0, 1, 1, 0, 0, 1, 0, 1, 0, 0],
    );
}

/// One DQT segment per table. `precision` bit `i` marks table `i` as
/// 16-bit (RFC 2435 §3.1.8).
fn dqt(out: &mut Vec<u8>, precision: u8, tables: &[u8]) {
    let mut offset = 0;
    for id in 0..2u8 {
        let wide = precision & (1 << id) != 0;
        let len = if wide { 128 } else { 64 };
        let Some(table) = tables.get(offset..offset + len) else {
            break;
        };
        let mut body = Vec::with_capacity(len + 1);
        body.push(((wide as u8) << 4) | id);
        body.extend_from_slice(table);
        segment(out, 0xdb, &body);
        offset += len;
    }
}

/// Baseline frame header. Type 0 is 4:2:2 (h2v1), type 1 is 4:2:0 (h2v2).
fn sof0(out: &mut Vec<u8>, width: u32, height: u32, jpeg_type: u8) {
    let luma_sampling = if jpeg_type & 1 == 0 { 0x21 } else { 0x22 };
    let mut body = vec![8];
    body.extend_from_slice(&(height as u16).to_be_bytes());
    body.extend_from_slice(&(width as u16).to_be_bytes());
    body.extend_from_slice(&[3, 0, luma_sampling, 0, 1, 0x11, 1, 2, 0x11, 1]);
    segment(out, 0xc0, &body);
}

fn dht(out: &mut Vec<u8>, class_id: u8, codelens: &[u8; 16], symbols: &[u8]) {
    let mut body = Vec::with_capacity(17 + symbols.len());
    body.push(class_id);
    body.extend_from_slice(codelens);
    body.extend_from_slice(symbols);
    segment(out, 0xc4, &body);
}

fn sos(out: &mut Vec<u8>) {
    segment(out, 0xda, &[3, 0, 0x00, 1, 0x11, 2, 0x11, 0, 63, 0]);
}

/// Build every segment from SOI up to and including SOS.
pub fn make_headers(
    jpeg_type: u8,
    width: u32,
    height: u32,
    precision: u8,
    qtables: &[u8],
    restart_interval: u16,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(700);
    out.extend_from_slice(&SOI);
    app0(&mut out);
    dqt(&mut out, precision, qtables);
    if restart_interval != 0 {
        segment(&mut out, 0xdd, &restart_interval.to_be_bytes());
    }
    sof0(&mut out, width, height, jpeg_type);
    dht(&mut out, 0x00, &LUM_DC_CODELENS, &LUM_DC_SYMBOLS);
    dht(&mut out, 0x10, &LUM_AC_CODELENS, &LUM_AC_SYMBOLS);
    dht(&mut out, 0x01, &CHM_DC_CODELENS, &CHM_DC_SYMBOLS);
    dht(&mut out, 0x11, &CHM_AC_CODELENS, &CHM_AC_SYMBOLS);
    sos(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol_count(codelens: &[u8; 16]) -> usize {
        codelens.iter().map(|&n| n as usize).sum()
    }

    #[test]
    fn huffman_tables_are_consistent() {
        assert_eq!(symbol_count(&LUM_DC_CODELENS), LUM_DC_SYMBOLS.len());
        assert_eq!(symbol_count(&LUM_AC_CODELENS), LUM_AC_SYMBOLS.len());
        assert_eq!(symbol_count(&CHM_DC_CODELENS), CHM_DC_SYMBOLS.len());
        assert_eq!(symbol_count(&CHM_AC_CODELENS), CHM_AC_SYMBOLS.len());
    }

    #[test]
    fn quality_50_is_identity() {
        let tables = make_qtables(50);
        assert_eq!(&tables[..64], &LUMA_QUANTIZER[..]);
        assert_eq!(&tables[64..], &CHROMA_QUANTIZER[..]);
    }

    #[test]
    fn quality_scaling_clamps() {
        let high = make_qtables(99);
        assert!(high.iter().all(|&v| v >= 1));
        assert_eq!(high[0], 1);
        let low = make_qtables(1);
        assert_eq!(low[64], 255);
    }

    #[test]
    fn headers_layout() {
        let headers = make_headers(1, 640, 480, 0, &make_qtables(50), 0);
        assert_eq!(&headers[..2], &SOI);
        assert_eq!(&headers[2..4], &[0xff, 0xe0]);
        // SOI + APP0 (18) + two DQT (69 each)
        let sof = 2 + 18 + 69 * 2;
        assert_eq!(&headers[sof..sof + 2], &[0xff, 0xc0]);
        assert_eq!(&headers[sof + 5..sof + 9], &[0x01, 0xe0, 0x02, 0x80]);
        assert_eq!(headers[sof + 11], 0x22);
        assert_eq!(&headers[headers.len() - 14..headers.len() - 12], &[0xff, 0xda]);
    }

    #[test]
    fn restart_interval_segment() {
        let headers = make_headers(0, 8, 8, 0, &make_qtables(50), 4);
        let dri = 2 + 18 + 69 * 2;
        assert_eq!(&headers[dri..dri + 6], &[0xff, 0xdd, 0, 4, 0, 4]);
    }
}
