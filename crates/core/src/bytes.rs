//! Big-endian integer helpers and an exp-Golomb bit reader.
//!
//! Network protocols and ISO BMFF are all big-endian. Out-of-range reads
//! return `None` or [`RtspError::Truncated`] instead of panicking.

use crate::error::{Result, RtspError};

pub fn read_u16_be(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u24_be(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset + 3)?;
    Some(u32::from_be_bytes([0, b[0], b[1], b[2]]))
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn write_u24_be(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes()[1..]);
}

/// Concatenate byte slices into one owned buffer.
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let total = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Decode a hex string such as an SDP `config=1408` parameter.
pub fn from_hex(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(RtspError::InvalidConfig(format!("invalid hex: {hex}")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| RtspError::InvalidConfig(format!("invalid hex: {hex}")))
        })
        .collect()
}

/// Strip H.264 emulation prevention bytes (`00 00 03` becomes `00 00`).
pub fn unescape_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &b in nal {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// MSB-first bit reader used for H.264 SPS parsing (ITU-T H.264 §7.2).
///
/// `ue(v)` and `se(v)` follow the exp-Golomb definitions in §9.1.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bits not yet consumed.
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or_else(|| RtspError::truncated("bitstream", self.pos / 8 + 1, self.data.len()))?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    /// Read `n` bits (n <= 32) as an unsigned value.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut value: u32 = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(RtspError::truncated(
                "bitstream",
                (self.pos + n).div_ceil(8),
                self.data.len(),
            ));
        }
        self.pos += n;
        Ok(())
    }

    /// Unsigned exp-Golomb code.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(RtspError::InvalidConfig(
                    "exp-Golomb code longer than 32 bits".to_string(),
                ));
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Signed exp-Golomb code: 1, 2, 3, 4 map to 1, -1, 2, -2.
    pub fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()? as i64;
        let value = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_decoding() {
        assert_eq!(from_hex("1408").unwrap(), vec![0x14, 0x08]);
        assert_eq!(from_hex("").unwrap(), Vec::<u8>::new());
        assert!(from_hex("141").is_err());
        assert!(from_hex("zz").is_err());
    }

    #[test]
    fn emulation_prevention_removed() {
        assert_eq!(
            unescape_rbsp(&[0x67, 0, 0, 3, 1, 0, 0, 3, 0, 3]),
            vec![0x67, 0, 0, 1, 0, 0, 0, 3]
        );
    }

    #[test]
    fn big_endian_reads() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(read_u16_be(&buf, 0), Some(0x1234));
        assert_eq!(read_u24_be(&buf, 1), Some(0x345678));
        assert_eq!(read_u32_be(&buf, 0), Some(0x12345678));
        assert_eq!(read_u32_be(&buf, 1), None);
    }

    #[test]
    fn write_u24() {
        let mut out = Vec::new();
        write_u24_be(&mut out, 0x00abcdef);
        assert_eq!(out, vec![0xab, 0xcd, 0xef]);
    }

    #[test]
    fn concat_joins() {
        assert_eq!(concat(&[&[1, 2], &[], &[3]]), vec![1, 2, 3]);
    }

    #[test]
    fn exp_golomb() {
        // 1 | 010 | 011 | 00100 | 00101 -> ue 0, 1, 2, 3, 4
        let data = [0b1010_0110, 0b0100_0010, 0b1000_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_ue().unwrap(), 3);
        assert_eq!(r.read_ue().unwrap(), 4);
    }

    #[test]
    fn signed_exp_golomb() {
        // 010 | 011 | 00100 -> se 1, -1, 2
        let data = [0b0100_1100, 0b1000_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_se().unwrap(), 1);
        assert_eq!(r.read_se().unwrap(), -1);
        assert_eq!(r.read_se().unwrap(), 2);
    }

    #[test]
    fn read_past_end_is_error() {
        let mut r = BitReader::new(&[0xff]);
        assert_eq!(r.read_bits(8).unwrap(), 0xff);
        assert!(r.read_bit().is_err());
        assert!(r.skip_bits(1).is_err());
    }
}
