//! RTCP packet readers (RFC 3550 §6).
//!
//! Every RTCP packet starts with the same 4-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|    RC   |      PT       |             length            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `length` is the packet size in 32-bit words minus one, which is how
//! compound packets are split (§6.1).
//!
//! | PT  | Packet | Section |
//! |-----|--------|---------|
//! | 200 | Sender Report | §6.4.1 |
//! | 201 | Receiver Report | §6.4.2 |
//! | 202 | Source Description | §6.5 |
//! | 203 | Goodbye | §6.6 |
//! | 204 | Application-defined | §6.7 |

use crate::bytes::{read_u16_be, read_u24_be, read_u32_be};
use crate::error::{Result, RtspError};

pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;

/// SDES item type for private extensions (RFC 3550 §6.5.8).
pub const SDES_PRIV: u8 = 8;

const REPORT_BLOCK_LEN: usize = 24;

pub fn version(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| b >> 6)
}

pub fn padding(packet: &[u8]) -> bool {
    packet.first().is_some_and(|b| b & 0x20 != 0)
}

/// Reception report count, source count, or APP subtype depending on type.
pub fn count(packet: &[u8]) -> Option<u8> {
    packet.first().map(|b| b & 0x1f)
}

pub fn packet_type(packet: &[u8]) -> Option<u8> {
    packet.get(1).copied()
}

pub fn length(packet: &[u8]) -> Option<u16> {
    read_u16_be(packet, 2)
}

/// Split a compound RTCP packet into its individual packets.
///
/// A trailing fragment that does not fit its declared length is dropped.
pub fn split_compound(data: &[u8]) -> Vec<&[u8]> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while let Some(words) = read_u16_be(data, offset + 2) {
        let end = offset + (words as usize + 1) * 4;
        if end > data.len() {
            break;
        }
        packets.push(&data[offset..end]);
        offset = end;
    }
    packets
}

/// One reception report block (RFC 3550 §6.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub extended_highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

fn report_blocks(packet: &[u8], start: usize) -> Result<Vec<ReportBlock>> {
    let n = count(packet).unwrap_or(0) as usize;
    let needed = start + n * REPORT_BLOCK_LEN;
    if packet.len() < needed {
        return Err(RtspError::truncated("RTCP report blocks", needed, packet.len()));
    }
    Ok((0..n)
        .map(|i| {
            let o = start + i * REPORT_BLOCK_LEN;
            ReportBlock {
                ssrc: read_u32_be(packet, o).unwrap_or(0),
                fraction_lost: packet[o + 4],
                cumulative_lost: read_u24_be(packet, o + 5).unwrap_or(0),
                extended_highest_sequence: read_u32_be(packet, o + 8).unwrap_or(0),
                jitter: read_u32_be(packet, o + 12).unwrap_or(0),
                last_sr: read_u32_be(packet, o + 16).unwrap_or(0),
                delay_since_last_sr: read_u32_be(packet, o + 20).unwrap_or(0),
            }
        })
        .collect())
}

/// Sender Report (PT 200).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_most: u32,
    pub ntp_least: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReportBlock>,
}

impl SenderReport {
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < 28 {
            return Err(RtspError::truncated("RTCP sender report", 28, packet.len()));
        }
        Ok(Self {
            ssrc: read_u32_be(packet, 4).unwrap_or(0),
            ntp_most: read_u32_be(packet, 8).unwrap_or(0),
            ntp_least: read_u32_be(packet, 12).unwrap_or(0),
            rtp_timestamp: read_u32_be(packet, 16).unwrap_or(0),
            packet_count: read_u32_be(packet, 20).unwrap_or(0),
            octet_count: read_u32_be(packet, 24).unwrap_or(0),
            reports: report_blocks(packet, 28)?,
        })
    }
}

/// Receiver Report (PT 201).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

impl ReceiverReport {
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < 8 {
            return Err(RtspError::truncated("RTCP receiver report", 8, packet.len()));
        }
        Ok(Self {
            ssrc: read_u32_be(packet, 4).unwrap_or(0),
            reports: report_blocks(packet, 8)?,
        })
    }
}

/// One SDES item. PRIV items carry their prefix inside `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub kind: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub source: u32,
    pub items: Vec<SdesItem>,
}

/// Source Description (PT 202). Each chunk's item list ends with a zero
/// byte and is padded to a 32-bit boundary.
pub fn parse_sdes(packet: &[u8]) -> Result<Vec<SdesChunk>> {
    let n = count(packet).unwrap_or(0) as usize;
    let mut chunks = Vec::with_capacity(n);
    let mut offset = 4;
    for _ in 0..n {
        let source = read_u32_be(packet, offset)
            .ok_or_else(|| RtspError::truncated("RTCP SDES chunk", offset + 4, packet.len()))?;
        offset += 4;
        let mut items = Vec::new();
        loop {
            let kind = *packet
                .get(offset)
                .ok_or_else(|| RtspError::truncated("RTCP SDES item", offset + 1, packet.len()))?;
            if kind == 0 {
                offset += 1;
                break;
            }
            let len = *packet
                .get(offset + 1)
                .ok_or_else(|| RtspError::truncated("RTCP SDES item", offset + 2, packet.len()))?
                as usize;
            let value = packet
                .get(offset + 2..offset + 2 + len)
                .ok_or_else(|| {
                    RtspError::truncated("RTCP SDES item", offset + 2 + len, packet.len())
                })?
                .to_vec();
            items.push(SdesItem { kind, value });
            offset += 2 + len;
        }
        offset = offset.div_ceil(4) * 4;
        chunks.push(SdesChunk { source, items });
    }
    Ok(chunks)
}

/// Goodbye (PT 203).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

impl Bye {
    pub fn parse(packet: &[u8]) -> Result<Self> {
        let n = count(packet).unwrap_or(0) as usize;
        let end = 4 + 4 * n;
        if packet.len() < end {
            return Err(RtspError::truncated("RTCP BYE", end, packet.len()));
        }
        let sources = (0..n)
            .filter_map(|i| read_u32_be(packet, 4 + 4 * i))
            .collect();
        let reason = packet.get(end).and_then(|&len| {
            packet
                .get(end + 1..end + 1 + len as usize)
                .map(|r| String::from_utf8_lossy(r).into_owned())
        });
        Ok(Self { sources, reason })
    }
}

/// Application-defined packet (PT 204).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub subtype: u8,
    pub ssrc: u32,
    pub name: String,
    pub data: Vec<u8>,
}

impl App {
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < 12 {
            return Err(RtspError::truncated("RTCP APP", 12, packet.len()));
        }
        Ok(Self {
            subtype: count(packet).unwrap_or(0),
            ssrc: read_u32_be(packet, 4).unwrap_or(0),
            name: String::from_utf8_lossy(&packet[8..12]).into_owned(),
            data: packet[12..].to_vec(),
        })
    }
}
