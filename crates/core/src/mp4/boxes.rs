//! ISO BMFF box model (ISO/IEC 14496-12 §4.2).
//!
//! ```text
//! +----------------+----------------+-------------------------+
//! | size (32 BE)   | type (4 ASCII) | payload + child boxes   |
//! +----------------+----------------+-------------------------+
//! ```
//!
//! A full box starts its payload with a version byte and 24 bits of flags.
//! Some boxes carry both fields and children (`stsd`, `dref`, sample
//! entries), so a box is modelled as leading payload bytes followed by an
//! ordered list of children.

use crate::bytes::{read_u32_be, write_u24_be};
use crate::error::{ParseErrorKind, Result, RtspError};

pub type FourCC = [u8; 4];

pub const BOX_HEADER_LEN: usize = 8;

/// Boxes whose payload is nothing but child boxes.
const CONTAINERS: [&FourCC; 10] = [
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"mvex", b"moof", b"traf", b"edts",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    pub kind: FourCC,
    pub payload: Vec<u8>,
    pub children: Vec<Mp4Box>,
}

impl Mp4Box {
    pub fn leaf(kind: &FourCC, payload: Vec<u8>) -> Self {
        Self {
            kind: *kind,
            payload,
            children: Vec::new(),
        }
    }

    /// A full box: version and flags, then `fields`.
    pub fn full(kind: &FourCC, version: u8, flags: u32, fields: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(4 + fields.len());
        payload.push(version);
        write_u24_be(&mut payload, flags);
        payload.extend_from_slice(fields);
        Self::leaf(kind, payload)
    }

    pub fn container(kind: &FourCC, children: Vec<Mp4Box>) -> Self {
        Self {
            kind: *kind,
            payload: Vec::new(),
            children,
        }
    }

    pub fn with_children(mut self, children: Vec<Mp4Box>) -> Self {
        self.children = children;
        self
    }

    pub fn size(&self) -> usize {
        BOX_HEADER_LEN + self.payload.len() + self.children.iter().map(Mp4Box::size).sum::<usize>()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.size() as u32).to_be_bytes());
        out.extend_from_slice(&self.kind);
        out.extend_from_slice(&self.payload);
        for child in &self.children {
            child.write_to(out);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.write_to(&mut out);
        out
    }

    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }

    /// Size and type from the first 8 bytes, if available.
    pub fn parse_header(data: &[u8]) -> Option<(usize, FourCC)> {
        let size = read_u32_be(data, 0)? as usize;
        let kind = data.get(4..8)?.try_into().ok()?;
        Some((size, kind))
    }

    /// Parse one complete box. Known containers are split into children;
    /// everything else keeps its payload opaque.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (size, kind) = Self::parse_header(data)
            .ok_or_else(|| RtspError::truncated("box header", BOX_HEADER_LEN, data.len()))?;
        if size < BOX_HEADER_LEN {
            return Err(RtspError::parse(ParseErrorKind::InvalidBoxSize));
        }
        let body = data
            .get(BOX_HEADER_LEN..size)
            .ok_or_else(|| RtspError::truncated("box", size, data.len()))?;

        if CONTAINERS.contains(&&kind) {
            Ok(Self::container(&kind, Self::parse_children(body)?))
        } else {
            Ok(Self::leaf(&kind, body.to_vec()))
        }
    }

    /// Parse consecutive boxes filling `data`.
    pub fn parse_children(mut data: &[u8]) -> Result<Vec<Mp4Box>> {
        let mut boxes = Vec::new();
        while !data.is_empty() {
            let parsed = Self::parse(data)?;
            data = &data[parsed.size().min(data.len())..];
            boxes.push(parsed);
        }
        Ok(boxes)
    }

    pub fn find_child(&self, kind: &FourCC) -> Option<&Mp4Box> {
        self.children.iter().find(|c| &c.kind == kind)
    }

    pub fn children_of_kind<'a>(&'a self, kind: &'a FourCC) -> impl Iterator<Item = &'a Mp4Box> {
        self.children.iter().filter(move |c| &c.kind == kind)
    }

    /// Follow a chain of child types, e.g. `[b"mdia", b"minf", b"stbl"]`.
    pub fn find_path(&self, path: &[&FourCC]) -> Option<&Mp4Box> {
        path.iter()
            .try_fold(self, |current, kind| current.find_child(kind))
    }
}
