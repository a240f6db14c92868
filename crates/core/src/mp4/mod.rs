//! Fragmented MP4 (ISO/IEC 14496-12) muxing and byte stream parsing.
//!
//! ## Output layout
//!
//! ```text
//! init segment:   ftyp | moov { mvhd, trak*, mvex { trex* } }
//! per sample:     moof { mfhd, traf { tfhd, tfdt, trun } } | mdat
//! ```
//!
//! Every sample becomes its own fragment so a consumer can append it to a
//! media buffer as soon as it arrives. Track ids follow SDP media order,
//! starting at 1, counting only media with a supported codec.
//!
//! | Codec | Sample entry | Codec string |
//! |-------|--------------|--------------|
//! | H.264 | `avc1` + `avcC` | `avc1.<profile-level-id>` |
//! | AAC | `mp4a` + `esds` | `mp4a.40.<object type>` |

pub mod aac;
pub mod boxes;
pub mod builder;
pub mod h264;
pub mod muxer;
pub mod parser;

pub use boxes::Mp4Box;
pub use builder::BoxBuilder;
pub use muxer::{Mp4Muxer, MuxerEvent};
pub use parser::Mp4Parser;

/// MIME type for a set of RFC 6381 codec strings.
pub fn mime_type(codecs: &[String]) -> String {
    format!("video/mp4; codecs=\"{}\"", codecs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_joins_codecs() {
        let codecs = vec!["avc1.4d0029".to_string(), "mp4a.40.2".to_string()];
        assert_eq!(
            mime_type(&codecs),
            r#"video/mp4; codecs="avc1.4d0029, mp4a.40.2""#
        );
        assert_eq!(mime_type(&[]), r#"video/mp4; codecs="""#);
    }
}
