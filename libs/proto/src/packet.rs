//! Packet layouts exchanged between a node and the coordinating server.
//!
//! All multi-byte fields are big-endian with no padding:
//!
//! ```text
//! NodeReport (13 bytes)
//! +-----------+---------------------------+--------------------+------------+
//! | node_id   | active_pixel_percentage   | activation_level   | send_image |
//! | u32       | f32                       | f32                | u8         |
//! +-----------+---------------------------+--------------------+------------+
//!
//! ServerDirective (6 bytes)
//! +-----------------------------+------------+------------+
//! | neighbor_activation_level   | image_type | send_image |
//! | f32                         | u8         | u8         |
//! +-----------------------------+------------+------------+
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::error::MalformedPacket;

// =============================================================================
// Image Type
// =============================================================================

/// Which rendition of the camera image the server wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ImageType {
    /// Foreground mask of the latest frame.
    #[default]
    Foreground = 0,
    /// Learned background model.
    Background = 1,
    /// Difference image between consecutive frames.
    Difference = 2,
    /// Unprocessed camera frame.
    Raw = 3,
}

impl ImageType {
    /// Wire byte for this image type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lowercase name used in configuration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Foreground => "foreground",
            ImageType::Background => "background",
            ImageType::Difference => "difference",
            ImageType::Raw => "raw",
        }
    }
}

impl TryFrom<u8> for ImageType {
    type Error = MalformedPacket;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ImageType::Foreground),
            1 => Ok(ImageType::Background),
            2 => Ok(ImageType::Difference),
            3 => Ok(ImageType::Raw),
            other => Err(MalformedPacket::UnknownImageType(other)),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an image type name fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown image type name: {0}")]
pub struct ParseImageTypeError(String);

impl FromStr for ImageType {
    type Err = ParseImageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foreground" => Ok(ImageType::Foreground),
            "background" => Ok(ImageType::Background),
            "difference" => Ok(ImageType::Difference),
            "raw" => Ok(ImageType::Raw),
            _ => Err(ParseImageTypeError(s.to_string())),
        }
    }
}

// =============================================================================
// Node Report
// =============================================================================

/// Activity report sent by a node on every control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeReport {
    pub node_id: u32,
    /// Fraction of pixels that changed in the latest frame, in `[0, 1]`.
    pub active_pixel_percentage: f32,
    pub activation_level: f32,
    /// Set when an image frame follows this report.
    pub send_image: bool,
}

impl NodeReport {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 4 + 4 + 4 + 1;

    /// Encode the report into its fixed binary layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_u32(self.node_id);
        buf.put_f32(self.active_pixel_percentage);
        buf.put_f32(self.activation_level);
        buf.put_u8(u8::from(self.send_image));
        buf.freeze()
    }

    /// Decode a report on the server side.
    pub fn decode(mut data: &[u8]) -> Result<Self, MalformedPacket> {
        check_len(data, Self::ENCODED_LEN)?;

        let node_id = data.get_u32();
        let active_pixel_percentage = data.get_f32();
        let activation_level = data.get_f32();
        let send_image = decode_flag("send_image", data.get_u8())?;

        if !(0.0..=1.0).contains(&active_pixel_percentage) {
            return Err(MalformedPacket::OutOfRange {
                field: "active_pixel_percentage",
                value: active_pixel_percentage,
            });
        }
        check_level("activation_level", activation_level)?;

        Ok(Self {
            node_id,
            active_pixel_percentage,
            activation_level,
            send_image,
        })
    }
}

// =============================================================================
// Server Directive
// =============================================================================

/// Instruction from the server, relaying neighbor activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerDirective {
    pub neighbor_activation_level: f32,
    pub image_type: ImageType,
    pub send_image: bool,
}

impl ServerDirective {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 4 + 1 + 1;

    /// Encode a directive on the server side.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_f32(self.neighbor_activation_level);
        buf.put_u8(self.image_type.as_u8());
        buf.put_u8(u8::from(self.send_image));
        buf.freeze()
    }

    /// Decode a directive received from the server.
    pub fn decode(mut data: &[u8]) -> Result<Self, MalformedPacket> {
        check_len(data, Self::ENCODED_LEN)?;

        let neighbor_activation_level = data.get_f32();
        let image_type = ImageType::try_from(data.get_u8())?;
        let send_image = decode_flag("send_image", data.get_u8())?;

        check_level("neighbor_activation_level", neighbor_activation_level)?;

        Ok(Self {
            neighbor_activation_level,
            image_type,
            send_image,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_len(data: &[u8], expected: usize) -> Result<(), MalformedPacket> {
    if data.len() != expected {
        return Err(MalformedPacket::InvalidLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn decode_flag(field: &'static str, value: u8) -> Result<bool, MalformedPacket> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(MalformedPacket::InvalidFlag { field, value }),
    }
}

fn check_level(field: &'static str, value: f32) -> Result<(), MalformedPacket> {
    if !value.is_finite() || value < 0.0 {
        return Err(MalformedPacket::OutOfRange { field, value });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn arb_image_type() -> impl Strategy<Value = ImageType> {
        prop_oneof![
            Just(ImageType::Foreground),
            Just(ImageType::Background),
            Just(ImageType::Difference),
            Just(ImageType::Raw),
        ]
    }

    proptest! {
        #[test]
        fn node_report_survives_server_decode(
            node_id in any::<u32>(),
            percentage in 0.0f32..=1.0,
            activation in 0.0f32..1000.0,
            send_image in any::<bool>(),
        ) {
            let report = NodeReport {
                node_id,
                active_pixel_percentage: percentage,
                activation_level: activation,
                send_image,
            };
            let encoded = report.encode();
            prop_assert_eq!(encoded.len(), NodeReport::ENCODED_LEN);
            prop_assert_eq!(NodeReport::decode(&encoded).unwrap(), report);
        }

        #[test]
        fn server_directive_survives_node_decode(
            level in 0.0f32..1000.0,
            image_type in arb_image_type(),
            send_image in any::<bool>(),
        ) {
            let directive = ServerDirective {
                neighbor_activation_level: level,
                image_type,
                send_image,
            };
            let encoded = directive.encode();
            prop_assert_eq!(ServerDirective::decode(&encoded).unwrap(), directive);
        }
    }

    #[test]
    fn test_node_report_layout() {
        let report = NodeReport {
            node_id: 7,
            active_pixel_percentage: 0.5,
            activation_level: 2.0,
            send_image: true,
        };

        let encoded = report.encode();
        assert_eq!(&encoded[0..4], &[0, 0, 0, 7]);
        assert_eq!(&encoded[4..8], &0.5f32.to_be_bytes());
        assert_eq!(&encoded[8..12], &2.0f32.to_be_bytes());
        assert_eq!(encoded[12], 1);
    }

    #[test]
    fn test_directive_layout() {
        let directive = ServerDirective {
            neighbor_activation_level: 0.9,
            image_type: ImageType::Raw,
            send_image: false,
        };

        let encoded = directive.encode();
        assert_eq!(&encoded[0..4], &0.9f32.to_be_bytes());
        assert_eq!(encoded[4], 3);
        assert_eq!(encoded[5], 0);
    }

    #[rstest]
    #[case(&[], 0)]
    #[case(&[0, 0, 0, 0, 0], 5)]
    #[case(&[0, 0, 0, 0, 0, 0, 0], 7)]
    fn test_directive_rejects_wrong_length(#[case] data: &[u8], #[case] actual: usize) {
        assert_eq!(
            ServerDirective::decode(data),
            Err(MalformedPacket::InvalidLength {
                expected: ServerDirective::ENCODED_LEN,
                actual,
            })
        );
    }

    #[test]
    fn test_directive_rejects_unknown_image_type() {
        let mut data = 0.5f32.to_be_bytes().to_vec();
        data.extend_from_slice(&[9, 0]);

        assert_eq!(
            ServerDirective::decode(&data),
            Err(MalformedPacket::UnknownImageType(9))
        );
    }

    #[test]
    fn test_directive_rejects_bad_flag() {
        let mut data = 0.5f32.to_be_bytes().to_vec();
        data.extend_from_slice(&[0, 2]);

        assert!(matches!(
            ServerDirective::decode(&data),
            Err(MalformedPacket::InvalidFlag { value: 2, .. })
        ));
    }

    #[rstest]
    #[case(f32::NAN)]
    #[case(f32::INFINITY)]
    #[case(-0.5)]
    fn test_directive_rejects_invalid_level(#[case] level: f32) {
        let mut data = level.to_be_bytes().to_vec();
        data.extend_from_slice(&[0, 0]);

        assert!(matches!(
            ServerDirective::decode(&data),
            Err(MalformedPacket::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_node_report_rejects_percentage_above_one() {
        let report = NodeReport {
            node_id: 1,
            active_pixel_percentage: 1.5,
            activation_level: 0.0,
            send_image: false,
        };

        assert!(matches!(
            NodeReport::decode(&report.encode()),
            Err(MalformedPacket::OutOfRange {
                field: "active_pixel_percentage",
                ..
            })
        ));
    }

    #[rstest]
    #[case("foreground", ImageType::Foreground)]
    #[case("Background", ImageType::Background)]
    #[case(" difference ", ImageType::Difference)]
    #[case("RAW", ImageType::Raw)]
    fn test_image_type_from_str(#[case] input: &str, #[case] expected: ImageType) {
        assert_eq!(input.parse::<ImageType>().unwrap(), expected);
    }

    #[test]
    fn test_image_type_from_str_unknown() {
        assert!("thermal".parse::<ImageType>().is_err());
    }

    #[test]
    fn test_image_type_default() {
        assert_eq!(ImageType::default(), ImageType::Foreground);
    }
}
