//! # vsn-proto
//!
//! Wire protocol shared by sensor nodes and the coordinating server.
//!
//! ## Message Format
//!
//! Every application message travels as one length-prefixed frame:
//!
//! ```text
//! +--------+--------+--------+--------+--------...
//! | Length (4 bytes, big-endian)      | Payload
//! +--------+--------+--------+--------+--------...
//! ```
//!
//! Payload shapes are distinguished by direction, not by a type tag:
//! - node → server: [`NodeReport`], optionally followed by one image frame
//! - server → node: [`ServerDirective`]
//!
//! Both packet shapes use a fixed big-endian layout.

mod error;
mod frame;
mod packet;

pub use error::{FrameError, MalformedPacket};
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_LEN};
pub use packet::{ImageType, NodeReport, ParseImageTypeError, ServerDirective};
