//! Binary wire format shared with the phone app.
//!
//! Every message starts with a big-endian `i32` type tag. Length fields are
//! big-endian too; everything inside a body (floats, dimensions, points) is
//! little-endian.
//!
//! | Type | Direction       | Body                                                    |
//! |------|-----------------|---------------------------------------------------------|
//! | 1    | device → viewer | `i32 size` (BE), then `f32 fx,fy,cx,cy`, `i32 w,h`, JPEG |
//! | 2    | device → viewer | `f32 distance,dx,dy,dz`                                 |
//! | 5    | device → viewer | `f32 distance`                                          |
//! | 3    | viewer → device | `i32 len=8` (BE), `i32 x,y`                             |
//! | 4    | viewer → device | `i32 len=16` (BE), `f32 x1,y1,x2,y2`                    |
//!
//! The legacy tap signal is plain `"x,y"` text on its own short-lived
//! connection and never shares a stream with the framed messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LinkError, Result};

pub const MSG_FRAME: i32 = 1;
pub const MSG_DISTANCE: i32 = 2;
pub const MSG_POINT: i32 = 3;
pub const MSG_POINT_PAIR: i32 = 4;
pub const MSG_DISTANCE_SCALAR: i32 = 5;

/// Intrinsics + width + height at the front of every frame body.
pub const FRAME_HEADER_LEN: usize = 24;
pub const DISTANCE_LEN: usize = 16;
pub const DISTANCE_SCALAR_LEN: usize = 4;
pub const DISTANCE_VECTOR_LEN: usize = 12;
pub const POINT_LEN: usize = 8;
pub const POINT_PAIR_LEN: usize = 16;

/// Largest frame body accepted unless configured otherwise.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Knobs that change how inbound type tags are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireOptions {
    pub max_payload_bytes: usize,
    /// Tag carrying the 3-float `(x, y, z)` distance form, if the device uses it.
    pub vector_distance_type: Option<i32>,
}

impl Default for WireOptions {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            vector_distance_type: None,
        }
    }
}

/// What a type tag announces and therefore how many bytes follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    /// Followed by a BE size and then that many body bytes.
    Frame,
    Distance,
    DistanceScalar,
    DistanceVector,
}

impl InboundKind {
    /// Fixed body length, or `None` for frames whose size is on the wire.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            InboundKind::Frame => None,
            InboundKind::Distance => Some(DISTANCE_LEN),
            InboundKind::DistanceScalar => Some(DISTANCE_SCALAR_LEN),
            InboundKind::DistanceVector => Some(DISTANCE_VECTOR_LEN),
        }
    }
}

impl WireOptions {
    /// Map a type tag to its layout. Unknown tags have no known length, so
    /// there is nothing safe to skip and the caller must drop the stream.
    pub fn classify(&self, tag: i32) -> Result<InboundKind> {
        match tag {
            MSG_FRAME => Ok(InboundKind::Frame),
            MSG_DISTANCE => Ok(InboundKind::Distance),
            MSG_DISTANCE_SCALAR => Ok(InboundKind::DistanceScalar),
            t if Some(t) == self.vector_distance_type => Ok(InboundKind::DistanceVector),
            other => Err(LinkError::UnknownMessageType(other)),
        }
    }

    /// Validate a frame's declared body size before any of the body is read.
    pub fn frame_size(&self, raw: [u8; 4]) -> Result<usize> {
        let size = i32::from_be_bytes(raw);
        if size < FRAME_HEADER_LEN as i32 {
            return Err(LinkError::MalformedPayload(format!(
                "frame body of {} bytes is shorter than the {}-byte header",
                size, FRAME_HEADER_LEN
            )));
        }
        let size = size as usize;
        if size > self.max_payload_bytes {
            return Err(LinkError::MalformedPayload(format!(
                "frame body of {} bytes exceeds limit of {}",
                size, self.max_payload_bytes
            )));
        }
        Ok(size)
    }
}

pub fn decode_tag(raw: [u8; 4]) -> i32 {
    i32::from_be_bytes(raw)
}

/// Camera calibration sent with every frame. Carried through, never used.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Dimensions of the device's sensor frame, exactly as sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSize {
    pub width: i32,
    pub height: i32,
}

/// One Type-1 message. `image` holds the still-encoded JPEG bytes; decoding
/// to pixels happens on the display side.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub intrinsics: Intrinsics,
    pub width: i32,
    pub height: i32,
    pub image: Bytes,
}

impl FrameMessage {
    pub fn sensor_size(&self) -> SensorSize {
        SensorSize {
            width: self.width,
            height: self.height,
        }
    }

    /// Decode a frame body (everything after the size field).
    pub fn decode(mut body: Bytes) -> Result<Self> {
        if body.len() < FRAME_HEADER_LEN {
            return Err(LinkError::MalformedPayload(format!(
                "frame body of {} bytes is shorter than the {}-byte header",
                body.len(),
                FRAME_HEADER_LEN
            )));
        }
        let intrinsics = Intrinsics {
            fx: body.get_f32_le(),
            fy: body.get_f32_le(),
            cx: body.get_f32_le(),
            cy: body.get_f32_le(),
        };
        let width = body.get_i32_le();
        let height = body.get_i32_le();
        Ok(Self {
            intrinsics,
            width,
            height,
            image: body,
        })
    }

    /// Full wire message: tag, size, body.
    pub fn encode(&self) -> Bytes {
        let body_len = FRAME_HEADER_LEN + self.image.len();
        let mut buf = BytesMut::with_capacity(8 + body_len);
        buf.put_i32(MSG_FRAME);
        buf.put_i32(body_len as i32);
        buf.put_f32_le(self.intrinsics.fx);
        buf.put_f32_le(self.intrinsics.fy);
        buf.put_f32_le(self.intrinsics.cx);
        buf.put_f32_le(self.intrinsics.cy);
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        buf.put_slice(&self.image);
        buf.freeze()
    }
}

/// A depth sample. The device has shipped three shapes of it over time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceMessage {
    /// Type 2: distance plus the offset vector it was measured along.
    Full { distance: f32, dx: f32, dy: f32, dz: f32 },
    /// Camera-space point; the distance is its depth.
    Vector { x: f32, y: f32, z: f32 },
    /// Type 5.
    Scalar { distance: f32 },
}

impl DistanceMessage {
    pub fn distance(&self) -> f32 {
        match *self {
            DistanceMessage::Full { distance, .. } => distance,
            DistanceMessage::Vector { z, .. } => z,
            DistanceMessage::Scalar { distance } => distance,
        }
    }

    /// Decode a fixed-size distance body for the given kind.
    pub fn decode(kind: InboundKind, mut body: &[u8]) -> Result<Self> {
        let expected = kind.fixed_len().ok_or_else(|| {
            LinkError::MalformedPayload("frames are not distance messages".to_string())
        })?;
        if body.len() != expected {
            return Err(LinkError::MalformedPayload(format!(
                "distance body is {} bytes, expected {}",
                body.len(),
                expected
            )));
        }
        Ok(match kind {
            InboundKind::Distance => DistanceMessage::Full {
                distance: body.get_f32_le(),
                dx: body.get_f32_le(),
                dy: body.get_f32_le(),
                dz: body.get_f32_le(),
            },
            InboundKind::DistanceVector => DistanceMessage::Vector {
                x: body.get_f32_le(),
                y: body.get_f32_le(),
                z: body.get_f32_le(),
            },
            _ => DistanceMessage::Scalar {
                distance: body.get_f32_le(),
            },
        })
    }

    /// Full wire message under the given tag.
    pub fn encode_tagged(&self, msg_type: i32) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + DISTANCE_LEN);
        buf.put_i32(msg_type);
        match *self {
            DistanceMessage::Full { distance, dx, dy, dz } => {
                buf.put_f32_le(distance);
                buf.put_f32_le(dx);
                buf.put_f32_le(dy);
                buf.put_f32_le(dz);
            }
            DistanceMessage::Vector { x, y, z } => {
                buf.put_f32_le(x);
                buf.put_f32_le(y);
                buf.put_f32_le(z);
            }
            DistanceMessage::Scalar { distance } => buf.put_f32_le(distance),
        }
        buf.freeze()
    }
}

/// Anything the reader can hand to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Frame(FrameMessage),
    Distance(DistanceMessage),
}

/// Messages the viewer sends to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutboundCommand {
    /// Sensor pixel the user tapped.
    Point { x: i32, y: i32 },
    /// Two normalized sensor points, in tap order.
    PointPair { x1: f32, y1: f32, x2: f32, y2: f32 },
    /// `"x,y"` text on a throwaway connection.
    LegacyText { x: i32, y: i32 },
}

impl OutboundCommand {
    /// Whether this command travels on the framed device connection.
    pub fn is_framed(&self) -> bool {
        !matches!(self, OutboundCommand::LegacyText { .. })
    }

    pub fn encode(&self) -> Bytes {
        match *self {
            OutboundCommand::Point { x, y } => {
                let mut buf = BytesMut::with_capacity(8 + POINT_LEN);
                buf.put_i32(MSG_POINT);
                buf.put_i32(POINT_LEN as i32);
                buf.put_i32_le(x);
                buf.put_i32_le(y);
                buf.freeze()
            }
            OutboundCommand::PointPair { x1, y1, x2, y2 } => {
                let mut buf = BytesMut::with_capacity(8 + POINT_PAIR_LEN);
                buf.put_i32(MSG_POINT_PAIR);
                buf.put_i32(POINT_PAIR_LEN as i32);
                buf.put_f32_le(x1);
                buf.put_f32_le(y1);
                buf.put_f32_le(x2);
                buf.put_f32_le(y2);
                buf.freeze()
            }
            OutboundCommand::LegacyText { x, y } => Bytes::from(format!("{},{}", x, y)),
        }
    }

    /// Expected body length for a framed command tag (device side).
    pub fn body_len(msg_type: i32) -> Result<usize> {
        match msg_type {
            MSG_POINT => Ok(POINT_LEN),
            MSG_POINT_PAIR => Ok(POINT_PAIR_LEN),
            other => Err(LinkError::UnknownMessageType(other)),
        }
    }

    /// Decode a framed command from its tag, declared length and body.
    pub fn decode(msg_type: i32, declared_len: i32, mut body: &[u8]) -> Result<Self> {
        let expected = Self::body_len(msg_type)?;
        if declared_len != expected as i32 || body.len() != expected {
            return Err(LinkError::MalformedPayload(format!(
                "command {} declared {} bytes with {} present, expected {}",
                msg_type,
                declared_len,
                body.len(),
                expected
            )));
        }
        Ok(match msg_type {
            MSG_POINT => OutboundCommand::Point {
                x: body.get_i32_le(),
                y: body.get_i32_le(),
            },
            _ => OutboundCommand::PointPair {
                x1: body.get_f32_le(),
                y1: body.get_f32_le(),
                x2: body.get_f32_le(),
                y2: body.get_f32_le(),
            },
        })
    }

    /// Parse the legacy `"x,y"` text signal.
    pub fn parse_legacy(text: &str) -> Result<Self> {
        let (x, y) = text
            .trim()
            .split_once(',')
            .ok_or_else(|| LinkError::MalformedPayload(format!("not an x,y pair: {:?}", text)))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<i32>()
                .map_err(|e| LinkError::MalformedPayload(format!("bad coordinate {:?}: {}", s, e)))
        };
        Ok(OutboundCommand::LegacyText {
            x: parse(x)?,
            y: parse(y)?,
        })
    }
}
