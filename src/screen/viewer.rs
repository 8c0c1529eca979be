//! Frame decode for display, using ratatui-image.
//!
//! The terminal graphics protocol is detected once at startup:
//! - Sixel (Windows Terminal, xterm, foot, WezTerm, etc.)
//! - Kitty graphics protocol (Kitty, WezTerm, Ghostty)
//! - iTerm2 inline images (iTerm2, WezTerm)
//! - Halfblocks fallback (any terminal with 24-bit color)

use anyhow::Result;
use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ImageDecoder, RgbImage};
use ratatui_image::picker::{Picker, ProtocolType};
use ratatui_image::protocol::StatefulProtocol;
use std::io::Cursor;
use tracing::{info, warn};

use crate::protocol::{FrameMessage, Intrinsics};

/// Create a Picker by querying terminal capabilities.
///
/// If `force_protocol` is Some, skip detection and use the specified protocol.
/// Must run BEFORE entering raw mode / alternate screen.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(proto_name) = force_protocol {
        let proto_type = match proto_name.to_lowercase().as_str() {
            "sixel" => ProtocolType::Sixel,
            "kitty" => ProtocolType::Kitty,
            "iterm2" | "iterm" => ProtocolType::Iterm2,
            "halfblocks" | "half" | "text" => ProtocolType::Halfblocks,
            _ => {
                warn!(protocol = proto_name, "unknown graphics protocol, auto-detecting");
                return auto_detect_picker();
            }
        };
        let mut picker = Picker::halfblocks();
        picker.set_protocol_type(proto_type);
        info!(protocol = ?proto_type, "graphics forced");
        return picker;
    }

    auto_detect_picker()
}

fn auto_detect_picker() -> Picker {
    match Picker::from_query_stdio() {
        Ok(picker) => {
            info!(protocol = ?picker.protocol_type(), "graphics detected");
            picker
        }
        Err(e) => {
            warn!(error = %e, "terminal graphics query failed, using halfblocks");
            Picker::halfblocks()
        }
    }
}

/// A frame decoded to RGB8, `width × height × 3` bytes, ready to draw.
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub intrinsics: Intrinsics,
    pub image: DynamicImage,
}

impl DecodedFrame {
    /// Decode the JPEG carried by a Type-1 message.
    pub fn from_frame(frame: &FrameMessage) -> Result<Self> {
        let cursor = Cursor::new(&frame.image[..]);
        let decoder =
            JpegDecoder::new(cursor).map_err(|e| anyhow::anyhow!("JPEG decode failed: {}", e))?;

        let (w, h) = decoder.dimensions();

        // Grayscale JPEGs are widened so the buffer is always RGB8.
        let rgb: RgbImage = DynamicImage::from_decoder(decoder)
            .map_err(|e| anyhow::anyhow!("JPEG read failed: {}", e))?
            .into_rgb8();
        let image = DynamicImage::ImageRgb8(rgb);

        Ok(Self {
            width: w,
            height: h,
            intrinsics: frame.intrinsics,
            image,
        })
    }

    /// Create a StatefulProtocol for rendering this frame with ratatui-image.
    pub fn to_protocol(&self, picker: &mut Picker) -> StatefulProtocol {
        picker.new_resize_protocol(self.image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::synthetic::{jpeg_encode, test_pattern};
    use bytes::Bytes;

    #[test]
    fn test_decode_gives_rgb_buffer_of_frame_size() {
        let rgb = test_pattern(64, 48, 3);
        let jpeg = jpeg_encode(&rgb, 64, 48).unwrap();
        let frame = FrameMessage {
            intrinsics: Intrinsics {
                fx: 50.0,
                fy: 50.0,
                cx: 32.0,
                cy: 24.0,
            },
            width: 64,
            height: 48,
            image: Bytes::from(jpeg),
        };

        let decoded = DecodedFrame::from_frame(&frame).unwrap();
        assert_eq!((decoded.width, decoded.height), (64, 48));
        assert_eq!(decoded.image.as_bytes().len(), 64 * 48 * 3);
        assert_eq!(decoded.intrinsics, frame.intrinsics);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let frame = FrameMessage {
            intrinsics: Intrinsics::default(),
            width: 10,
            height: 10,
            image: Bytes::from_static(b"not a jpeg"),
        };
        assert!(DecodedFrame::from_frame(&frame).is_err());
    }
}
