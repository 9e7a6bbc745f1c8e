use serde::{Deserialize, Serialize};

use common::id_type;

id_type!(ImageId);

/// Bytes-per-pixel description: channel count times bytes per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelLayout {
    pub channels: u32,
    pub channel_bytes: u32,
}

impl PixelLayout {
    pub const GRAY_U8: PixelLayout = PixelLayout {
        channels: 1,
        channel_bytes: 1,
    };
    pub const RGB_U8: PixelLayout = PixelLayout {
        channels: 3,
        channel_bytes: 1,
    };
    pub const RGBA_U8: PixelLayout = PixelLayout {
        channels: 4,
        channel_bytes: 1,
    };
    pub const RGBA_F32: PixelLayout = PixelLayout {
        channels: 4,
        channel_bytes: 4,
    };

    pub fn sizeof_pel(&self) -> usize {
        self.channels as usize * self.channel_bytes as usize
    }
}

impl Default for PixelLayout {
    fn default() -> PixelLayout {
        PixelLayout::RGBA_U8
    }
}

/// What the cache needs to know about an image: its identity and how big one
/// pixel is. The image abstraction itself lives with the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDesc {
    pub id: ImageId,
    pub layout: PixelLayout,
}

impl ImageDesc {
    pub fn new(layout: PixelLayout) -> ImageDesc {
        ImageDesc {
            id: ImageId::unique(),
            layout,
        }
    }

    pub fn sizeof_pel(&self) -> usize {
        self.layout.sizeof_pel()
    }
}
