use hulink_frame::{keys, Tags};
use serde::{Deserialize, Serialize};

/// Video stream parameters requested when starting the Nav service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamingParams {
    pub width: u32,
    pub height: u32,
    /// Transport protocol of the stream, e.g. `RAW` or `RTP`.
    pub protocol: String,
    /// Codec, e.g. `H264`.
    pub codec: String,
}

impl Default for VideoStreamingParams {
    fn default() -> Self {
        Self {
            width: 800,
            height: 480,
            protocol: "RAW".to_string(),
            codec: "H264".to_string(),
        }
    }
}

impl VideoStreamingParams {
    /// Add these parameters to a StartService tag block.
    pub fn write_tags(&self, tags: &mut Tags) {
        tags.insert(keys::WIDTH, self.width)
            .insert(keys::HEIGHT, self.height)
            .insert(keys::VIDEO_PROTOCOL, self.protocol.as_str())
            .insert(keys::VIDEO_CODEC, self.codec.as_str());
    }
}

/// Supplies the desired video parameters; consulted only when starting Nav.
pub trait VideoParamsProvider: Send + Sync {
    fn desired_video_params(&self) -> Option<VideoStreamingParams>;
}

impl VideoParamsProvider for VideoStreamingParams {
    fn desired_video_params(&self) -> Option<VideoStreamingParams> {
        Some(self.clone())
    }
}
