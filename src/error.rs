//! 错误类型 (Error types)
//!
//! 每个子系统一个错误枚举; 顶层循环和可执行文件使用 `anyhow`.

use std::io;

use thiserror::Error;

use crate::types::TrackId;

/// 传输通道错误. 除 `Io`/`Disconnected` 外都属于协议违规, 只影响当前消息.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no recognized type (got {0:?})")]
    UnknownKind(Option<i64>),
    #[error("expected {expected} message, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },
    #[error("invalid ack {0:?}")]
    BadAck(String),
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("peer closed the connection")]
    Disconnected,
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
    #[error("decoded image is {got:?}, header announced {expected:?}")]
    SizeMismatch {
        expected: crate::types::FrameSize,
        got: crate::types::FrameSize,
    },
}

impl ChannelError {
    /// 连接已不可用 (需要丢弃该连接)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::Io(_) | ChannelError::Disconnected | ChannelError::ShortRead { .. }
        )
    }
}

/// 轻量跟踪器错误
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("track id {0} has no seed box")]
    Unseeded(TrackId),
    #[error("tracker backend: {0}")]
    Backend(String),
}

/// 检测器错误
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("image {width}x{height} is too small to detect on")]
    ImageTooSmall { width: u32, height: u32 },
}

/// 关键帧差异计算错误
#[derive(Debug, Error)]
pub enum KeyframeError {
    #[error("thumbnail buffer: {0}")]
    Buffer(#[from] fast_image_resize::ImageBufferError),
    #[error("thumbnail resize: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),
}

/// 视频输入错误
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video directory: {0}")]
    Io(#[from] io::Error),
    #[error("frame image: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame {0} is out of range")]
    OutOfRange(u64),
}

/// 校正引擎错误 (单次循环迭代失败, 循环继续)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Keyframe(#[from] KeyframeError),
    #[error("frame {got} arrived after frame {last}")]
    OutOfOrder { last: u64, got: u64 },
}
