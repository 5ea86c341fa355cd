//! 帧传输通道 (边缘端 → 检测服务)
//! Frame upload channel
//!
//! 每帧一次四步握手:
//! 1. 发送方: `{"type":0,"size":[h,w,c],"bytes_size":n,"seq":s}`
//! 2. 接收方: `{"type":1}`
//! 3. 发送方: n 字节JPEG载荷
//! 4. 接收方: `{"type":2}`

use std::io::Write;
use std::net::TcpStream;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::codec::{decode_frame, image_to_bytes, take_json};
use super::receiver::{Handshake, Step};
use super::sender::read_json_reply;
use crate::error::ChannelError;
use crate::types::{Frame, FrameSize};

const METADATA_MESSAGE: i64 = 0;
const METADATA_ACK_MESSAGE: i64 = 1;
const IMAGE_ACK_MESSAGE: i64 = 2;

/// 帧头
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameMetadata {
    pub size: FrameSize,
    pub bytes_size: usize,
    pub seq: u64,
}

/// 帧通道消息 (解码时校验类型字段)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMessage {
    Metadata(FrameMetadata),
    MetadataAck,
    ImageAck,
}

/// 线上格式: 以 `type` 整数区分的扁平对象
#[derive(Serialize, Deserialize)]
struct RawFrameMessage {
    #[serde(rename = "type", default)]
    kind: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<FrameSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bytes_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
}

impl FrameMessage {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FrameMessage::Metadata(_) => "METADATA",
            FrameMessage::MetadataAck => "METADATA_ACK",
            FrameMessage::ImageAck => "IMAGE_ACK",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let raw = match self {
            FrameMessage::Metadata(meta) => RawFrameMessage {
                kind: Some(METADATA_MESSAGE),
                size: Some(meta.size),
                bytes_size: Some(meta.bytes_size),
                seq: Some(meta.seq),
            },
            FrameMessage::MetadataAck => RawFrameMessage::bare(METADATA_ACK_MESSAGE),
            FrameMessage::ImageAck => RawFrameMessage::bare(IMAGE_ACK_MESSAGE),
        };
        // 仅含整数与数组的结构体, 序列化不会失败
        serde_json::to_vec(&raw).unwrap_or_default()
    }
}

impl RawFrameMessage {
    fn bare(kind: i64) -> Self {
        Self {
            kind: Some(kind),
            size: None,
            bytes_size: None,
            seq: None,
        }
    }
}

impl TryFrom<RawFrameMessage> for FrameMessage {
    type Error = ChannelError;

    fn try_from(raw: RawFrameMessage) -> Result<Self, Self::Error> {
        match raw.kind {
            Some(METADATA_MESSAGE) => match (raw.size, raw.bytes_size, raw.seq) {
                (Some(size), Some(bytes_size), Some(seq)) => {
                    Ok(FrameMessage::Metadata(FrameMetadata {
                        size,
                        bytes_size,
                        seq,
                    }))
                }
                _ => Err(ChannelError::UnexpectedMessage {
                    expected: "complete METADATA",
                    got: "METADATA with missing fields",
                }),
            },
            Some(METADATA_ACK_MESSAGE) => Ok(FrameMessage::MetadataAck),
            Some(IMAGE_ACK_MESSAGE) => Ok(FrameMessage::ImageAck),
            other => Err(ChannelError::UnknownKind(other)),
        }
    }
}

/// 从缓冲区解析一条帧通道消息
fn take_message(buf: &mut Vec<u8>) -> Result<Option<FrameMessage>, ChannelError> {
    match take_json::<RawFrameMessage>(buf)? {
        None => Ok(None),
        Some((raw, used)) => {
            buf.drain(..used);
            FrameMessage::try_from(raw).map(Some)
        }
    }
}

// ========== 接收端 ==========

/// 单个连接上的接收状态
#[derive(Debug, Default)]
pub enum FrameRecvState {
    #[default]
    AwaitMetadata,
    AwaitPayload(FrameMetadata),
}

/// 帧通道接收协议
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameHandshake;

impl Handshake for FrameHandshake {
    type Message = Frame;
    type State = FrameRecvState;

    fn name(&self) -> &'static str {
        "frame"
    }

    fn advance(
        &self,
        state: &mut FrameRecvState,
        buf: &mut Vec<u8>,
    ) -> Result<Step<Frame>, ChannelError> {
        match *state {
            FrameRecvState::AwaitMetadata => match take_message(buf)? {
                None => Ok(Step::NeedMore),
                Some(FrameMessage::Metadata(meta)) => {
                    *state = FrameRecvState::AwaitPayload(meta);
                    Ok(Step::Reply(FrameMessage::MetadataAck.encode()))
                }
                Some(other) => Err(ChannelError::UnexpectedMessage {
                    expected: "METADATA",
                    got: other.kind_name(),
                }),
            },
            FrameRecvState::AwaitPayload(meta) => {
                if buf.len() < meta.bytes_size {
                    return Ok(Step::NeedMore);
                }
                let payload: Vec<u8> = buf.drain(..meta.bytes_size).collect();
                *state = FrameRecvState::AwaitMetadata;
                Ok(Step::Complete {
                    reply: FrameMessage::ImageAck.encode(),
                    message: decode_frame(meta.size, meta.seq, &payload),
                })
            }
        }
    }

    fn expected_len(&self, state: &FrameRecvState) -> Option<usize> {
        match state {
            FrameRecvState::AwaitMetadata => None,
            FrameRecvState::AwaitPayload(meta) => Some(meta.bytes_size),
        }
    }
}

// ========== 发送端 ==========

/// 帧发送端 (阻塞, 每帧完成全部握手后返回)
pub struct FrameSender {
    stream: TcpStream,
    buf: Vec<u8>,
    jpeg_quality: u8,
}

impl FrameSender {
    pub fn new(stream: TcpStream, jpeg_quality: u8) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            jpeg_quality,
        }
    }

    pub fn send(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        debug!("📤 发送帧 #{}", frame.seq);
        let frame_bytes = image_to_bytes(&frame.image, self.jpeg_quality)?;
        let metadata = FrameMessage::Metadata(FrameMetadata {
            size: frame.size,
            bytes_size: frame_bytes.len(),
            seq: frame.seq,
        });

        self.stream.write_all(&metadata.encode())?;
        self.expect_reply(FrameMessage::MetadataAck)?;

        self.stream.write_all(&frame_bytes)?;
        self.expect_reply(FrameMessage::ImageAck)?;
        debug!("✅ 帧 #{} 已确认", frame.seq);
        Ok(())
    }

    fn expect_reply(&mut self, expected: FrameMessage) -> Result<(), ChannelError> {
        let raw: RawFrameMessage = read_json_reply(&mut self.stream, &mut self.buf)?;
        let got = FrameMessage::try_from(raw)?;
        if got != expected {
            return Err(ChannelError::UnexpectedMessage {
                expected: expected.kind_name(),
                got: got.kind_name(),
            });
        }
        Ok(())
    }
}
