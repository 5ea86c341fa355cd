//! 检测结果通道 (检测服务 → 边缘端)
//! Detection result channel: one JSON object per result, acknowledged by `ack`

use std::io::Write;
use std::net::TcpStream;

use tracing::debug;

use super::codec::take_json;
use super::receiver::{Handshake, Step};
use super::sender::read_literal_ack;
use crate::error::ChannelError;
use crate::types::DetectedObjects;

/// 结果确认字面量
pub const OBJECT_ACK: &[u8] = b"ack";

/// 结果通道接收协议
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectHandshake;

impl Handshake for ObjectHandshake {
    type Message = DetectedObjects;
    type State = ();

    fn name(&self) -> &'static str {
        "object"
    }

    fn advance(
        &self,
        _state: &mut (),
        buf: &mut Vec<u8>,
    ) -> Result<Step<DetectedObjects>, ChannelError> {
        match take_json::<DetectedObjects>(buf)? {
            None => Ok(Step::NeedMore),
            Some((objects, used)) => {
                buf.drain(..used);
                Ok(Step::Complete {
                    reply: OBJECT_ACK.to_vec(),
                    message: Ok(objects),
                })
            }
        }
    }
}

/// 结果发送端
pub struct ObjectSender {
    stream: TcpStream,
}

impl ObjectSender {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// 按置信度降序发送, 等待 `ack`
    pub fn send(&mut self, objects: &mut DetectedObjects) -> Result<(), ChannelError> {
        objects.sort_by_confidence();
        debug!("📤 发送检测结果 #{} ({} 个目标)", objects.seq, objects.objects.len());
        let message = serde_json::to_vec(&*objects)?;
        self.stream.write_all(&message)?;
        read_literal_ack(&mut self.stream, OBJECT_ACK)?;
        debug!("✅ 结果 #{} 已确认", objects.seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_parses_back_to_back_results() {
        let mut buf = br#"{"seq":3,"objects":[{"label":1,"bbox":[1,2,3,4],"confidence":0.5}]}{"seq":4,"objects":[]}"#.to_vec();

        let first = match ObjectHandshake.advance(&mut (), &mut buf).unwrap() {
            Step::Complete { reply, message } => {
                assert_eq!(reply, OBJECT_ACK);
                message.unwrap()
            }
            _ => panic!("expected a result"),
        };
        assert_eq!(first.seq, 3);
        assert_eq!(first.objects[0].bbox.x2, 3.);

        match ObjectHandshake.advance(&mut (), &mut buf).unwrap() {
            Step::Complete { message, .. } => assert_eq!(message.unwrap().seq, 4),
            _ => panic!("expected a result"),
        }
        assert!(matches!(ObjectHandshake.advance(&mut (), &mut buf).unwrap(), Step::NeedMore));
    }

    #[test]
    fn test_result_without_seq_is_rejected() {
        let mut buf = br#"{"objects":[]}"#.to_vec();
        assert!(ObjectHandshake.advance(&mut (), &mut buf).is_err());
    }
}
