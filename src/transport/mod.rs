//! 传输系统 (Framed Channel)
//!
//! 两条单向逻辑流, 每条一个独立TCP连接:
//! - 帧通道:   边缘端 → 检测服务 (帧头 + JPEG载荷, 两次确认)
//! - 结果通道: 检测服务 → 边缘端 (JSON结果 + `ack`)
//!
//! 接收端在单线程中用就绪多路复用服务所有连接; 发送端维护一条出站连接.
pub mod codec;
pub mod frame_channel;
pub mod object_channel;
pub mod receiver;
pub mod sender;

pub use frame_channel::{FrameHandshake, FrameMessage, FrameMetadata, FrameSender};
pub use object_channel::{ObjectHandshake, ObjectSender, OBJECT_ACK};
pub use receiver::{Handshake, Receiver, Step};
pub use sender::Connector;

/// 帧接收端
pub type FrameReceiver = Receiver<FrameHandshake>;
/// 结果接收端
pub type ObjectReceiver = Receiver<ObjectHandshake>;
