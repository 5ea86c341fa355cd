//! 检测服务 (Detection Server)
//!
//! - 帧接收线程: 就绪多路复用接收帧 → 输入队列
//! - 主线程: 检测调度, 独占检测器和到边缘端的结果连接
pub mod scheduler;

pub use scheduler::{drain_latest, DetectionScheduler, Drained, ResultSink, Tick};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::PipelineConfig;
use crate::detection::BlobDetector;
use crate::error::ChannelError;
use crate::transport::{Connector, FrameHandshake, FrameReceiver, ObjectSender};
use crate::types::DetectedObjects;

/// 检测服务启动参数
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub listen: SocketAddr,
    pub client_addr: String,
}

/// 到边缘端的结果通道. 连接断开后在下一次发送时重连.
pub struct ClientLink {
    connector: Connector,
    sender: Option<ObjectSender>,
}

impl ClientLink {
    pub fn new(connector: Connector, sender: ObjectSender) -> Self {
        Self {
            connector,
            sender: Some(sender),
        }
    }
}

impl ResultSink for ClientLink {
    fn send_result(&mut self, objects: &mut DetectedObjects) -> Result<(), ChannelError> {
        if self.sender.is_none() {
            let stream = self.connector.try_connect()?;
            info!("🔗 已重新连接边缘端 {}", self.connector.addr());
            self.sender = Some(ObjectSender::new(stream));
        }
        let Some(sender) = self.sender.as_mut() else {
            return Err(ChannelError::Disconnected);
        };
        let sent = sender.send(objects);
        if let Err(e) = &sent {
            if e.is_fatal() {
                self.sender = None;
            }
        }
        sent
    }
}

/// 运行检测服务直到中断
pub fn run(options: &ServerOptions, config: &PipelineConfig, running: Arc<AtomicBool>) -> Result<()> {
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
    let receiver = FrameReceiver::bind(options.listen, FrameHandshake)
        .with_context(|| format!("bind frame listener on {}", options.listen))?;
    info!("📡 帧接收端监听 {}", receiver.local_addr());
    let receiver_handle = receiver.spawn(frame_tx, running.clone())?;

    let connector = Connector::new(options.client_addr.clone(), config.connect_retry())
        .with_ack_timeout(config.ack_timeout());
    info!("⏳ 等待边缘端 {}...", connector.addr());
    let Some(stream) = connector.connect(&running) else {
        info!("🛑 连接前被中断");
        return Ok(());
    };
    info!("🔗 已连接边缘端");

    let detector = BlobDetector::new(
        config.detector_min_area,
        config.detector_nms_iou,
        config.detector_max_objects,
    );
    let link = ClientLink::new(connector, ObjectSender::new(stream));
    let mut scheduler = DetectionScheduler::new(detector, link, config.scheduler_idle());
    scheduler.run(&frame_rx, &running);

    running.store(false, Ordering::Relaxed);
    let _ = receiver_handle.join();
    Ok(())
}
