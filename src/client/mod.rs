//! 边缘端 (Edge Client)
//!
//! 三个线程:
//! - 采集线程: 按帧率读取视频 → 采集队列
//! - 结果接收线程: 就绪多路复用接收检测结果 → 结果队列
//! - 主线程 (本模块): 关键帧发送 + 轻量跟踪 + 校正 + 输出
pub mod engine;
pub mod keyframe;
pub mod registry;
pub mod render;

pub use engine::{EngineState, FrameSink, ReconcileReport, ReconciliationEngine, TrackedFrame};
pub use keyframe::{KeyframeDecision, KeyframeSelector};
pub use registry::{FrameCache, SentFrameRegistry};
pub use render::{FrameRenderer, OverlayWriter};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::ChannelError;
use crate::input::{spawn_capture, DirectoryVideoReader};
use crate::tracking::{CheckpointTracker, ObjectTracker, TemplateBackend};
use crate::transport::{Connector, FrameSender, ObjectHandshake, ObjectReceiver};
use crate::types::{DetectedObjects, Frame};

/// 队列等待粒度, 每轮检查一次中断标志
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 边缘端启动参数
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub listen: SocketAddr,
    pub server_addr: String,
    pub video_path: PathBuf,
    pub frame_rate: u32,
    pub out: PathBuf,
}

/// 到检测服务的帧通道. 连接断开后在下一次发送时重连.
pub struct ServerLink {
    connector: Connector,
    sender: Option<FrameSender>,
    jpeg_quality: u8,
}

impl ServerLink {
    pub fn new(connector: Connector, sender: FrameSender, jpeg_quality: u8) -> Self {
        Self {
            connector,
            sender: Some(sender),
            jpeg_quality,
        }
    }
}

impl FrameSink for ServerLink {
    fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        if self.sender.is_none() {
            let stream = self.connector.try_connect()?;
            info!("🔗 已重新连接检测服务 {}", self.connector.addr());
            self.sender = Some(FrameSender::new(stream, self.jpeg_quality));
        }
        let Some(sender) = self.sender.as_mut() else {
            return Err(ChannelError::Disconnected);
        };
        let sent = sender.send(frame);
        if let Err(e) = &sent {
            if e.is_fatal() {
                self.sender = None;
            }
        }
        sent
    }
}

/// 等待下一帧; 中断或采集结束时返回 None
fn next_frame(frames: &Receiver<Frame>, running: &AtomicBool) -> Option<Frame> {
    while running.load(Ordering::Relaxed) {
        match frames.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => return Some(frame),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
    None
}

/// 启动阶段: 无条件发送首帧, 阻塞等待其检测结果并锚定.
/// 中断或输入结束时返回 `Ok(false)`.
pub fn bootstrap<T, S>(
    engine: &mut ReconciliationEngine<T, S>,
    frames: &Receiver<Frame>,
    results: &Receiver<DetectedObjects>,
    running: &AtomicBool,
) -> Result<bool>
where
    T: ObjectTracker,
    S: FrameSink,
{
    loop {
        let Some(first) = next_frame(frames, running) else {
            return Ok(false);
        };
        match engine.send_first(&first) {
            Ok(()) => break,
            Err(e) => warn!("⚠️ 首帧 #{} 发送失败, 尝试下一帧: {}", first.seq, e),
        }
    }

    info!("⏳ 等待首帧检测结果...");
    while running.load(Ordering::Relaxed) {
        let batch = match results.recv_timeout(POLL_INTERVAL) {
            Ok(result) => vec![result],
            // 空批次: 重试上次锚定失败的结果
            Err(RecvTimeoutError::Timeout) if engine.deferred_seq().is_some() => Vec::new(),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("result receiver stopped before the first detection")
            }
        };
        match engine.reconcile(batch) {
            Ok(Some(report)) => {
                info!("✅ 首帧锚定完成, 跟踪 {} 个目标", report.seeded.len());
                return Ok(true);
            }
            Ok(None) => continue,
            Err(e) => warn!("⚠️ 首帧锚定失败: {}", e),
        }
    }
    Ok(false)
}

/// 主循环: 每帧处理一次, 并非阻塞取出所有已到达的检测结果.
/// 单帧失败只记录并跳过; 采集结束或中断时返回处理的帧数.
pub fn track_stream<T, S, R>(
    engine: &mut ReconciliationEngine<T, S>,
    renderer: &mut R,
    frames: &Receiver<Frame>,
    results: &Receiver<DetectedObjects>,
    running: &AtomicBool,
) -> u64
where
    T: ObjectTracker,
    S: FrameSink,
    R: FrameRenderer,
{
    let mut processed = 0u64;
    while let Some(frame) = next_frame(frames, running) {
        let pending: Vec<DetectedObjects> = results.try_iter().collect();
        let seq = frame.seq;
        match engine.process_frame(frame, pending) {
            Ok(tracked) => {
                processed += 1;
                if let Err(e) = renderer.render(&tracked.frame, &tracked.boxes) {
                    warn!("⚠️ 帧 #{} 输出失败: {}", seq, e);
                }
            }
            Err(e) => warn!("⚠️ 跳过帧 #{}: {}", seq, e),
        }
    }
    processed
}

/// 运行边缘端直到视频结束或中断
pub fn run(options: &ClientOptions, config: &PipelineConfig, running: Arc<AtomicBool>) -> Result<()> {
    let (result_tx, result_rx) = crossbeam_channel::unbounded();
    let receiver = ObjectReceiver::bind(options.listen, ObjectHandshake)
        .with_context(|| format!("bind result listener on {}", options.listen))?;
    info!("📡 结果接收端监听 {}", receiver.local_addr());
    let receiver_handle = receiver.spawn(result_tx, running.clone())?;

    // 无论成功与否都先停止并回收接收线程
    let outcome = track_video(options, config, &running, &result_rx);
    running.store(false, Ordering::Relaxed);
    let _ = receiver_handle.join();
    outcome
}

fn track_video(
    options: &ClientOptions,
    config: &PipelineConfig,
    running: &Arc<AtomicBool>,
    results: &Receiver<DetectedObjects>,
) -> Result<()> {
    let reader = DirectoryVideoReader::open(&options.video_path)
        .with_context(|| format!("open video directory {}", options.video_path.display()))?;
    let mut renderer = OverlayWriter::new(&options.out, config.bbox_padding)
        .with_context(|| format!("create output directory {}", options.out.display()))?;

    let connector = Connector::new(options.server_addr.clone(), config.connect_retry())
        .with_ack_timeout(config.ack_timeout());
    info!("⏳ 等待检测服务 {}...", connector.addr());
    let Some(stream) = connector.connect(running) else {
        info!("🛑 连接前被中断");
        return Ok(());
    };
    info!("🔗 已连接检测服务");
    let link = ServerLink::new(
        connector,
        FrameSender::new(stream, config.jpeg_quality),
        config.jpeg_quality,
    );
    let tracker = CheckpointTracker::new(TemplateBackend::default(), config.track_reset_horizon);
    let mut engine = ReconciliationEngine::new(tracker, link, config, options.frame_rate);

    let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
    let capture_handle = spawn_capture(reader, options.frame_rate, frame_tx, running.clone())?;

    let bootstrapped = bootstrap(&mut engine, &frame_rx, results, running);
    if let Ok(true) = bootstrapped {
        let processed = track_stream(&mut engine, &mut renderer, &frame_rx, results, running);
        info!("✅ 边缘端结束, 共处理 {} 帧", processed);
    }

    running.store(false, Ordering::Relaxed);
    let _ = capture_handle.join();
    bootstrapped.map(|_| ())
}
