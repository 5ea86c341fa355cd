//! 视频输入系统 (Video Input System)
//!
//! 独立工作线程, 按配置帧率产生帧并推入采集队列.
//! 只在帧间休眠和读图时阻塞, 从不触碰网络.
pub mod directory;

pub use directory::DirectoryVideoReader;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::error::VideoError;
use crate::types::Frame;

/// 视频源
pub trait VideoReader: Send {
    /// 读取指定序号的帧
    fn frame_at(&self, seq: u64) -> Result<Frame, VideoError>;
    /// 读取下一帧并前进
    fn next_frame(&mut self) -> Result<Frame, VideoError>;
    fn has_next(&self) -> bool;
}

/// 帧间隔
pub fn frame_interval(frame_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / frame_rate.max(1) as f64)
}

/// 启动采集线程. 视频读完或中断后退出, 队列随之断开.
pub fn spawn_capture<R>(
    mut reader: R,
    frame_rate: u32,
    tx: Sender<Frame>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    R: VideoReader + 'static,
{
    let interval = frame_interval(frame_rate);
    thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            info!("🎬 采集线程启动 ({} fps)", frame_rate);
            let mut produced = 0u64;
            while running.load(Ordering::Relaxed) && reader.has_next() {
                match reader.next_frame() {
                    Ok(frame) => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                        produced += 1;
                    }
                    Err(e) => warn!("⚠️ 丢弃帧: {}", e),
                }
                thread::sleep(interval);
            }
            info!("✅ 采集线程退出, 共 {} 帧", produced);
        })
}
