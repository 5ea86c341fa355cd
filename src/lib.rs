// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod client; // 边缘端: 关键帧发送 + 轻量跟踪 + 校正
pub mod config; // 调优参数
pub mod detection; // 检测器接口与参考实现
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod server; // 检测服务: 调度 + 结果回传
pub mod tracking; // 轻量跟踪器
pub mod transport; // 帧/结果传输通道
pub mod types; // 公共数据结构

pub use crate::config::{PipelineConfig, SeedPolicy};
pub use crate::types::{BBox, DetectedObject, DetectedObjects, Frame, FrameSize, TrackId};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::Level;

/// 初始化日志 (`verbose`: debug级别)
pub fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .try_init();
}

/// Ctrl+C 置位后所有循环在下一轮退出
pub fn install_interrupt() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("🛑 收到中断信号, 正在退出...");
        flag.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}
