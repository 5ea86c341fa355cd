//! 检测调度 (Detection Scheduler)
//!
//! 检测器是瓶颈: 每轮清空输入队列, 只检测序号最大的帧, 其余直接丢弃.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, info, warn};

use crate::detection::ObjectDetector;
use crate::error::ChannelError;
use crate::transport::ObjectSender;
use crate::types::{DetectedObjects, Frame};

/// 检测结果的出口 (通常是到边缘端的结果通道)
pub trait ResultSink {
    fn send_result(&mut self, objects: &mut DetectedObjects) -> Result<(), ChannelError>;
}

impl ResultSink for ObjectSender {
    fn send_result(&mut self, objects: &mut DetectedObjects) -> Result<(), ChannelError> {
        self.send(objects)
    }
}

/// 一次非阻塞清空的结果
#[derive(Debug)]
pub enum Drained {
    Latest { frame: Frame, discarded: Vec<u64> },
    Empty,
    Closed,
}

/// 清空队列, 保留序号最大的帧
pub fn drain_latest(frames: &Receiver<Frame>) -> Drained {
    let mut latest: Option<Frame> = None;
    let mut discarded = Vec::new();
    let mut closed = false;
    loop {
        match frames.try_recv() {
            Ok(frame) => {
                let newer = latest.as_ref().map_or(true, |current| frame.seq > current.seq);
                if !newer {
                    discarded.push(frame.seq);
                } else if let Some(previous) = latest.replace(frame) {
                    discarded.push(previous.seq);
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                closed = true;
                break;
            }
        }
    }
    match latest {
        Some(frame) => Drained::Latest { frame, discarded },
        None if closed => Drained::Closed,
        None => Drained::Empty,
    }
}

/// 单轮调度的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Detected(u64),
    Idle,
    Closed,
}

pub struct DetectionScheduler<D: ObjectDetector, S: ResultSink> {
    detector: D,
    sink: S,
    idle: Duration,
}

impl<D: ObjectDetector, S: ResultSink> DetectionScheduler<D, S> {
    pub fn new(detector: D, sink: S, idle: Duration) -> Self {
        Self {
            detector,
            sink,
            idle,
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 清空队列, 检测最新帧并发送结果
    pub fn run_once(&mut self, frames: &Receiver<Frame>) -> Result<Tick> {
        let (frame, discarded) = match drain_latest(frames) {
            Drained::Latest { frame, discarded } => (frame, discarded),
            Drained::Empty => return Ok(Tick::Idle),
            Drained::Closed => return Ok(Tick::Closed),
        };
        if !discarded.is_empty() {
            debug!("丢弃过期帧 {:?}", discarded);
        }
        info!("📥 帧 #{} 开始检测", frame.seq);

        let objects = self
            .detector
            .detect(&frame.image)
            .with_context(|| format!("detect frame #{}", frame.seq))?;
        let mut result = DetectedObjects::new(frame.seq, objects);
        self.sink
            .send_result(&mut result)
            .with_context(|| format!("send result #{}", frame.seq))?;
        info!("📤 结果 #{} 已发送 ({} 个目标)", frame.seq, result.objects.len());
        Ok(Tick::Detected(frame.seq))
    }

    /// 调度循环, 返回检测过的帧数. 单帧失败只记录, 不重试.
    pub fn run(&mut self, frames: &Receiver<Frame>, running: &AtomicBool) -> u64 {
        info!("🚀 检测调度启动");
        let mut detected = 0u64;
        while running.load(Ordering::Relaxed) {
            match self.run_once(frames) {
                Ok(Tick::Detected(_)) => detected += 1,
                Ok(Tick::Idle) => thread::sleep(self.idle),
                Ok(Tick::Closed) => break,
                Err(e) => warn!("⚠️ {:#}", e),
            }
        }
        info!("✅ 检测调度退出, 共检测 {} 帧", detected);
        detected
    }
}
