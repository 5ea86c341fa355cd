//! 图片目录视频源
//! Directory-of-images video source

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::VideoReader;
use crate::error::VideoError;
use crate::types::Frame;

/// 按文件名排序的图片序列, 帧序号 = 起始序号 + 下标
pub struct DirectoryVideoReader {
    frames_path: Vec<PathBuf>,
    start_seq: u64,
    current_seq: u64,
}

impl DirectoryVideoReader {
    pub fn open(directory: &Path) -> Result<Self, VideoError> {
        Self::open_from(directory, 0)
    }

    /// 打开目录, 跳过隐藏文件和无法识别的图片
    pub fn open_from(directory: &Path, start_seq: u64) -> Result<Self, VideoError> {
        let mut frames_path: Vec<PathBuf> = fs::read_dir(directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        frames_path.sort();

        frames_path.retain(|path| {
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(true, |name| name.starts_with('.'));
            if hidden {
                return false;
            }
            // 只读文件头, 不解码像素
            match image::image_dimensions(path) {
                Ok(_) => true,
                Err(e) => {
                    debug!("跳过 {}: {}", path.display(), e);
                    false
                }
            }
        });

        info!(
            "📁 视频目录 {}: {} 帧",
            directory.display(),
            frames_path.len()
        );

        Ok(Self {
            frames_path,
            start_seq,
            current_seq: start_seq,
        })
    }

    pub fn len(&self) -> usize {
        self.frames_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames_path.is_empty()
    }
}

impl VideoReader for DirectoryVideoReader {
    fn frame_at(&self, seq: u64) -> Result<Frame, VideoError> {
        let index = seq
            .checked_sub(self.start_seq)
            .ok_or(VideoError::OutOfRange(seq))?;
        let path = self
            .frames_path
            .get(index as usize)
            .ok_or(VideoError::OutOfRange(seq))?;
        let image = image::open(path)?.to_rgb8();
        Ok(Frame::new(image, seq))
    }

    fn next_frame(&mut self) -> Result<Frame, VideoError> {
        let frame = self.frame_at(self.current_seq);
        self.current_seq += 1;
        frame
    }

    fn has_next(&self) -> bool {
        ((self.current_seq - self.start_seq) as usize) < self.frames_path.len()
    }
}
