//! 流水线配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 跟踪目标与检测结果的对应策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedPolicy {
    /// 按与当前框的IOU贪心匹配, 剩余的按置信度顺序补齐
    Overlap,
    /// 第i个跟踪ID取置信度第i高的目标
    Rank,
}

/// 流水线参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 关键帧选择 ===
    pub frame_diff_threshold: u64,     // 帧差阈值 (灰度缩略图绝对差之和)
    pub min_keyframe_interval_ms: u64, // 关键帧最小间隔
    pub diff_width: u32,               // 帧差缩略图宽
    pub diff_height: u32,              // 帧差缩略图高

    // === 跟踪 ===
    pub max_tracked_objects: usize, // 跟踪目标数
    pub track_reset_horizon: u32,   // 隐状态回滚周期 (步)
    pub seed_policy: SeedPolicy,    // 校正时的目标对应策略
    pub min_seed_iou: f32,          // Overlap策略的最小IOU
    pub max_cached_frames: usize,   // 帧缓存上限

    // === 传输 ===
    pub connect_retry_ms: u64,      // 连接重试间隔
    pub ack_timeout_ms: Option<u64>, // 等待确认超时 (None: 无限等待)
    pub jpeg_quality: u8,           // 传输图像质量

    // === 检测服务 ===
    pub scheduler_idle_ms: u64,     // 队列为空时的休眠
    pub detector_min_area: u32,     // 最小目标面积 (像素)
    pub detector_nms_iou: f32,      // NMS IOU阈值
    pub detector_max_objects: usize, // 单帧最多返回目标数

    // === 输出 ===
    pub bbox_padding: u32, // 绘制线宽 (像素)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // 关键帧
            frame_diff_threshold: 4_500_000,
            min_keyframe_interval_ms: 100,
            diff_width: 320,
            diff_height: 200,

            // 跟踪
            max_tracked_objects: 1,
            track_reset_horizon: 4,
            seed_policy: SeedPolicy::Overlap,
            min_seed_iou: 0.1,
            max_cached_frames: 600,

            // 传输
            connect_retry_ms: 2000,
            ack_timeout_ms: None,
            jpeg_quality: 90,

            // 检测服务
            scheduler_idle_ms: 100,
            detector_min_area: 64,
            detector_nms_iou: 0.45,
            detector_max_objects: 20,

            bbox_padding: 1,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置. 文件不存在时写入默认配置, 解析失败时使用默认值.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前流水线配置:");
        info!("  帧差阈值: {}", self.frame_diff_threshold);
        info!("  关键帧最小间隔: {}ms", self.min_keyframe_interval_ms);
        info!("  跟踪目标数: {}", self.max_tracked_objects);
        info!("  隐状态回滚周期: {}", self.track_reset_horizon);
        info!("  目标对应策略: {:?}", self.seed_policy);
    }

    pub fn min_keyframe_interval(&self) -> Duration {
        Duration::from_millis(self.min_keyframe_interval_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    pub fn scheduler_idle(&self) -> Duration {
        Duration::from_millis(self.scheduler_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_diff_threshold, 4_500_000);
        assert_eq!(config.track_reset_horizon, 4);
        assert_eq!(config.min_keyframe_interval(), Duration::from_millis(100));
        assert!(config.ack_timeout().is_none());
    }

    #[test]
    fn test_config_load_creates_and_reads_back() {
        let path = std::env::temp_dir().join(format!("edgetrack-config-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let created = PipelineConfig::load(&path);
        assert!(path.exists());
        assert_eq!(created.max_tracked_objects, 1);

        fs::write(&path, r#"{"max_tracked_objects": 3, "seed_policy": "rank"}"#).unwrap();
        let loaded = PipelineConfig::load(&path);
        assert_eq!(loaded.max_tracked_objects, 3);
        assert_eq!(loaded.seed_policy, SeedPolicy::Rank);
        // 未出现的字段使用默认值
        assert_eq!(loaded.diff_width, 320);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_config_parse_failure_falls_back() {
        let path = std::env::temp_dir().join(format!("edgetrack-bad-{}.json", std::process::id()));
        fs::write(&path, "not json").unwrap();
        let config = PipelineConfig::load(&path);
        assert_eq!(config.frame_diff_threshold, 4_500_000);
        let _ = fs::remove_file(&path);
    }
}
