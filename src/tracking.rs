//! 姿态跟踪
//! Pose tracking: tracker interface, replay tracker and the frame-feeding loop
//!
//! 模型本身是外部能力, 这里只负责把帧一帧一帧喂进去 (同一时刻最多一个请求),
//! 并把最新结果写入关键点共享槽.

use crate::error::SessionError;
use crate::input::{VideoFrame, VideoStream};
use crate::landmarks::LandmarkSet;
use crate::slot::SharedSlot;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// 没有新帧时的等待间隔
const IDLE_POLL: Duration = Duration::from_millis(2);

/// 姿态跟踪会话
pub trait PoseTracker: Send {
    /// 对单帧做姿态估计; None = 没有检测到人
    fn detect(&mut self, frame: &VideoFrame) -> Option<LandmarkSet>;

    /// 释放模型资源
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 创建跟踪会话; 失败即跟踪初始化错误
pub trait PoseTrackerFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn PoseTracker>, SessionError>;
}

/// 永远检测不到人的跟踪器 (没有配置姿态来源时使用)
pub struct NoPersonTracker;

impl PoseTracker for NoPersonTracker {
    fn detect(&mut self, _frame: &VideoFrame) -> Option<LandmarkSet> {
        None
    }
}

impl PoseTrackerFactory for NoPersonTracker {
    fn create(&self) -> Result<Box<dyn PoseTracker>, SessionError> {
        Ok(Box::new(NoPersonTracker))
    }
}

/// 录制文件里的一帧: 33 点布局, 或 COCO 17 点像素坐标
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordedFrame {
    // Coco 必须在前: Landmarks 的 Option 字段缺失时也能匹配
    Coco {
        keypoints: Vec<[f32; 3]>,
        width: f32,
        height: f32,
        #[serde(default = "default_min_confidence")]
        min_confidence: f32,
    },
    Landmarks {
        landmarks: Option<LandmarkSet>,
    },
}

fn default_min_confidence() -> f32 {
    0.3
}

impl RecordedFrame {
    fn into_landmarks(self) -> Option<LandmarkSet> {
        match self {
            RecordedFrame::Landmarks { landmarks } => landmarks,
            RecordedFrame::Coco {
                keypoints,
                width,
                height,
                min_confidence,
            } => {
                let points: Vec<(f32, f32, f32)> =
                    keypoints.iter().map(|k| (k[0], k[1], k[2])).collect();
                Some(LandmarkSet::from_coco17(&points, width, height, min_confidence))
            }
        }
    }
}

/// 回放跟踪器: 按顺序循环输出录制好的关键点
pub struct ReplayTracker {
    frames: Vec<Option<LandmarkSet>>,
    cursor: usize,
}

impl ReplayTracker {
    pub fn new(frames: Vec<Option<LandmarkSet>>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// 解析 JSON 数组, 每个元素是一帧
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let recorded: Vec<RecordedFrame> = serde_json::from_str(json)?;
        Ok(Self::new(
            recorded.into_iter().map(RecordedFrame::into_landmarks).collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl PoseTracker for ReplayTracker {
    fn detect(&mut self, _frame: &VideoFrame) -> Option<LandmarkSet> {
        if self.frames.is_empty() {
            return None;
        }
        let result = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        result
    }
}

/// 每次创建都重新读取录制文件
pub struct ReplayTrackerFactory {
    path: PathBuf,
}

impl ReplayTrackerFactory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PoseTrackerFactory for ReplayTrackerFactory {
    fn create(&self) -> Result<Box<dyn PoseTracker>, SessionError> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            SessionError::TrackingInit(format!("{}: {}", self.path.display(), e))
        })?;
        let tracker = ReplayTracker::from_json(&json).map_err(|e| {
            SessionError::TrackingInit(format!("{}: {}", self.path.display(), e))
        })?;
        if tracker.is_empty() {
            return Err(SessionError::TrackingInit(format!(
                "{}: no recorded frames",
                self.path.display()
            )));
        }
        log::info!("🦴 关键点回放已加载: {} 帧", tracker.len());
        Ok(Box::new(tracker))
    }
}

/// 喂帧循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedExit {
    /// 被 teardown 取消
    Cancelled,
    /// 视频流自己结束了
    StreamEnded,
}

/// 喂帧循环: 取最新帧 → 等待跟踪结果 → 覆盖关键点槽.
///
/// 同一时刻只有一个跟踪请求在执行, 模型慢于摄像头时自然丢帧.
/// `stop_rx` 断开或收到消息即退出; 退出时正在执行的结果被丢弃.
pub fn run_feeder(
    stream: Arc<dyn VideoStream>,
    tracker: Arc<Mutex<Box<dyn PoseTracker>>>,
    landmarks: &SharedSlot<LandmarkSet>,
    stop_rx: &Receiver<()>,
    is_current: impl Fn() -> bool,
) -> FeedExit {
    let mut last_frame_id = None;
    let mut results = 0u64;
    let mut detected = 0u64;
    let mut last = Instant::now();

    loop {
        let frame = match stream.latest_frame() {
            Some(frame) if Some(frame.frame_id) != last_frame_id => frame,
            _ => {
                if !stream.is_live() {
                    return FeedExit::StreamEnded;
                }
                match stop_rx.recv_timeout(IDLE_POLL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => return FeedExit::Cancelled,
                }
            }
        };
        last_frame_id = Some(frame.frame_id);

        let result = {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.detect(&frame)
        };

        // 跟踪期间可能已经 teardown, 过期结果直接丢弃
        if !is_current() || !matches!(stop_rx.try_recv(), Err(crossbeam_channel::TryRecvError::Empty)) {
            return FeedExit::Cancelled;
        }

        results += 1;
        match result {
            Some(set) => {
                if detected == 0 {
                    log::info!("✅ 第一次检测到人体 ({} 个关键点)", set.len());
                }
                detected += 1;
                landmarks.store(set);
            }
            None => {
                landmarks.clear();
            }
        }

        let elapsed = last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            log::debug!(
                "🔍 跟踪统计: {:.1}次/秒 | 累计 {} | 检测到人 {}",
                results as f64 / elapsed,
                results,
                detected
            );
            results = 0;
            last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Landmark, PoseLandmark};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;

    fn frame(id: u64) -> VideoFrame {
        VideoFrame::new(Arc::new(vec![0; 4]), 1, 1, id)
    }

    /// 每次 latest_frame 都给出新帧, 直到 end_after 帧后结束
    struct CountingStream {
        next: AtomicU64,
        end_after: u64,
        live: AtomicBool,
    }

    impl VideoStream for CountingStream {
        fn resolution(&self) -> (u32, u32) {
            (1, 1)
        }
        fn latest_frame(&self) -> Option<VideoFrame> {
            let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            if id > self.end_after {
                self.live.store(false, Ordering::SeqCst);
                return Some(frame(self.end_after));
            }
            Some(frame(id))
        }
        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
        fn active_tracks(&self) -> usize {
            usize::from(self.is_live())
        }
        fn stop(&self) -> anyhow::Result<()> {
            self.live.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn person(x: f32) -> LandmarkSet {
        let mut points = vec![Some(Landmark::new(0.5, 0.5)); PoseLandmark::COUNT];
        points[PoseLandmark::LeftShoulder.index()] = Some(Landmark::new(x, 0.3));
        LandmarkSet::new(points)
    }

    #[test]
    fn test_replay_cycles() {
        let mut tracker = ReplayTracker::new(vec![Some(person(0.1)), None]);
        assert!(tracker.detect(&frame(1)).is_some());
        assert!(tracker.detect(&frame(2)).is_none());
        assert!(tracker.detect(&frame(3)).is_some());
    }

    #[test]
    fn test_replay_json_formats() {
        let json = r#"[
            {"landmarks": null},
            {"landmarks": [{"x": 0.5, "y": 0.5}, null]},
            {"keypoints": [[0,0,0],[0,0,0],[0,0,0],[0,0,0],[0,0,0],
                           [384,144,0.9],[256,144,0.9]], "width": 640, "height": 480}
        ]"#;
        let mut tracker = ReplayTracker::from_json(json).unwrap();
        assert_eq!(tracker.len(), 3);
        assert!(tracker.detect(&frame(1)).is_none());
        assert_eq!(tracker.detect(&frame(2)).unwrap().len(), 2);
        let coco = tracker.detect(&frame(3)).unwrap();
        let (left, _) = coco.shoulders().unwrap();
        assert!((left.x - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_factory_missing_file_is_init_error() {
        let factory = ReplayTrackerFactory::new("/nonexistent/landmarks.json");
        assert!(matches!(factory.create(), Err(SessionError::TrackingInit(_))));
    }

    #[test]
    fn test_feeder_stores_latest_and_ends_with_stream() {
        let stream: Arc<dyn VideoStream> = Arc::new(CountingStream {
            next: AtomicU64::new(0),
            end_after: 3,
            live: AtomicBool::new(true),
        });
        let tracker: Arc<Mutex<Box<dyn PoseTracker>>> = Arc::new(Mutex::new(Box::new(
            ReplayTracker::new(vec![Some(person(0.1)), Some(person(0.2)), Some(person(0.3))]),
        )));
        let slot = SharedSlot::new();
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let exit = run_feeder(stream, tracker, &slot, &stop_rx, || true);
        assert_eq!(exit, FeedExit::StreamEnded);

        let latest = slot.load().unwrap();
        let (left, _) = latest.shoulders().unwrap();
        assert!((left.x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_feeder_cancel_discards_result() {
        let stream: Arc<dyn VideoStream> = Arc::new(CountingStream {
            next: AtomicU64::new(0),
            end_after: u64::MAX,
            live: AtomicBool::new(true),
        });
        let tracker: Arc<Mutex<Box<dyn PoseTracker>>> =
            Arc::new(Mutex::new(Box::new(ReplayTracker::new(vec![Some(person(0.4))]))));
        let slot = Arc::new(SharedSlot::new());
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let current = Arc::new(AtomicBool::new(true));

        let handle = {
            let slot = Arc::clone(&slot);
            let current = Arc::clone(&current);
            thread::spawn(move || {
                run_feeder(stream, tracker, &slot, &stop_rx, move || current.load(Ordering::SeqCst))
            })
        };

        thread::sleep(Duration::from_millis(20));
        current.store(false, Ordering::SeqCst);
        drop(stop_tx);
        assert_eq!(handle.join().unwrap(), FeedExit::Cancelled);
    }
}
