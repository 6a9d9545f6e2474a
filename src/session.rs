//! 采集/跟踪会话
//! Capture/tracking lifecycle: state machine, worker threads and scoped resources
//!
//! 线程划分:
//! - acquisition: 打开摄像头, 创建跟踪会话 (一次性)
//! - feeder:      取帧 → 跟踪 → 写关键点槽
//! - render:      按固定帧率合成画面, 写输出槽和状态
//!
//! 每次 start/stop 都会递增 generation, 旧线程发现自己过期后不再修改任何共享状态.

use crate::error::{AssetError, SessionError};
use crate::garment::{GarmentAsset, GarmentLimits};
use crate::input::{CameraDevice, CaptureRequest, VideoStream};
use crate::landmarks::LandmarkSet;
use crate::placement::{PlacementConfig, PlacementParams};
use crate::render::{run_render_loop, Compositor};
use crate::slot::SharedSlot;
use crate::status;
use crate::tracking::{run_feeder, FeedExit, PoseTracker, PoseTrackerFactory};
use ab_glyph::FontArc;
use anyhow::{anyhow, Context};
use crossbeam_channel::{select, Receiver, Sender};
use image::RgbaImage;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 普通工作线程的退出等待时间
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// 采集线程可能卡在打开摄像头上 (FFmpeg 首帧超时 5 秒)
const ACQUISITION_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 会话状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Tracking,
    Error(SessionError),
    Stopped,
}

impl SessionState {
    /// 渲染循环只在这两个状态下继续调度
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Acquiring | SessionState::Tracking)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Tracking => "tracking",
            SessionState::Error(_) => "error",
            SessionState::Stopped => "stopped",
        }
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionState::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(err) => write!(f, "error: {}", err),
            other => f.write_str(other.name()),
        }
    }
}

/// 会话启动参数 (整个会话期间不变)
#[derive(Clone)]
pub struct SessionSettings {
    pub capture: CaptureRequest,
    pub render_fps: u32,
    pub params: PlacementParams,
    pub debug_overlay: bool,
    pub font: Option<FontArc>,
    pub limits: GarmentLimits,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capture: CaptureRequest::default(),
            render_fps: 60,
            params: PlacementParams::default(),
            debug_overlay: false,
            font: None,
            limits: GarmentLimits::default(),
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("capture", &self.capture)
            .field("render_fps", &self.render_fps)
            .field("params", &self.params)
            .field("debug_overlay", &self.debug_overlay)
            .field("font", &self.font.is_some())
            .field("limits", &self.limits)
            .finish()
    }
}

/// 工作线程句柄: 断开 stop 通道通知退出, 带超时等待.
pub(crate) struct Worker {
    name: &'static str,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &'static str, f: F) -> anyhow::Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                f(stop_rx);
                let _ = done_tx.send(());
            })
            .with_context(|| format!("failed to spawn {} thread", name))?;

        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
            join_timeout: WORKER_JOIN_TIMEOUT,
        })
    }

    fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub(crate) fn release(&mut self) -> anyhow::Result<()> {
        drop(self.stop_tx.take());
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // 线程 panic 时 done_tx 被丢弃, recv 立即返回
        select! {
            recv(self.done_rx) -> _ => {}
            default(self.join_timeout) => {
                return Err(anyhow!("{} thread did not exit within {:?}", self.name, self.join_timeout));
            }
        }
        handle
            .join()
            .map_err(|_| anyhow!("{} thread panicked", self.name))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("⚠️ {}", e);
        }
    }
}

/// 摄像头流句柄: 释放即停止所有轨道
pub(crate) struct StreamHandle {
    stream: Option<Arc<dyn VideoStream>>,
}

impl StreamHandle {
    fn new(stream: Arc<dyn VideoStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn release(&mut self) -> anyhow::Result<()> {
        match self.stream.take() {
            Some(stream) => stream.stop().context("failed to stop camera stream"),
            None => Ok(()),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("⚠️ {:#}", e);
        }
    }
}

/// 跟踪会话句柄
pub(crate) struct TrackerHandle {
    tracker: Option<Arc<Mutex<Box<dyn PoseTracker>>>>,
}

impl TrackerHandle {
    fn new(tracker: Box<dyn PoseTracker>) -> Self {
        Self {
            tracker: Some(Arc::new(Mutex::new(tracker))),
        }
    }

    fn shared(&self) -> Option<Arc<Mutex<Box<dyn PoseTracker>>>> {
        self.tracker.clone()
    }

    fn release(&mut self) -> anyhow::Result<()> {
        let Some(tracker) = self.tracker.take() else {
            return Ok(());
        };
        // 卡住的跟踪请求仍持有锁: 放弃显式关闭, 最后一个引用释放时随之销毁
        let mut guard = match tracker.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(anyhow!("pose tracker is busy, close deferred"));
            }
        };
        guard.close().context("failed to close pose tracker")
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("⚠️ {:#}", e);
        }
    }
}

/// 会话持有的可释放资源
#[derive(Default)]
pub(crate) struct Resources {
    render: Option<Worker>,
    acquisition: Option<Worker>,
    feeder: Option<Worker>,
    tracker: Option<TrackerHandle>,
    stream: Option<StreamHandle>,
}

impl Resources {
    /// 按顺序逐个释放, 任何一个失败都不影响其它; 返回失败个数
    fn release_all(mut self) -> usize {
        let mut failures = 0;
        let mut report = |what: &str, result: anyhow::Result<()>| {
            if let Err(e) = result {
                failures += 1;
                log::warn!("⚠️ 释放{}失败: {:#}", what, e);
            }
        };

        if let Some(mut worker) = self.render.take() {
            report("渲染循环", worker.release());
        }
        if let Some(mut worker) = self.acquisition.take() {
            report("采集线程", worker.release());
        }
        if let Some(mut worker) = self.feeder.take() {
            report("喂帧循环", worker.release());
        }
        if let Some(mut tracker) = self.tracker.take() {
            report("跟踪会话", tracker.release());
        }
        if let Some(mut stream) = self.stream.take() {
            report("摄像头", stream.release());
        }
        failures
    }
}

/// 各线程共享的会话状态
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    generation: AtomicU64,
    resources: Mutex<Resources>,
    last_error: Mutex<Option<SessionError>>,
    status: Mutex<String>,
    pub(crate) pending_ticks: AtomicUsize,

    pub(crate) landmarks: SharedSlot<LandmarkSet>,
    pub(crate) garment: SharedSlot<GarmentAsset>,
    pub(crate) config: SharedSlot<PlacementConfig>,
    pub(crate) stream: SharedSlot<dyn VideoStream>,
    pub(crate) surface: SharedSlot<RgbaImage>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            generation: AtomicU64::new(0),
            resources: Mutex::new(Resources::default()),
            last_error: Mutex::new(None),
            status: Mutex::new(status::WAITING_FOR_CAMERA.to_string()),
            pending_ticks: AtomicUsize::new(0),
            landmarks: SharedSlot::new(),
            garment: SharedSlot::new(),
            config: SharedSlot::with_value(PlacementConfig::default()),
            stream: SharedSlot::new(),
            surface: SharedSlot::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// 仅当 generation 仍然有效时切换状态; Error 只能由 start/stop 离开
    fn transition(&self, generation: u64, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if !self.is_current(generation) || matches!(*state, SessionState::Error(_)) {
            return false;
        }
        log::info!("🔄 会话状态: {} → {}", state.name(), next.name());
        *state = next;
        true
    }

    fn fail(&self, generation: u64, err: SessionError) {
        if self.transition(generation, SessionState::Error(err.clone())) {
            log::error!("❌ 会话失败: {}", err);
            self.set_status(err.to_string());
            *lock(&self.last_error) = Some(err);
        }
    }

    /// 返回是否有变化
    pub(crate) fn set_status(&self, text: String) -> bool {
        let mut status = lock(&self.status);
        if *status == text {
            return false;
        }
        *status = text;
        true
    }

    fn status(&self) -> String {
        lock(&self.status).clone()
    }
}

/// 一次摄像头 + 姿态跟踪的激活周期
pub struct Session {
    shared: Arc<Shared>,
    camera: Arc<dyn CameraDevice>,
    trackers: Arc<dyn PoseTrackerFactory>,
    settings: SessionSettings,
    // 串行化 start/stop
    lifecycle: Mutex<()>,
}

impl Session {
    pub fn new(
        camera: Arc<dyn CameraDevice>,
        trackers: Arc<dyn PoseTrackerFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            camera,
            trackers,
            settings,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// 启动会话: 立即进入 Acquiring, 摄像头在后台打开.
    ///
    /// 已经在运行 (或处于 Error/Stopped) 时先完整 teardown 再重新开始.
    pub fn start(&self) -> anyhow::Result<()> {
        let _guard = lock(&self.lifecycle);
        if self.shared.state() != SessionState::Idle {
            self.teardown();
        }

        let generation = {
            let mut state = lock(&self.shared.state);
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *state = SessionState::Acquiring;
            generation
        };
        *lock(&self.shared.last_error) = None;
        self.shared.landmarks.clear();
        self.shared.set_status(status::WAITING_FOR_CAMERA.to_string());
        log::info!(
            "🚀 会话启动 (#{}): 请求 {}x{} @ {}fps, 渲染 {}fps",
            generation,
            self.settings.capture.width,
            self.settings.capture.height,
            self.settings.capture.fps,
            self.settings.render_fps
        );

        // 渲染循环在 Acquiring 期间就开始, 用于显示状态
        let compositor = Compositor::new(
            self.settings.capture.width,
            self.settings.capture.height,
            self.settings.params,
        )
        .with_debug_overlay(self.settings.debug_overlay)
        .with_font(self.settings.font.clone());
        let interval = Duration::from_secs_f64(1.0 / self.settings.render_fps.max(1) as f64);
        let shared = Arc::clone(&self.shared);
        self.shared.pending_ticks.store(1, Ordering::Release);
        let render = Worker::spawn("render", move |stop_rx| {
            run_render_loop(shared, generation, compositor, interval, stop_rx)
        })?;
        lock(&self.shared.resources).render = Some(render);

        let shared = Arc::clone(&self.shared);
        let camera = Arc::clone(&self.camera);
        let trackers = Arc::clone(&self.trackers);
        let capture = self.settings.capture;
        let acquisition = Worker::spawn("acquisition", move |_stop_rx| {
            acquire(shared, generation, camera, trackers, capture)
        })?
        .with_join_timeout(ACQUISITION_JOIN_TIMEOUT);
        lock(&self.shared.resources).acquisition = Some(acquisition);

        Ok(())
    }

    /// 停止会话, 释放所有资源后进入 Stopped. 可重复调用; Idle 时什么也不做.
    pub fn stop(&self) {
        let _guard = lock(&self.lifecycle);
        if self.shared.state() == SessionState::Idle {
            return;
        }
        self.teardown();
        *lock(&self.shared.state) = SessionState::Stopped;
        self.shared.set_status(status::STOPPED.to_string());
    }

    /// 使当前 generation 失效, 然后逐个释放资源 (在锁外进行)
    fn teardown(&self) {
        {
            let _state = lock(&self.shared.state);
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
        }
        let resources = std::mem::take(&mut *lock(&self.shared.resources));
        let failures = resources.release_all();

        self.shared.stream.clear();
        self.shared.landmarks.clear();
        self.shared.pending_ticks.store(0, Ordering::Release);

        if failures == 0 {
            log::info!("🛑 会话资源已全部释放");
        } else {
            log::warn!("⚠️ 会话已停止, {} 个资源释放失败", failures);
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn status(&self) -> String {
        self.shared.status()
    }

    /// 最近一次致命错误 (停止后仍保留, 重新 start 时清除)
    pub fn last_error(&self) -> Option<SessionError> {
        lock(&self.shared.last_error).clone()
    }

    pub fn config(&self) -> PlacementConfig {
        self.shared.config.load().map(|c| *c).unwrap_or_default()
    }

    /// 替换放置配置; 下一次渲染生效, 不会重启摄像头或跟踪
    pub fn set_config(&self, config: PlacementConfig) {
        self.shared.config.store(config.clamped());
    }

    pub fn update_config(&self, f: impl FnOnce(PlacementConfig) -> PlacementConfig) -> PlacementConfig {
        *self
            .shared
            .config
            .update(|current| f(current.copied().unwrap_or_default()).clamped())
    }

    /// 替换或清除服装 (整体替换)
    pub fn set_garment(&self, garment: Option<GarmentAsset>) {
        match garment {
            Some(asset) => {
                log::info!("👕 服装已更新: {}x{}", asset.width(), asset.height());
                self.shared.garment.store(asset);
            }
            None => {
                log::info!("👕 服装已清除");
                self.shared.garment.clear();
            }
        }
    }

    /// 解码失败时报告错误并清除服装, 渲染继续
    pub fn load_garment(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let path = path.as_ref();
        self.apply_garment(GarmentAsset::from_path(path, &self.settings.limits), &path.display().to_string())
    }

    pub fn load_garment_bytes(&self, bytes: &[u8]) -> Result<(), AssetError> {
        self.apply_garment(GarmentAsset::from_bytes(bytes, &self.settings.limits), "<memory>")
    }

    fn apply_garment(&self, result: Result<GarmentAsset, AssetError>, source: &str) -> Result<(), AssetError> {
        match result {
            Ok(asset) => {
                self.set_garment(Some(asset));
                Ok(())
            }
            Err(e) => {
                log::error!("❌ 服装加载失败 {}: {}", source, e);
                self.shared.garment.clear();
                Err(e)
            }
        }
    }

    pub fn garment(&self) -> Option<Arc<GarmentAsset>> {
        self.shared.garment.load()
    }

    /// 最新合成画面及其版本号
    pub fn latest_surface(&self) -> (u64, Option<Arc<RgbaImage>>) {
        self.shared.surface.load_versioned()
    }

    pub fn latest_landmarks(&self) -> Option<Arc<LandmarkSet>> {
        self.shared.landmarks.load()
    }

    /// 已调度但尚未执行的渲染 tick 数
    pub fn scheduled_render_ticks(&self) -> usize {
        self.shared.pending_ticks.load(Ordering::Acquire)
    }

    /// 当前会话持有的摄像头轨道数
    pub fn active_camera_tracks(&self) -> usize {
        self.shared
            .stream
            .load()
            .map(|stream| stream.active_tracks())
            .unwrap_or(0)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 采集线程: 打开摄像头 → 创建跟踪会话 → 安装资源并启动喂帧循环
fn acquire(
    shared: Arc<Shared>,
    generation: u64,
    camera: Arc<dyn CameraDevice>,
    trackers: Arc<dyn PoseTrackerFactory>,
    capture: CaptureRequest,
) {
    let stream = match camera.open(&capture) {
        Ok(stream) => stream,
        Err(e) => {
            shared.fail(generation, e);
            return;
        }
    };
    let stream_handle = StreamHandle::new(Arc::clone(&stream));
    let (width, height) = stream.resolution();
    log::info!("📷 摄像头已就绪: {}x{}", width, height);

    // 失败时 stream_handle 随作用域释放, 摄像头轨道随之停止
    let tracker_handle = match trackers.create() {
        Ok(tracker) => TrackerHandle::new(tracker),
        Err(e) => {
            drop(stream_handle);
            shared.fail(generation, e);
            return;
        }
    };
    let Some(tracker) = tracker_handle.shared() else {
        return;
    };

    let mut resources = lock(&shared.resources);
    if !shared.is_current(generation) {
        drop(resources);
        log::info!("⏹️ 会话已被取消, 放弃刚打开的摄像头");
        return;
    }

    // 先进入 Tracking 再启动喂帧: 流立即结束时 Error 不会被覆盖
    shared.stream.store_arc(Arc::clone(&stream));
    shared.transition(generation, SessionState::Tracking);

    let feeder_shared = Arc::clone(&shared);
    let feeder = Worker::spawn("feeder", move |stop_rx| {
        let exit = run_feeder(
            stream,
            tracker,
            &feeder_shared.landmarks,
            &stop_rx,
            || feeder_shared.is_current(generation),
        );
        if exit == FeedExit::StreamEnded {
            feeder_shared.fail(generation, SessionError::DeviceDisconnected);
        }
        log::info!("🔚 喂帧循环退出: {:?}", exit);
    });

    match feeder {
        Ok(feeder) => {
            resources.stream = Some(stream_handle);
            resources.tracker = Some(tracker_handle);
            resources.feeder = Some(feeder);
        }
        Err(e) => {
            drop(resources);
            drop(tracker_handle);
            drop(stream_handle);
            shared.fail(generation, SessionError::TrackingInit(format!("{:#}", e)));
        }
    }
}
