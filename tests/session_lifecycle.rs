use image::{Rgba, RgbaImage};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tryon_rs::{
    CaptureRequest, GarmentAsset, GarmentType, Landmark, LandmarkSet, PlacementConfig, PoseLandmark,
    ReplayTrackerFactory, Session, SessionError, SessionSettings, SessionState, StillCamera,
};

fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn replay_file(frames: &[Option<LandmarkSet>]) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("tryon-replay-{}-{}.json", std::process::id(), nanos));
    let frames: Vec<_> = frames
        .iter()
        .map(|landmarks| serde_json::json!({ "landmarks": landmarks }))
        .collect();
    std::fs::write(&path, serde_json::to_string(&frames).unwrap()).unwrap();
    path
}

fn standing_person() -> LandmarkSet {
    let mut points = vec![None; PoseLandmark::COUNT];
    points[PoseLandmark::LeftShoulder.index()] = Some(Landmark::new(0.6, 0.4));
    points[PoseLandmark::RightShoulder.index()] = Some(Landmark::new(0.4, 0.4));
    LandmarkSet::new(points)
}

fn settings() -> SessionSettings {
    SessionSettings {
        capture: CaptureRequest {
            fps: 100,
            ..CaptureRequest::default()
        },
        render_fps: 120,
        ..SessionSettings::default()
    }
}

fn square_garment(color: Rgba<u8>) -> GarmentAsset {
    GarmentAsset::from_rgba(RgbaImage::from_pixel(64, 64, color)).unwrap()
}

#[test]
fn test_reference_scene_end_to_end() {
    let replay = replay_file(&[Some(standing_person())]);
    let session = Session::new(
        Arc::new(StillCamera::solid(Rgba([30, 30, 30, 255]))),
        Arc::new(ReplayTrackerFactory::new(&replay)),
        settings(),
    );
    session.start().unwrap();
    wait_for("tracking", || session.state() == SessionState::Tracking);

    session.set_garment(Some(square_garment(Rgba([0, 200, 0, 255]))));
    wait_for("placed", || session.status() == "upper garment placed (166x166 px)");

    // 640x480 画布 (320, 150) 被服装覆盖, 左上角仍是视频
    wait_for("garment pixels", || {
        session
            .latest_surface()
            .1
            .is_some_and(|surface| surface.get_pixel(320, 150) == &Rgba([0, 200, 0, 255]))
    });
    let (_, surface) = session.latest_surface();
    let surface = surface.unwrap();
    assert_eq!(surface.dimensions(), (640, 480));
    assert_eq!(surface.get_pixel(5, 5), &Rgba([30, 30, 30, 255]));

    // 换类别只影响下一次渲染
    session.set_config(PlacementConfig {
        garment_type: GarmentType::Full,
        ..PlacementConfig::default()
    });
    wait_for("full placed", || session.status() == "full garment placed (166x336 px)");

    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.active_camera_tracks(), 0);
    assert_eq!(session.scheduled_render_ticks(), 0);
    let _ = std::fs::remove_file(replay);
}

#[test]
fn test_empty_replay_frame_is_no_person() {
    let replay = replay_file(&[None]);
    let session = Session::new(
        Arc::new(StillCamera::solid(Rgba([0, 0, 0, 255]))),
        Arc::new(ReplayTrackerFactory::new(&replay)),
        settings(),
    );
    session.start().unwrap();
    wait_for("no person", || session.status() == "no person detected");
    assert!(session.latest_landmarks().is_none());
    session.stop();
    let _ = std::fs::remove_file(replay);
}

#[test]
fn test_missing_replay_is_tracking_init_error() {
    let session = Session::new(
        Arc::new(StillCamera::solid(Rgba([0, 0, 0, 255]))),
        Arc::new(ReplayTrackerFactory::new("/nonexistent/replay.json")),
        settings(),
    );
    session.start().unwrap();
    wait_for("tracking init error", || {
        matches!(session.state(), SessionState::Error(SessionError::TrackingInit(_)))
    });
    wait_for("render stopped", || session.scheduled_render_ticks() == 0);
    wait_for("error status", || {
        session.status().starts_with("pose tracking failed to initialize")
    });

    // 显式重启才会重试
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.last_error().is_some());
}

#[test]
fn test_missing_still_image_is_device_not_found() {
    let session = Session::new(
        Arc::new(StillCamera::from_path("/nonexistent/camera.png")),
        Arc::new(ReplayTrackerFactory::new("/nonexistent/replay.json")),
        settings(),
    );
    session.start().unwrap();
    wait_for("device error", || {
        matches!(session.state(), SessionState::Error(SessionError::DeviceNotFound(_)))
    });
    wait_for("error status", || session.status().starts_with("camera not found"));
}
