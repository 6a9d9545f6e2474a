//! 人体关键点模型
//! Landmark model: normalized body points in the 33-point BlazePose layout

use serde::{Deserialize, Serialize};

/// 放置计算要求的最小关键点数 (右髋索引 24 + 1)
pub const MIN_LANDMARKS: usize = 25;

/// 33 点人体关键点索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PoseLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl PoseLandmark {
    pub const COUNT: usize = 33;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// COCO 17 关键点 → 33 点布局的映射 (按 COCO 索引顺序)
const COCO17_TO_POSE: [PoseLandmark; 17] = [
    PoseLandmark::Nose,
    PoseLandmark::LeftEye,
    PoseLandmark::RightEye,
    PoseLandmark::LeftEar,
    PoseLandmark::RightEar,
    PoseLandmark::LeftShoulder,
    PoseLandmark::RightShoulder,
    PoseLandmark::LeftElbow,
    PoseLandmark::RightElbow,
    PoseLandmark::LeftWrist,
    PoseLandmark::RightWrist,
    PoseLandmark::LeftHip,
    PoseLandmark::RightHip,
    PoseLandmark::LeftKnee,
    PoseLandmark::RightKnee,
    PoseLandmark::LeftAnkle,
    PoseLandmark::RightAnkle,
];

/// 单个关键点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// 归一化X坐标 (0.0〜1.0, 相对于帧宽)
    pub x: f32,
    /// 归一化Y坐标 (0.0〜1.0, 相对于帧高)
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: None,
            visibility: None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// 一帧的关键点集合, 每个条目可能单独缺失
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<Option<Landmark>>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Option<Landmark>>) -> Self {
        Self { points }
    }

    /// 全部存在的关键点
    pub fn from_points(points: impl IntoIterator<Item = Landmark>) -> Self {
        Self {
            points: points.into_iter().map(Some).collect(),
        }
    }

    /// COCO 17 关键点 (像素坐标, 置信度) 转换为 33 点布局.
    /// 低于 `min_confidence` 的点视为缺失, 其余未覆盖的索引保持缺失.
    pub fn from_coco17(
        keypoints: &[(f32, f32, f32)],
        frame_width: f32,
        frame_height: f32,
        min_confidence: f32,
    ) -> Self {
        let mut points = vec![None; PoseLandmark::COUNT];
        if frame_width <= 0.0 || frame_height <= 0.0 {
            return Self { points };
        }

        for (&(x, y, conf), target) in keypoints.iter().zip(COCO17_TO_POSE.iter()) {
            if conf < min_confidence {
                continue;
            }
            points[target.index()] = Some(Landmark {
                x: x / frame_width,
                y: y / frame_height,
                z: None,
                visibility: Some(conf),
            });
        }

        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 长度足够做服装放置
    pub fn is_placeable(&self) -> bool {
        self.points.len() >= MIN_LANDMARKS
    }

    /// 按索引取点; 越界, 缺失或非有限值都返回 None
    pub fn get_index(&self, index: usize) -> Option<&Landmark> {
        self.points
            .get(index)
            .and_then(Option::as_ref)
            .filter(|lm| lm.is_finite())
    }

    pub fn get(&self, landmark: PoseLandmark) -> Option<&Landmark> {
        self.get_index(landmark.index())
    }

    /// (左肩, 右肩)
    pub fn shoulders(&self) -> Option<(&Landmark, &Landmark)> {
        Some((
            self.get(PoseLandmark::LeftShoulder)?,
            self.get(PoseLandmark::RightShoulder)?,
        ))
    }

    /// (左髋, 右髋)
    pub fn hips(&self) -> Option<(&Landmark, &Landmark)> {
        Some((
            self.get(PoseLandmark::LeftHip)?,
            self.get(PoseLandmark::RightHip)?,
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Landmark>> {
        self.points.iter().map(Option::as_ref)
    }
}
