use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Face bounds in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkType {
    LeftEar,
    RightEar,
    LeftEye,
    RightEye,
    LeftCheek,
    RightCheek,
    NoseBase,
    MouthLeft,
    MouthRight,
    MouthBottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: LandmarkType,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourType {
    Face,
    LeftEyebrowTop,
    LeftEyebrowBottom,
    RightEyebrowTop,
    RightEyebrowBottom,
    LeftEye,
    RightEye,
    UpperLipTop,
    UpperLipBottom,
    LowerLipTop,
    LowerLipBottom,
    NoseBridge,
    NoseBottom,
    LeftCheek,
    RightCheek,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub kind: ContourType,
    pub points: Vec<Point>,
}

/// One detected face as reported by the detector.
///
/// Which fields are populated depends on the detector options; the core
/// never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub bounding_box: BoundingBox,
    /// Head rotation to the right, in degrees
    pub head_euler_y: f32,
    /// Head tilt sideways, in degrees
    pub head_euler_z: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contours: Vec<Contour>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smiling_probability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_eye_open_probability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_eye_open_probability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<u32>,
}

impl FaceRecord {
    /// A record carrying only bounds
    pub fn with_bounds(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            head_euler_y: 0.0,
            head_euler_z: 0.0,
            landmarks: Vec::new(),
            contours: Vec::new(),
            smiling_probability: None,
            left_eye_open_probability: None,
            right_eye_open_probability: None,
            tracking_id: None,
        }
    }

    pub fn landmark(&self, kind: LandmarkType) -> Option<&Landmark> {
        self.landmarks.iter().find(|l| l.kind == kind)
    }

    pub fn contour(&self, kind: ContourType) -> Option<&Contour> {
        self.contours.iter().find(|c| c.kind == kind)
    }
}

/// Ordered, immutable set of faces found in one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceResult {
    faces: Arc<Vec<FaceRecord>>,
}

impl FaceResult {
    pub fn new(faces: Vec<FaceRecord>) -> Self {
        Self {
            faces: Arc::new(faces),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn faces(&self) -> &[FaceRecord] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FaceRecord> {
        self.faces.iter()
    }
}
