use super::record::FaceRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    Fast,
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkMode {
    None,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMode {
    None,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContourMode {
    None,
    All,
}

/// Detector configuration, fixed when the detector is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub performance: PerformanceMode,
    pub landmarks: LandmarkMode,
    pub classification: ClassificationMode,
    pub contours: ContourMode,

    /// Smallest face to report, as a fraction of the image width
    #[serde(default = "default_min_face_size")]
    pub min_face_size: f32,

    /// Assign tracking ids across frames
    #[serde(default)]
    pub tracking: bool,
}

impl DetectorOptions {
    /// Accurate landmarks and classification, used for still captures
    pub fn high_accuracy() -> Self {
        Self {
            performance: PerformanceMode::Accurate,
            landmarks: LandmarkMode::All,
            classification: ClassificationMode::All,
            ..Self::default()
        }
    }

    /// Fast contour detection, used for the live analysis stream
    pub fn real_time() -> Self {
        Self {
            contours: ContourMode::All,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_face_size > 0.0 && self.min_face_size <= 1.0) {
            return Err(format!(
                "min_face_size must be within (0, 1], got {}",
                self.min_face_size
            ));
        }
        Ok(())
    }

    /// Strip the parts of a record these options did not ask for
    pub fn shape(&self, mut record: FaceRecord) -> FaceRecord {
        if self.landmarks == LandmarkMode::None {
            record.landmarks.clear();
        }
        if self.contours == ContourMode::None {
            record.contours.clear();
        }
        if self.classification == ClassificationMode::None {
            record.smiling_probability = None;
            record.left_eye_open_probability = None;
            record.right_eye_open_probability = None;
        }
        if !self.tracking {
            record.tracking_id = None;
        }
        record
    }
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            performance: PerformanceMode::Fast,
            landmarks: LandmarkMode::None,
            classification: ClassificationMode::None,
            contours: ContourMode::None,
            min_face_size: default_min_face_size(),
            tracking: false,
        }
    }
}

fn default_min_face_size() -> f32 {
    0.1
}
