//! 状态文本
//! Status reporter: pure derivation of the human-readable status line

use crate::placement::{GarmentType, Placement};
use crate::session::SessionState;

pub const WAITING_FOR_CAMERA: &str = "waiting for camera";
pub const NO_PERSON: &str = "no person detected";
pub const ADJUSTING: &str = "pose detected, adjusting";
pub const NO_GARMENT: &str = "pose detected, no garment loaded";
pub const STOPPED: &str = "camera stopped";

/// 一次渲染时观察到的状态
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub state: &'a SessionState,
    /// 已经收到至少一帧画面
    pub has_frame: bool,
    pub has_landmarks: bool,
    pub has_garment: bool,
    pub garment_type: GarmentType,
    pub placement: Option<&'a Placement>,
}

/// 成功放置时的文本, 包含类别和像素尺寸
pub fn placed(garment_type: GarmentType, placement: &Placement) -> String {
    format!(
        "{} garment placed ({}x{} px)",
        garment_type,
        placement.width.round() as i64,
        placement.height.round() as i64
    )
}

pub fn derive_status(inputs: &StatusInputs<'_>) -> String {
    match inputs.state {
        SessionState::Error(err) => return err.to_string(),
        SessionState::Stopped => return STOPPED.to_string(),
        SessionState::Idle | SessionState::Acquiring => return WAITING_FOR_CAMERA.to_string(),
        SessionState::Tracking => {}
    }

    if !inputs.has_frame {
        return WAITING_FOR_CAMERA.to_string();
    }
    if !inputs.has_landmarks {
        return NO_PERSON.to_string();
    }
    if !inputs.has_garment {
        return NO_GARMENT.to_string();
    }
    match inputs.placement {
        Some(placement) => placed(inputs.garment_type, placement),
        None => ADJUSTING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    fn inputs<'a>(state: &'a SessionState, placement: Option<&'a Placement>) -> StatusInputs<'a> {
        StatusInputs {
            state,
            has_frame: true,
            has_landmarks: true,
            has_garment: true,
            garment_type: GarmentType::Upper,
            placement,
        }
    }

    #[test]
    fn test_non_tracking_states() {
        assert_eq!(derive_status(&inputs(&SessionState::Idle, None)), WAITING_FOR_CAMERA);
        assert_eq!(derive_status(&inputs(&SessionState::Acquiring, None)), WAITING_FOR_CAMERA);
        assert_eq!(derive_status(&inputs(&SessionState::Stopped, None)), STOPPED);

        let failed = SessionState::Error(SessionError::DeviceBusy);
        assert_eq!(
            derive_status(&inputs(&failed, None)),
            "camera is busy (in use by another application)"
        );
    }

    #[test]
    fn test_tracking_branches() {
        let tracking = SessionState::Tracking;

        let mut no_frame = inputs(&tracking, None);
        no_frame.has_frame = false;
        assert_eq!(derive_status(&no_frame), WAITING_FOR_CAMERA);

        let mut no_person = inputs(&tracking, None);
        no_person.has_landmarks = false;
        assert_eq!(derive_status(&no_person), NO_PERSON);

        let mut no_garment = inputs(&tracking, None);
        no_garment.has_garment = false;
        assert_eq!(derive_status(&no_garment), NO_GARMENT);

        assert_eq!(derive_status(&inputs(&tracking, None)), ADJUSTING);
    }

    #[test]
    fn test_placed_names_category_and_size() {
        let tracking = SessionState::Tracking;
        let placement = Placement {
            x: 236.8,
            y: 102.4,
            width: 166.4,
            height: 166.4,
        };
        let mut full = inputs(&tracking, Some(&placement));
        assert_eq!(derive_status(&full), "upper garment placed (166x166 px)");

        full.garment_type = GarmentType::Full;
        assert_eq!(derive_status(&full), "full garment placed (166x166 px)");
    }
}
