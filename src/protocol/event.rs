use serde::Serialize;

use crate::storage::{RenderMode, Stat};

/// Converts an internal 0-based camera index to the 1-based number viewers
/// see. 0 is reserved for "no camera".
pub fn to_wire_camera(index: u32) -> u32 {
    index + 1
}

/// Messages pushed to viewers, serialized as JSON objects with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "init", rename_all = "camelCase")]
    Init {
        all_stats: Vec<Stat>,
        face_detection: bool,
        rendering_mode: RenderMode,
        camera: u32,
        available_cameras: Vec<u32>,
        broken: bool,
    },
    #[serde(rename = "newstat", rename_all = "camelCase")]
    NewStat {
        stat: Stat,
        refresh_screenshot: bool,
        refresh_detect_screenshot: bool,
    },
    #[serde(rename = "facedetection", rename_all = "camelCase")]
    FaceDetectionChanged { face_detection: bool },
    #[serde(rename = "renderingmode", rename_all = "camelCase")]
    RenderingModeChanged { rendering_mode: RenderMode },
    #[serde(rename = "newcameraactivated")]
    CameraChanged { camera: u32 },
}

impl Event {
    pub fn camera_changed(index: u32) -> Self {
        Event::CameraChanged {
            camera: to_wire_camera(index),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Init { .. } => "init",
            Event::NewStat { .. } => "newstat",
            Event::FaceDetectionChanged { .. } => "facedetection",
            Event::RenderingModeChanged { .. } => "renderingmode",
            Event::CameraChanged { .. } => "newcameraactivated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn init_shape() {
        let stat = Stat {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            person_count: 2,
            corrupted: false,
        };
        let event = Event::Init {
            all_stats: vec![stat],
            face_detection: true,
            rendering_mode: RenderMode::Fun,
            camera: to_wire_camera(0),
            available_cameras: vec![1, 2],
            broken: false,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "init",
                "allStats": [{
                    "timestamp": "2024-05-01T12:00:00Z",
                    "personCount": 2,
                    "corrupted": false,
                }],
                "faceDetection": true,
                "renderingMode": "fun",
                "camera": 1,
                "availableCameras": [1, 2],
                "broken": false,
            })
        );
    }

    #[test]
    fn camera_changed_is_one_based() {
        let value = serde_json::to_value(Event::camera_changed(0)).unwrap();
        assert_eq!(value, json!({"type": "newcameraactivated", "camera": 1}));
    }

    #[test]
    fn kind_matches_tag() {
        let events = [
            Event::FaceDetectionChanged {
                face_detection: false,
            },
            Event::RenderingModeChanged {
                rendering_mode: RenderMode::Normal,
            },
            Event::camera_changed(4),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }
}
