// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end check that a TOML settings file loads into a validated
//! `SettingsSnapshot` and that a `PipelineController` built from it starts
//! in the state the settings imply, without needing a real camera.

use camera_pipeline::controller::PipelineController;
use camera_pipeline::settings::{Mode, SettingsSnapshot};

const CONFIG: &str = r#"
[recording]
file_format = "mp4"
codec = "h264"
rotation_minutes = 15

[streaming]
show_timestamp = true
show_camera_name = true

[storage]
recording_path = "RECORDING_PATH_PLACEHOLDER"
min_free_space_gb = 1

[[cameras]]
camera_id = "front_door"
name = "Front Door"
rtsp_url = "rtsp://192.168.1.50:554/stream"
streaming_enabled_start = true
recording_enabled_start = false

[[cameras]]
camera_id = "garage"
name = "Garage"
rtsp_url = "rtsp://192.168.1.51:554/stream"
streaming_enabled_start = false
recording_enabled_start = true
"#;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let recording_path = dir.join("recordings");
    let content = CONFIG.replace("RECORDING_PATH_PLACEHOLDER", &recording_path.to_string_lossy());
    let config_path = dir.join("config.toml");
    std::fs::write(&config_path, content).unwrap();
    config_path
}

#[test]
fn settings_snapshot_loads_two_cameras_with_distinct_modes() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path());

    let settings = SettingsSnapshot::from_file(&config_path).expect("valid config should load");
    assert_eq!(settings.cameras.len(), 2);
    assert_eq!(settings.recording.rotation_minutes, 15);

    let front_door = settings.camera("front_door").unwrap();
    assert!(front_door.streaming_enabled_start);
    assert!(!front_door.recording_enabled_start);

    let garage = settings.camera("garage").unwrap();
    assert!(!garage.streaming_enabled_start);
    assert!(garage.recording_enabled_start);

    assert!(settings.camera("does-not-exist").is_none());
}

#[tokio::test]
async fn controller_built_from_settings_picks_mode_from_camera_flags() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path());
    let settings = SettingsSnapshot::from_file(&config_path).unwrap();

    for camera in &settings.cameras {
        let controller = PipelineController::new(
            camera.clone(),
            settings.recording.clone(),
            settings.streaming.clone(),
            settings.storage.clone(),
        );
        assert!(!controller.is_playing());
        assert!(!controller.is_recording());
        match camera.camera_id.as_str() {
            "front_door" => assert_eq!(controller.mode(), Mode::Both),
            "garage" => assert_eq!(controller.mode(), Mode::RecordingOnly),
            other => panic!("unexpected camera {other}"),
        }
    }
}

#[test]
fn duplicate_camera_ids_are_rejected_at_load_time() {
    let dir = tempfile::tempdir().unwrap();
    let recording_path = dir.path().join("recordings");
    let bad_config = format!(
        r#"
[recording]
[streaming]
[storage]
recording_path = "{}"
min_free_space_gb = 1

[[cameras]]
camera_id = "dup"
name = "A"
rtsp_url = "rtsp://192.168.1.50:554/stream"

[[cameras]]
camera_id = "dup"
name = "B"
rtsp_url = "rtsp://192.168.1.51:554/stream"
"#,
        recording_path.to_string_lossy()
    );
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, bad_config).unwrap();

    assert!(SettingsSnapshot::from_file(&config_path).is_err());
}
