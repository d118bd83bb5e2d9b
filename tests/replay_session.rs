use std::path::PathBuf;

use colorbot_lib::agent_engine::history::CycleRecord;
use colorbot_lib::config::AppConfig;

fn workspace() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("colorbot-replay-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("frames")).unwrap();
    for (i, offset) in [0u32, 6].into_iter().enumerate() {
        let img = image::RgbImage::from_fn(64, 48, |x, y| {
            let (x0, y0) = (20 + offset, 16);
            if (x0..x0 + 8).contains(&x) && (y0..y0 + 8).contains(&y) {
                image::Rgb([230, 200, 20])
            } else {
                image::Rgb([15, 30, 15])
            }
        });
        img.save(dir.join("frames").join(format!("{i:03}.png"))).unwrap();
    }
    dir
}

#[tokio::test(start_paused = true)]
async fn replayed_session_clicks_and_logs_cycles() {
    let dir = workspace();
    let cfg = AppConfig::from_toml_str(
        r#"
[capture]
interval_ms = 20

[engine]
session_log = "session.jsonl"

[replay]
dir = "frames"
origin = { x = 100, y = 50 }

[policy]
click_tag = "coin"
max_clicks = 2
pause_seconds = [0.05, 0.1]

[[client.detections]]
tag = "coin"
color = { target = [230, 200, 20], tolerance = [12, 12, 12] }
min_component_size = 10
"#,
    )
    .unwrap();

    let summary = colorbot_lib::run_with(cfg, &dir).await.unwrap();
    assert_eq!(summary, "clicked 'coin' 2 times");

    let log = std::fs::read_to_string(dir.join("session.jsonl")).unwrap();
    let records: Vec<CycleRecord> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| !r.failed()));
    assert_eq!(records[0].detections, 1);
    assert!(records[0].events_dispatched > 0);
    assert_eq!(records[2].decision, "finish");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn missing_replay_directory_is_reported() {
    let dir = std::env::temp_dir().join(format!("colorbot-empty-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let err = colorbot_lib::run_with(AppConfig::default(), &dir).await.unwrap_err();
    assert!(!err.to_string().is_empty());
    std::fs::remove_dir_all(&dir).ok();
}
