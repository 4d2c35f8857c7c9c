//! Integration test: engine over local directories.
//!
//! Every backend is a directory under a temp root, as in development use.

use std::path::Path;

use relocate_core::config::EngineConfig;
use relocate_core::types::PlacementState;
use relocate_runtime::AdaptationEngine;

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn test_local_engine_round_trip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = EngineConfig::local(tmp.path());

    let cloud = tmp.path().join("cloud");
    std::fs::create_dir_all(&cloud).unwrap();
    std::fs::write(cloud.join("f1"), b"one").unwrap();
    std::fs::write(cloud.join("f2"), b"two").unwrap();

    let engine = AdaptationEngine::start(config).await.unwrap();

    let responses = engine
        .handle_text(r#"{"policyType": 2, "repetitionCount": 1}"#)
        .await;
    assert!(responses[0].success, "{}", responses[0].message);
    assert!(files_in(&cloud).is_empty());
    assert_eq!(files_in(&tmp.path().join("local")), vec!["f1", "f2"]);

    let status = engine.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].active_state, PlacementState::B);

    // Even count: unchanged
    let responses = engine.handle_text("2 2").await;
    assert!(responses[0].success);
    assert_eq!(files_in(&tmp.path().join("local")), vec!["f1", "f2"]);

    let responses = engine.handle_text("sensitivity").await;
    assert!(responses[0].success, "{}", responses[0].message);
    assert_eq!(files_in(&cloud), vec!["f1", "f2"]);
    assert_eq!(std::fs::read(cloud.join("f1")).unwrap(), b"one");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_region_policy_in_local_mode() {
    let tmp = tempfile::TempDir::new().unwrap();
    let secondary = tmp.path().join("secondary-region");
    std::fs::create_dir_all(secondary.join("nested")).unwrap();
    std::fs::write(secondary.join("nested").join("f1"), b"one").unwrap();

    let engine = AdaptationEngine::start(EngineConfig::local(tmp.path()))
        .await
        .unwrap();
    let response = engine.controller().handle_raw(1, 3).await;
    assert!(response.success, "{}", response.message);

    let primary = tmp.path().join("primary-region");
    assert_eq!(std::fs::read(primary.join("nested").join("f1")).unwrap(), b"one");
    assert!(!secondary.join("nested").join("f1").exists());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = EngineConfig::local(tmp.path());
    let path = tmp.path().join("relocate.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    let engine = AdaptationEngine::start(loaded).await.unwrap();
    engine.shutdown().await;
}
