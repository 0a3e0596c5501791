//! Scheduler-level tests for endpoint rotation.

use std::sync::Arc;
use std::time::Duration;

use mirage_core::rotation::{
    start_auto_rotation, stop_auto_rotation, NoOpController, RotationController,
    MAX_ACTIVE_ENDPOINTS,
};

#[tokio::test]
async fn auto_rotation_caps_active_list() {
    let controller: Arc<dyn RotationController> = Arc::new(NoOpController::new());

    start_auto_rotation(Arc::clone(&controller), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop_auto_rotation(&controller);
    // Let in-flight background retirements settle.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let active = controller.active_endpoints();
    assert!(
        !active.is_empty(),
        "auto-rotation should have provisioned endpoints"
    );
    assert!(
        active.len() <= MAX_ACTIVE_ENDPOINTS,
        "active list should be capped at {MAX_ACTIVE_ENDPOINTS}, got {}",
        active.len()
    );

    // The survivors are the newest endpoints.
    let ids: Vec<_> = active.iter().map(|e| e.id.clone()).collect();
    assert!(!ids.contains(&"noop-1".to_string()));
}

#[tokio::test]
async fn stop_auto_rotation_halts_provisioning() {
    let controller: Arc<dyn RotationController> = Arc::new(NoOpController::new());

    start_auto_rotation(Arc::clone(&controller), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(120)).await;
    stop_auto_rotation(&controller);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let before = controller.active_endpoints();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let after = controller.active_endpoints();

    let before_ids: Vec<_> = before.iter().map(|e| e.id.clone()).collect();
    let after_ids: Vec<_> = after.iter().map(|e| e.id.clone()).collect();
    assert_eq!(before_ids, after_ids, "no rotation after stop");
}

#[tokio::test]
async fn restart_replaces_previous_schedule() {
    let controller: Arc<dyn RotationController> = Arc::new(NoOpController::new());

    start_auto_rotation(Arc::clone(&controller), Duration::from_secs(3600));
    // Replacing with a fast schedule takes effect immediately.
    start_auto_rotation(Arc::clone(&controller), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop_auto_rotation(&controller);

    assert!(
        !controller.active_endpoints().is_empty(),
        "replacement schedule should rotate"
    );
}

#[tokio::test]
async fn manual_sequence_drains_to_empty() {
    let controller: Arc<dyn RotationController> = Arc::new(NoOpController::new());

    let mut endpoints = Vec::new();
    for _ in 0..4 {
        endpoints.push(controller.rotate().await.unwrap());
    }
    assert_eq!(controller.active_endpoints().len(), 4);

    for endpoint in &endpoints {
        controller.retire(endpoint).await.unwrap();
    }
    assert!(controller.active_endpoints().is_empty());
}
