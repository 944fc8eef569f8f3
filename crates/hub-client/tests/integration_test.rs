//! Integration tests for the hub client
//!
//! These tests require a reachable hub cluster with the WorkStatus CRD installed.
//! Set HUB_KUBECONFIG and HUB_NAMESPACE environment variables to run.

use crds::{WorkStatus, status_record_name};
use hub_client::{HubClient, HubClientTrait};
use std::collections::BTreeMap;

async fn client() -> (HubClient, String) {
    let path = std::env::var("HUB_KUBECONFIG").expect("HUB_KUBECONFIG environment variable must be set");
    let namespace = std::env::var("HUB_NAMESPACE").unwrap_or_else(|_| "cluster1".to_string());
    let client = HubClient::from_kubeconfig(&path).await.expect("Failed to create client");
    (client, namespace)
}

#[tokio::test]
#[ignore] // Requires running hub cluster
async fn test_get_missing_work_status() {
    let (client, namespace) = client().await;
    let err = client
        .get_work_status(&namespace, "does-not-exist-for-sure")
        .await
        .expect_err("record should not exist");
    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_create_patch_and_delete_work_status() {
    let (client, namespace) = client().await;
    let name = status_record_name("ConfigMap", "integration", "smoke");

    let created = client
        .create_work_status(&namespace, &WorkStatus::new(&name, &namespace))
        .await
        .expect("Failed to create WorkStatus");
    assert_eq!(created.metadata.name.as_deref(), Some(name.as_str()));

    let labels = BTreeMap::from([("integration".to_string(), "true".to_string())]);
    let patched = client
        .patch_work_status_labels(&namespace, &name, &labels)
        .await
        .expect("Failed to patch labels");
    assert_eq!(
        patched.metadata.labels.clone().unwrap_or_default().get("integration").map(String::as_str),
        Some("true")
    );

    let mut with_status = patched.clone();
    with_status.status = Some(serde_json::json!({"phase": "Ready"}));
    client
        .update_work_status_status(&namespace, &with_status)
        .await
        .expect("Failed to update status");

    client
        .delete_work_status(&namespace, &name)
        .await
        .expect("Failed to delete WorkStatus");
}
