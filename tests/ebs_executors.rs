//! Behavioural tests for the string-keyed executor surface of the `ebs`
//! backend, resolved through the driver registry.

#[path = "common/harness.rs"]
mod common_harness;

use std::sync::Arc;

use rstest::{fixture, rstest};
use serde_json::Value;

use common_harness::Harness;
use volsnap::backend::{BackendConfig, BackendError, Executor, Request, Response, StorageBackend};
use volsnap::ebs::{
    BACKUP_CREATE, BACKUP_LIST, BACKUP_READ, BACKUP_REMOVE, EbsError, OPT_BACKUP_URL,
    OPT_MOUNT_POINT, OPT_REFERENCE_ONLY, OPT_SIZE, OPT_SNAPSHOT_NAME, OPT_VOLUME_DRIVER_ID,
    OPT_VOLUME_NAME, SNAPSHOT_CREATE, SNAPSHOT_LIST, SNAPSHOT_READ, VOLUME_CREATE, VOLUME_LIST,
    VOLUME_MOUNT, VOLUME_READ, VOLUME_REMOVE, VOLUME_UMOUNT, register,
};
use volsnap::registry::DriverRegistry;
use volsnap::size::GIB;
use volsnap::test_support::{SIM_INSTANCE_ID, SIM_REGION, SIM_ZONE};

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

async fn run(
    backend: &Arc<dyn StorageBackend>,
    hint: &str,
    request: &Request,
) -> Result<Response, BackendError> {
    let mut executors = Arc::clone(backend).executors(&[hint])?;
    let executor: Box<dyn Executor> = executors.remove(hint).expect("hint resolves");
    executor.exec(request).await
}

#[rstest]
#[tokio::test]
async fn info_reports_defaults_and_identity(harness: Harness) {
    let backend = harness.backend().await;

    let info = backend.info();

    assert_eq!(backend.name(), "ebs");
    assert_eq!(
        info.get("DefaultVolumeSize").map(String::as_str),
        Some((4 * GIB).to_string().as_str())
    );
    assert_eq!(info.get("DefaultVolumeType").map(String::as_str), Some("gp2"));
    assert_eq!(info.get("InstanceID").map(String::as_str), Some(SIM_INSTANCE_ID));
    assert_eq!(info.get("Region").map(String::as_str), Some(SIM_REGION));
    assert_eq!(info.get("AvailabilityZone").map(String::as_str), Some(SIM_ZONE));
}

#[rstest]
#[tokio::test]
async fn executors_skip_unknown_hints(harness: Harness) {
    let backend = harness.backend().await;

    let executors = Arc::clone(&backend)
        .executors(&[VOLUME_CREATE, "ebs.volume.resize.executor"])
        .expect("one hint resolves");
    assert_eq!(
        executors.keys().map(String::as_str).collect::<Vec<_>>(),
        [VOLUME_CREATE]
    );

    let err = backend
        .executors(&["nothing.here"])
        .err()
        .expect("no hint resolves");
    assert_eq!(
        err,
        BackendError::NoExecutors {
            hints: vec![String::from("nothing.here")],
        }
    );
}

#[tokio::test]
async fn registry_rejects_unknown_backend_and_duplicates() {
    let harness = Harness::new();
    let mut registry = DriverRegistry::new();
    register(&mut registry, harness.collaborators()).expect("first registration");

    let duplicate = register(&mut registry, harness.collaborators());
    assert!(
        matches!(duplicate, Err(BackendError::DuplicateRegistration { .. })),
        "{:?}",
        duplicate.err()
    );

    let unknown = registry
        .get_driver("gce", &harness.root, BackendConfig::new())
        .await
        .err()
        .expect("gce is not registered");
    assert_eq!(unknown, BackendError::UnknownBackend(String::from("gce")));
    assert_eq!(registry.names(), ["ebs"]);
}

#[rstest]
#[tokio::test]
async fn volume_lifecycle_through_executors(harness: Harness) {
    let backend = harness.backend().await;

    let created = run(
        &backend,
        VOLUME_CREATE,
        &Request::new("vol1").option(OPT_SIZE, "2G"),
    )
    .await
    .expect("create vol1");
    assert_eq!(created.str_value(OPT_VOLUME_NAME), Some("vol1"));
    assert_eq!(created.str_value(OPT_MOUNT_POINT), Some(""));
    let ebs_id = created.str_value("EBSVolumeID").expect("volume id").to_owned();

    let read = run(&backend, VOLUME_READ, &Request::new("vol1"))
        .await
        .expect("read vol1");
    assert_eq!(read.str_value("EBSVolumeID"), Some(ebs_id.as_str()));
    assert_eq!(
        read.str_value(OPT_SIZE),
        Some((2 * GIB).to_string().as_str())
    );
    assert_eq!(read.str_value("AvailabilityZone"), Some(SIM_ZONE));

    let mounted = run(&backend, VOLUME_MOUNT, &Request::new("vol1"))
        .await
        .expect("mount vol1");
    let mount_point = mounted.str_value(OPT_MOUNT_POINT).expect("mount point");
    assert!(mount_point.ends_with("/mounts/vol1"), "{mount_point}");

    let listed = run(&backend, VOLUME_LIST, &Request::new(""))
        .await
        .expect("list volumes");
    let Some(Value::Object(entry)) = listed.values.get("vol1") else {
        panic!("vol1 should be listed: {listed:?}");
    };
    assert_eq!(
        entry.get(OPT_MOUNT_POINT).and_then(Value::as_str),
        Some(mount_point)
    );

    run(&backend, VOLUME_UMOUNT, &Request::new("vol1"))
        .await
        .expect("umount vol1");
    run(&backend, VOLUME_REMOVE, &Request::new("vol1"))
        .await
        .expect("remove vol1");
    assert_eq!(harness.cloud.volume(&ebs_id), None);
}

#[rstest]
#[tokio::test]
async fn conflicting_sources_are_rejected_without_provider_calls(harness: Harness) {
    let backend = harness.backend().await;
    let calls_before = harness.cloud.calls();

    let err = run(
        &backend,
        VOLUME_CREATE,
        &Request::new("vol1")
            .option(OPT_VOLUME_DRIVER_ID, "vol-00000001")
            .option(OPT_BACKUP_URL, "ebs://us-east-1/snap-00000001"),
    )
    .await
    .expect_err("both sources");

    assert!(
        matches!(err, BackendError::Ebs(EbsError::ConflictingSource { .. })),
        "{err:?}"
    );
    assert_eq!(harness.cloud.calls(), calls_before);
}

#[rstest]
#[case(OPT_SIZE, "lots")]
#[case("VolumeType", "gp9")]
#[case("VolumeIOPS", "-5")]
#[tokio::test]
async fn malformed_create_options_are_rejected(
    harness: Harness,
    #[case] key: &str,
    #[case] value: &str,
) {
    let backend = harness.backend().await;

    let err = run(&backend, VOLUME_CREATE, &Request::new("vol1").option(key, value))
        .await
        .expect_err("malformed option");

    assert!(
        matches!(err, BackendError::InvalidOption { key: ref bad, .. } if bad == key),
        "{err:?}"
    );
    assert_eq!(harness.cloud.volume_count(), 0);
}

#[rstest]
#[tokio::test]
async fn reference_only_flag_must_be_boolean(harness: Harness) {
    let backend = harness.backend().await;
    run(&backend, VOLUME_CREATE, &Request::new("vol1"))
        .await
        .expect("create vol1");

    let err = run(
        &backend,
        VOLUME_REMOVE,
        &Request::new("vol1").option(OPT_REFERENCE_ONLY, "maybe"),
    )
    .await
    .expect_err("not a boolean");
    assert!(matches!(err, BackendError::InvalidOption { .. }), "{err:?}");

    run(
        &backend,
        VOLUME_REMOVE,
        &Request::new("vol1").option(OPT_REFERENCE_ONLY, "true"),
    )
    .await
    .expect("reference-only removal");
    assert_eq!(harness.cloud.volume_count(), 1);
}

#[rstest]
#[tokio::test]
async fn snapshot_and_backup_through_executors(harness: Harness) {
    let backend = harness.backend().await;
    run(&backend, VOLUME_CREATE, &Request::new("vol1"))
        .await
        .expect("create vol1");

    let snapshot = run(
        &backend,
        SNAPSHOT_CREATE,
        &Request::new("snap1").option(OPT_VOLUME_NAME, "vol1"),
    )
    .await
    .expect("snapshot vol1");
    let snapshot_id = snapshot
        .str_value("EBSSnapshotID")
        .expect("snapshot id")
        .to_owned();

    let missing_volume = run(&backend, SNAPSHOT_CREATE, &Request::new("snap2"))
        .await
        .expect_err("VolumeName is required");
    assert_eq!(
        missing_volume,
        BackendError::MissingOption(String::from(OPT_VOLUME_NAME))
    );

    let backup = run(
        &backend,
        BACKUP_CREATE,
        &Request::new("")
            .option(OPT_SNAPSHOT_NAME, "snap1")
            .option(OPT_VOLUME_NAME, "vol1"),
    )
    .await
    .expect("backup snap1");
    let url = backup.str_value(OPT_BACKUP_URL).expect("backup url").to_owned();
    assert_eq!(url, format!("ebs://{SIM_REGION}/{snapshot_id}"));

    let described = run(
        &backend,
        BACKUP_READ,
        &Request::new("").option(OPT_BACKUP_URL, url.as_str()),
    )
    .await
    .expect("read backup");
    assert_eq!(described.str_value("EBSSnapshotID"), Some(snapshot_id.as_str()));
    assert_eq!(described.str_value("State"), Some("completed"));
    assert_eq!(described.str_value("Region"), Some(SIM_REGION));

    let listed = run(&backend, BACKUP_LIST, &Request::new(""))
        .await
        .expect("list backups");
    assert!(listed.values.is_empty());

    let restored = run(
        &backend,
        VOLUME_CREATE,
        &Request::new("vol2")
            .option(OPT_BACKUP_URL, url.as_str())
            .option(OPT_SIZE, "8G"),
    )
    .await
    .expect("restore vol2");
    assert_eq!(restored.str_value(OPT_VOLUME_NAME), Some("vol2"));

    run(
        &backend,
        BACKUP_REMOVE,
        &Request::new("").option(OPT_BACKUP_URL, url.as_str()),
    )
    .await
    .expect("remove backup");

    let read = run(
        &backend,
        SNAPSHOT_READ,
        &Request::new("snap1").option(OPT_VOLUME_NAME, "vol1"),
    )
    .await
    .expect("read snapshot");
    let state = read
        .values
        .get("snap1")
        .and_then(|entry| entry.get("State"))
        .and_then(Value::as_str);
    assert_eq!(state, Some("removed"));

    let listed_snapshots = run(&backend, SNAPSHOT_LIST, &Request::new(""))
        .await
        .expect("list snapshots");
    assert!(listed_snapshots.values.contains_key("snap1"));
}

#[rstest]
#[case("s3://bucket/snap-1", "s3")]
#[case("ebs://us-east-1/vol-1", "")]
#[tokio::test]
async fn malformed_backup_urls_are_rejected(
    harness: Harness,
    #[case] url: &str,
    #[case] scheme: &str,
) {
    let backend = harness.backend().await;

    let err = run(&backend, BACKUP_READ, &Request::new("").option(OPT_BACKUP_URL, url))
        .await
        .expect_err("malformed backup url");

    match err {
        BackendError::Ebs(EbsError::SchemeMismatch { scheme: found }) => assert_eq!(found, scheme),
        BackendError::Ebs(EbsError::InvalidBackupUrl { .. }) => assert!(scheme.is_empty()),
        other => panic!("unexpected error: {other:?}"),
    }
}
