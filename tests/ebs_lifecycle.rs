//! Behavioural tests for the volume, snapshot and backup lifecycle against a
//! simulated provider.

#[path = "common/harness.rs"]
mod common_harness;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use common_harness::Harness;
use volsnap::cloud::{CloudError, VOLUME_AVAILABLE, VolumeType};
use volsnap::ebs::{
    BackupRef, CreateVolumeOptions, EbsError, ListSnapshotOptions, MountVolumeOptions,
    RemoveVolumeOptions, SnapshotInfo, SnapshotOptions, VolumeSource,
};
use volsnap::host::HostError;
use volsnap::size::GIB;
use volsnap::test_support::{MountOperation, SIM_REGION};

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

fn restore(name: &str, backup: BackupRef, size: Option<u64>) -> CreateVolumeOptions {
    CreateVolumeOptions {
        size,
        source: VolumeSource::Backup(backup),
        ..CreateVolumeOptions::fresh(name)
    }
}

#[rstest]
#[tokio::test]
async fn fresh_volume_is_created_attached_and_formatted(harness: Harness) {
    let driver = harness.driver().await;

    let volume = driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");

    assert!(!volume.ebs_id.is_empty());
    assert!(volume.device.starts_with("/dev/"), "device: {}", volume.device);
    assert!(volume.mount_point.is_empty());
    assert!(volume.snapshots.is_empty());

    let descriptor = harness.cloud.volume(&volume.ebs_id).expect("cloud volume");
    assert_eq!(descriptor.size_gib, 4);
    assert_eq!(descriptor.volume_type, "gp2");
    assert_eq!(
        harness.cloud.tags(&volume.ebs_id).get("Name").map(String::as_str),
        Some("vol1")
    );
    assert_eq!(
        harness.mounter.operations(),
        vec![MountOperation::Format(volume.device.clone(), String::from("ext4"))]
    );

    let info = driver.read_volume("vol1").await.expect("read vol1");
    assert_eq!(info.volume, volume);
}

#[rstest]
#[tokio::test]
async fn duplicate_name_is_rejected(harness: Harness) {
    let driver = harness.driver().await;
    driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");

    let err = driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect_err("name is taken");

    assert_eq!(err, EbsError::VolumeExists(String::from("vol1")));
    assert_eq!(harness.cloud.volume_count(), 1);
}

#[rstest]
#[tokio::test]
async fn snapshot_is_recorded_on_its_volume(harness: Harness) {
    let driver = harness.driver().await;
    driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");

    let snapshot = driver
        .create_snapshot(&SnapshotOptions::new("snap1", "vol1"))
        .await
        .expect("snapshot vol1");

    let info = driver.read_volume("vol1").await.expect("read vol1");
    let recorded = info.volume.snapshots.get("snap1").expect("snap1 recorded");
    assert_eq!(recorded.volume_name, "vol1");
    assert_eq!(recorded, &snapshot);
    let tags = harness.cloud.tags(&snapshot.ebs_id);
    assert_eq!(tags.get("VolumeName").map(String::as_str), Some("vol1"));
    assert_eq!(tags.get("SnapshotName").map(String::as_str), Some("snap1"));

    let err = driver
        .create_snapshot(&SnapshotOptions::new("snap1", "vol1"))
        .await
        .expect_err("snapshot name is taken");
    assert!(matches!(err, EbsError::SnapshotExists { .. }), "{err:?}");
}

#[rstest]
#[tokio::test]
async fn backup_restores_into_larger_volume_without_formatting(harness: Harness) {
    let driver = harness.driver().await;
    let vol1 = driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");
    driver
        .create_snapshot(&SnapshotOptions::new("snap1", "vol1"))
        .await
        .expect("snapshot vol1");

    let backup = driver
        .create_backup(&SnapshotOptions::new("snap1", "vol1"))
        .await
        .expect("backup snap1");
    assert_eq!(backup.region, SIM_REGION);
    assert!(backup.encode().starts_with("ebs://us-east-1/snap-"));

    let vol2 = driver
        .create_volume(&restore("vol2", backup.clone(), Some(8 * GIB)))
        .await
        .expect("restore vol2");

    assert_ne!(vol2.device, vol1.device);
    let descriptor = harness.cloud.volume(&vol2.ebs_id).expect("cloud volume");
    assert_eq!(descriptor.size_gib, 8);
    assert_eq!(descriptor.snapshot_id.as_deref(), Some(backup.snapshot_id.as_str()));
    let formatted: Vec<_> = harness
        .mounter
        .operations()
        .into_iter()
        .filter(|operation| matches!(operation, MountOperation::Format(..)))
        .collect();
    assert_eq!(
        formatted,
        vec![MountOperation::Format(vol1.device, String::from("ext4"))]
    );
}

#[rstest]
#[tokio::test]
async fn restore_defaults_to_snapshot_size(harness: Harness) {
    let driver = harness.driver().await;
    let snapshot_id = harness.cloud.seed_snapshot(SIM_REGION, 6);

    let volume = driver
        .create_volume(&restore("vol1", BackupRef::new(SIM_REGION, snapshot_id), None))
        .await
        .expect("restore vol1");

    let descriptor = harness.cloud.volume(&volume.ebs_id).expect("cloud volume");
    assert_eq!(descriptor.size_gib, 6);
}

#[rstest]
#[tokio::test]
async fn restore_below_snapshot_size_is_rejected(harness: Harness) {
    let driver = harness.driver().await;
    let snapshot_id = harness.cloud.seed_snapshot(SIM_REGION, 8);

    let err = driver
        .create_volume(&restore(
            "vol1",
            BackupRef::new(SIM_REGION, snapshot_id),
            Some(4 * GIB),
        ))
        .await
        .expect_err("size below snapshot");

    assert_eq!(
        err,
        EbsError::SizeBelowSnapshot {
            requested: 4 * GIB,
            snapshot: 8 * GIB,
        }
    );
    assert!(!harness.cloud.calls().contains(&String::from("create_volume")));
}

#[rstest]
#[tokio::test]
async fn restore_from_another_region_is_rejected(harness: Harness) {
    let driver = harness.driver().await;
    let snapshot_id = harness.cloud.seed_snapshot("eu-west-1", 4);

    let err = driver
        .create_volume(&restore(
            "vol1",
            BackupRef::new("eu-west-1", snapshot_id),
            None,
        ))
        .await
        .expect_err("cross-region restore");

    assert_eq!(
        err,
        EbsError::RegionMismatch {
            backup_region: String::from("eu-west-1"),
            client_region: String::from(SIM_REGION),
        }
    );
    assert_eq!(harness.cloud.volume_count(), 0);
}

#[rstest]
#[tokio::test]
async fn existing_volume_is_adopted_without_formatting(harness: Harness) {
    let driver = harness.driver().await;
    let volume_id = harness.cloud.seed_volume(10);

    let volume = driver
        .create_volume(&CreateVolumeOptions {
            source: VolumeSource::Existing(volume_id.clone()),
            ..CreateVolumeOptions::fresh("adopted")
        })
        .await
        .expect("adopt volume");

    assert_eq!(volume.ebs_id, volume_id);
    assert!(harness.mounter.operations().is_empty());
    assert!(!harness.cloud.calls().contains(&String::from("create_volume")));
}

#[rstest]
#[case(Some(VolumeType::Io1), None, false)]
#[case(Some(VolumeType::Gp2), Some(100), false)]
#[case(None, Some(100), false)]
#[case(Some(VolumeType::Io1), None, true)]
#[case(Some(VolumeType::Gp2), Some(100), true)]
#[tokio::test]
async fn iops_type_mismatch_is_rejected_before_any_provider_call(
    harness: Harness,
    #[case] volume_type: Option<VolumeType>,
    #[case] iops: Option<u64>,
    #[case] from_backup: bool,
) {
    let driver = harness.driver().await;
    let source = if from_backup {
        let snapshot_id = harness.cloud.seed_snapshot(SIM_REGION, 2);
        VolumeSource::Backup(BackupRef::new(SIM_REGION, snapshot_id))
    } else {
        VolumeSource::Fresh
    };
    let calls_before = harness.cloud.calls();

    let err = driver
        .create_volume(&CreateVolumeOptions {
            volume_type,
            iops,
            source,
            ..CreateVolumeOptions::fresh("vol1")
        })
        .await
        .expect_err("iops/type mismatch");

    assert!(
        matches!(err, EbsError::Cloud(CloudError::Validation(_))),
        "{err:?}"
    );
    assert_eq!(harness.cloud.calls(), calls_before);
}

#[rstest]
#[tokio::test]
async fn adopting_ignores_type_and_iops_options(harness: Harness) {
    let driver = harness.driver().await;
    let volume_id = harness.cloud.seed_volume(10);

    let volume = driver
        .create_volume(&CreateVolumeOptions {
            volume_type: Some(VolumeType::Io1),
            iops: None,
            source: VolumeSource::Existing(volume_id.clone()),
            ..CreateVolumeOptions::fresh("adopted")
        })
        .await
        .expect("type options do not apply to an existing volume");

    assert_eq!(volume.ebs_id, volume_id);
    assert_eq!(
        harness.cloud.volume(&volume_id).map(|found| found.volume_type),
        Some(String::from("gp2"))
    );
}

#[rstest]
#[tokio::test]
async fn provisioned_iops_volume_is_created(harness: Harness) {
    let driver = harness.driver().await;

    let volume = driver
        .create_volume(&CreateVolumeOptions {
            volume_type: Some(VolumeType::Io1),
            iops: Some(200),
            ..CreateVolumeOptions::fresh("fast")
        })
        .await
        .expect("create io1 volume");

    let descriptor = harness.cloud.volume(&volume.ebs_id).expect("cloud volume");
    assert_eq!(descriptor.volume_type, "io1");
    assert_eq!(descriptor.iops, Some(200));
}

#[rstest]
#[tokio::test]
async fn failed_creation_deletes_the_partial_volume(harness: Harness) {
    let driver = harness.driver().await;
    harness.cloud.settle_next_volume_as("error");

    let err = driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect_err("volume never becomes available");

    assert!(
        matches!(err, EbsError::Cloud(CloudError::UnexpectedState { .. })),
        "{err:?}"
    );
    assert_eq!(harness.cloud.volume_count(), 0);
    assert!(harness.cloud.calls().contains(&String::from("delete_volume")));
    assert_eq!(
        driver.read_volume("vol1").await,
        Err(EbsError::VolumeNotFound(String::from("vol1")))
    );
}

#[rstest]
#[tokio::test]
async fn reference_only_removal_keeps_cloud_volume(harness: Harness) {
    let driver = harness.driver().await;
    let volume = driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");

    driver
        .remove_volume(&RemoveVolumeOptions {
            name: String::from("vol1"),
            reference_only: true,
        })
        .await
        .expect("remove reference");

    assert_eq!(
        driver.read_volume("vol1").await,
        Err(EbsError::VolumeNotFound(String::from("vol1")))
    );
    let descriptor = harness.cloud.volume(&volume.ebs_id).expect("volume kept");
    assert_eq!(descriptor.state, VOLUME_AVAILABLE);
    assert!(descriptor.attachments.is_empty());
}

#[rstest]
#[tokio::test]
async fn full_removal_deletes_cloud_volume(harness: Harness) {
    let driver = harness.driver().await;
    let volume = driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");

    driver
        .remove_volume(&RemoveVolumeOptions {
            name: String::from("vol1"),
            reference_only: false,
        })
        .await
        .expect("remove vol1");

    assert_eq!(harness.cloud.volume(&volume.ebs_id), None);
    assert!(driver.list_volumes().await.expect("list").is_empty());
}

#[rstest]
#[tokio::test]
async fn removed_backup_is_reported_as_removed_snapshot(harness: Harness) {
    let driver = harness.driver().await;
    driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");
    let options = SnapshotOptions::new("snap1", "vol1");
    driver.create_snapshot(&options).await.expect("snapshot");
    let backup = driver.create_backup(&options).await.expect("backup");

    let present = driver.snapshot_info(&options).await.expect("info");
    assert!(matches!(present, SnapshotInfo::Present { .. }), "{present:?}");

    driver.delete_backup(&backup).await.expect("delete backup");

    let removed = driver.snapshot_info(&options).await.expect("info");
    assert!(matches!(removed, SnapshotInfo::Removed { .. }), "{removed:?}");
    assert_eq!(removed.snapshot().name, "snap1");
}

#[rstest]
#[tokio::test]
async fn removing_a_snapshot_record_keeps_the_cloud_snapshot(harness: Harness) {
    let driver = harness.driver().await;
    driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");
    let options = SnapshotOptions::new("snap1", "vol1");
    let snapshot = driver.create_snapshot(&options).await.expect("snapshot");

    driver.remove_snapshot(&options).await.expect("remove snapshot");

    assert!(harness.cloud.snapshot(&snapshot.ebs_id).is_some());
    assert!(
        driver
            .list_snapshots(&ListSnapshotOptions::default())
            .await
            .expect("list")
            .is_empty()
    );
    let err = driver
        .remove_snapshot(&options)
        .await
        .expect_err("already removed");
    assert!(matches!(err, EbsError::SnapshotNotFound { .. }), "{err:?}");
}

#[rstest]
#[tokio::test]
async fn snapshots_are_listed_per_volume_or_globally(harness: Harness) {
    let driver = harness.driver().await;
    for name in ["vol1", "vol2"] {
        driver
            .create_volume(&CreateVolumeOptions::fresh(name))
            .await
            .expect("create volume");
    }
    driver
        .create_snapshot(&SnapshotOptions::new("a", "vol1"))
        .await
        .expect("snapshot a");
    driver
        .create_snapshot(&SnapshotOptions::new("b", "vol2"))
        .await
        .expect("snapshot b");

    let all = driver
        .list_snapshots(&ListSnapshotOptions::default())
        .await
        .expect("list all");
    assert_eq!(all.keys().map(String::as_str).collect::<Vec<_>>(), ["a", "b"]);

    let only_vol2 = driver
        .list_snapshots(&ListSnapshotOptions {
            volume_name: Some(String::from("vol2")),
        })
        .await
        .expect("list vol2");
    assert_eq!(only_vol2.keys().map(String::as_str).collect::<Vec<_>>(), ["b"]);
}

#[rstest]
#[tokio::test]
async fn mount_uses_default_path_and_rejects_conflicts(harness: Harness) {
    let driver = harness.driver().await;
    driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");

    let mount_point = driver
        .mount_volume(&MountVolumeOptions {
            name: String::from("vol1"),
            mount_point: None,
        })
        .await
        .expect("mount vol1");
    assert_eq!(mount_point, harness.root.join("mounts").join("vol1"));
    assert_eq!(
        driver.mount_point("vol1").await.expect("mount point"),
        mount_point.as_str()
    );

    let err = driver
        .mount_volume(&MountVolumeOptions {
            name: String::from("vol1"),
            mount_point: Some(Utf8PathBuf::from("/elsewhere")),
        })
        .await
        .expect_err("already mounted elsewhere");
    assert!(matches!(err, EbsError::MountPointConflict { .. }), "{err:?}");

    driver.umount_volume("vol1").await.expect("umount");
    driver.umount_volume("vol1").await.expect("second umount is a no-op");
    assert!(harness.mounter.mounted().is_empty());
    assert!(driver.mount_point("vol1").await.expect("mount point").is_empty());
}

#[rstest]
#[tokio::test]
async fn mount_failure_leaves_record_unmounted(harness: Harness) {
    let driver = harness.driver().await;
    driver
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");
    harness.mounter.fail_next(HostError::CommandFailure {
        program: String::from("mount"),
        status: Some(32),
        status_text: String::from("32"),
        stderr: String::from("wrong fs type"),
    });

    let err = driver
        .mount_volume(&MountVolumeOptions {
            name: String::from("vol1"),
            mount_point: None,
        })
        .await
        .expect_err("mount fails");

    assert!(matches!(err, EbsError::Host(_)), "{err:?}");
    assert!(driver.mount_point("vol1").await.expect("mount point").is_empty());
}

#[rstest]
#[tokio::test]
async fn mounted_volumes_are_remounted_on_init(harness: Harness) {
    let first = harness.driver().await;
    first
        .create_volume(&CreateVolumeOptions::fresh("vol1"))
        .await
        .expect("create vol1");
    let mount_point = first
        .mount_volume(&MountVolumeOptions {
            name: String::from("vol1"),
            mount_point: None,
        })
        .await
        .expect("mount vol1");
    drop(first);
    harness.mounter.reboot();

    let second = harness.driver().await;

    assert!(harness.mounter.mounted().contains_key(&mount_point));
    assert_eq!(
        second.mount_point("vol1").await.expect("mount point"),
        mount_point.as_str()
    );
}

#[rstest]
#[case("")]
#[case("a/b")]
#[case(".hidden")]
#[tokio::test]
async fn unusable_names_are_rejected(harness: Harness, #[case] name: &str) {
    let driver = harness.driver().await;

    let err = driver
        .create_volume(&CreateVolumeOptions::fresh(name))
        .await
        .expect_err("invalid name");

    assert!(matches!(err, EbsError::InvalidName { .. }), "{err:?}");
    assert_eq!(harness.cloud.volume_count(), 0);
}
