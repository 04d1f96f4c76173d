
use std::path::Path;
use std::sync::Arc;

use job_relay::cache::JobCache;
use job_relay::controller::{ReceiverController, StageController, ERR_NOTIFY};
use job_relay::job::{FileInfo, Job, JobStatus, Owner};
use job_relay::repo::InMemoryJobRepository;
use job_relay::RelayError;
use test_harness::{input_job, seeded_repo, Failure, MockNextStage};

const HOST: &str = "gateway";

fn sent_job(id: &str) -> Job {
    Job::new(
        id,
        Owner::FileSenderOem,
        FileInfo::new("oem", "/data/oem-files/input/run1", "scan.tiff"),
    )
}

fn receiver(
    repo: Arc<InMemoryJobRepository>,
    next: Arc<MockNextStage>,
    base: &Path,
    capacity: usize,
) -> ReceiverController {
    ReceiverController::new(HOST, base.to_path_buf(), repo, next, JobCache::shared(capacity))
}

#[tokio::test]
async fn test_job_then_file_claims_and_notifies() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![sent_job("job-1")]).await;
    let next = MockNextStage::new();
    let controller = receiver(repo.clone(), next.clone(), base.path(), 10);

    controller.transmit_job(sent_job("job-1")).await.unwrap();
    let claimed = controller
        .transmit_file("job-1", "scan.tiff", b"raw scan")
        .await
        .unwrap();

    let written = base.path().join("run1").join("scan.tiff");
    assert_eq!(std::fs::read(&written).unwrap(), b"raw scan");

    assert_eq!(claimed.owner, Owner::FileReceiverGateway);
    assert_eq!(claimed.status, JobStatus::Incomplete);
    assert_eq!(claimed.input_file.hostname, HOST);
    assert_eq!(
        claimed.input_file.dir_name,
        base.path().join("run1").display().to_string()
    );

    let notified = next.notified();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].owner, Owner::FileReceiverGateway);
    assert_eq!(repo.updates_for("job-1").await.len(), 1);
}

#[tokio::test]
async fn test_windows_directory_is_mirrored() {
    let base = tempfile::tempdir().unwrap();
    let job = Job::new(
        "job-1",
        Owner::FileSenderOem,
        FileInfo::new("oem", "C:\\data\\oem-files\\plate\\run2", "scan.tiff"),
    );
    let repo = seeded_repo(vec![job.clone()]).await;
    let controller = receiver(repo.clone(), MockNextStage::new(), base.path(), 10);

    controller.transmit_job(job).await.unwrap();
    controller
        .transmit_file("job-1", "scan.tiff", b"bytes")
        .await
        .unwrap();

    assert!(base.path().join("plate/run2/scan.tiff").is_file());
}

#[tokio::test]
async fn test_file_without_job_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![sent_job("job-1")]).await;
    let controller = receiver(repo.clone(), MockNextStage::new(), base.path(), 10);

    let err = controller
        .transmit_file("job-1", "scan.tiff", b"bytes")
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(repo.updates().await.is_empty());
}

#[tokio::test]
async fn test_mismatched_file_name_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![sent_job("job-1")]).await;
    let controller = receiver(repo.clone(), MockNextStage::new(), base.path(), 10);

    controller.transmit_job(sent_job("job-1")).await.unwrap();
    let err = controller
        .transmit_file("job-1", "other.tiff", b"bytes")
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(!base.path().join("run1/other.tiff").exists());
}

#[tokio::test]
async fn test_path_in_file_name_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![sent_job("job-1")]).await;
    let controller = receiver(repo.clone(), MockNextStage::new(), base.path(), 10);

    controller.transmit_job(sent_job("job-1")).await.unwrap();
    let err = controller
        .transmit_file("job-1", "../scan.tiff", b"bytes")
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_full_cache_refuses_jobs() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![]).await;
    let controller = receiver(repo, MockNextStage::new(), base.path(), 1);

    controller.transmit_job(sent_job("job-1")).await.unwrap();
    // replacing a cached job does not need room
    controller.transmit_job(sent_job("job-1")).await.unwrap();
    let err = controller.transmit_job(sent_job("job-2")).await.unwrap_err();
    assert!(matches!(err, RelayError::Internal(_)));
}

#[tokio::test]
async fn test_empty_job_id_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![]).await;
    let controller = receiver(repo, MockNextStage::new(), base.path(), 10);

    assert!(controller
        .transmit_job(sent_job(""))
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn test_stale_owner_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let mut stored = sent_job("job-1");
    stored.owner = Owner::FileReceiverGateway;
    let repo = seeded_repo(vec![stored]).await;
    let next = MockNextStage::new();
    let controller = receiver(repo.clone(), next.clone(), base.path(), 10);

    controller.transmit_job(sent_job("job-1")).await.unwrap();
    let err = controller
        .transmit_file("job-1", "scan.tiff", b"bytes")
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Update { .. }));
    assert!(next.notified().is_empty());
}

#[tokio::test]
async fn test_notify_failure_still_succeeds() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![sent_job("job-1")]).await;
    let next = MockNextStage::new();
    next.fail_with(Failure::Transient);
    let controller = receiver(repo.clone(), next.clone(), base.path(), 10);

    controller.transmit_job(sent_job("job-1")).await.unwrap();
    let claimed = controller
        .transmit_file("job-1", "scan.tiff", b"bytes")
        .await
        .unwrap();

    assert_eq!(claimed.owner, Owner::FileReceiverGateway);
    assert_eq!(next.notified().len(), 1);
}

#[tokio::test]
async fn test_retry_notifies_owned_jobs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scan.tiff"), b"bytes").unwrap();
    let repo = seeded_repo(vec![
        input_job("job-1", Owner::FileReceiverGateway, HOST, dir.path(), "scan.tiff"),
        input_job("job-2", Owner::TaskLauncher, HOST, dir.path(), "scan.tiff"),
    ])
    .await;
    let next = MockNextStage::new();
    let controller = receiver(repo.clone(), next.clone(), dir.path(), 10);

    controller.retry_on_startup().await.unwrap();

    let ids: Vec<String> = next.notified().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec!["job-1".to_string()]);
    assert!(repo.updates().await.is_empty());
}

#[tokio::test]
async fn test_retry_records_notify_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scan.tiff"), b"bytes").unwrap();
    let repo = seeded_repo(vec![input_job(
        "job-1",
        Owner::FileReceiverGateway,
        HOST,
        dir.path(),
        "scan.tiff",
    )])
    .await;
    let next = MockNextStage::new();
    next.fail_with(Failure::Permanent);
    let controller = receiver(repo.clone(), next.clone(), dir.path(), 10);

    let err = controller.retry_on_startup().await.unwrap_err();
    assert!(matches!(err, RelayError::Transport { .. }));

    let stored = repo.get("job-1").await.unwrap();
    assert_eq!(stored.owner, Owner::FileReceiverGateway);
    assert_eq!(stored.status, JobStatus::TransmissionFailed);
    assert_eq!(stored.error_details.unwrap().message, ERR_NOTIFY);
}

#[tokio::test]
async fn test_retry_skips_jobs_for_other_hosts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scan.tiff"), b"bytes").unwrap();
    let repo = seeded_repo(vec![input_job(
        "job-1",
        Owner::FileReceiverGateway,
        "elsewhere",
        dir.path(),
        "scan.tiff",
    )])
    .await;
    let next = MockNextStage::new();
    let controller = receiver(repo.clone(), next.clone(), dir.path(), 10);

    assert!(controller.retry_on_startup().await.unwrap_err().is_validation());
    assert!(next.notified().is_empty());
}

#[tokio::test]
async fn test_traversal_in_input_directory_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("base");
    std::fs::create_dir_all(&base).unwrap();
    let job = Job::new(
        "job-1",
        Owner::FileSenderOem,
        FileInfo::new("oem", "/data/input/../../escaped", "scan.tiff"),
    );
    let repo = seeded_repo(vec![job.clone()]).await;
    let next = MockNextStage::new();
    let controller = receiver(repo.clone(), next.clone(), &base, 10);

    let err = controller.transmit_job(job).await.unwrap_err();
    assert!(err.is_validation());

    // without cached metadata the bytes are refused too
    let err = controller
        .transmit_file("job-1", "scan.tiff", b"bytes")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert!(!root.path().join("escaped").exists());
    assert!(repo.updates().await.is_empty());
    assert_eq!(repo.get("job-1").await.unwrap().owner, Owner::FileSenderOem);
    assert!(next.notified().is_empty());
}

#[tokio::test]
async fn test_separator_in_input_name_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![]).await;
    let controller = receiver(repo, MockNextStage::new(), base.path(), 10);

    let job = Job::new(
        "job-1",
        Owner::FileSenderOem,
        FileInfo::new("oem", "/data/input/run1", "sub/scan.tiff"),
    );
    assert!(controller.transmit_job(job).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_retry_leaves_settled_jobs_alone() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scan.tiff"), b"bytes").unwrap();
    let mut settled = input_job("job-1", Owner::FileReceiverGateway, HOST, dir.path(), "scan.tiff");
    settled.status = JobStatus::TransmissionFailed;
    let repo = seeded_repo(vec![
        settled,
        input_job("job-2", Owner::FileReceiverGateway, HOST, dir.path(), "scan.tiff"),
    ])
    .await;
    let next = MockNextStage::new();
    let controller = receiver(repo.clone(), next.clone(), dir.path(), 10);

    controller.retry_on_startup().await.unwrap();

    let ids: Vec<String> = next.notified().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec!["job-2".to_string()]);
    assert!(repo.updates().await.is_empty());
}
