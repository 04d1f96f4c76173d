//! Output file pull passes: per-file fan-out, job-level decision and the
//! single repository update per job.


use std::sync::Arc;

use job_relay::controller::{
    PullerController, StageController, ERR_ARCHIVE, ERR_TRANSMIT_FILE, ERR_WRITE_FILE,
};
use job_relay::job::{FileStatus, JobStatus, Owner};
use job_relay::repo::JobRepository;
use job_relay::RelayError;
use test_harness::{output_job, seeded_repo, Failure, Fetch, MockFileSource};

const PULLER: Owner = Owner::FileReceiverOem;

fn puller(
    repo: Arc<dyn JobRepository>,
    source: Arc<MockFileSource>,
    output: &std::path::Path,
) -> PullerController {
    PullerController::new("oem", output.to_path_buf(), repo, source)
}

#[tokio::test]
async fn test_two_files_both_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    controller.retry_on_startup().await.unwrap();

    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.owner, Owner::None);
    assert_eq!(job.pipeline_details.output_file_host, "oem");
    for file in &job.pipeline_details.output_files {
        assert_eq!(file.status, FileStatus::Complete);
        assert_eq!(file.owner, Owner::None);
        assert_eq!(file.dir_name, dir.path().display().to_string());
    }
    assert_eq!(
        std::fs::read(dir.path().join("out-0.png")).unwrap(),
        b"job-1-0"
    );
    assert_eq!(
        std::fs::read(dir.path().join("out-1.png")).unwrap(),
        b"job-1-1"
    );
    assert_eq!(source.archives(), vec!["job-1".to_string()]);
    assert_eq!(repo.updates_for("job-1").await.len(), 1);
}

#[tokio::test]
async fn test_second_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    source.respond(1, Fetch::Fail(Failure::Permanent));
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let err = controller.retry_on_startup().await.unwrap_err();
    assert!(matches!(err, RelayError::Transport { .. }));

    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::FileErrored);
    assert_eq!(job.owner, PULLER);
    let details = job.error_details.unwrap();
    assert_eq!(details.owner, PULLER);
    assert_eq!(details.message, ERR_TRANSMIT_FILE);

    let files = &job.pipeline_details.output_files;
    assert_eq!(files[0].status, FileStatus::Complete);
    assert_eq!(files[1].status, FileStatus::TransmissionFailed);
    assert_eq!(files[1].owner, PULLER);

    assert!(source.archives().is_empty());
    assert_eq!(repo.updates_for("job-1").await.len(), 1);
}

#[tokio::test]
async fn test_transient_failure_keeps_job_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    source.respond(0, Fetch::Fail(Failure::Transient));
    let controller = puller(repo.clone(), source.clone(), dir.path());

    assert!(controller.retry_on_startup().await.is_err());

    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Incomplete);
    assert_eq!(job.owner, PULLER);
    assert_eq!(
        job.pipeline_details.output_files[0].status,
        FileStatus::Incomplete
    );
    assert_eq!(
        job.pipeline_details.output_files[1].status,
        FileStatus::Complete
    );
    assert!(source.archives().is_empty());
}

#[tokio::test]
async fn test_transient_failure_recovers_on_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    source.respond(0, Fetch::Fail(Failure::Transient));
    let controller = puller(repo.clone(), source.clone(), dir.path());

    assert!(controller.retry_on_startup().await.is_err());
    source.respond(0, Fetch::Bytes(b"recovered".to_vec()));
    controller.retry_on_startup().await.unwrap();

    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.owner, Owner::None);
    assert_eq!(source.fetch_count("job-1", 0), 2);
    assert_eq!(source.fetch_count("job-1", 1), 1);
    assert_eq!(
        std::fs::read(dir.path().join("out-0.png")).unwrap(),
        b"recovered"
    );
}

#[tokio::test]
async fn test_zero_jobs_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "elsewhere",
        Owner::None,
        &[FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    controller.retry_on_startup().await.unwrap();

    assert!(repo.updates().await.is_empty());
    assert!(source.fetches().is_empty());
    assert_eq!(source.retry_count(), 0);
}

#[tokio::test]
async fn test_retrieval_failure_transmits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job("job-1", PULLER, &[FileStatus::Incomplete])]).await;
    repo.set_unavailable(true).await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let err = controller.retry_on_startup().await.unwrap_err();
    assert!(matches!(err, RelayError::Retrieve(_)));
    assert!(source.fetches().is_empty());
    assert!(repo.updates().await.is_empty());
}

#[tokio::test]
async fn test_failed_files_are_never_resubmitted() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[
            FileStatus::WriteFailed,
            FileStatus::Incomplete,
            FileStatus::TransmissionFailed,
            FileStatus::Invalid,
        ],
    )])
    .await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    controller.retry_on_startup().await.unwrap();

    assert_eq!(source.fetches(), vec![("job-1".to_string(), 1)]);
    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::FileErrored);
    assert_eq!(job.owner, PULLER);
    let files = &job.pipeline_details.output_files;
    assert_eq!(files[0].status, FileStatus::WriteFailed);
    assert_eq!(files[1].status, FileStatus::Complete);
    assert_eq!(files[2].status, FileStatus::TransmissionFailed);
    assert_eq!(files[3].status, FileStatus::Invalid);
}

#[tokio::test]
async fn test_archive_failure_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    source.fail_archive(Failure::Permanent);
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let err = controller.retry_on_startup().await.unwrap_err();
    match err {
        RelayError::Transport { context, .. } => assert_eq!(context, ERR_ARCHIVE),
        other => panic!("expected archive transport error, got {}", other),
    }

    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.owner, Owner::None);
    assert_eq!(repo.updates_for("job-1").await.len(), 1);
    let details = job.error_details.unwrap();
    assert_eq!(details.owner, PULLER);
    assert_eq!(details.message, ERR_ARCHIVE);
    assert!(job
        .pipeline_details
        .output_files
        .iter()
        .all(|f| f.status == FileStatus::Complete));
}

#[tokio::test]
async fn test_second_pass_reaches_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    source.respond(1, Fetch::Fail(Failure::Permanent));
    let controller = puller(repo.clone(), source.clone(), dir.path());

    assert!(controller.retry_on_startup().await.is_err());
    let first = repo.get("job-1").await.unwrap();

    controller.retry_on_startup().await.unwrap();
    let second = repo.get("job-1").await.unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.owner, second.owner);
    assert_eq!(first.error_details, second.error_details);
    assert_eq!(
        first.pipeline_details.output_files,
        second.pipeline_details.output_files
    );
    assert_eq!(source.fetch_count("job-1", 0), 1);
    assert_eq!(source.fetch_count("job-1", 1), 1);
}

#[tokio::test]
async fn test_panicking_unit_fails_only_its_file() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job(
        "job-1",
        PULLER,
        &[FileStatus::Incomplete, FileStatus::Incomplete, FileStatus::Incomplete],
    )])
    .await;
    let source = MockFileSource::new();
    source.respond(1, Fetch::Panic);
    let controller = puller(repo.clone(), source.clone(), dir.path());

    assert!(controller.retry_on_startup().await.is_err());

    let job = repo.get("job-1").await.unwrap();
    let files = &job.pipeline_details.output_files;
    assert_eq!(files[0].status, FileStatus::Complete);
    assert_eq!(files[1].status, FileStatus::TransmissionFailed);
    assert_eq!(files[2].status, FileStatus::Complete);
    assert_eq!(job.status, JobStatus::FileErrored);
}

#[tokio::test]
async fn test_write_failure_marks_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("not-created");
    let repo = seeded_repo(vec![output_job("job-1", PULLER, &[FileStatus::Incomplete])]).await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), &missing);

    let err = controller.retry_on_startup().await.unwrap_err();
    assert!(matches!(err, RelayError::File { .. }));

    let job = repo.get("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::FileErrored);
    assert_eq!(
        job.pipeline_details.output_files[0].status,
        FileStatus::WriteFailed
    );
    assert_eq!(job.error_details.unwrap().message, ERR_WRITE_FILE);
}

#[tokio::test]
async fn test_one_update_per_job_and_errors_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![
        output_job("job-a", PULLER, &[FileStatus::Incomplete]),
        output_job("job-b", PULLER, &[FileStatus::Incomplete, FileStatus::Incomplete]),
        output_job("job-c", PULLER, &[FileStatus::Incomplete]),
    ])
    .await;
    let source = MockFileSource::new();
    // index 1 only exists on job-b
    source.respond(1, Fetch::Fail(Failure::Permanent));
    source.fail_retry(Failure::Transient);
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let err = controller.retry_on_startup().await.unwrap_err();
    match err {
        RelayError::Multiple(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected aggregated errors, got {}", other),
    }

    for id in ["job-a", "job-b", "job-c"] {
        assert_eq!(repo.updates_for(id).await.len(), 1, "updates for {}", id);
    }
    assert_eq!(repo.get("job-a").await.unwrap().status, JobStatus::Complete);
    assert_eq!(repo.get("job-b").await.unwrap().status, JobStatus::FileErrored);
    assert_eq!(repo.get("job-c").await.unwrap().status, JobStatus::Complete);
    assert_eq!(source.retry_count(), 1);
}

#[tokio::test]
async fn test_handle_job_claims_from_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let job = output_job("job-1", Owner::FileSenderGateway, &[FileStatus::Incomplete]);
    let repo = seeded_repo(vec![job.clone()]).await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let stored = controller.handle_job(job).await.unwrap();

    assert_eq!(stored.status, JobStatus::Complete);
    assert_eq!(stored.owner, Owner::None);
    // claim plus the pass update
    assert_eq!(repo.updates_for("job-1").await.len(), 2);
}

#[tokio::test]
async fn test_handle_job_with_stale_owner_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let stored = output_job("job-1", Owner::None, &[FileStatus::Complete]);
    let repo = seeded_repo(vec![stored]).await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let announced = output_job("job-1", Owner::FileSenderGateway, &[FileStatus::Incomplete]);
    let err = controller.handle_job(announced).await.unwrap_err();

    assert!(matches!(err, RelayError::Update { .. }));
    assert!(source.fetches().is_empty());
    assert_eq!(repo.get("job-1").await.unwrap().owner, Owner::None);
}

#[tokio::test]
async fn test_handle_job_rejects_empty_id() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![]).await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source, dir.path());

    let err = controller
        .handle_job(output_job("", Owner::FileSenderGateway, &[]))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(repo.updates().await.is_empty());
}

#[tokio::test]
async fn test_rejected_update_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let repo = seeded_repo(vec![output_job("job-1", PULLER, &[FileStatus::Incomplete])]).await;
    repo.set_reject_updates(true).await;
    let source = MockFileSource::new();
    let controller = puller(repo.clone(), source.clone(), dir.path());

    let err = controller.retry_on_startup().await.unwrap_err();

    assert!(matches!(err, RelayError::Update { .. }));
    assert_eq!(source.fetch_count("job-1", 0), 1);
    assert_eq!(repo.get("job-1").await.unwrap().status, JobStatus::Incomplete);
}
