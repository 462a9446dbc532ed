//! Integration tests for the document downloader against a mock HTTP server.

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use traderepublic_rs::download::{DocumentDownloader, DownloadTask, DownloaderConfig, RetryPolicy};
use traderepublic_rs::Session;

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(40))
        .with_max_jitter(Duration::ZERO)
}

fn downloader(workers: usize) -> DocumentDownloader {
    DocumentDownloader::new(
        reqwest::Client::new(),
        &Session::from_web_cookies("tr_session=abc"),
        DownloaderConfig::default()
            .with_workers(workers)
            .with_retry(fast_retry()),
    )
    .unwrap()
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_persistent_failures_are_isolated() {
    init_logging();
    let server = MockServer::start().await;
    for broken in [7, 42, 99] {
        Mock::given(method("GET"))
            .and(path(format!("/docs/{broken}.pdf")))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .expect(3)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path_regex(r"^/docs/\d+\.pdf$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 test".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader(8);
    for i in 0..100 {
        let task = DownloadTask::new(
            format!("{}/docs/{i}.pdf", server.uri()),
            dir.path().join(format!("{i}.pdf")),
        );
        downloader.submit(task).await.unwrap();
    }
    let report = downloader.join().await;

    assert_eq!(report.completed, 97);
    assert_eq!(report.failed(), 3);
    assert_eq!(report.retried, 6);
    assert!(report.failures.iter().all(|f| f.attempts == 3));

    let mut failed: Vec<_> = report
        .failures
        .iter()
        .map(|f| f.task.destination.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["42.pdf", "7.pdf", "99.pdf"]);

    // No temporary files left behind and nothing written for the failures.
    assert_eq!(count_files(dir.path()), 97);
    assert!(!dir.path().join("42.pdf").exists());
    assert_eq!(std::fs::read(dir.path().join("0.pdf")).unwrap(), b"%PDF-1.4 test");
}

#[tokio::test]
async fn test_existing_file_is_overwritten() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/statement.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new contents".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("statement.pdf");
    std::fs::write(&destination, b"old contents that are longer").unwrap();

    let downloader = downloader(2);
    downloader
        .submit(DownloadTask::new(format!("{}/statement.pdf", server.uri()), &destination))
        .await
        .unwrap();
    let report = downloader.join().await;

    assert!(report.is_success());
    assert_eq!(std::fs::read(&destination).unwrap(), b"new contents");
}

#[tokio::test]
async fn test_parent_directories_created() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("Order_executed").join("2024").join("a.pdf");

    let downloader = downloader(1);
    downloader
        .submit(DownloadTask::new(format!("{}/a.pdf", server.uri()), &destination))
        .await
        .unwrap();
    assert!(destination.parent().unwrap().is_dir());

    let report = downloader.join().await;
    assert_eq!(report.completed, 1);
    assert!(destination.is_file());
}

#[tokio::test]
async fn test_client_errors_not_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader(2);
    downloader
        .submit(DownloadTask::new(
            format!("{}/missing.pdf", server.uri()),
            dir.path().join("missing.pdf"),
        ))
        .await
        .unwrap();
    let report = downloader.join().await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.retried, 0);
    assert_eq!(report.failures[0].attempts, 1);
    assert!(report.failures[0].error.contains("404"));
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader(1);
    let stats = downloader.stats();
    downloader
        .submit(DownloadTask::new(
            format!("{}/flaky.pdf", server.uri()),
            dir.path().join("flaky.pdf"),
        ))
        .await
        .unwrap();
    let report = downloader.join().await;

    assert!(report.is_success());
    assert_eq!(report.retried, 1);
    assert_eq!(stats.submitted(), 1);
    assert_eq!(stats.pending(), 0);
}

#[tokio::test]
async fn test_requests_carry_session_headers() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private.pdf"))
        .and(header("cookie", "tr_session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"private".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = downloader(1);
    downloader
        .submit(DownloadTask::new(
            format!("{}/private.pdf", server.uri()),
            dir.path().join("private.pdf"),
        ))
        .await
        .unwrap();

    assert!(downloader.join().await.is_success());
}

#[tokio::test]
async fn test_concurrent_writes_to_one_destination_do_not_interleave() {
    init_logging();
    const BODY_LEN: usize = 256 * 1024;
    let server = MockServer::start().await;
    for i in 0..20u8 {
        Mock::given(method("GET"))
            .and(path(format!("/variants/{i}.pdf")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a' + i; BODY_LEN]))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("statement.pdf");
    let downloader = downloader(8);
    for i in 0..20 {
        let task = DownloadTask::new(
            format!("{}/variants/{i}.pdf", server.uri()),
            destination.clone(),
        );
        downloader.submit(task).await.unwrap();
    }
    let report = downloader.join().await;

    assert_eq!(report.completed, 20);
    assert!(report.is_success());

    let written = std::fs::read(&destination).unwrap();
    assert_eq!(written.len(), BODY_LEN);
    let first = written[0];
    assert!((b'a'..b'a' + 20).contains(&first));
    assert!(written.iter().all(|&byte| byte == first));

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
    assert_eq!(count_files(dir.path()), 1);
}
