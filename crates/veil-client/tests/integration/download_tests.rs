use std::time::Duration;

use veil_client::ReqwestRangeSource;
use veil_core::config::DownloadConfig;
use veil_core::error::AppError;
use veil_core::models::checkpoint_path_for;
use veil_core::{MediaKind, ResumableDownloader};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{RangeResponder, payload};

const LEN: usize = 10_000;

fn config(dir: &std::path::Path, max_workers: usize) -> DownloadConfig {
    DownloadConfig {
        download_dir: dir.to_path_buf(),
        chunk_size: 1_000,
        max_workers,
        request_timeout: Duration::from_secs(5),
    }
}

fn downloader(dir: &std::path::Path, max_workers: usize) -> ResumableDownloader<ReqwestRangeSource> {
    let source = ReqwestRangeSource::new(Duration::from_secs(5)).unwrap();
    ResumableDownloader::new(source, config(dir, max_workers))
}

/// HEAD is refused so sizes come from the ranged-GET fallback.
async fn ranged_server(responder: RangeResponder) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/video.mp4"))
        .respond_with(responder)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_parallel_download_is_byte_identical() {
    let data = payload(LEN);
    let server = ranged_server(RangeResponder::new(data.clone())).await;
    let dir = tempfile::tempdir().unwrap();

    let saved = downloader(dir.path(), 4)
        .download(&format!("{}/files/video.mp4", server.uri()), None, true)
        .await
        .unwrap();

    assert_eq!(saved, dir.path().join("video.mp4"));
    assert_eq!(tokio::fs::read(&saved).await.unwrap(), data);
    assert!(!checkpoint_path_for(&saved).exists());
}

#[tokio::test]
async fn test_interrupted_download_resumes_from_checkpoint() {
    let data = payload(LEN);
    let responder = RangeResponder::new(data.clone()).failing_once_at(4_000);
    let served = responder.served.clone();
    let server = ranged_server(responder).await;
    let dir = tempfile::tempdir().unwrap();
    let url = format!("{}/files/video.mp4", server.uri());

    let err = downloader(dir.path(), 1)
        .download(&url, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ChunkWriteFailure { start: 4_000, .. }), "{err}");

    let target = dir.path().join("video.mp4");
    let ckpt = checkpoint_path_for(&target);
    let record = veil_core::checkpoint::load(&ckpt).await.unwrap();
    assert_eq!(record.downloaded, 4_000);

    served.lock().unwrap().clear();
    let saved = downloader(dir.path(), 4).download(&url, None, true).await.unwrap();

    assert_eq!(tokio::fs::read(&saved).await.unwrap(), data);
    assert!(!ckpt.exists());
    // (0, 0) is the size probe.
    let resumed: Vec<_> = served
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|&range| range != (0, 0))
        .collect();
    assert!(resumed.iter().all(|&(start, _)| start >= 4_000), "{resumed:?}");
    assert_eq!(resumed.len(), 6);
}

#[tokio::test]
async fn test_server_ignoring_range_header() {
    let data = payload(100_000);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let workers = 4;
    let dir = tempfile::tempdir().unwrap();
    let saved = downloader(dir.path(), workers)
        .download(&format!("{}/plain.bin", server.uri()), Some("copy.bin"), false)
        .await
        .unwrap();

    assert_eq!(saved, dir.path().join("copy.bin"));
    assert_eq!(tokio::fs::read(&saved).await.unwrap(), data);
    assert!(!checkpoint_path_for(&saved).exists());

    // Size lookup, at most one ranged GET per worker, then one full transfer;
    // not one full body per 1 KB chunk.
    let gets = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .count();
    assert!(gets <= workers + 3, "{gets} GET requests");
}

#[tokio::test]
async fn test_single_chunk_file_accepts_full_body() {
    let data = payload(800);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/small.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let saved = downloader(dir.path(), 2)
        .download(&format!("{}/small.bin", server.uri()), None, false)
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&saved).await.unwrap(), data);
}

#[tokio::test]
async fn test_missing_file_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out");
    let err = downloader(&target, 2)
        .download(&format!("{}/gone.jpg", server.uri()), None, true)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::TransportFailure(_)), "{err}");
    assert!(!target.exists());
}

#[tokio::test]
async fn test_download_many_skips_failures() {
    let data = payload(LEN);
    let server = ranged_server(RangeResponder::new(data.clone())).await;
    let dir = tempfile::tempdir().unwrap();

    let urls = vec![
        format!("{}/files/video.mp4", server.uri()),
        format!("{}/missing/clip.mp4", server.uri()),
    ];
    let saved = downloader(dir.path(), 3)
        .download_many(&urls, MediaKind::Video)
        .await;

    assert_eq!(saved, vec![dir.path().join("video.mp4")]);
}
