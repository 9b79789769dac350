#[path = "helpers/mod.rs"]
mod helpers;

use ferry_core::CheckKind;
use ferry_services::{FerryConfig, SessionEventKind};
use helpers::fixtures::{png_source, text_source};
use helpers::memory_runner;

fn image_config() -> FerryConfig {
    FerryConfig {
        allowed_content_types: vec!["image/png".to_string()],
        min_image_width: Some(16),
        min_image_height: Some(8),
        validation_checks: CheckKind::ALL.to_vec(),
        ..FerryConfig::default()
    }
}

#[tokio::test]
async fn test_compliant_image_is_uploaded() {
    let (runner, transport) = memory_runner(&image_config());

    let report = runner
        .upload(vec![png_source("wide.png", 32, 16)])
        .await
        .unwrap();

    assert_eq!(report.uploaded.len(), 1);
    assert!(report.rejected.is_empty());
    assert_eq!(report.uploaded[0].mime_type(), Some("image/png"));
    assert_eq!(transport.object_count(), 1);
}

#[tokio::test]
async fn test_small_portrait_image_reports_every_failed_check() {
    let (runner, transport) = memory_runner(&image_config());
    let mut session_rx = runner.subscribe_session();

    let report = runner
        .upload(vec![png_source("tall.png", 4, 10)])
        .await
        .unwrap();

    assert!(report.uploaded.is_empty());
    assert_eq!(transport.put_attempts(), 0);
    assert_eq!(
        report.rejected[0].reasons,
        vec![
            "file.validation.dimensions_too_small".to_string(),
            "file.validation.not_landscape".to_string(),
        ]
    );

    let mut validation_errors = 0;
    while let Ok(event) = session_rx.try_recv() {
        if event.kind == SessionEventKind::ValidationError {
            validation_errors += 1;
        }
    }
    assert_eq!(validation_errors, 2);
}

#[tokio::test]
async fn test_disallowed_mime_type_is_rejected() {
    let (runner, _transport) = memory_runner(&image_config());

    let report = runner
        .upload(vec![
            text_source("plain.txt", "no marker, no mime type"),
            ferry_services::RawSource::new(&b"data:text/csv,a,b,c"[..], "table.csv"),
        ])
        .await
        .unwrap();

    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.uploaded[0].original_name(), "plain.txt");
    assert_eq!(report.rejected[0].original_name, "table.csv");
    assert_eq!(
        report.rejected[0].reasons,
        vec!["file.validation.mime_type_not_allowed".to_string()]
    );
}
