use ferry_core::models::format_size;
use ferry_services::{BatchReport, DeleteReport, SessionEvent, SessionEventKind};

/// Initialize tracing for the CLI. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// One status line for a session event.
pub fn describe_session_event(event: &SessionEvent) -> String {
    let total = event.files.len();
    match event.kind {
        SessionEventKind::Load => format!("{} file(s) ready", total),
        SessionEventKind::ValidationError => format!(
            "rejected: {}",
            event.message.as_deref().unwrap_or("validation failed")
        ),
        SessionEventKind::UploadStart => format!("uploading {} file(s)", total),
        SessionEventKind::UploadProgress => format!(
            "{:>3}% ({}/{} done, {} in flight)",
            event.progress, event.uploaded_count, total, event.uploading_count
        ),
        SessionEventKind::UploadEnd => format!("all {} file(s) uploaded", event.uploaded_count),
        SessionEventKind::DeleteStart => format!("deleting {} file(s)", total),
        SessionEventKind::DeleteEnd => "delete finished".to_string(),
    }
}

pub fn upload_summary(report: &BatchReport) -> Vec<String> {
    let mut lines = Vec::new();
    for file in &report.uploaded {
        lines.push(format!(
            "uploaded  {} -> {} ({})",
            file.original_name(),
            file.uri().unwrap_or_default(),
            file.formatted_size()
        ));
    }
    for file in &report.cancelled {
        lines.push(format!("cancelled {}", file.original_name()));
    }
    for failed in &report.failed {
        lines.push(format!(
            "failed    {}: {}",
            failed.file.original_name(),
            failed.error
        ));
    }
    for rejected in &report.rejected {
        lines.push(format!(
            "rejected  {}: {}",
            rejected.original_name,
            rejected.reasons.join(", ")
        ));
    }

    let total_bytes: u64 = report.uploaded.iter().map(|f| f.size()).sum();
    lines.push(format!(
        "session {}: {} uploaded ({}), {} failed, {} cancelled, {} rejected",
        report.session_id,
        report.uploaded.len(),
        format_size(total_bytes),
        report.failed.len(),
        report.cancelled.len(),
        report.rejected.len()
    ));
    lines
}

pub fn delete_summary(report: &DeleteReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .deleted
        .iter()
        .map(|f| format!("deleted   {}", f.path().unwrap_or(f.name())))
        .collect();
    for failed in &report.failed {
        lines.push(format!(
            "failed    {}: {}",
            failed.file.path().unwrap_or(failed.file.name()),
            failed.error
        ));
    }
    lines.push(format!(
        "session {}: {} deleted, {} failed",
        report.session_id,
        report.deleted.len(),
        report.failed.len()
    ));
    lines
}
