//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the template tree and disk I/O

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Verifies the template directory exists and is a directory.
/// 2. Performs a best-effort write/read/delete inside the output directory.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.flipbooks;

    // 1) Template check
    let template_check = match fs::metadata(&service.template_dir).await {
        Ok(meta) if meta.is_dir() => (true, None::<String>),
        Ok(_) => (false, Some("not a directory".to_string())),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) Disk write/read/delete check (use a temp file under output_dir)
    let tmp_path = service
        .output_dir
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::create_dir_all(&service.output_dir).await {
        Err(e) => (false, Some(format!("could not create output dir: {}", e))),
        Ok(_) => match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                    Ok(_) => (true, None::<String>),
                    Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
                },
                Ok(_) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some(format!("could not read tmp file: {}", e)))
                }
            },
            Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
        },
    };

    let overall_ok = template_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "template",
        CheckStatus {
            ok: template_check.0,
            error: template_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
