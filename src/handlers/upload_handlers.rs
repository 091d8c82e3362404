//! HTTP handler for the upload pipeline.
//! Streams each multipart file part to disk, then hands the batch to
//! `FlipbookService`.

use crate::{
    AppState,
    errors::AppError,
    models::{flipbook::FlipbookResponse, upload::UploadedFile},
    services::flipbook_service::{FlipbookError, FlipbookResult},
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use futures::StreamExt;
use std::io;

/// Multipart field carrying the page images.
pub const FILES_FIELD: &str = "files";

/// `POST /upload-jpgs` — build a flipbook from the JPEG parts of `files`.
pub async fn upload_jpgs(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FlipbookResponse>, AppError> {
    let multipart = multipart.map_err(|rej| FlipbookError::Multipart(rej.body_text()))?;
    let uploads = match receive_files(&state, multipart).await {
        Ok(uploads) => uploads,
        Err((err, received)) => {
            if state.flipbooks.cleanup_on_failure {
                state.flipbooks.discard_uploads(&received).await;
            }
            return Err(err.into());
        }
    };

    let flipbook = state.flipbooks.create_flipbook(&uploads).await?;
    Ok(Json(FlipbookResponse::new(
        &flipbook,
        &state.config.public_base_url,
    )))
}

/// Drain the multipart body, storing every file part of `files`.
///
/// On error the parts stored so far are returned alongside it.
async fn receive_files(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Vec<UploadedFile>, (FlipbookError, Vec<UploadedFile>)> {
    let mut uploads = Vec::new();
    loop {
        match next_file(state, &mut multipart, uploads.len()).await {
            Ok(Some(upload)) => uploads.push(upload),
            Ok(None) => return Ok(uploads),
            Err(err) => return Err((err, uploads)),
        }
    }
}

async fn next_file(
    state: &AppState,
    multipart: &mut Multipart,
    received: usize,
) -> FlipbookResult<Option<UploadedFile>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| FlipbookError::Multipart(err.body_text()))?
    {
        // plain text fields and empty file inputs carry no file
        let Some(file_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
        else {
            continue;
        };
        let field_name = field.name().unwrap_or_default().to_owned();
        if field_name != FILES_FIELD {
            return Err(FlipbookError::UnexpectedField(field_name));
        }
        if received >= state.config.max_files {
            return Err(FlipbookError::TooManyFiles {
                limit: state.config.max_files,
            });
        }

        let content_type = field.content_type().map(str::to_owned);
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        let upload = state
            .flipbooks
            .store_upload(&file_name, content_type, stream)
            .await?;
        return Ok(Some(upload));
    }
    Ok(None)
}
