//! Serves locally stored agreement PDFs.

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::agreement::is_safe_pdf_name,
    services::agreement_service,
    state::AppState,
};

/// `GET /api/files/pdfs/{file}`
///
/// Only bare `*.pdf` names made of letters, digits, `.`, `_` and `-` are served.
pub async fn serve_pdf(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !is_safe_pdf_name(&file_name) {
        return Err(AppError::InvalidRequest("Invalid file name".to_string()));
    }

    let bytes = agreement_service::read_local_pdf(&state.config.upload_dir, &file_name).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{file_name}\""),
            ),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        bytes,
    ))
}
