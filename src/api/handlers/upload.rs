use crate::api::error::AppError;
use crate::models::{RequestCtx, UploadPhase};
use crate::services::upload_service::ChunkUpload;
use axum::{
    Json,
    extract::{Multipart, State},
    http::HeaderMap,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub phase: UploadPhase,
}

/// Receive one chunk of a chunked upload. The caller identity comes from the
/// auth layer in front of this service via the `x-user-id` header.
pub async fn upload_chunk(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing x-user-id header".to_string()))?
        .to_string();
    let ctx = RequestCtx::new(user_id);

    let mut file_id: Option<String> = None;
    let mut file_name = String::new();
    let mut parent_id = "0".to_string();
    let mut content_hash = String::new();
    let mut chunk_index: Option<u32> = None;
    let mut chunk_total: Option<u32> = None;
    let mut bytes: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "chunk" {
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            );
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        match name.as_str() {
            "file_id" => {
                if !text.is_empty() {
                    file_id = Some(text);
                }
            }
            "file_name" => file_name = text,
            "parent_id" => {
                if !text.is_empty() {
                    parent_id = text;
                }
            }
            "content_hash" => content_hash = text,
            "chunk_index" => {
                chunk_index = Some(text.parse().map_err(|_| {
                    AppError::BadRequest(format!("Invalid chunk_index: {text}"))
                })?);
            }
            "chunk_total" => {
                chunk_total = Some(text.parse().map_err(|_| {
                    AppError::BadRequest(format!("Invalid chunk_total: {text}"))
                })?);
            }
            _ => {}
        }
    }

    let req = ChunkUpload {
        file_id,
        file_name,
        parent_id,
        content_hash,
        chunk_index: chunk_index
            .ok_or_else(|| AppError::BadRequest("Missing chunk_index".to_string()))?,
        chunk_total: chunk_total
            .ok_or_else(|| AppError::BadRequest("Missing chunk_total".to_string()))?,
        bytes: bytes.ok_or_else(|| AppError::BadRequest("No chunk provided".to_string()))?,
    };

    let outcome = state.upload.submit_chunk(&ctx, req).await?;
    Ok(Json(UploadResponse {
        file_id: outcome.file_id,
        phase: outcome.phase,
    }))
}
