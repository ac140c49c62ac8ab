use std::io::Write;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::{
    auth::{require_auth, require_user_id, AgencyRole},
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows},
    schemas::{
        clamp_limit_in_range, DocumentPath, DocumentsArchiveQuery, DocumentsQuery,
        DocumentUploadQuery,
    },
    services::{audit::write_audit_log, kdrive::KDriveClient},
    state::AppState,
    tenancy::{assert_agency_member, assert_agency_role},
};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/documents",
            axum::routing::get(list_documents).post(upload_document),
        )
        .route("/documents/archive", axum::routing::get(download_archive))
        .route(
            "/documents/{document_id}",
            axum::routing::get(download_document).delete(delete_document),
        )
}

async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_member(&state, &user_id, &query.agency_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "agency_id".to_string(),
        Value::String(query.agency_id.clone()),
    );
    if let Some(entity_type) = non_empty_opt(query.entity_type.as_deref()) {
        filters.insert("entity_type".to_string(), Value::String(entity_type));
    }
    if let Some(entity_id) = non_empty_opt(query.entity_id.as_deref()) {
        filters.insert("entity_id".to_string(), Value::String(entity_id));
    }

    let rows = list_rows(
        pool,
        "documents",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

/// Upload a file to kDrive under the agency's folder and record it. The
/// stored path is `<agency_id>[/<folder>]/<file_name>`.
async fn upload_document(
    State(state): State<AppState>,
    Query(query): Query<DocumentUploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let ctx = require_auth(&state, &headers, &query.agency_id).await?;
    if ctx.role == AgencyRole::Tenant {
        return Err(AppError::Forbidden(
            "Forbidden: tenants cannot upload agency documents.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;
    let kdrive = KDriveClient::from_state(&state)?;

    let mut file_name = String::new();
    let mut content_type = "application/octet-stream".to_string();
    let mut bytes: Vec<u8> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("Invalid multipart payload.".to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        file_name = sanitize_file_name(field.file_name().unwrap_or_default());
        if let Some(mime) = field.content_type() {
            content_type = mime.to_string();
        }
        let data = field
            .bytes()
            .await
            .map_err(|_| AppError::BadRequest("Could not read uploaded file.".to_string()))?;
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::BadRequest(
                "Uploaded file exceeds the 25 MB limit.".to_string(),
            ));
        }
        bytes = data.to_vec();
    }

    if file_name.is_empty() || bytes.is_empty() {
        return Err(AppError::BadRequest(
            "Multipart field 'file' with a file name is required.".to_string(),
        ));
    }

    let folder = non_empty_opt(query.folder.as_deref()).map(|value| sanitize_file_name(&value));
    let mut segments: Vec<&str> = vec![query.agency_id.as_str()];
    if let Some(folder) = folder.as_deref() {
        segments.push(folder);
    }

    // Create the folder chain, then store the file.
    for depth in 1..=segments.len() {
        kdrive.ensure_folder(&segments[..depth]).await?;
    }
    let checksum = format!("{:x}", Sha256::digest(&bytes));
    let size_bytes = bytes.len() as i64;
    let mut path_segments = segments.clone();
    path_segments.push(file_name.as_str());
    kdrive
        .put_file(&path_segments, bytes, &content_type)
        .await?;

    let mut row = Map::new();
    row.insert(
        "agency_id".to_string(),
        Value::String(query.agency_id.clone()),
    );
    row.insert("file_name".to_string(), Value::String(file_name.clone()));
    row.insert(
        "storage_path".to_string(),
        Value::String(path_segments.join("/")),
    );
    row.insert(
        "content_type".to_string(),
        Value::String(content_type.clone()),
    );
    row.insert("size_bytes".to_string(), Value::Number(size_bytes.into()));
    row.insert("checksum_sha256".to_string(), Value::String(checksum));
    if let Some(entity_type) = non_empty_opt(query.entity_type.as_deref()) {
        row.insert("entity_type".to_string(), Value::String(entity_type));
    }
    if let Some(entity_id) = non_empty_opt(query.entity_id.as_deref()) {
        row.insert("entity_id".to_string(), Value::String(entity_id));
    }
    row.insert(
        "uploaded_by_user_id".to_string(),
        Value::String(ctx.user_id.clone()),
    );

    let created = create_row(pool, "documents", &row).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&query.agency_id),
        Some(&ctx.user_id),
        "upload",
        "documents",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn download_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "documents", &path.document_id).await?;
    assert_agency_member(&state, &user_id, &value_str(&record, "agency_id")).await?;

    let kdrive = KDriveClient::from_state(&state)?;
    let storage_path = value_str(&record, "storage_path");
    let segments = storage_path.split('/').collect::<Vec<_>>();
    let bytes = kdrive.get_file(&segments).await?;

    let content_type = {
        let stored = value_str(&record, "content_type");
        if stored.is_empty() {
            "application/octet-stream".to_string()
        } else {
            stored
        }
    };
    let file_name = value_str(&record, "file_name");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    ))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "documents", &path.document_id).await?;
    let agency_id = value_str(&record, "agency_id");
    assert_agency_role(&state, &user_id, &agency_id, &["agency_admin"]).await?;

    let kdrive = KDriveClient::from_state(&state)?;
    let storage_path = value_str(&record, "storage_path");
    let segments = storage_path.split('/').collect::<Vec<_>>();
    kdrive.delete(&segments).await?;

    let deleted = delete_row(pool, "documents", &path.document_id).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&agency_id),
        Some(&user_id),
        "delete",
        "documents",
        Some(&path.document_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// Bundle an agency folder into a ZIP download. Subfolders are skipped; this
/// is a flat export of one folder's files.
async fn download_archive(
    State(state): State<AppState>,
    Query(query): Query<DocumentsArchiveQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_agency_member(&state, &user_id, &query.agency_id).await?;

    let kdrive = KDriveClient::from_state(&state)?;
    let folder = non_empty_opt(query.folder.as_deref()).map(|value| sanitize_file_name(&value));
    let mut segments: Vec<&str> = vec![query.agency_id.as_str()];
    if let Some(folder) = folder.as_deref() {
        segments.push(folder);
    }

    let entries = kdrive.list_folder(&segments).await?;
    let files = entries
        .into_iter()
        .filter(|entry| !entry.is_collection)
        .collect::<Vec<_>>();
    if files.is_empty() {
        return Err(AppError::NotFound(
            "The folder has no files to archive.".to_string(),
        ));
    }

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut archive = zip::ZipWriter::new(&mut cursor);
        let options: zip::write::SimpleFileOptions = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for entry in &files {
            let mut path_segments = segments.clone();
            path_segments.push(entry.name.as_str());
            let bytes = kdrive.get_file(&path_segments).await?;

            archive
                .start_file(entry.name.clone(), options)
                .map_err(|_| AppError::Internal("Could not build ZIP archive.".to_string()))?;
            archive
                .write_all(&bytes)
                .map_err(|_| AppError::Internal("Could not build ZIP archive.".to_string()))?;
        }
        archive
            .finish()
            .map_err(|_| AppError::Internal("Could not build ZIP archive.".to_string()))?;
    }

    let archive_name = match folder.as_deref() {
        Some(folder) => format!("{folder}.zip"),
        None => "documents.zip".to_string(),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{archive_name}\""),
            ),
        ],
        cursor.into_inner(),
    ))
}

/// Keep only the final path component and drop characters WebDAV servers
/// commonly reject.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    base.chars()
        .filter(|character| !matches!(character, '\0' | '\r' | '\n' | '"'))
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::sanitize_file_name;

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("lease.pdf"), "lease.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("c:\\docs\\contrato.pdf"), "contrato.pdf");
        assert_eq!(sanitize_file_name("..hidden.."), "hidden");
        assert_eq!(sanitize_file_name("archivo \"final\".pdf"), "archivo final.pdf");
    }
}
