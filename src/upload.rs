//! 上传入库与删除处理器。

use axum::extract::{Extension, Multipart, Query};
use axum::http::HeaderMap;
use axum::response::Json as JsonResponse;
use axum_extra::extract::Host;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::http::{RequestScheme, build_file_url, request_scheme};
use crate::sanitize::sanitize_file_name;
use crate::storage::{DeleteOutcome, Storage};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    file_name: String,
    folder_path: String,
    file_mime_type: String,
    file_extension: String,
    file_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteQuery {
    folder_path: Option<String>,
    file_name: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct DeleteResponse {
    message: String,
}

struct FilePart {
    original_name: String,
    content_type: Option<String>,
    bytes: axum::body::Bytes,
}

/// 接收 multipart 上传（`file` + `folderPath`），落盘并返回访问 URL。
pub async fn ingest_file(
    Host(host): Host,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(scheme): Extension<RequestScheme>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let mut folder_path: Option<String> = None;
    let mut file: Option<FilePart> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "folderPath" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                folder_path = Some(value);
            }
            "file" => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                file = Some(FilePart {
                    original_name,
                    content_type,
                    bytes,
                });
            }
            _ => continue,
        }
    }

    let folder_path = folder_path
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Folder path is required".into()))?;
    let file = file
        .filter(|part| !part.bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;

    let candidate = sanitize_file_name(&file.original_name);
    let stored = storage.store(&folder_path, &candidate, &file.bytes).await?;

    let file_mime_type = file.content_type.unwrap_or_else(|| {
        mime_guess::from_path(&stored.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    let file_url = build_file_url(
        request_scheme(&headers, scheme),
        &host,
        &stored.folder,
        &stored.name,
    );

    info!(
        folder = stored.folder,
        name = stored.name,
        size = file.bytes.len(),
        "file ingested"
    );
    Ok(JsonResponse(UploadResponse {
        file_extension: extension_of(&stored.name),
        file_name: stored.name,
        folder_path: stored.folder,
        file_mime_type,
        file_url,
    }))
}

/// 删除指定文件；目标不存在视为成功（幂等删除）。
pub async fn delete_file(
    Query(query): Query<DeleteQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<DeleteResponse>, ApiError> {
    let folder_path = query
        .folder_path
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("folderPath is required".into()))?;
    let file_name = query
        .file_name
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("fileName is required".into()))?;

    let outcome = storage.remove(&folder_path, &file_name).await?;
    info!(folder = folder_path, name = file_name, ?outcome, "delete file");

    let message = match outcome {
        DeleteOutcome::Deleted => "File deleted",
        DeleteOutcome::AlreadyAbsent => "File already absent",
    };
    Ok(JsonResponse(DeleteResponse {
        message: message.to_string(),
    }))
}

/// 提取最终文件名的扩展名（带点，缺省为空串）。
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use std::sync::Arc;
    use tempfile::tempdir;

    const BOUNDARY: &str = "stash-test-boundary";

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Arc::new(Storage::new(root, 0o775, 0o664)))
    }

    fn multipart_body(folder: Option<&str>, file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(folder) = folder {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"folderPath\"\r\n\r\n{folder}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/pdf\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn make_multipart(folder: Option<&str>, file: Option<(&str, &[u8])>) -> Multipart {
        let request = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(multipart_body(folder, file)))
            .expect("request");
        Multipart::from_request(request, &())
            .await
            .expect("multipart")
    }

    async fn ingest(
        storage: Arc<Storage>,
        headers: HeaderMap,
        folder: Option<&str>,
        file: Option<(&str, &[u8])>,
    ) -> Result<JsonResponse<UploadResponse>, ApiError> {
        ingest_file(
            Host("127.0.0.1:3011".to_string()),
            headers,
            Extension(storage),
            Extension(RequestScheme::Http),
            make_multipart(folder, file).await,
        )
        .await
    }

    #[tokio::test]
    async fn upload_stores_file_and_builds_url() {
        let (_temp, storage) = make_storage();
        let JsonResponse(response) = ingest(
            storage.clone(),
            HeaderMap::new(),
            Some("docs"),
            Some(("Résumé Côte d'Ivoire.pdf", b"%PDF-1.7")),
        )
        .await
        .unwrap_or_else(|_| panic!("upload failed"));

        assert_eq!(response.file_name, "resume-cote-d-ivoire.pdf");
        assert_eq!(response.folder_path, "docs");
        assert_eq!(response.file_mime_type, "application/pdf");
        assert_eq!(response.file_extension, ".pdf");
        assert_eq!(
            response.file_url,
            "http://127.0.0.1:3011/uploads/docs/resume-cote-d-ivoire.pdf"
        );

        let on_disk = std::fs::read(storage.root_path().join("docs/resume-cote-d-ivoire.pdf"))
            .expect("read stored file");
        assert_eq!(on_disk, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn duplicate_upload_keeps_both_files() {
        let (_temp, storage) = make_storage();
        let JsonResponse(first) = ingest(
            storage.clone(),
            HeaderMap::new(),
            Some("docs"),
            Some(("report.pdf", b"first")),
        )
        .await
        .unwrap_or_else(|_| panic!("first upload failed"));
        let JsonResponse(second) = ingest(
            storage.clone(),
            HeaderMap::new(),
            Some("docs"),
            Some(("report.pdf", b"second")),
        )
        .await
        .unwrap_or_else(|_| panic!("second upload failed"));

        assert_ne!(first.file_name, second.file_name);
        let dir = storage.root_path().join("docs");
        assert_eq!(std::fs::read(dir.join(&first.file_name)).expect("first"), b"first");
        assert_eq!(
            std::fs::read(dir.join(&second.file_name)).expect("second"),
            b"second"
        );
    }

    #[tokio::test]
    async fn upload_requires_folder_path() {
        let (_temp, storage) = make_storage();
        let result = ingest(
            storage.clone(),
            HeaderMap::new(),
            None,
            Some(("a.txt", b"x")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = ingest(storage, HeaderMap::new(), Some("   "), Some(("a.txt", b"x"))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_requires_file() {
        let (_temp, storage) = make_storage();
        let result = ingest(storage.clone(), HeaderMap::new(), Some("docs"), None).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = ingest(storage, HeaderMap::new(), Some("docs"), Some(("a.txt", b""))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn upload_rejects_traversal_folder() {
        let (temp, storage) = make_storage();
        let result = ingest(
            storage,
            HeaderMap::new(),
            Some("../escape"),
            Some(("a.txt", b"x")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(!temp.path().join("escape").exists());
    }

    #[tokio::test]
    async fn forwarded_proto_reflects_in_url() {
        let (_temp, storage) = make_storage();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-proto",
            axum::http::HeaderValue::from_static("https"),
        );
        let JsonResponse(response) = ingest(
            storage,
            headers,
            Some("docs"),
            Some(("a.txt", b"x")),
        )
        .await
        .unwrap_or_else(|_| panic!("upload failed"));
        assert!(response.file_url.starts_with("https://"));
    }

    #[tokio::test]
    async fn delete_is_idempotent_via_handler() {
        let (_temp, storage) = make_storage();
        storage
            .store("docs", "gone.txt", b"x")
            .await
            .expect("seed file");

        let query = || DeleteQuery {
            folder_path: Some("docs".to_string()),
            file_name: Some("gone.txt".to_string()),
        };
        let JsonResponse(first) = delete_file(Query(query()), Extension(storage.clone()))
            .await
            .unwrap_or_else(|_| panic!("first delete failed"));
        assert_eq!(first.message, "File deleted");
        assert!(!storage.root_path().join("docs/gone.txt").exists());

        let JsonResponse(second) = delete_file(Query(query()), Extension(storage))
            .await
            .unwrap_or_else(|_| panic!("second delete failed"));
        assert_eq!(second.message, "File already absent");
    }

    #[tokio::test]
    async fn delete_requires_both_params() {
        let (_temp, storage) = make_storage();
        let result = delete_file(
            Query(DeleteQuery {
                folder_path: None,
                file_name: Some("a.txt".to_string()),
            }),
            Extension(storage.clone()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = delete_file(
            Query(DeleteQuery {
                folder_path: Some("docs".to_string()),
                file_name: None,
            }),
            Extension(storage),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
