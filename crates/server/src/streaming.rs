use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use library::ArtEntry;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::range::{byte_range_bounds, RangeError};
use crate::utils::json_error_response;

/// 206 response for the requested span of `path`. The body reads lazily and
/// owns the file handle, so dropping the response closes the file.
pub async fn file_range_response(path: &Path, range_header: Option<&str>) -> Response {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return json_error_response(StatusCode::NOT_FOUND, "track file not found");
        }
        Err(err) => {
            warn!("Failed to stat {:?}: {}", path, err);
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("io error: {}", err),
            );
        }
    };
    let total = metadata.len();

    let range = match byte_range_bounds(range_header, total) {
        Ok(range) => range,
        Err(err) => return range_not_satisfiable(err, total),
    };

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return json_error_response(StatusCode::NOT_FOUND, "track file not found");
        }
        Err(err) => {
            warn!("Failed to open {:?}: {}", path, err);
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("io error: {}", err),
            );
        }
    };
    if let Err(err) = file.seek(SeekFrom::Start(range.start)).await {
        warn!("Failed to seek {:?}: {}", path, err);
        return json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("io error: {}", err),
        );
    }

    let stream = ReaderStream::new(file.take(range.chunk_size()));
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.chunk_size()));
    if let Ok(value) = HeaderValue::from_str(&range.content_range(total)) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    response
}

fn range_not_satisfiable(err: RangeError, total: u64) -> Response {
    let mut response = json_error_response(StatusCode::RANGE_NOT_SATISFIABLE, err.to_string());
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total)) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}

/// Full-body image response; ids never change content, so clients may
/// cache for a year.
pub fn art_response(entry: ArtEntry) -> Response {
    let mut response = Response::new(Body::from(entry.data));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&entry.mime)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    response
}
