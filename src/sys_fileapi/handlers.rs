//! HTTP glue: turn core results into hyper::Response<Body>.

use std::io;

use chrono::Utc;
use futures::TryStreamExt;
use hyper::{
    Body, Method, Request, Response, StatusCode,
    header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LAST_MODIFIED},
};
use log::{error, info, warn};
use serde::Serialize;
use tokio::fs::File;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::sys_fileapi::core::{ApiError, FileApi, Outcome, Verb, rfc3339};
use crate::sys_pathguard::core::ResolveError;

const ALLOWED_METHODS: &str = "GET, PUT, DELETE, OPTIONS";

#[derive(Serialize)]
pub struct WriteResponse<'a> {
    pub message: &'a str,
    pub path: &'a str,
    pub size: u64,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DeleteResponse<'a> {
    pub message: &'a str,
    pub path: &'a str,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ErrorResponse<'a> {
    pub error: &'a str,
    pub message: String,
    pub timestamp: String,
    pub path: &'a str,
}

/// Serve one request against the file API.
pub async fn handler_files(req: Request<Body>, api: &FileApi) -> Response<Body> {
    let method = req.method().clone();
    let raw_path = req.uri().path().to_string();
    let path = match urlencoding::decode(&raw_path) {
        Ok(p) => p.into_owned(),
        Err(_) => {
            // not valid UTF-8 once decoded; nothing on disk can match it
            let err = ApiError::Resolve(ResolveError::PathTraversal);
            return error_response(&method, &raw_path, &err);
        }
    };

    if method == Method::OPTIONS {
        return Response::builder()
            .status(StatusCode::OK)
            .header(ALLOW, ALLOWED_METHODS)
            .body(Body::empty())
            .unwrap_or_else(|_| internal_error());
    }

    let declared_len = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let recursive = query_flag(req.uri().query(), "recursive");

    let verb = match method {
        Method::GET => Verb::Get,
        Method::PUT => Verb::Put {
            body: StreamReader::new(req.into_body().map_err(io::Error::other)),
            declared_len,
        },
        Method::DELETE => Verb::Delete { recursive },
        ref other => Verb::Other(other.to_string()),
    };

    match api.dispatch(&path, verb).await {
        Ok(outcome) => outcome_response(&method, &path, outcome).await,
        Err(e) => error_response(&method, &path, &e),
    }
}

async fn outcome_response(method: &Method, path: &str, outcome: Outcome) -> Response<Body> {
    match outcome {
        Outcome::FileContent { path: file_path, size, modified } => {
            let file = match File::open(&file_path).await {
                Ok(f) => f,
                Err(e) => {
                    let err = if e.kind() == io::ErrorKind::NotFound {
                        ApiError::NotFound(path.to_string())
                    } else {
                        ApiError::AccessFailure(e)
                    };
                    return error_response(method, path, &err);
                }
            };
            let mime = mime_guess::from_path(&file_path).first_or_octet_stream();
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, mime.as_ref())
                .header(CONTENT_LENGTH, size);
            if let Some(t) = modified {
                builder = builder.header(LAST_MODIFIED, httpdate::fmt_http_date(t));
            }
            log_request(method, path, StatusCode::OK, &format!("served file: {} ({} bytes)", path, size));
            builder
                .body(Body::wrap_stream(ReaderStream::new(file)))
                .unwrap_or_else(|_| internal_error())
        }
        Outcome::Listing(listing) => {
            log_request(
                method,
                path,
                StatusCode::OK,
                &format!("listed directory: {} ({} items)", listing.path, listing.count),
            );
            json_response(StatusCode::OK, &listing)
        }
        Outcome::Created { path: written, size } => {
            write_response(method, StatusCode::CREATED, "File created successfully", &written, size)
        }
        Outcome::Updated { path: written, size } => {
            write_response(method, StatusCode::OK, "File updated successfully", &written, size)
        }
        Outcome::Deleted { path: deleted } => {
            log_request(method, &deleted, StatusCode::OK, &format!("deleted: {}", deleted));
            json_response(
                StatusCode::OK,
                &DeleteResponse {
                    message: "Successfully deleted",
                    path: &deleted,
                    timestamp: now(),
                },
            )
        }
    }
}

fn write_response(
    method: &Method,
    status: StatusCode,
    message: &str,
    path: &str,
    size: u64,
) -> Response<Body> {
    log_request(method, path, status, &format!("{}: {} ({} bytes)", message, path, size));
    json_response(
        status,
        &WriteResponse {
            message,
            path,
            size,
            timestamp: now(),
        },
    )
}

/// Render an error as `{error, message, timestamp, path}`.
pub fn error_response(method: &Method, path: &str, err: &ApiError) -> Response<Body> {
    let status = status_for(err);
    log_request(method, path, status, &format!("{}: {}", err.kind(), err));

    let mut resp = json_response(
        status,
        &ErrorResponse {
            error: err.kind(),
            message: err.to_string(),
            timestamp: now(),
            path,
        },
    );
    if matches!(err, ApiError::MethodNotSupported(_)) {
        resp.headers_mut()
            .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    }
    resp
}

pub fn status_for(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Resolve(ResolveError::PathTraversal | ResolveError::OutsideRoot) => {
            StatusCode::BAD_REQUEST
        }
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        ApiError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ApiError::MethodNotSupported(_) => StatusCode::METHOD_NOT_ALLOWED,
        ApiError::Resolve(ResolveError::ResolutionFailure(_))
        | ApiError::AccessFailure(_)
        | ApiError::DirectoryNotEmpty(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = match serde_json::to_string(value) {
        Ok(j) => j,
        Err(e) => {
            error!("json error: {}", e);
            return internal_error();
        }
    };
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Body> {
    let mut r = Response::new(Body::from("Internal Server Error"));
    *r.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    r
}

fn log_request(method: &Method, path: &str, status: StatusCode, message: &str) {
    let code = status.as_u16();
    if status.is_server_error() {
        error!("{} {} {} - {}", method, path, code, message);
    } else if status.is_client_error() {
        warn!("{} {} {} - {}", method, path, code, message);
    } else {
        info!("{} {} {} - {}", method, path, code, message);
    }
}

fn now() -> String {
    rfc3339(Utc::now())
}

/// `true` only for `key=true`, like `?recursive=true`.
fn query_flag(query: Option<&str>, key: &str) -> bool {
    query
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| {
            let mut it = pair.splitn(2, '=');
            Some((it.next()?, it.next().unwrap_or_default()))
        })
        .any(|(k, v)| k == key && urlencoding::decode(v).is_ok_and(|v| v == "true"))
}
