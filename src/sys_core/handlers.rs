//! Top-level routing.

use hyper::{
    Body, Method, Request, Response,
    header::{CONTENT_TYPE, HeaderValue},
};

use crate::sys_fileapi::{core::FileApi, handlers::handler_files};

/// `GET /health` answers directly, everything else goes to the file API.
pub async fn route(req: Request<Body>, api: &FileApi) -> Response<Body> {
    if req.method() == Method::GET && req.uri().path() == "/health" {
        return handler_health();
    }
    handler_files(req, api).await
}

pub fn handler_health() -> Response<Body> {
    let mut resp = Response::new(Body::from(r#"{"status":"ok"}"#));
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
