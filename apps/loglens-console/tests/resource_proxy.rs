mod common;

use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    response::Response,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::{MockBackend, TestResult};

const BOUNDARY: &str = "loglens-upload-boundary";
const FINGERPRINT: &str = "0123456789abcdef0123456789abcdef";

struct Field<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    value: &'a str,
}

fn multipart_body(fields: &[Field<'_>]) -> String {
    let mut body = String::new();
    for field in fields {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        match field.file_name {
            Some(file_name) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\n\
                 Content-Type: text/plain\r\n\r\n",
                field.name
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                field.name
            )),
        }
        body.push_str(field.value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

fn upload_request(cookie: &str, fields: &[Field<'_>]) -> Result<Request<Body>, axum::http::Error> {
    Request::builder()
        .method("POST")
        .uri("/api/sources")
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields)))
}

fn json_request(uri: &str, body: &str) -> Result<Request<Body>, axum::http::Error> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, "loglens_access=T1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
}

async fn json_body(response: Response) -> Result<Value, Box<dyn std::error::Error>> {
    let bytes = body::to_bytes(response.into_body(), 64 * 1024).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn upload_forwards_file_and_trimmed_name() -> TestResult {
    let backend = MockBackend::spawn().await?;
    let response = backend
        .console()
        .oneshot(upload_request(
            "loglens_access=T1",
            &[
                Field {
                    name: "file",
                    file_name: Some("api.log"),
                    value: "ERROR boom\nINFO ok\n",
                },
                Field {
                    name: "name",
                    file_name: None,
                    value: "  api logs  ",
                },
                Field {
                    name: "ignored",
                    file_name: None,
                    value: "x",
                },
            ],
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["file"]["file_name"], "api.log");
    assert_eq!(body["file"]["content_type"], "text/plain");
    assert_eq!(body["file"]["text"], "ERROR boom\nINFO ok\n");
    assert_eq!(body["name"]["text"], "api logs");
    assert!(body.get("ignored").is_none());
    assert_eq!(backend.calls.upload(), 1);
    Ok(())
}

#[tokio::test]
async fn upload_is_resent_after_renewal() -> TestResult {
    let backend = MockBackend::spawn().await?;
    let response = backend
        .console()
        .oneshot(upload_request(
            "loglens_access=EXPIRED; loglens_refresh=R1",
            &[
                Field {
                    name: "file",
                    file_name: Some("worker.log"),
                    value: "line",
                },
                Field {
                    name: "name",
                    file_name: None,
                    value: "   ",
                },
            ],
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 1);
    let body = json_body(response).await?;
    assert_eq!(body["file"]["file_name"], "worker.log");
    assert_eq!(body["file"]["text"], "line");
    assert!(body.get("name").is_none());
    assert_eq!(backend.calls.refresh(), 1);
    assert_eq!(backend.calls.upload(), 2);
    Ok(())
}

#[tokio::test]
async fn upload_without_file_is_rejected_before_backend() -> TestResult {
    let backend = MockBackend::spawn().await?;
    let response = backend
        .console()
        .oneshot(upload_request(
            "loglens_access=T1",
            &[
                Field {
                    name: "file",
                    file_name: None,
                    value: "not a file",
                },
                Field {
                    name: "name",
                    file_name: None,
                    value: "api logs",
                },
            ],
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await?["detail"], "File is required.");

    let response = backend
        .console()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sources")
                .header(header::COOKIE, "loglens_access=T1")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls.upload(), 0);
    Ok(())
}

#[tokio::test]
async fn anomaly_review_sends_only_service_and_status() -> TestResult {
    let backend = MockBackend::spawn().await?;
    let uri = format!("/api/anomalies/{FINGERPRINT}/review");

    let response = backend
        .console()
        .oneshot(json_request(&uri, r#"{"service":"api","owner":"ops"}"#)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["received"],
        json!({ "service": "api", "status": "reviewed" })
    );

    let response = backend
        .console()
        .oneshot(json_request(&uri, "{not json")?)
        .await?;
    assert_eq!(
        json_body(response).await?["received"],
        json!({ "service": "", "status": "reviewed" })
    );
    Ok(())
}

#[tokio::test]
async fn report_creation_sends_only_analysis_and_format() -> TestResult {
    let backend = MockBackend::spawn().await?;
    let response = backend
        .console()
        .oneshot(json_request(
            "/api/reports",
            r#"{"analysis_id":3,"format":"markdown","recipients":["a@b"]}"#,
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["received"],
        json!({ "analysis_id": 3, "format": "markdown" })
    );
    Ok(())
}
