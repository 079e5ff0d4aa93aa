mod helpers;

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use axum_test::multipart::{MultipartForm, Part};
use flate2::read::GzDecoder;
use helpers::setup_test_app;
use http::StatusCode;
use serde_json::Value;
use sluice_api::Authorization;

const ARTIFACTS: &str = "/api/v4/jobs/42/artifacts";
const WRITES_METADATA: &str = "printf 'META'";

fn archive_form() -> MultipartForm {
    MultipartForm::new()
        .add_text("message", "build 42")
        .add_part(
            "file",
            Part::bytes(b"PK\x03\x04 archive bytes".to_vec())
                .file_name("artifacts.zip")
                .mime_type("application/zip"),
        )
}

async fn wait_removed(path: &Path) -> bool {
    for _ in 0..100 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn error_code(response: axum_test::TestResponse) -> (StatusCode, String) {
    let body: Value = response.json();
    (
        response.status_code(),
        body["code"].as_str().unwrap_or_default().to_string(),
    )
}

#[tokio::test]
async fn test_health() {
    let app = setup_test_app("exit 0").await;
    let response = app.server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_artifacts_upload_rewrites_file_and_adds_metadata() {
    let app = setup_test_app(WRITES_METADATA).await;

    let response = app.server.post(ARTIFACTS).multipart(archive_form()).await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(response.header("x-upstream"), "fake");

    let captured = app.upstream.last();
    assert_eq!(captured.path, ARTIFACTS);
    assert_eq!(captured.fields["message"], "build 42");
    assert_eq!(captured.fields["file.name"], "artifacts.zip");
    assert_eq!(captured.fields["file.size"], "18");
    assert_eq!(captured.fields["file.sha256"].len(), 64);
    assert!(captured.fields.contains_key("file.sluice-upload"));
    assert!(!captured.fields.contains_key("file"));
    assert_eq!(
        captured.stored["file.path"],
        b"PK\x03\x04 archive bytes".to_vec()
    );

    assert_eq!(captured.fields["metadata.name"], "metadata.gz");
    assert_eq!(captured.stored["metadata.path"], b"META".to_vec());
    assert!(captured.fields.contains_key("metadata.sluice-upload"));

    let token = captured
        .headers
        .get("sluice-multipart-fields")
        .unwrap()
        .to_str()
        .unwrap();
    let signed = app.signer.verify(token).unwrap();
    assert_eq!(signed.fields["file"], captured.fields["file.path"]);

    let upload_token = app
        .signer
        .verify(&captured.fields["file.sluice-upload"])
        .unwrap();
    assert_eq!(upload_token.fields["size"], "18");

    assert_eq!(app.metrics.outcomes(), vec!["success"]);
    assert_eq!(
        app.preauthorizer.paths.lock().unwrap().as_slice(),
        &[ARTIFACTS.to_string()]
    );
}

#[tokio::test]
async fn test_temp_files_removed_after_request() {
    let app = setup_test_app(WRITES_METADATA).await;

    app.server.post(ARTIFACTS).multipart(archive_form()).await;

    let captured = app.upstream.last();
    assert!(wait_removed(Path::new(&captured.fields["file.path"])).await);
    assert!(wait_removed(Path::new(&captured.fields["metadata.path"])).await);
    assert_eq!(std::fs::read_dir(&app.upload_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_not_an_archive_forwards_without_metadata() {
    let app = setup_test_app("exit 10").await;

    let response = app.server.post(ARTIFACTS).multipart(archive_form()).await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let captured = app.upstream.last();
    assert!(captured.fields.contains_key("file.path"));
    assert!(!captured.fields.keys().any(|k| k.starts_with("metadata.")));
    assert_eq!(app.metrics.outcomes(), vec!["archive_invalid"]);
}

#[tokio::test]
async fn test_limits_exceeded_is_413() {
    let app = setup_test_app("exit 13").await;

    let response = app.server.post(ARTIFACTS).multipart(archive_form()).await;

    let (status, code) = error_code(response);
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(code, "BAD_METADATA");
    assert_eq!(app.upstream.calls(), 0);
    assert_eq!(app.metrics.outcomes(), vec!["limits_reached"]);
}

#[tokio::test]
async fn test_unknown_failure_is_500() {
    let app = setup_test_app("exit 14").await;

    let response = app.server.post(ARTIFACTS).multipart(archive_form()).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.upstream.calls(), 0);
    assert_eq!(app.metrics.outcomes(), vec!["unknown_error"]);
}

#[tokio::test]
async fn test_other_format_skips_program() {
    let app = setup_test_app(WRITES_METADATA).await;

    let response = app
        .server
        .post(ARTIFACTS)
        .add_query_param("artifact_format", "gzip")
        .multipart(archive_form())
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert!(!app.program_ran());
    assert!(!app
        .upstream
        .last()
        .fields
        .keys()
        .any(|k| k.starts_with("metadata.")));
    assert!(app.metrics.outcomes().is_empty());
}

#[tokio::test]
async fn test_second_file_is_rejected() {
    let app = setup_test_app(WRITES_METADATA).await;

    let form = archive_form().add_part(
        "file",
        Part::bytes(b"PK second".to_vec()).file_name("more.zip"),
    );
    let response = app.server.post(ARTIFACTS).multipart(form).await;

    let (status, code) = error_code(response);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "BAD_REQUEST");
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_wrong_field_name_is_rejected() {
    let app = setup_test_app(WRITES_METADATA).await;

    let form = MultipartForm::new().add_part(
        "attachment",
        Part::bytes(b"PK".to_vec()).file_name("a.zip"),
    );
    let response = app.server.post(ARTIFACTS).multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(!app.program_ran());
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_injected_location_field_is_rejected() {
    let app = setup_test_app(WRITES_METADATA).await;

    let form = MultipartForm::new()
        .add_text("file.path", "/etc/passwd")
        .add_part("file", Part::bytes(b"PK".to_vec()).file_name("a.zip"));
    let response = app.server.post(ARTIFACTS).multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(!app.program_ran());
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_metadata_field_before_file_is_rejected() {
    let app = setup_test_app(WRITES_METADATA).await;

    let form = MultipartForm::new()
        .add_text("metadata.size", "999999")
        .add_part("file", Part::bytes(b"PK".to_vec()).file_name("a.zip"));
    let response = app.server.post(ARTIFACTS).multipart(form).await;

    let (status, code) = error_code(response);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "BAD_REQUEST");
    assert!(!app.program_ran());
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_metadata_field_after_file_is_rejected() {
    let app = setup_test_app(WRITES_METADATA).await;

    for name in ["metadata.sha256", "metadata.name", "metadata.upload_duration"] {
        let form = archive_form().add_text(name, "forged");
        let response = app.server.post(ARTIFACTS).multipart(form).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "{}", name);
    }
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_directory_in_filename_is_accepted() {
    let app = setup_test_app(WRITES_METADATA).await;

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"PK".to_vec()).file_name("/home/ci/release-1.0..final.zip"),
    );
    let response = app.server.post(ARTIFACTS).multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let captured = app.upstream.last();
    assert_eq!(captured.fields["file.name"], "/home/ci/release-1.0..final.zip");
    let stored = Path::new(&captured.fields["file.path"]);
    assert_eq!(stored.parent().unwrap(), app.upload_dir.as_path());
    assert!(captured.fields["file.path"].ends_with("-release-1.0..final.zip"));
}

#[tokio::test]
async fn test_max_size_is_enforced() {
    let app = setup_test_app(WRITES_METADATA).await;
    app.authorize(Authorization {
        max_size: Some(4),
        ..Default::default()
    });

    let response = app.server.post(ARTIFACTS).multipart(archive_form()).await;

    let (status, code) = error_code(response);
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(code, "PAYLOAD_TOO_LARGE");
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_rejected_pre_authorization() {
    let app = setup_test_app(WRITES_METADATA).await;
    app.reject(StatusCode::UNAUTHORIZED);

    let response = app.server.post(ARTIFACTS).multipart(archive_form()).await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(!app.program_ran());
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_non_multipart_body_passes_through() {
    let app = setup_test_app(WRITES_METADATA).await;

    let response = app.server.post(ARTIFACTS).text("plain body").await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let captured = app.upstream.last();
    assert_eq!(captured.body.as_ref(), b"plain body");
    assert!(captured.headers.get("sluice-multipart-fields").is_none());
    assert!(!app.program_ran());
}

#[tokio::test]
async fn test_index_transform_compresses_ndjson() {
    let app = setup_test_app(WRITES_METADATA).await;
    app.authorize(Authorization {
        process_index: true,
        ..Default::default()
    });

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"{ \"id\": 1 }\n{\"id\":2}\n".to_vec()).file_name("index.ndjson"),
    );
    let response = app
        .server
        .post(ARTIFACTS)
        .add_query_param("artifact_format", "gzip")
        .multipart(form)
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let stored = &app.upstream.last().stored["file.path"];
    assert_eq!(&stored[..2], &[0x1f, 0x8b]);
    let mut text = String::new();
    GzDecoder::new(&stored[..]).read_to_string(&mut text).unwrap();
    assert_eq!(text, "{\"id\":1}\n{\"id\":2}\n");
}

#[tokio::test]
async fn test_generic_upload_tracks_every_file() {
    let app = setup_test_app(WRITES_METADATA).await;

    let form = MultipartForm::new()
        .add_part("avatar", Part::bytes(b"img".to_vec()).file_name("a.png"))
        .add_part("document", Part::bytes(b"doc".to_vec()).file_name("d.pdf"));
    let response = app.server.post("/uploads/user/avatar").multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let captured = app.upstream.last();
    assert_eq!(captured.stored["avatar.path"], b"img".to_vec());
    assert_eq!(captured.stored["document.path"], b"doc".to_vec());
    assert!(!app.program_ran());
}

#[tokio::test]
async fn test_generic_upload_file_limit() {
    let app = setup_test_app(WRITES_METADATA).await;
    app.authorize(Authorization {
        maximum_files: Some(1),
        ..Default::default()
    });

    let form = MultipartForm::new()
        .add_part("one", Part::bytes(b"1".to_vec()).file_name("1.txt"))
        .add_part("two", Part::bytes(b"2".to_vec()).file_name("2.txt"));
    let response = app.server.post("/uploads/things").multipart(form).await;

    let (status, code) = error_code(response);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, "TOO_MANY_FILES");
    assert_eq!(app.upstream.calls(), 0);
}

#[tokio::test]
async fn test_unmatched_routes_are_proxied() {
    let app = setup_test_app(WRITES_METADATA).await;

    let response = app.server.get("/api/v4/projects?page=2").await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let captured = app.upstream.last();
    assert_eq!(captured.method, http::Method::GET);
    assert_eq!(captured.path, "/api/v4/projects?page=2");
}
