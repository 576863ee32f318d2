use std::fs;
use std::time::Duration;

use pretty_assertions::assert_eq;
use profilematch_engine::{AnalysisApi, ApiError, ApiSettings, ExpiringCache, UploadResponse};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> AnalysisApi {
    profilematch_logging::initialize_for_tests();
    AnalysisApi::new(&ApiSettings {
        server_url: server.uri(),
        ..ApiSettings::default()
    })
    .expect("valid settings")
}

#[tokio::test]
async fn upload_sends_both_documents_as_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload/"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "analysis_id": 17,
            "overall_score": 71.5,
            "resume_skills": ["python", "sql"],
            "job_skills": ["python", "docker"],
            "missing_skills": ["docker"],
            "resume_keyword_freq": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let resume = temp.path().join("resume.txt");
    let jd = temp.path().join("jd.txt");
    fs::write(&resume, "Python developer").unwrap();
    fs::write(&jd, "Looking for Python and Docker").unwrap();

    let upload = api_for(&server).upload(&resume, &jd).await.expect("upload ok");
    assert_eq!(
        upload,
        UploadResponse {
            analysis_id: 17,
            overall_score: Some(71.5),
            resume_skills: vec!["python".into(), "sql".into()],
            job_skills: vec!["python".into(), "docker".into()],
            missing_skills: vec!["docker".into()],
        }
    );
}

#[tokio::test]
async fn upload_reports_unreadable_documents() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.pdf");

    let err = api_for(&server)
        .upload(&missing, &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ReadDocument { ref path, .. } if path == &missing));
}

#[tokio::test]
async fn analyze_surfaces_server_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/"))
        .and(body_json(json!({"analysis_id": 99})))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Analysis not found"})))
        .mount(&server)
        .await;

    let err = api_for(&server).analyze(99).await.unwrap_err();
    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Analysis not found");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn cached_analysis_hits_backend_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "analysis_id": 5,
            "overall_score": 82,
            "suggestions": ["Add Docker experience"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let cache = ExpiringCache::in_memory();
    let first = api.analyze_cached(&cache, 5).await.unwrap();
    let second = api.analyze_cached(&cache, 5).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first["overall_score"], json!(82));
    assert!(cache.has("analysis_5"));
}

#[tokio::test]
async fn interview_kit_decodes_question_sets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/interview-kit/"))
        .and(body_json(json!({"skills": ["docker"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "technical_questions": [
                {"question": "What is a Docker image?", "skill": "docker", "difficulty": "Easy", "answers": ["A template"]}
            ],
            "behavioral_questions": [
                {"question": "Tell me about a time you learned docker quickly.", "skill": "docker"}
            ],
            "situational_questions": []
        })))
        .mount(&server)
        .await;

    let kit = api_for(&server)
        .interview_kit(&["docker".to_string()])
        .await
        .unwrap();
    assert_eq!(kit.len(), 2);
    assert_eq!(kit.technical_questions[0].difficulty.as_deref(), Some("Easy"));
    assert_eq!(kit.behavioral_questions[0].answers, Vec::<String>::new());
}

#[tokio::test]
async fn health_reads_status_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "healthy",
            "message": "ProFileMatch backend is running successfully"
        })))
        .mount(&server)
        .await;

    assert!(api_for(&server).health().await.unwrap());
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_json(json!({"status": "healthy"})),
        )
        .mount(&server)
        .await;

    let api = AnalysisApi::new(&ApiSettings {
        server_url: server.uri(),
        request_timeout: Duration::from_millis(50),
        ..ApiSettings::default()
    })
    .unwrap();
    assert!(matches!(api.health().await, Err(ApiError::Timeout)));
}

#[test]
fn rejects_non_http_server_urls() {
    let err = AnalysisApi::new(&ApiSettings {
        server_url: "ws://localhost:8000".to_string(),
        ..ApiSettings::default()
    })
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidUrl(_)));
}
