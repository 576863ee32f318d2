use std::io;
use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use profilematch_logging::{pm_info, pm_warn};

use crate::{ApiSettings, ExpiringCache};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("failed to read {path:?}: {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Initial scores returned once both documents are stored server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub analysis_id: u64,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub resume_skills: Vec<String>,
    #[serde(default)]
    pub job_skills: Vec<String>,
    #[serde(default)]
    pub missing_skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub question: String,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterviewKit {
    #[serde(default)]
    pub technical_questions: Vec<InterviewQuestion>,
    #[serde(default)]
    pub behavioral_questions: Vec<InterviewQuestion>,
    #[serde(default)]
    pub situational_questions: Vec<InterviewQuestion>,
}

impl InterviewKit {
    pub fn len(&self) -> usize {
        self.technical_questions.len()
            + self.behavioral_questions.len()
            + self.situational_questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

/// Thin client over the backend's JSON endpoints under `/api/`.
#[derive(Debug, Clone)]
pub struct AnalysisApi {
    client: reqwest::Client,
    base: Url,
}

impl AnalysisApi {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let mut base = Url::parse(&settings.server_url)
            .map_err(|err| ApiError::InvalidUrl(err.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                base.scheme()
            )));
        }
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::InvalidUrl(err.to_string()))
    }

    /// Upload a résumé and a job description; returns the analysis id.
    pub async fn upload(
        &self,
        resume: &Path,
        job_description: &Path,
    ) -> Result<UploadResponse, ApiError> {
        let form = Form::new()
            .part("resume", document_part(resume).await?)
            .part("jd", document_part(job_description).await?);
        pm_info!("Uploading documents resume={:?} jd={:?}", resume, job_description);
        let response = self
            .client
            .post(self.endpoint("api/upload/")?)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode(response).await
    }

    /// Run the full analysis for an uploaded pair of documents.
    pub async fn analyze(&self, analysis_id: u64) -> Result<Value, ApiError> {
        pm_info!("Requesting analysis analysis_id={}", analysis_id);
        let response = self
            .client
            .post(self.endpoint("api/analyze/")?)
            .json(&json!({ "analysis_id": analysis_id }))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode(response).await
    }

    /// [`Self::analyze`] behind `cache`, keyed `analysis_{id}`.
    pub async fn analyze_cached(
        &self,
        cache: &ExpiringCache,
        analysis_id: u64,
    ) -> Result<Value, ApiError> {
        let key = format!("analysis_{analysis_id}");
        cache
            .get_or_fetch(&key, cache.default_ttl(), || self.analyze(analysis_id))
            .await
    }

    pub async fn interview_kit(&self, skills: &[String]) -> Result<InterviewKit, ApiError> {
        let response = self
            .client
            .post(self.endpoint("api/interview-kit/")?)
            .json(&json!({ "skills": skills }))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode(response).await
    }

    /// True when the backend reports itself healthy.
    pub async fn health(&self) -> Result<bool, ApiError> {
        let response = self
            .client
            .get(self.endpoint("api/health/")?)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let body: HealthBody = decode(response).await?;
        Ok(body.status == "healthy")
    }
}

async fn document_part(path: &Path) -> Result<Part, ApiError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ApiError::ReadDocument {
            path: path.to_path_buf(),
            source,
        })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        pm_warn!("Backend request failed status={} message={}", status, message);
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ApiError::Decode(err.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout;
    }
    ApiError::Network(err.to_string())
}
