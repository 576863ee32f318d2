use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;

use profilematch_engine::{
    AnalysisApi, ConnectionState, ExpiringCache, FileStorage, InterviewKit, Notice,
    ProgressChannel,
};
use profilematch_logging::{pm_info, pm_warn};

use crate::cli::{CacheAction, Command};
use crate::config::AppConfig;

pub const LAST_ANALYSIS_KEY: &str = "lastAnalysis";
pub const MISSING_SKILLS_KEY: &str = "missingSkills";
pub const RESUME_SKILLS_KEY: &str = "resumeSkills";

pub async fn run(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Analyze {
            resume,
            jd,
            no_progress,
        } => analyze(config, &resume, &jd, no_progress).await,
        Command::Watch { job_id } => watch(config, &job_id).await,
        Command::InterviewKit { skills } => interview_kit(config, skills).await,
        Command::Health => health(config).await,
        Command::Cache { action } => cache(config, action),
    }
}

fn open_cache(config: &AppConfig) -> Result<ExpiringCache> {
    let storage = FileStorage::open(&config.cache.dir)
        .with_context(|| format!("cannot use cache dir {}", config.cache.dir.display()))?;
    Ok(ExpiringCache::new(Arc::new(storage), config.cache_settings()))
}

fn api(config: &AppConfig) -> Result<AnalysisApi> {
    AnalysisApi::new(&config.api_settings()).context("invalid server settings")
}

/// Open a progress channel whose notices arrive on the returned receiver.
fn progress_channel(
    config: &AppConfig,
    job_id: &str,
) -> Result<(ProgressChannel, mpsc::UnboundedReceiver<Notice>)> {
    let channel =
        ProgressChannel::websocket(&config.channel_settings()).context("invalid server url")?;
    let (tx, rx) = mpsc::unbounded_channel();
    channel.subscribe(move |notice: &Notice| {
        let _ = tx.send(notice.clone());
    });
    channel.open(job_id);
    Ok((channel, rx))
}

async fn analyze(config: &AppConfig, resume: &Path, jd: &Path, no_progress: bool) -> Result<()> {
    let api = api(config)?;
    let cache = open_cache(config)?;

    let upload = api.upload(resume, jd).await.context("upload failed")?;
    println!("Uploaded documents, analysis id {}", upload.analysis_id);
    cache.set(MISSING_SKILLS_KEY, &upload.missing_skills);
    cache.set(RESUME_SKILLS_KEY, &upload.resume_skills);

    let progress = if no_progress {
        None
    } else {
        let (channel, mut rx) = progress_channel(config, &upload.analysis_id.to_string())?;
        let printer = tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                if let Some(line) = render_notice(&notice) {
                    println!("{line}");
                }
            }
        });
        Some((channel, printer))
    };

    let outcome = api.analyze_cached(&cache, upload.analysis_id).await;

    if let Some((channel, printer)) = progress {
        channel.close();
        drop(channel);
        // The listener held the only sender, so the printer ends once it is detached.
        let _ = printer.await;
    }

    let result = outcome.context("analysis failed")?;
    cache.set(LAST_ANALYSIS_KEY, &result);
    print_summary(&result, upload.overall_score);
    Ok(())
}

async fn watch(config: &AppConfig, job_id: &str) -> Result<()> {
    let (channel, mut rx) = progress_channel(config, job_id)?;
    let cache = open_cache(config)?;

    loop {
        tokio::select! {
            notice = rx.recv() => {
                let Some(notice) = notice else { break };
                if let Some(line) = render_notice(&notice) {
                    println!("{line}");
                }
                match notice {
                    Notice::Completed { result, .. } => {
                        cache.set(LAST_ANALYSIS_KEY, &result);
                        break;
                    }
                    Notice::RetriesExhausted { .. } => {
                        channel.close();
                        bail!("progress stream for job {job_id} was lost");
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                pm_info!("Interrupted while watching job {}", job_id);
                break;
            }
        }
    }
    channel.close();
    Ok(())
}

async fn interview_kit(config: &AppConfig, skills: Vec<String>) -> Result<()> {
    let skills = if skills.is_empty() {
        let cache = open_cache(config)?;
        cache
            .get::<Vec<String>>(MISSING_SKILLS_KEY)
            .unwrap_or_default()
    } else {
        skills
    };
    if skills.is_empty() {
        bail!("no skills given and no missing skills cached; run `profilematch analyze` first");
    }

    let kit = api(config)?
        .interview_kit(&skills)
        .await
        .context("interview kit request failed")?;
    print!("{}", render_kit(&kit));
    Ok(())
}

async fn health(config: &AppConfig) -> Result<()> {
    if api(config)?.health().await.context("health check failed")? {
        println!("{} is healthy", config.server_url);
        Ok(())
    } else {
        bail!("{} reports an unhealthy status", config.server_url)
    }
}

fn cache(config: &AppConfig, action: CacheAction) -> Result<()> {
    let cache = open_cache(config)?;
    match action {
        CacheAction::List => {
            for key in cache.keys() {
                println!("{key}");
            }
        }
        CacheAction::Show { key } => match cache.get::<Value>(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("no fresh entry for {key:?}"),
        },
        CacheAction::Remove { key } => cache.remove(&key),
        CacheAction::Clear => {
            cache.clear();
            pm_info!("Cleared cache namespace {}", cache.namespace());
        }
    }
    Ok(())
}

fn print_summary(result: &Value, upload_score: Option<f64>) {
    let score = result
        .get("overall_score")
        .and_then(Value::as_f64)
        .or(upload_score);
    match score {
        Some(score) => println!("Overall match: {score:.0}%"),
        None => pm_warn!("Analysis result carries no overall_score"),
    }
    println!("Matched skills: {}", matched_skills(result).join(", "));
    println!("Missing skills: {}", skill_list(result, "missing_skills").join(", "));
}

fn skill_list<'a>(result: &'a Value, field: &str) -> Vec<&'a str> {
    result
        .get(field)
        .and_then(Value::as_array)
        .map(|skills| skills.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Résumé skills the job asks for, compared case-insensitively.
fn matched_skills(result: &Value) -> Vec<&str> {
    let wanted: Vec<String> = skill_list(result, "job_skills")
        .into_iter()
        .map(str::to_lowercase)
        .collect();
    skill_list(result, "resume_skills")
        .into_iter()
        .filter(|skill| wanted.contains(&skill.to_lowercase()))
        .collect()
}

/// One terminal line per notice worth showing; `None` for the rest.
pub fn render_notice(notice: &Notice) -> Option<String> {
    match notice {
        Notice::Connection(ConnectionState::Connected) => Some("connected".to_string()),
        Notice::Connection(ConnectionState::Disconnected) => Some("disconnected".to_string()),
        Notice::Connection(ConnectionState::Connecting) => None,
        Notice::Progress {
            stage,
            progress,
            message,
        } => {
            let stage = stage.as_ref().map(|s| s.label()).unwrap_or("Working");
            Some(format!("[{progress:>3}%] {stage}: {message}"))
        }
        Notice::Completed { message, .. } => Some(format!("[100%] {message}")),
        Notice::Error { message } => Some(format!("error: {message}")),
        Notice::RetriesExhausted { attempts } => {
            Some(format!("gave up reconnecting after {attempts} attempts"))
        }
    }
}

fn render_kit(kit: &InterviewKit) -> String {
    let mut out = String::new();
    for (title, questions) in [
        ("Technical", &kit.technical_questions),
        ("Behavioral", &kit.behavioral_questions),
        ("Situational", &kit.situational_questions),
    ] {
        if questions.is_empty() {
            continue;
        }
        out.push_str(&format!("{title} questions\n"));
        for (n, q) in questions.iter().enumerate() {
            match &q.skill {
                Some(skill) => out.push_str(&format!("  {}. [{skill}] {}\n", n + 1, q.question)),
                None => out.push_str(&format!("  {}. {}\n", n + 1, q.question)),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use profilematch_engine::{InterviewQuestion, Stage};
    use serde_json::json;

    #[test]
    fn progress_lines_show_stage_label_and_percent() {
        let line = render_notice(&Notice::Progress {
            stage: Some(Stage::Skills),
            progress: 45,
            message: "Matching skills".into(),
        });
        assert_eq!(line.as_deref(), Some("[ 45%] Skill Detection: Matching skills"));

        let line = render_notice(&Notice::Progress {
            stage: None,
            progress: 5,
            message: "Starting".into(),
        });
        assert_eq!(line.as_deref(), Some("[  5%] Working: Starting"));
    }

    #[test]
    fn connecting_is_silent() {
        assert_eq!(
            render_notice(&Notice::Connection(ConnectionState::Connecting)),
            None
        );
        assert!(render_notice(&Notice::Connection(ConnectionState::Connected)).is_some());
    }

    #[test]
    fn terminal_notices_are_rendered() {
        let done = Notice::Completed {
            message: "Analysis complete".into(),
            result: json!({}),
        };
        assert_eq!(render_notice(&done).as_deref(), Some("[100%] Analysis complete"));
        let gave_up = Notice::RetriesExhausted { attempts: 5 };
        assert_eq!(
            render_notice(&gave_up).as_deref(),
            Some("gave up reconnecting after 5 attempts")
        );
    }

    #[test]
    fn matched_skills_intersect_resume_and_job() {
        let result = json!({
            "resume_skills": ["Python", "Django", "SQL"],
            "job_skills": ["python", "sql", "Kubernetes"],
            "missing_skills": ["Kubernetes"],
        });
        assert_eq!(matched_skills(&result), vec!["Python", "SQL"]);
        assert_eq!(skill_list(&result, "missing_skills"), vec!["Kubernetes"]);
        assert!(matched_skills(&json!({})).is_empty());
    }

    #[test]
    fn kit_skips_empty_sections() {
        let kit = InterviewKit {
            technical_questions: vec![InterviewQuestion {
                question: "Explain ownership.".into(),
                skill: Some("rust".into()),
                difficulty: None,
                answers: Vec::new(),
            }],
            ..InterviewKit::default()
        };
        assert_eq!(
            render_kit(&kit),
            "Technical questions\n  1. [rust] Explain ownership.\n"
        );
    }
}
