//! Transcription tool backed by the AssemblyAI REST API

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{parse_args, Emitter, Tool, ToolContext, ToolResult};
use crate::agent::callbacks::ProgressMessage;
use crate::error::Error;
use crate::Result;

const ASSEMBLYAI_API_URL: &str = "https://api.assemblyai.com/v2";
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const FORMATS: &[&str] = &["txt", "json", "srt", "vtt"];
const SPEECH_MODELS: &[&str] = &["universal", "slam-1"];

/// Transcribe an audio file in the session directory
pub struct TranscribeTool {
    api_key: String,
    base_url: String,
    client: Client,
    poll_interval: Duration,
}

impl TranscribeTool {
    /// An empty key falls back to `ASSEMBLY_AI_KEY` at call time.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: ASSEMBLYAI_API_URL.to_string(),
            client: Client::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var("ASSEMBLY_AI_KEY").ok().filter(|k| !k.is_empty())
    }

    async fn upload(&self, key: &str, path: &Path) -> Result<String> {
        #[derive(Deserialize)]
        struct Upload {
            upload_url: String,
        }

        let bytes = tokio::fs::read(path).await?;
        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .header("authorization", key)
            .body(bytes)
            .send()
            .await?;
        let upload: Upload = check(response).await?.json().await?;
        Ok(upload.upload_url)
    }

    async fn submit(&self, key: &str, request: &Value) -> Result<Transcript> {
        let response = self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", key)
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn fetch(&self, key: &str, id: &str) -> Result<Transcript> {
        let response = self
            .client
            .get(format!("{}/transcript/{}", self.base_url, id))
            .header("authorization", key)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn subtitles(&self, key: &str, id: &str, kind: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/transcript/{}/{}", self.base_url, id, kind))
            .header("authorization", key)
            .send()
            .await?;
        Ok(check(response).await?.text().await?)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Tool(format!("AssemblyAI returned {status}: {body}")))
}

#[derive(Deserialize)]
struct TranscribeArgs {
    audio_file: String,
    output_file: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    speaker_labels: bool,
    #[serde(default)]
    speakers_expected: Option<u32>,
    #[serde(default)]
    sentiment_analysis: bool,
    #[serde(default)]
    entity_detection: bool,
    #[serde(default)]
    auto_highlights: bool,
    #[serde(default)]
    iab_categories: bool,
    #[serde(default = "default_speech_model")]
    speech_model: String,
    #[serde(default)]
    audio_start_from: Option<u64>,
    #[serde(default)]
    audio_end_at: Option<u64>,
}

fn default_speech_model() -> String {
    "universal".to_string()
}

impl TranscribeArgs {
    fn request(&self, audio_url: &str) -> Value {
        let mut body = json!({
            "audio_url": audio_url,
            "speech_model": self.speech_model,
            "speaker_labels": self.speaker_labels,
            "sentiment_analysis": self.sentiment_analysis,
            "entity_detection": self.entity_detection,
            "auto_highlights": self.auto_highlights,
            "iab_categories": self.iab_categories,
        });
        match &self.language {
            Some(lang) => body["language_code"] = json!(lang),
            None => body["language_detection"] = json!(true),
        }
        if let Some(n) = self.speakers_expected {
            body["speakers_expected"] = json!(n);
        }
        if let Some(ms) = self.audio_start_from {
            body["audio_start_from"] = json!(ms);
        }
        if let Some(ms) = self.audio_end_at {
            body["audio_end_at"] = json!(ms);
        }
        body
    }
}

#[derive(Debug, Default, Deserialize)]
struct Transcript {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    /// Seconds
    #[serde(default)]
    audio_duration: Option<f64>,
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
    #[serde(default)]
    sentiment_analysis_results: Option<Vec<Value>>,
    #[serde(default)]
    entities: Option<Vec<Value>>,
    #[serde(default)]
    auto_highlights_result: Option<Value>,
    #[serde(default)]
    iab_categories_result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    speaker: String,
    text: String,
    start: u64,
    end: u64,
}

/// Output format from the file extension, `txt` when unrecognized.
fn format_from_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if FORMATS.contains(&ext.as_str()) {
        ext
    } else {
        "txt".to_string()
    }
}

fn render_txt(transcript: &Transcript, speaker_labels: bool) -> String {
    match transcript.utterances.as_deref() {
        Some(utterances) if speaker_labels && !utterances.is_empty() => utterances
            .iter()
            .map(|u| format!("Speaker {}: {}", u.speaker, u.text))
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => transcript.text.clone().unwrap_or_default(),
    }
}

fn render_json(transcript: &Transcript, args: &TranscribeArgs) -> Result<String> {
    let mut data = Map::new();
    data.insert("id".into(), json!(transcript.id));
    data.insert("text".into(), json!(transcript.text));
    data.insert("audio_duration".into(), json!(transcript.audio_duration));
    if let Some(lang) = &transcript.language_code {
        data.insert("language".into(), json!(lang));
    }

    if args.speaker_labels {
        if let Some(utterances) = transcript.utterances.as_deref().filter(|u| !u.is_empty()) {
            let speakers: Vec<Value> = utterances
                .iter()
                .map(|u| json!({"speaker": u.speaker, "text": u.text, "start": u.start, "end": u.end}))
                .collect();
            data.insert("speakers".into(), Value::Array(speakers));
        }
    }
    if args.sentiment_analysis {
        if let Some(results) = &transcript.sentiment_analysis_results {
            let sentiment: Vec<Value> = results
                .iter()
                .map(|s| {
                    json!({
                        "text": s["text"], "sentiment": s["sentiment"],
                        "confidence": s["confidence"], "start": s["start"], "end": s["end"]
                    })
                })
                .collect();
            data.insert("sentiment".into(), Value::Array(sentiment));
        }
    }
    if args.entity_detection {
        if let Some(entities) = &transcript.entities {
            let entities: Vec<Value> = entities
                .iter()
                .map(|e| json!({"text": e["text"], "type": e["entity_type"], "start": e["start"], "end": e["end"]}))
                .collect();
            data.insert("entities".into(), Value::Array(entities));
        }
    }
    if args.auto_highlights {
        if let Some(results) = transcript
            .auto_highlights_result
            .as_ref()
            .and_then(|h| h.get("results"))
        {
            data.insert("highlights".into(), results.clone());
        }
    }
    if args.iab_categories {
        if let Some(summary) = transcript
            .iab_categories_result
            .as_ref()
            .and_then(|c| c.get("summary"))
        {
            data.insert("topics".into(), summary.clone());
        }
    }

    Ok(serde_json::to_string_pretty(&Value::Object(data))?)
}

#[async_trait]
impl Tool for TranscribeTool {
    fn name(&self) -> &str {
        "transcribe"
    }

    fn description(&self) -> &str {
        "Transcribe an audio file with AssemblyAI, optionally with speaker labels, sentiment, \
         entities, key phrases and topics.\n\
         Output format is txt, json, srt or vtt and must match the output file extension."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "audio_file": {"type": "string", "description": "Input audio file (mp3, wav, m4a, ...)"},
                "output_file": {"type": "string", "description": "Output file"},
                "format": {"type": "string", "enum": FORMATS, "description": "Defaults to the output file extension"},
                "language": {"type": "string", "description": "ISO-639-1 code; omit to auto-detect"},
                "speaker_labels": {"type": "boolean", "description": "Identify different speakers"},
                "speakers_expected": {"type": "integer", "description": "Expected number of speakers"},
                "sentiment_analysis": {"type": "boolean"},
                "entity_detection": {"type": "boolean"},
                "auto_highlights": {"type": "boolean", "description": "Extract key phrases"},
                "iab_categories": {"type": "boolean", "description": "Classify topics (IAB taxonomy)"},
                "speech_model": {"type": "string", "enum": SPEECH_MODELS, "description": "Default: universal"},
                "audio_start_from": {"type": "integer", "description": "Start offset in milliseconds"},
                "audio_end_at": {"type": "integer", "description": "End offset in milliseconds"}
            },
            "required": ["audio_file", "output_file"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: TranscribeArgs = parse_args(self.name(), args)?;
        let audio_path = ctx.resolve(&args.audio_file)?;
        let output_path = ctx.resolve(&args.output_file)?;

        if !audio_path.exists() {
            out.error(format!("Audio file not found: {}", args.audio_file));
            return Ok(());
        }
        if !audio_path.is_file() {
            out.error(format!("Audio path is not a file: {}", args.audio_file));
            return Ok(());
        }

        let detected = format_from_extension(&output_path);
        let format = match &args.format {
            None => detected,
            Some(requested) => {
                let requested = requested.to_lowercase();
                if !FORMATS.contains(&requested.as_str()) {
                    out.error(format!("Invalid format '{requested}'. Must be: txt, json, srt, or vtt"));
                    return Ok(());
                }
                if requested != detected {
                    out.error(format!(
                        "Format mismatch: specified '{requested}' but filename suggests '{detected}'"
                    ));
                    return Ok(());
                }
                requested
            }
        };

        if !SPEECH_MODELS.contains(&args.speech_model.as_str()) {
            out.error(format!(
                "Invalid speech_model '{}'. Must be 'universal' or 'slam-1'",
                args.speech_model
            ));
            return Ok(());
        }

        let Some(key) = self.api_key() else {
            out.error("ASSEMBLY_AI_KEY environment variable not set. Configure it in .env file.");
            return Ok(());
        };

        let started = Instant::now();
        out.progress(
            ProgressMessage::new(format!("Uploading audio file: {}", args.audio_file)).with_ratio(0.1),
        );
        let audio_url = self.upload(&key, &audio_path).await?;

        out.progress(ProgressMessage::new("Submitting transcription job").with_ratio(0.2));
        let mut transcript = self.submit(&key, &args.request(&audio_url)).await?;
        debug!("Submitted transcript {}", transcript.id);

        let mut last_status = String::new();
        while transcript.status != "completed" && transcript.status != "error" {
            if transcript.status != last_status {
                let minutes = started.elapsed().as_secs_f64() / 60.0;
                out.progress(ProgressMessage::new(format!(
                    "Status: {} ({minutes:.1}m elapsed)",
                    transcript.status
                )));
                last_status = transcript.status.clone();
            }
            tokio::time::sleep(self.poll_interval).await;
            transcript = self.fetch(&key, &transcript.id).await?;
        }

        if transcript.status == "error" {
            out.error(format!(
                "Transcription failed: {}",
                transcript.error.as_deref().unwrap_or("unknown error")
            ));
            return Ok(());
        }

        out.progress(ProgressMessage::new("Formatting output").with_ratio(0.9));
        let content = match format.as_str() {
            "srt" | "vtt" => self.subtitles(&key, &transcript.id, &format).await?,
            "json" => render_json(&transcript, &args)?,
            _ => render_txt(&transcript, args.speaker_labels),
        };
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&output_path, content).await?;

        out.success(format!(
            "Transcribed {} ({:.1}s) -> {} in {:.1}s",
            args.audio_file,
            transcript.audio_duration.unwrap_or(0.0),
            args.output_file,
            started.elapsed().as_secs_f64()
        ));
        Ok(())
    }
}
