//! Idea and script generation backed by a hosted LLM.
//!
//! Gemini is called through `generateContent`; Groq through its
//! OpenAI-compatible chat completions endpoint. Both return text that should
//! be JSON, possibly wrapped in a markdown fence.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{Error, Result};
use crate::stages::{ContentGenerator, Idea, Script, ScriptDraft};
use crate::utils::truncate_chars;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const WORDS_PER_MINUTE: u32 = 140;

pub struct LlmContentGenerator {
    client: Client,
    settings: LlmConfig,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmContentGenerator {
    pub fn new(settings: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .gzip(true)
            .build()?;
        Ok(Self { client, settings })
    }

    fn provider_name(&self) -> &'static str {
        match self.settings.provider {
            LlmProvider::Gemini => "gemini",
            LlmProvider::Groq => "groq",
        }
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let text = match self.settings.provider {
            LlmProvider::Gemini => self.gemini(prompt)?,
            LlmProvider::Groq => self.groq(prompt)?,
        };
        debug!(provider = self.provider_name(), "LLM reply: {}", truncate_chars(&text, 200));
        if text.trim().is_empty() {
            return Err(Error::generator(format!("{} returned an empty reply", self.provider_name())));
        }
        Ok(text)
    }

    fn gemini(&self, prompt: &str) -> Result<String> {
        let key = self
            .settings
            .gemini_api_key
            .as_deref()
            .ok_or_else(|| Error::config("Gemini provider selected but GEMINI_API_KEY / GOOGLE_API_KEY not set"))?;
        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.settings.gemini_model);
        let resp = self
            .client
            .post(url)
            .query(&[("key", key)])
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }))
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        check_status("gemini", status, &body)?;

        let parsed: GeminiResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default())
    }

    fn groq(&self, prompt: &str) -> Result<String> {
        let key = self
            .settings
            .groq_api_key
            .as_deref()
            .ok_or_else(|| Error::config("Groq provider selected but GROQ_API_KEY is not set"))?;
        let resp = self
            .client
            .post(&self.settings.groq_api_url)
            .bearer_auth(key)
            .json(&json!({
                "model": self.settings.groq_model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": 1,
            }))
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        check_status("groq", status, &body)?;

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

impl ContentGenerator for LlmContentGenerator {
    fn generate_ideas(&self, topic: &str, count: usize, duration_secs: u32) -> Result<Vec<Idea>> {
        info!(provider = self.provider_name(), "Generating {} idea(s) for '{}'", count, topic);
        let reply = self.complete(&idea_prompt(topic, count, duration_secs))?;
        let mut ideas = parse_ideas(&reply)?;
        ideas.truncate(count);
        Ok(ideas)
    }

    fn create_script(&self, idea: &Idea, topic: &str, duration_secs: u32) -> Result<ScriptDraft> {
        let reply = self.complete(&script_prompt(idea, topic, duration_secs))?;
        Ok(parse_script(&reply))
    }
}

/// Maps provider HTTP failures, treating quota exhaustion as a rate limit.
pub fn check_status(provider: &str, status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let lowered = body.to_ascii_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS || lowered.contains("resource_exhausted") || lowered.contains("quota")
    {
        return Err(Error::rate_limited(provider, format!("{status}: {}", truncate_chars(body, 200))));
    }
    Err(Error::generator(format!(
        "{provider} returned {status}: {}",
        truncate_chars(body, 300)
    )))
}

/// Removes a surrounding markdown code fence, with or without a language tag.
pub fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // an info string is a bare word like `json`; anything else is payload
    let rest = match rest.split_once('\n') {
        Some((tag, body)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => body,
        _ => rest,
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub fn parse_ideas(reply: &str) -> Result<Vec<Idea>> {
    let body = strip_fences(reply);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::generator(format!("idea reply is not JSON ({e}): {}", truncate_chars(body, 200))))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("ideas") {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(obj)],
        },
        _ => return Err(Error::generator("idea reply is not a JSON array")),
    };

    let mut ideas = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Idea>(item) {
            Ok(idea) if !idea.title.trim().is_empty() => ideas.push(idea),
            Ok(_) => warn!("Dropping idea without a title"),
            Err(e) => warn!("Dropping malformed idea: {}", e),
        }
    }
    Ok(ideas)
}

/// Structured script when the reply is a JSON object with a `script` key,
/// otherwise the reply text as a legacy script.
pub fn parse_script(reply: &str) -> ScriptDraft {
    let body = strip_fences(reply);
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) else {
        return ScriptDraft::Legacy(body.to_string());
    };
    let Some(text) = obj.get("script").and_then(Value::as_str).map(str::to_string) else {
        return ScriptDraft::Legacy(body.to_string());
    };

    match serde_json::from_value::<Script>(Value::Object(obj.clone())) {
        Ok(script) => ScriptDraft::Structured(script),
        Err(e) => {
            warn!("Script cues unusable ({}); deriving timing from the narration", e);
            let keywords = obj
                .get("keywords")
                .cloned()
                .and_then(|k| serde_json::from_value::<KeywordsOnly>(json!({ "keywords": k })).ok())
                .map(|k| k.keywords)
                .unwrap_or_default();
            ScriptDraft::Structured(Script {
                text,
                duration_seconds: 0,
                visual_cues: Vec::new(),
                keywords,
            })
        }
    }
}

#[derive(Deserialize)]
struct KeywordsOnly {
    #[serde(deserialize_with = "crate::stages::keywords")]
    keywords: Vec<String>,
}

fn idea_prompt(topic: &str, count: usize, duration_secs: u32) -> String {
    let duration = duration_secs.max(30);
    format!(
        r#"Act as a YouTube Shorts strategist. Propose {count} short-form video ideas about "{topic}".
Every idea must fit a {duration}-second vertical video, open with a hook that lands in the first two
seconds, deliver one concrete, useful insight and close with a clear call to action.

Reply with a JSON array of exactly {count} objects and nothing else. Keys:
"title" (at most 50 characters), "hook" (at most 100 characters), "body" (at most 300 characters),
"cta" (at most 100 characters), "description" (one sentence), "keywords" (array of strings)."#
    )
}

fn script_prompt(idea: &Idea, topic: &str, duration_secs: u32) -> String {
    let words = duration_secs.max(30) * WORDS_PER_MINUTE / 60;
    format!(
        r#"Write the narration for a {duration_secs}-second YouTube Short about {topic}.
Idea title: {title}
Hook: {hook}
Insight: {body}
Call to action: {cta}

Structure: a one-sentence hook, three to five short sentences with the insight, then a one or
two sentence payoff. Insert the token [PAUSE] after the hook and between beats. Aim for about
{words} words.

Reply with a single JSON object and nothing else:
{{"script": "...", "duration_seconds": {duration_secs},
  "visual_cues": [{{"time_seconds": 0, "duration_seconds": 3, "content": "on-screen text"}}],
  "keywords": ["..."]}}"#,
        title = idea.title,
        hook = idea.hook,
        body = idea.body,
        cta = idea.cta,
    )
}
