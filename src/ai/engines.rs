//! LLM engines
//!
//! Adapters over the `(system_prompt, user_prompt) -> text` chat
//! primitive: a deterministic stub, a local Ollama chat endpoint, and an
//! OpenAI-compatible hosted endpoint. Responses are reduced to the first
//! top-level JSON object with a lenient three-pass extractor.

use async_trait::async_trait;
use serde_json::{Value, json};

/// Engine kinds recognized by the settings surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Stub,
    Ollama,
    OpenAi,
}

impl EngineKind {
    pub fn parse(name: &str) -> EngineKind {
        match name.to_ascii_lowercase().as_str() {
            "ollama" => EngineKind::Ollama,
            "openai" => EngineKind::OpenAi,
            _ => EngineKind::Stub,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Stub => "stub",
            EngineKind::Ollama => "ollama",
            EngineKind::OpenAi => "openai",
        }
    }
}

/// A successful engine call: the extracted JSON plus provider metadata
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub value: Value,
    pub provider_meta: Option<Value>,
}

/// A failed engine call; metadata survives for the errored run record
#[derive(Debug, Clone)]
pub struct EngineFailure {
    pub error: String,
    pub provider_meta: Option<Value>,
}

/// Result of an engine connectivity probe
#[derive(Debug, Clone)]
pub struct EngineHealth {
    pub ok: bool,
    pub detail: String,
}

/// A pluggable fleet/ship decision engine
#[async_trait]
pub trait LlmEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn model(&self) -> &str;

    /// Produce a FleetIntent document from the bounded fleet summary
    async fn propose_fleet_intent(&self, summary: &Value) -> Result<EngineResponse, EngineFailure>;

    /// Produce a ToolCall document from the bounded ship summary.
    /// `behavior` carries mission-specific orders for this ship, if any.
    async fn propose_ship_tool(
        &self,
        summary: &Value,
        behavior: Option<&str>,
    ) -> Result<EngineResponse, EngineFailure>;

    /// Lightweight connectivity test
    async fn health(&self) -> EngineHealth;
}

// ==================== JSON extraction ====================

/// Extract the first top-level JSON object from LLM output.
///
/// Three passes, stopping at the first valid parse: a fenced code
/// block, the first balanced `{...}` span, then the whole text with
/// fence residue trimmed. Returns `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    // Pass 1: fenced block
    if let Some(open) = text.find("```") {
        let after = &text[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(close) = after[body_start..].find("```") {
            let candidate = after[body_start..body_start + close].trim();
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    // Pass 2: first balanced { ... } span
    let bytes = text.as_bytes();
    let mut start = text.find('{');
    while let Some(s) = start {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(s) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(value) = serde_json::from_str::<Value>(&text[s..=i]) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        start = text[s + 1..].find('{').map(|n| s + 1 + n);
    }

    // Pass 3: trimmed fence residue
    let mut cleaned = text.trim();
    cleaned = cleaned
        .strip_prefix("```json")
        .or_else(|| cleaned.strip_prefix("```"))
        .unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    serde_json::from_str::<Value>(cleaned.trim()).ok()
}

// ==================== Prompts ====================

/// Mission-agnostic prompts shared by the HTTP engines
pub mod prompts {
    use serde_json::Value;

    pub fn fleet_system_prompt() -> String {
        concat!(
            "You are the RED Fleet Commander. Define mid-level FleetIntent that encodes ",
            "strategy and objectives; do not micromanage tactics. Use only the provided ",
            "summaries; never assume ground-truth enemy positions. Coordinates: X east (m), ",
            "Y north (m). Output ONLY one JSON object (no markdown):\n",
            "{\n",
            "  \"objectives\": {\"<ship_id>\": {\"destination\": [x, y], \"speed_kn\": 12, \"goal\": \"one sentence\"}},\n",
            "  \"emcon\": {\"active_ping_allowed\": false, \"radio_discipline\": \"restricted\"},\n",
            "  \"summary\": \"One short sentence describing the fleet plan\",\n",
            "  \"notes\": [{\"ship_id\": \"<id>\" | null, \"text\": \"<advisory>\"}]\n",
            "}"
        )
        .to_string()
    }

    pub fn fleet_user_prompt(summary: &Value) -> String {
        format!(
            "FLEET_SUMMARY_JSON:\n{}\n\nFORMAT REQUIREMENTS:\n\
             - Include EVERY RED ship id under 'objectives' with a 'destination' [x,y] in meters.\n\
             - Each ship MUST include a one-sentence 'goal'; 'speed_kn' only if clearly recommended.\n\
             - If bearings exist, attempt a fused contact estimate (location, course, speed) in 'notes'.\n\
             - Output ONLY the JSON object with the allowed keys. No extra prose.\n\
             - Do not infer unknown enemy truth beyond the provided beliefs.",
            summary
        )
    }

    pub fn ship_system_prompt() -> String {
        concat!(
            "You command a single RED ship as its captain. Make tactical decisions using only ",
            "your Ship Summary and the FleetIntent. Follow the FleetIntent when possible; if ",
            "immediate safety or opportunity requires otherwise, prefix the summary with ",
            "'deviate:'. Coordinates: X east (m), Y north (m). Bearings: 0 = north, 90 = east. ",
            "Output EXACTLY one JSON object with keys {tool, arguments, summary}. No markdown ",
            "or extra keys. Allowed tools: set_nav(heading, speed, depth); ",
            "fire_torpedo(bearing, run_depth, enable_range); ",
            "deploy_countermeasure(type: 'noisemaker'|'decoy'); ",
            "drop_depth_charges(spread_meters, minDepth, maxDepth, spreadSize). ",
            "Use only tools supported by your capabilities."
        )
        .to_string()
    }

    pub fn ship_user_prompt(summary: &Value, behavior: Option<&str>) -> String {
        let orders = match behavior {
            Some(text) if !text.is_empty() => format!(
                "STANDING ORDERS FOR THIS SHIP (follow these first):\n{}\n\n",
                text
            ),
            _ => String::new(),
        };
        format!(
            "{}SHIP_SUMMARY_JSON:\n{}\n\nFORMAT & BEHAVIOR:\n\
             - Prefer the FleetIntent; if deviating, prefix summary with 'deviate:'.\n\
             - Use only allowed tools supported by capabilities; choose plausible parameters.\n\
             - If no change is needed, return set_nav holding current values with a brief summary.\n\
             - The 'summary' MUST be two short sentences explaining intent and reasoning.\n\
             - Output ONLY one JSON with keys {{tool, arguments, summary}}.",
            orders, summary
        )
    }
}

// ==================== Stub ====================

/// Deterministic engine used when no LLM endpoint is configured.
///
/// The fleet stub returns a conservative patrol plan; the ship stub
/// holds course (orchestrator policy records stub ship runs as
/// disabled without applying them).
pub struct StubEngine;

#[async_trait]
impl LlmEngine for StubEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Stub
    }

    fn model(&self) -> &str {
        "stub"
    }

    async fn propose_fleet_intent(&self, summary: &Value) -> Result<EngineResponse, EngineFailure> {
        let target = summary
            .pointer("/mission/target_wp")
            .and_then(Value::as_array)
            .cloned();
        let mut objectives = serde_json::Map::new();
        if let Some(fleet) = summary.get("own_fleet").and_then(Value::as_array) {
            for ship in fleet {
                let Some(id) = ship.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let destination = target
                    .clone()
                    .map(Value::Array)
                    .or_else(|| ship.get("pos").cloned())
                    .unwrap_or_else(|| json!([0.0, 0.0]));
                objectives.insert(
                    id.to_string(),
                    json!({
                        "destination": destination,
                        "goal": "Hold patrol station and report contacts",
                    }),
                );
            }
        }
        Ok(EngineResponse {
            value: json!({
                "objectives": objectives,
                "emcon": {"active_ping_allowed": false, "radio_discipline": "restricted"},
                "summary": "Conservative patrol; maintain EMCON and formation.",
                "notes": [{"ship_id": null, "text": "Hold speed and report all contacts."}],
            }),
            provider_meta: None,
        })
    }

    async fn propose_ship_tool(
        &self,
        summary: &Value,
        _behavior: Option<&str>,
    ) -> Result<EngineResponse, EngineFailure> {
        let heading = summary.pointer("/self/heading").and_then(Value::as_f64).unwrap_or(0.0);
        let speed = summary.pointer("/self/speed").and_then(Value::as_f64).unwrap_or(0.0);
        let depth = summary.pointer("/self/depth").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(EngineResponse {
            value: json!({
                "tool": "set_nav",
                "arguments": {"heading": heading, "speed": speed, "depth": depth},
                "summary": "Hold current course and speed.",
            }),
            provider_meta: None,
        })
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth {
            ok: true,
            detail: "stub".to_string(),
        }
    }
}

// ==================== Ollama ====================

/// Engine backed by a local Ollama chat endpoint
pub struct OllamaEngine {
    model: String,
    host: String,
    client: reqwest::Client,
}

impl OllamaEngine {
    pub fn new(model: String, host: String) -> Self {
        Self {
            model,
            host,
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<(String, Value), EngineFailure> {
        let url = format!("{}/api/chat", self.host);
        let started = std::time::Instant::now();
        let meta_base = json!({"provider": "ollama", "url": url, "model": self.model});
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "stream": false,
            }))
            .send()
            .await
            .map_err(|e| EngineFailure {
                error: format!("ollama request failed: {}", e),
                provider_meta: Some(meta_base.clone()),
            })?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| EngineFailure {
            error: format!("ollama response unreadable: {}", e),
            provider_meta: Some(meta_base.clone()),
        })?;
        let mut meta = meta_base;
        meta["status"] = json!(status.as_u16());
        meta["duration_ms"] = json!(started.elapsed().as_millis() as u64);
        if !status.is_success() {
            return Err(EngineFailure {
                error: format!("ollama returned status {}", status),
                provider_meta: Some(meta),
            });
        }
        let content = body
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(EngineFailure {
                error: "empty response content from ollama".to_string(),
                provider_meta: Some(meta),
            });
        }
        Ok((content, meta))
    }

    fn extract(content: String, meta: Value, what: &str) -> Result<EngineResponse, EngineFailure> {
        match extract_json(&content) {
            Some(value) => Ok(EngineResponse {
                value,
                provider_meta: Some(meta),
            }),
            None => Err(EngineFailure {
                error: format!("failed to extract {} JSON from ollama output", what),
                provider_meta: Some(meta),
            }),
        }
    }
}

#[async_trait]
impl LlmEngine for OllamaEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn propose_fleet_intent(&self, summary: &Value) -> Result<EngineResponse, EngineFailure> {
        let (content, meta) = self
            .chat(&prompts::fleet_system_prompt(), &prompts::fleet_user_prompt(summary))
            .await?;
        Self::extract(content, meta, "FleetIntent")
    }

    async fn propose_ship_tool(
        &self,
        summary: &Value,
        behavior: Option<&str>,
    ) -> Result<EngineResponse, EngineFailure> {
        let (content, meta) = self
            .chat(
                &prompts::ship_system_prompt(),
                &prompts::ship_user_prompt(summary, behavior),
            )
            .await?;
        Self::extract(content, meta, "ToolCall")
    }

    async fn health(&self) -> EngineHealth {
        let url = format!("{}/api/tags", self.host);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => EngineHealth {
                ok: true,
                detail: "connected".to_string(),
            },
            Ok(resp) => EngineHealth {
                ok: false,
                detail: format!("status {}", resp.status()),
            },
            Err(e) => EngineHealth {
                ok: false,
                detail: e.to_string(),
            },
        }
    }
}

// ==================== OpenAI-compatible ====================

/// Engine backed by an OpenAI-compatible chat completions endpoint
pub struct OpenAiEngine {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiEngine {
    pub fn new(model: String, api_key: String, base_url: String) -> Self {
        Self {
            model,
            api_key,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<(String, Value), EngineFailure> {
        let url = format!("{}/chat/completions", self.base_url);
        let started = std::time::Instant::now();
        let meta_base = json!({"provider": "openai", "model": self.model});
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.0,
            }))
            .send()
            .await
            .map_err(|e| EngineFailure {
                error: format!("chat request failed: {}", e),
                provider_meta: Some(meta_base.clone()),
            })?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| EngineFailure {
            error: format!("chat response unreadable: {}", e),
            provider_meta: Some(meta_base.clone()),
        })?;
        let mut meta = meta_base;
        meta["duration_ms"] = json!(started.elapsed().as_millis() as u64);
        meta["id"] = body.get("id").cloned().unwrap_or(Value::Null);
        meta["usage"] = body.get("usage").cloned().unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(EngineFailure {
                error: format!("chat endpoint returned status {}", status),
                provider_meta: Some(meta),
            });
        }
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(EngineFailure {
                error: "empty content from chat completion".to_string(),
                provider_meta: Some(meta),
            });
        }
        Ok((content, meta))
    }

    fn extract(content: String, meta: Value, what: &str) -> Result<EngineResponse, EngineFailure> {
        match extract_json(&content) {
            Some(value) => Ok(EngineResponse {
                value,
                provider_meta: Some(meta),
            }),
            None => Err(EngineFailure {
                error: format!("failed to parse {} JSON from chat response", what),
                provider_meta: Some(meta),
            }),
        }
    }
}

#[async_trait]
impl LlmEngine for OpenAiEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn propose_fleet_intent(&self, summary: &Value) -> Result<EngineResponse, EngineFailure> {
        let (content, meta) = self
            .chat(&prompts::fleet_system_prompt(), &prompts::fleet_user_prompt(summary))
            .await?;
        Self::extract(content, meta, "FleetIntent")
    }

    async fn propose_ship_tool(
        &self,
        summary: &Value,
        behavior: Option<&str>,
    ) -> Result<EngineResponse, EngineFailure> {
        let (content, meta) = self
            .chat(
                &prompts::ship_system_prompt(),
                &prompts::ship_user_prompt(summary, behavior),
            )
            .await?;
        Self::extract(content, meta, "ToolCall")
    }

    async fn health(&self) -> EngineHealth {
        if self.api_key.is_empty() {
            return EngineHealth {
                ok: false,
                detail: "missing API key".to_string(),
            };
        }
        let url = format!("{}/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(resp) if resp.status().is_success() => EngineHealth {
                ok: true,
                detail: "connected".to_string(),
            },
            Ok(resp) => EngineHealth {
                ok: false,
                detail: format!("status {}", resp.status()),
            },
            Err(e) => EngineHealth {
                ok: false,
                detail: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain_object() {
        let value = extract_json(r#"{"tool": "set_nav", "arguments": {}}"#).unwrap();
        assert_eq!(value["tool"], "set_nav");
    }

    #[test]
    fn test_extract_json_fenced_block() {
        let text = "Here is the plan:\n```json\n{\"summary\": \"hold\"}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["summary"], "hold");
    }

    #[test]
    fn test_extract_json_with_prose_preamble() {
        let text = "Sure! The FleetIntent is: {\"objectives\": {}, \"summary\": \"x\"} hope that helps";
        let value = extract_json(text).unwrap();
        assert_eq!(value["summary"], "x");
    }

    #[test]
    fn test_extract_json_nested_braces_and_strings() {
        let text = r#"prefix {"a": {"b": "}tricky{"}, "c": 1} suffix"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["c"], 1);
        assert_eq!(value["a"]["b"], "}tricky{");
    }

    #[test]
    fn test_extract_json_missing_returns_none() {
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("{broken: json").is_none());
    }

    #[tokio::test]
    async fn test_stub_fleet_covers_all_ships() {
        let summary = serde_json::json!({
            "own_fleet": [
                {"id": "red-01", "pos": [100.0, 200.0]},
                {"id": "dd-01", "pos": [300.0, 400.0]},
            ],
            "mission": {"target_wp": [5000.0, 0.0]},
        });
        let resp = StubEngine.propose_fleet_intent(&summary).await.unwrap();
        let objectives = resp.value["objectives"].as_object().unwrap();
        assert!(objectives.contains_key("red-01"));
        assert!(objectives.contains_key("dd-01"));
        assert_eq!(objectives["red-01"]["destination"][0], 5000.0);
    }

    #[tokio::test]
    async fn test_stub_ship_holds_course() {
        let summary = serde_json::json!({
            "self": {"heading": 90.0, "speed": 8.0, "depth": 120.0},
        });
        let resp = StubEngine.propose_ship_tool(&summary, None).await.unwrap();
        assert_eq!(resp.value["tool"], "set_nav");
        assert_eq!(resp.value["arguments"]["heading"], 90.0);
    }
}
