use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::GeminiConfig;
use crate::error::GenerationError;
use crate::generation::{ImageGenerator, Infographic, PlanGenerator};
use crate::models::{GeneratedPlan, PlanRequest, RawPlan, MAX_ACTION_ITEMS, MIN_ACTION_ITEMS};

const DEFAULT_TIMEFRAME: &str = "3 months";

// Replaces long base64 payloads under "data" keys so responses stay readable in logs
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn preview(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        text.to_string()
    } else {
        format!("{}...[{} chars total]", text.chars().take(max).collect::<String>(), count)
    }
}

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self { client: builder.build()?, config })
    }

    pub fn is_demo(&self) -> bool {
        self.config.is_demo()
    }

    async fn perform_api_call(&self, model: &str, body: &Value) -> Result<GeminiResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.config.api_base, model);
        info!("🔗 Making request to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(e, self.config.timeout))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response
            .text()
            .await
            .map_err(|e| GenerationError::from_reqwest(e, self.config.timeout))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", preview(&response_text, 500));
            return Err(GenerationError::Status { status: status.as_u16(), body: response_text });
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let logged = match serde_json::from_str::<Value>(&response_text) {
                Ok(mut value) => {
                    truncate_base64_in_json(&mut value);
                    serde_json::to_string_pretty(&value).unwrap_or_default()
                }
                Err(_) => preview(&response_text, 1000),
            };
            debug!("📥 Raw Gemini API response: {}", logged);
        }

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::Decode(format!("{}: {}", e, preview(&response_text, 200))))?;

        if parsed.candidates.is_empty() {
            if let Some(reason) = parsed.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
                warn!("⚠️ Prompt was blocked: {}", reason);
            }
        }
        Ok(parsed)
    }
}

#[async_trait]
impl PlanGenerator for GeminiClient {
    async fn generate_plan(&self, request: &PlanRequest) -> Result<GeneratedPlan, GenerationError> {
        if self.is_demo() {
            info!("Using demo mode - returning a canned plan");
            return Ok(demo_plan(request));
        }

        info!(
            "🚀 Generating plan for goal: {} (timeframe: {})",
            request.goal,
            request.timeframe.as_deref().unwrap_or("default")
        );

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": build_plan_prompt(request)}]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": plan_response_schema(),
                "temperature": 0.7,
                "topP": 0.95,
                "topK": 40,
                "candidateCount": 1
            }
        });

        let response = self.perform_api_call(&self.config.text_model, &body).await?;
        let text = extract_text(&response).ok_or(GenerationError::NoContent)?;
        let plan = parse_plan_text(&text)?;
        info!(
            "✅ Plan generated for {} with {} action items",
            plan.timeframe_used,
            plan.action_plan.len()
        );
        Ok(plan)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate_image(&self, prompt: &str) -> Infographic {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            warn!("Image generation requested with an empty prompt. Skipping.");
            return Infographic::Empty;
        }

        if self.is_demo() {
            info!("Using demo mode - no real images generated");
            let placeholder = placeholder_data_uri(prompt);
            info!("📦 Generated placeholder image: {}", preview(&placeholder, 50));
            return Infographic::from_url(placeholder);
        }

        info!("🎯 Generating infographic with prompt: {}", preview(prompt, 100));

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "candidateCount": 1
            }
        });

        match self.perform_api_call(&self.config.image_model, &body).await {
            Ok(response) => match extract_first_image(&response) {
                Some(image) => {
                    let url = image.data_uri();
                    info!("✅ Successfully generated image: {}", preview(&url, 50));
                    Infographic::from_url(url)
                }
                None => {
                    error!("❌ Image generation returned no media");
                    Infographic::Empty
                }
            },
            Err(e) => {
                error!("❌ Failed to generate image: {}", e);
                Infographic::Empty
            }
        }
    }
}

pub fn build_plan_prompt(request: &PlanRequest) -> String {
    let timeframe_line = match &request.timeframe {
        Some(timeframe) => format!("User Timeframe: {timeframe}\n"),
        None => String::new(),
    };
    let goal = &request.goal;

    format!(
        "You are a friendly, supportive life coach for people of every background. You will receive:
1. A one-line goal or aspiration.
2. Optionally, the timeframe the user wants to reach it in. Without a timeframe, plan for {DEFAULT_TIMEFRAME}.

User Goal: {goal}
{timeframe_line}
Build a detailed, beginner-friendly, motivating plan for that timeframe. Decide which timeframe you are using \
(the user's, or {DEFAULT_TIMEFRAME}) and put it in `timeframeUsed`.

Fill every field:
- `visionStatement`: an inspiring picture of success at the end of the timeframe. Keep expectations realistic for its length.
- `actionPlan`: {MIN_ACTION_ITEMS} to {MAX_ACTION_ITEMS} items. For one month or less, give concrete daily habits focused on \
consistency and small wins. For longer timeframes, give a month-by-month progression showing how habits grow, e.g. \
\"Month 1: Build a 10 minute daily walk 🚶\". Use simple explanations and emojis.
- `whatToAvoid`: friendly warnings about bad habits, time-wasters and pitfalls.
- `timeManagementTips`: realistic scheduling advice. Short timeframes: daily time-blocking and focus habits. Long \
timeframes: monthly review points, habit stacking and adjustments.
- `toolsToHelp` (optional): apps, journaling techniques, alarms or simple hacks for planning and tracking.
- `reflectionPrompts`: short timeframes get daily or every-other-day check questions; long timeframes get weekly and monthly questions.
- `dailyAffirmation`: one short, positive line tailored to the goal and timeframe.
- `infographicPrompt`: a vivid prompt for an image model describing one clean, colorful infographic that summarizes \
this plan visually (milestones, key habits, the vision). Describe layout and style; avoid long passages of text in the image.

Write simply and warmly, as if explaining to a child. Be encouraging but realistic.
Reply only with JSON matching the response schema."
    )
}

pub fn plan_response_schema() -> Value {
    let string_list = json!({"type": "ARRAY", "items": {"type": "STRING"}});
    json!({
        "type": "OBJECT",
        "properties": {
            "timeframeUsed": {"type": "STRING"},
            "visionStatement": {"type": "STRING"},
            "actionPlan": {
                "type": "ARRAY",
                "items": {"type": "STRING"},
                "minItems": MIN_ACTION_ITEMS,
                "maxItems": MAX_ACTION_ITEMS
            },
            "whatToAvoid": string_list,
            "timeManagementTips": string_list,
            "toolsToHelp": string_list,
            "reflectionPrompts": string_list,
            "dailyAffirmation": {"type": "STRING"},
            "infographicPrompt": {"type": "STRING"}
        },
        "required": [
            "timeframeUsed", "visionStatement", "actionPlan", "whatToAvoid",
            "timeManagementTips", "reflectionPrompts", "dailyAffirmation", "infographicPrompt"
        ],
        "propertyOrdering": [
            "timeframeUsed", "visionStatement", "actionPlan", "whatToAvoid", "timeManagementTips",
            "toolsToHelp", "reflectionPrompts", "dailyAffirmation", "infographicPrompt"
        ]
    })
}

/// Accepts the JSON body with or without a markdown code fence around it.
pub fn parse_plan_text(text: &str) -> Result<GeneratedPlan, GenerationError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let raw: RawPlan = serde_json::from_str(body)
        .map_err(|e| GenerationError::Decode(format!("plan JSON: {}: {}", e, preview(body, 200))))?;
    GeneratedPlan::try_from(raw)
}

fn demo_plan(request: &PlanRequest) -> GeneratedPlan {
    let timeframe = request.timeframe.clone().unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string());
    let goal = &request.goal;
    GeneratedPlan {
        timeframe_used: timeframe.clone(),
        vision_statement: format!("In {timeframe} you will look back proud of the steady steps you took toward: {goal}."),
        action_plan: vec![
            "Week 1: Write down why this goal matters to you ✍️".into(),
            "Every day: Spend 15 focused minutes on your goal ⏱️".into(),
            "Every week: Pick one small win and celebrate it 🎉".into(),
            "Halfway: Review what works and drop what doesn't 🔍".into(),
            "Final stretch: Share your progress with a friend 🤝".into(),
        ],
        what_to_avoid: vec![
            "Waiting for the perfect moment to start".into(),
            "Comparing your day one to someone else's year ten".into(),
        ],
        time_management_tips: vec![
            "Block the same time slot each day for your goal".into(),
            "Stack the new habit onto something you already do".into(),
        ],
        tools_to_help: Some(vec!["A paper habit tracker on your fridge".into()]),
        reflection_prompts: vec![
            "What moved me closer to my goal today?".into(),
            "What got in the way, and how can I plan around it?".into(),
        ],
        daily_affirmation: "Small steps every day add up to big change.".into(),
        infographic_prompt: format!("A cheerful, minimal infographic roadmap for the goal '{goal}' over {timeframe}, with milestone icons and soft colors."),
    }
}

fn placeholder_data_uri(prompt: &str) -> String {
    let palette = ["#3B82F6", "#EF4444", "#10B981", "#F59E0B", "#8B5CF6"];
    let color = palette[prompt.len() % palette.len()];

    let svg = format!(r#"<svg width="512" height="512" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{color};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{color};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="512" height="512" fill="url(#grad)" />
            <text x="256" y="240" font-family="Arial, sans-serif" font-size="32" font-weight="bold"
                  text-anchor="middle" fill="white">🎯 Your Vision</text>
            <text x="256" y="290" font-family="Arial, sans-serif" font-size="14"
                  text-anchor="middle" fill="white" opacity="0.8">Demo infographic placeholder</text>
        </svg>"#);

    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
    )
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    #[allow(dead_code)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

impl InlineData {
    fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

fn extract_text(resp: &GeminiResponse) -> Option<String> {
    let text: String = resp
        .candidates
        .first()?
        .content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_first_image(resp: &GeminiResponse) -> Option<&InlineData> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                if inline_data.mime_type.starts_with("image/") && !inline_data.data.is_empty() {
                    info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                    return Some(inline_data);
                }
            }
        }
    }
    info!("⚠️ No inline image data found in response structure");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::sample_plan;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{any, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_key: "test-key".into(),
            api_base: server.uri(),
            text_model: "text-model".into(),
            image_model: "image-model".into(),
            timeout: None,
        })
        .unwrap()
    }

    fn text_response(text: &str) -> Value {
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
    }

    fn request() -> PlanRequest {
        PlanRequest { goal: "Get fit in 90 days".into(), timeframe: Some("90 days".into()) }
    }

    #[test]
    fn prompt_mentions_goal_and_optional_timeframe() {
        let prompt = build_plan_prompt(&request());
        assert!(prompt.contains("User Goal: Get fit in 90 days"));
        assert!(prompt.contains("User Timeframe: 90 days"));
        assert!(prompt.contains("infographicPrompt"));

        let prompt = build_plan_prompt(&PlanRequest { timeframe: None, ..request() });
        assert!(!prompt.contains("User Timeframe"));
        assert!(prompt.contains("3 months"));
    }

    #[test]
    fn schema_requires_every_mandatory_field() {
        let schema = plan_response_schema();
        let required: Vec<&str> = schema["required"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(required.len(), 8);
        assert!(!required.contains(&"toolsToHelp"));
        assert_eq!(schema["properties"]["actionPlan"]["maxItems"].as_u64(), Some(7));
    }

    #[test]
    fn parses_fenced_json() {
        let body = serde_json::to_string(&sample_plan()).unwrap();
        let fenced = format!("```json\n{body}\n```");
        assert_eq!(parse_plan_text(&fenced).unwrap(), sample_plan());
        assert!(matches!(parse_plan_text("not json"), Err(GenerationError::Decode(_))));
    }

    #[test]
    fn truncates_large_base64_for_logging() {
        let mut value = json!({"inlineData": {"data": "A".repeat(500), "mimeType": "image/png"}});
        truncate_base64_in_json(&mut value);
        let data = value["inlineData"]["data"].as_str().unwrap();
        assert!(data.ends_with("...[truncated 450 chars]"));
    }

    #[tokio::test]
    async fn generates_plan_from_structured_response() {
        let server = MockServer::start().await;
        let body = serde_json::to_string(&sample_plan()).unwrap();
        Mock::given(method("POST"))
            .and(path("/models/text-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(&body)))
            .expect(1)
            .mount(&server)
            .await;

        let plan = client_for(&server).generate_plan(&request()).await.unwrap();
        assert_eq!(plan, sample_plan());
    }

    #[tokio::test]
    async fn plan_missing_affirmation_fails() {
        let server = MockServer::start().await;
        let mut body = serde_json::to_value(sample_plan()).unwrap();
        body.as_object_mut().unwrap().remove("dailyAffirmation");
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(&body.to_string())))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_plan(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingField("dailyAffirmation")));
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).generate_plan(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn empty_candidates_is_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_plan(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::NoContent));
    }

    #[tokio::test]
    async fn image_inline_data_becomes_data_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/image-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [
                    {"text": "Here is your infographic"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                ]}}]
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).generate_image("A roadmap").await;
        assert_eq!(result, Infographic::Generated { image_url: "data:image/png;base64,iVBORw0KGgo=".into() });
    }

    #[tokio::test]
    async fn image_failures_become_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        assert_eq!(client_for(&server).generate_image("A roadmap").await, Infographic::Empty);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("no picture today")))
            .mount(&server)
            .await;
        assert_eq!(client_for(&server).generate_image("A roadmap").await, Infographic::Empty);
    }

    #[tokio::test]
    async fn blank_image_prompt_skips_network() {
        let server = MockServer::start().await;
        Mock::given(any()).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        assert_eq!(client_for(&server).generate_image("   ").await, Infographic::Empty);
    }

    #[tokio::test]
    async fn demo_mode_needs_no_network() {
        let client = GeminiClient::new(GeminiConfig::default()).unwrap();
        let plan = client.generate_plan(&request()).await.unwrap();
        assert_eq!(plan.timeframe_used, "90 days");

        let image = client.generate_image(&plan.infographic_prompt).await;
        let url = image.into_url().unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));
    }
}
