use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::GenerationError;
use crate::validation::Goal;

pub const MIN_ACTION_ITEMS: usize = 3;
pub const MAX_ACTION_ITEMS: usize = 7;

/// Body of `POST /api/plan`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateRequest {
    pub goal: String,
    #[serde(default)]
    pub timeframe: Option<String>, // e.g. "20 days", "3 months"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidateRequest {
    pub goal: String,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ValidateResponse {
    pub valid: bool,
    pub goal: Option<String>,
    pub message: Option<String>,
}

/// What the text model is asked to plan for.
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    pub goal: String,
    pub timeframe: Option<String>,
}

impl PlanRequest {
    /// Only a validated goal gets here; a blank timeframe is the same as none.
    pub fn compose(goal: Goal, timeframe: Option<&str>) -> Self {
        let timeframe = timeframe
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Self { goal: goal.into_inner(), timeframe }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlan {
    pub timeframe_used: String,
    pub vision_statement: String,
    pub action_plan: Vec<String>,
    pub what_to_avoid: Vec<String>,
    pub time_management_tips: Vec<String>,
    pub tools_to_help: Option<Vec<String>>,
    pub reflection_prompts: Vec<String>,
    pub daily_affirmation: String,
    pub infographic_prompt: String,
}

impl GeneratedPlan {
    pub fn tools(&self) -> &[String] {
        self.tools_to_help.as_deref().unwrap_or_default()
    }
}

/// The model's JSON before any field is trusted.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPlan {
    pub timeframe_used: Option<String>,
    pub vision_statement: Option<String>,
    pub action_plan: Option<Vec<String>>,
    pub what_to_avoid: Option<Vec<String>>,
    pub time_management_tips: Option<Vec<String>>,
    pub tools_to_help: Option<Vec<String>>,
    pub reflection_prompts: Option<Vec<String>>,
    pub daily_affirmation: Option<String>,
    pub infographic_prompt: Option<String>,
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, GenerationError> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        return Err(GenerationError::MissingField(field));
    }
    Ok(value)
}

fn required_list(value: Option<Vec<String>>, field: &'static str) -> Result<Vec<String>, GenerationError> {
    let items = value.unwrap_or_default();
    if items.is_empty() {
        return Err(GenerationError::MissingField(field));
    }
    if items.iter().any(|item| item.trim().is_empty()) {
        return Err(GenerationError::InvalidField { field, reason: "contains a blank item".into() });
    }
    Ok(items.into_iter().map(|item| item.trim().to_string()).collect())
}

impl TryFrom<RawPlan> for GeneratedPlan {
    type Error = GenerationError;

    fn try_from(raw: RawPlan) -> Result<Self, Self::Error> {
        let action_plan = required_list(raw.action_plan, "actionPlan")?;
        if !(MIN_ACTION_ITEMS..=MAX_ACTION_ITEMS).contains(&action_plan.len()) {
            return Err(GenerationError::InvalidField {
                field: "actionPlan",
                reason: format!(
                    "expected {MIN_ACTION_ITEMS}-{MAX_ACTION_ITEMS} items, got {}",
                    action_plan.len()
                ),
            });
        }

        let tools_to_help = raw
            .tools_to_help
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            });

        Ok(Self {
            timeframe_used: required_text(raw.timeframe_used, "timeframeUsed")?,
            vision_statement: required_text(raw.vision_statement, "visionStatement")?,
            action_plan,
            what_to_avoid: required_list(raw.what_to_avoid, "whatToAvoid")?,
            time_management_tips: required_list(raw.time_management_tips, "timeManagementTips")?,
            tools_to_help,
            reflection_prompts: required_list(raw.reflection_prompts, "reflectionPrompts")?,
            daily_affirmation: required_text(raw.daily_affirmation, "dailyAffirmation")?,
            infographic_prompt: required_text(raw.infographic_prompt, "infographicPrompt")?,
        })
    }
}

/// Wire shape of an image generation outcome. An empty `image_url` means no image.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfographicResult {
    pub image_url: String,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A dismissible notification for the user.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, title: title.into(), description: description.into(), created_at: Utc::now() }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, title: title.into(), description: description.into(), created_at: Utc::now() }
    }
}
