//! Seams between the orchestrator and the generative services.
//!
//! `PlanGenerator` may fail; `ImageGenerator` cannot. A missing image is an
//! `Infographic::Empty` value, so the text plan is never held hostage by the image call.

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::models::{GeneratedPlan, InfographicResult, PlanRequest};

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate_plan(&self, request: &PlanRequest) -> Result<GeneratedPlan, GenerationError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> Infographic;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Infographic {
    /// A `data:` URI holding the image bytes.
    Generated { image_url: String },
    Empty,
}

impl Infographic {
    pub fn from_url(image_url: impl Into<String>) -> Self {
        let image_url = image_url.into();
        if image_url.trim().is_empty() {
            Self::Empty
        } else {
            Self::Generated { image_url }
        }
    }

    pub fn into_url(self) -> Option<String> {
        match self {
            Self::Generated { image_url } => Some(image_url),
            Self::Empty => None,
        }
    }
}

impl From<Infographic> for InfographicResult {
    fn from(infographic: Infographic) -> Self {
        Self { image_url: infographic.into_url().unwrap_or_default() }
    }
}
