use std::io::Cursor;

use base64::Engine;
use bytes::Bytes;
use image::ImageFormat;
use tracing::{debug, info};

use crate::error::ExportError;
use crate::models::GeneratedPlan;

const SLUG_MAX_CHARS: usize = 30;

fn bullets(items: &[String]) -> String {
    items.iter().map(|item| format!("- {item}")).collect::<Vec<_>>().join("\n")
}

/// Plain-text rendering of a plan for the clipboard, sections in display order.
pub fn plan_to_text(plan: &GeneratedPlan) -> String {
    let mut sections = vec![
        format!("📌 Vision Statement for {}:\n{}", plan.timeframe_used, plan.vision_statement),
        format!("✅ Daily or Monthly Action Plan:\n{}", bullets(&plan.action_plan)),
        format!("⛔ What to Avoid:\n{}", bullets(&plan.what_to_avoid)),
        format!("⏳ Time & Progress Management Tips:\n{}", bullets(&plan.time_management_tips)),
    ];
    if !plan.tools().is_empty() {
        sections.push(format!("🧰 Helpful Tools:\n{}", bullets(plan.tools())));
    }
    sections.push(format!("🧭 Reflection & Review Prompts:\n{}", bullets(&plan.reflection_prompts)));
    sections.push(format!("🎯 Motivational Daily Affirmation:\n{}", plan.daily_affirmation));
    sections.push(format!("🖼️ AI Infographic Prompt (for reference):\n{}", plan.infographic_prompt));
    sections.join("\n\n").trim().to_string()
}

#[derive(Debug, Clone)]
pub struct ExportedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub filename: String,
}

struct DataUri {
    mime_type: String,
    bytes: Vec<u8>,
}

fn decode_data_uri(uri: &str) -> Result<DataUri, ExportError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ExportError::InvalidDataUri("missing data: prefix".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ExportError::InvalidDataUri("missing payload separator".into()))?;
    let mime_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| ExportError::InvalidDataUri("only base64 payloads are supported".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ExportError::InvalidDataUri(e.to_string()))?;
    Ok(DataUri { mime_type: if mime_type.is_empty() { "application/octet-stream".into() } else { mime_type.to_string() }, bytes })
}

fn extension_for(mime_type: &str) -> &str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}

/// `get-fit-in-90-days-infographic.png`, or `life-plan-infographic.png` without a usable goal.
pub fn infographic_filename(goal: Option<&str>, extension: &str) -> String {
    let slug: String = goal
        .unwrap_or_default()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(SLUG_MAX_CHARS)
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "life-plan" } else { slug };
    format!("{slug}-infographic.{extension}")
}

/// Turn the stored data URI into a downloadable file. Decodable rasters become PNG;
/// anything else is passed through as-is.
pub fn export_infographic(data_uri: &str, goal: Option<&str>) -> Result<ExportedImage, ExportError> {
    let DataUri { mime_type, bytes } = decode_data_uri(data_uri)?;

    let image = match image::guess_format(&bytes) {
        Ok(ImageFormat::Png) => ExportedImage {
            bytes: Bytes::from(bytes),
            content_type: "image/png".into(),
            filename: infographic_filename(goal, "png"),
        },
        Ok(ImageFormat::Jpeg) => {
            let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)?;
            let mut png = Vec::new();
            decoded.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
            debug!("Re-encoded {} byte JPEG as {} byte PNG", bytes.len(), png.len());
            ExportedImage {
                bytes: Bytes::from(png),
                content_type: "image/png".into(),
                filename: infographic_filename(goal, "png"),
            }
        }
        _ => {
            let extension = extension_for(&mime_type).to_string();
            ExportedImage {
                bytes: Bytes::from(bytes),
                filename: infographic_filename(goal, &extension),
                content_type: mime_type,
            }
        }
    };
    info!("📦 Exported infographic {} ({} bytes)", image.filename, image.bytes.len());
    Ok(image)
}
