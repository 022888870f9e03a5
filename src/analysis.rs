//! Analysis stage: turns the form into brand metadata via a JSON-constrained
//! text generation call.

use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::gemini::{Content, GeminiError, GenerateContentRequest, GenerationConfig, GenerativeModel, Part};
use crate::models::{AnalysisResult, BrandRequest};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to analyze brand identity.")]
    NoResponse,
    #[error("AI Analysis failed to return valid data. Please try again.")]
    Malformed { raw: String, reason: String },
    #[error("{0}")]
    Remote(#[from] GeminiError),
}

pub fn build_analysis_prompt(request: &BrandRequest) -> String {
    format!(
        r#"
    Analyze the following Spa/Foot Bath store details to prepare for logo design.

    Store Name: {name}
    Slogan: {slogan}
    Services: {services}
    Preferred Style: {style}
    Additional User Requirements: {requirements}

    Task:
    1. Visual Symbols: Based on the services and user requirements, recommend exactly 3 distinct visual elements (e.g., Lotus, Bamboo, Abstract Foot curve, Steam, Hands).
    2. Color Palette: Recommend a color scheme based on the name, style, and requirements. Return this description in Chinese.
    3. Translation: Translate the store name and slogan into English (for internal design context).
    4. Reasoning: Explain the choices. Return this explanation in Chinese.
  "#,
        name = request.store_name,
        slogan = request.sub_text,
        services = request.services.join(", "),
        style = request.style,
        requirements = request.additional_requirements,
    )
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "visualSymbols": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "List of 3 distinct visual elements suitable for a logo (e.g. Lotus, Bamboo)."
            },
            "colorPalette": {
                "type": "STRING",
                "description": "Recommended color scheme name and description. Must be in Chinese."
            },
            "englishTranslation": {
                "type": "STRING",
                "description": "English translation of the store name and slogan."
            },
            "designReasoning": {
                "type": "STRING",
                "description": "Brief explanation of why these elements fit the brand. Must be in Chinese."
            }
        },
        "required": ["visualSymbols", "colorPalette", "englishTranslation", "designReasoning"]
    })
}

/// Strips markdown fences and returns the first balanced top-level object.
/// Falls back to the fence-stripped text when no object is found.
pub fn extract_json_object(text: &str) -> String {
    let cleaned = text.replace("```json", "").replace("```", "");

    let Some(start) = cleaned.find('{') else {
        return cleaned;
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in cleaned[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return cleaned[start..start + offset + 1].to_string();
                }
            }
            _ => {}
        }
    }
    cleaned
}

pub fn parse_analysis(text: &str) -> Result<AnalysisResult, AnalysisError> {
    if text.trim().is_empty() {
        return Err(AnalysisError::NoResponse);
    }
    let candidate = extract_json_object(text);
    let result: AnalysisResult = serde_json::from_str(&candidate).map_err(|e| {
        error!("❌ Failed to parse analysis result: {}", candidate);
        AnalysisError::Malformed { raw: candidate.clone(), reason: e.to_string() }
    })?;
    if result.visual_symbols.len() != 3 {
        warn!("⚠️ Expected 3 visual symbols, model returned {}", result.visual_symbols.len());
    }
    Ok(result)
}

pub struct BrandAnalyzer {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
}

impl BrandAnalyzer {
    pub fn new(model: Arc<dyn GenerativeModel>, model_name: impl Into<String>) -> Self {
        Self { model, model_name: model_name.into() }
    }

    pub fn build_request(request: &BrandRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content { role: Some("user".into()), parts: vec![Part::text(build_analysis_prompt(request))] }],
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".into()),
                response_schema: Some(analysis_schema()),
                ..Default::default()
            }),
        }
    }

    pub async fn analyze(&self, request: &BrandRequest) -> Result<AnalysisResult, AnalysisError> {
        info!("🧭 Analyzing brand identity for '{}' with {}", request.store_name, self.model_name);
        let response = self.model
            .generate_content(&self.model_name, &Self::build_request(request))
            .await?;
        let text = response.text().unwrap_or_default();
        let analysis = parse_analysis(&text)?;
        info!("✅ Analysis ready: symbols={:?}", analysis.visual_symbols);
        Ok(analysis)
    }
}
