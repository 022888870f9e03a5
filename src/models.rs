use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const APP_NAME: &str = "ZenLogo AI";
pub const APP_TAGLINE: &str = "High-End Spa & Wellness Branding System";

/// Upper bound on selected services.
pub const MAX_SERVICES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpaStyle {
    #[default]
    Traditional,
    Modern,
    Luxury,
    Thai,
    Zen,
    Minimalist,
    Classical,
}

impl SpaStyle {
    pub fn all() -> &'static [SpaStyle] {
        &[
            SpaStyle::Traditional,
            SpaStyle::Modern,
            SpaStyle::Luxury,
            SpaStyle::Thai,
            SpaStyle::Zen,
            SpaStyle::Minimalist,
            SpaStyle::Classical,
        ]
    }

    /// Identifier used in prompts and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaStyle::Traditional => "Traditional",
            SpaStyle::Modern => "Modern",
            SpaStyle::Luxury => "Luxury",
            SpaStyle::Thai => "Thai",
            SpaStyle::Zen => "Zen",
            SpaStyle::Minimalist => "Minimalist",
            SpaStyle::Classical => "Classical",
        }
    }
}

impl std::fmt::Display for SpaStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ReferenceImageError {
    #[error("reference image is empty")]
    Empty,
    #[error("reference image is not valid base64: {0}")]
    Encoding(String),
    #[error("reference image is not a recognised image format")]
    UnknownFormat,
}

/// User supplied reference picture, kept as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data: Bytes,
}

impl ReferenceImage {
    /// Accepts either bare base64 or a `data:<mime>;base64,<payload>` URI.
    /// The MIME type always comes from the decoded bytes; a declared type
    /// (`mime_type` or the URI header) that disagrees is only logged.
    pub fn from_encoded(encoded: &str, mime_type: Option<&str>) -> Result<Self, ReferenceImageError> {
        let encoded = encoded.trim();
        let (header_mime, payload) = match encoded.strip_prefix("data:") {
            Some(rest) => match rest.split_once(',') {
                Some((header, payload)) => {
                    let mime = header.split(';').next().unwrap_or_default();
                    ((!mime.is_empty()).then(|| mime.to_string()), payload)
                }
                None => (None, rest),
            },
            None => (None, encoded),
        };
        if payload.is_empty() {
            return Err(ReferenceImageError::Empty);
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ReferenceImageError::Encoding(e.to_string()))?;
        if data.is_empty() {
            return Err(ReferenceImageError::Empty);
        }

        let sniffed = image::guess_format(&data)
            .map(|f| f.to_mime_type().to_string())
            .map_err(|_| ReferenceImageError::UnknownFormat)?;
        if !sniffed.starts_with("image/") {
            return Err(ReferenceImageError::UnknownFormat);
        }
        let declared = mime_type
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or(header_mime);
        if let Some(declared) = declared.filter(|m| !m.eq_ignore_ascii_case(&sniffed)) {
            warn!("⚠️ Reference image declared as {} but looks like {}", declared, sniffed);
        }

        Ok(Self { mime_type: sniffed, data: Bytes::from(data) })
    }

    /// Base64 payload without any data URI prefix.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Branding parameters collected by the wizard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrandRequest {
    pub store_name: String,
    pub sub_text: String,
    pub services: Vec<String>,
    pub style: SpaStyle,
    pub reference_image: Option<ReferenceImage>,
    pub additional_requirements: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormUpdate {
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub sub_text: Option<String>,
    #[serde(default)]
    pub style: Option<SpaStyle>,
    #[serde(default)]
    pub additional_requirements: Option<String>,
}

impl BrandRequest {
    /// Removes a selected service, or appends it while fewer than
    /// `MAX_SERVICES` are selected. Returns whether the selection changed.
    pub fn toggle_service(&mut self, label: &str) -> bool {
        if let Some(pos) = self.services.iter().position(|s| s == label) {
            self.services.remove(pos);
            return true;
        }
        if self.services.len() >= MAX_SERVICES {
            return false;
        }
        self.services.push(label.to_string());
        true
    }

    pub fn apply(&mut self, update: FormUpdate) {
        if let Some(v) = update.store_name { self.store_name = v; }
        if let Some(v) = update.sub_text { self.sub_text = v; }
        if let Some(v) = update.style { self.style = v; }
        if let Some(v) = update.additional_requirements { self.additional_requirements = v; }
    }

    pub fn set_reference_image(&mut self, image: ReferenceImage) {
        self.reference_image = Some(image);
    }

    pub fn clear_reference_image(&mut self) -> bool {
        self.reference_image.take().is_some()
    }

    pub fn is_submittable(&self) -> bool {
        !self.store_name.is_empty()
    }

    pub fn summary(&self) -> FormView {
        FormView {
            store_name: self.store_name.clone(),
            sub_text: self.sub_text.clone(),
            services: self.services.clone(),
            style: self.style,
            reference_image: self.reference_image.as_ref().map(|img| ReferenceImageInfo {
                mime_type: img.mime_type.clone(),
                size_bytes: img.data.len(),
            }),
            additional_requirements: self.additional_requirements.clone(),
        }
    }
}

/// Serializable view of the form; the reference image is summarised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub store_name: String,
    pub sub_text: String,
    pub services: Vec<String>,
    pub style: SpaStyle,
    pub reference_image: Option<ReferenceImageInfo>,
    pub additional_requirements: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImageInfo {
    pub mime_type: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub visual_symbols: Vec<String>,
    pub color_palette: String,
    pub english_translation: String,
    pub design_reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedLogo {
    pub id: Uuid,
    /// `data:<mime>;base64,<payload>`
    pub image_url: String,
    pub prompt_used: String,
    pub analysis: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOption {
    pub id: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDefinition {
    pub id: SpaStyle,
    pub label: &'static str,
    pub description: &'static str,
    pub preview_color: &'static str,
}

pub const COMMON_SERVICES: &[ServiceOption] = &[
    ServiceOption { id: "foot_massage", label: "足疗" },
    ServiceOption { id: "chinese_massage", label: "中式推拿" },
    ServiceOption { id: "thai_massage", label: "泰式按摩" },
    ServiceOption { id: "cupping", label: "拔罐" },
    ServiceOption { id: "guasha", label: "刮痧" },
    ServiceOption { id: "ear_picking", label: "采耳" },
    ServiceOption { id: "aroma_oil", label: "精油SPA" },
    ServiceOption { id: "moxibustion", label: "艾灸" },
    ServiceOption { id: "pedicure", label: "修脚" },
    ServiceOption { id: "hot_stone", label: "热石" },
];

pub const STYLE_OPTIONS: &[StyleDefinition] = &[
    StyleDefinition { id: SpaStyle::Traditional, label: "新中式", description: "书法笔触，水墨质感，印章元素。", preview_color: "bg-stone-800" },
    StyleDefinition { id: SpaStyle::Classical, label: "古典典雅", description: "宫廷华贵，祥云瑞兽，深红色调。", preview_color: "bg-red-900" },
    StyleDefinition { id: SpaStyle::Luxury, label: "轻奢风", description: "金箔质感，大理石，对称美学。", preview_color: "bg-yellow-600" },
    StyleDefinition { id: SpaStyle::Modern, label: "现代简约", description: "几何图形，线条利落，清新渐变。", preview_color: "bg-blue-500" },
    StyleDefinition { id: SpaStyle::Thai, label: "泰式风情", description: "图腾花纹，暖橙紫色调，异域风。", preview_color: "bg-orange-600" },
    StyleDefinition { id: SpaStyle::Zen, label: "禅意自然", description: "原石，水波纹，大地色系，宁静。", preview_color: "bg-green-700" },
];
