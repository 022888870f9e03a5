use base64::Engine;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::gemini::{preview, Content, GeminiError, GenerateContentRequest, GenerateContentResponse, GenerationConfig, GenerativeModel, ImageConfig, Part};
use crate::models::{AnalysisResult, BrandRequest, SpaStyle};

pub const DEFAULT_IMAGE_MIME: &str = "image/png";
pub const DOWNLOAD_FILENAME: &str = "zenlogo-spa-design.png";

const DEFAULT_FONT: &str = "Bold Modern Sans-serif or Bold Elegant Serif";
const CALLIGRAPHY_FONT: &str = "Heavy Bold Chinese Calligraphy (Kaishu or Lishu style)";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No image generated.")]
    NoImage,
    #[error("No content parts found in response.")]
    NoParts,
    #[error("Model generated text instead of image. Please try again.")]
    TextOnly,
    #[error("{0}")]
    Remote(#[from] GeminiError),
}

pub fn font_style_for(style: SpaStyle) -> &'static str {
    match style {
        SpaStyle::Traditional | SpaStyle::Classical | SpaStyle::Zen => CALLIGRAPHY_FONT,
        _ => DEFAULT_FONT,
    }
}

pub fn build_logo_prompt(request: &BrandRequest, analysis: &AnalysisResult) -> String {
    let symbols = analysis.visual_symbols.join(", ");
    let style = request.style;
    let font = font_style_for(style);
    let user_constraint = if request.additional_requirements.is_empty() {
        String::new()
    } else {
        format!(
            "The user specifically requested: \"{}\". Please respect this constraint.",
            request.additional_requirements
        )
    };

    format!(
        r#"
    Role: Professional Logo Designer specializing in Wellness, Spa, and Luxury Hospitality branding.

    1. COMPOSITION (Layout):
    Vertical Layout: A distinct graphic icon on the TOP, followed by text on the BOTTOM.
    Style: Minimalist Vector Graphic, Flat Design, Premium aesthetic.
    Background: Pure White background (Hex #FFFFFF) for easy extraction.

    2. THE ICON (Graphic Symbol):
    Subject: A stylized, high-end vector representation of: {symbols}.
    Vibe: {style}, Relaxing, Professional.
    Details: Clean lines, geometric balance, no cluttered details. High-end vector illustration style.
    Ensure the icon looks suitable for a {style} Foot Bath/SPA business.

    3. TYPOGRAPHY (Text Rendering):
    You must render the text precisely below the icon.
    Primary Text (Store Name): "{name}"
    Font Style: {font}.
    CRITICAL REQUIREMENT: All Chinese characters MUST be rendered in a very BOLD / HEAVY weight. Strokes must be thick and clearly visible. Do not use thin or light fonts.

    Secondary Text (Slogan): "{slogan}"
    Font Style: Smaller, but still legible.

    4. COLOR & LIGHTING:
    Palette: {palette}.
    Lighting: Soft studio lighting, 2k resolution, vector crispness.

    5. USER CONSTRAINTS & SPECIFIC REQUESTS:
    {user_constraint}

    Constraints:
    - No medical crosses.
    - No photorealistic messy textures.
    - If Chinese characters are complex, focus on the aesthetic balance of the strokes.
  "#,
        name = request.store_name,
        slogan = request.sub_text,
        palette = analysis.color_palette,
    )
}

pub fn encode_data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, base64::engine::general_purpose::STANDARD.encode(data))
}

/// Splits a base64 data URI into its MIME type and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let (header, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let data = base64::engine::general_purpose::STANDARD.decode(payload).ok()?;
    let mime = if mime.is_empty() { DEFAULT_IMAGE_MIME } else { mime };
    Some((mime.to_string(), data))
}

/// First inline image in the first candidate, as a data URI.
pub fn extract_image(response: &GenerateContentResponse) -> Result<String, GenerationError> {
    let candidate = response.candidates.first().ok_or(GenerationError::NoImage)?;
    let parts = candidate.content.as_ref().map(|c| &c.parts).ok_or(GenerationError::NoParts)?;
    if parts.is_empty() {
        return Err(GenerationError::NoParts);
    }
    parts
        .iter()
        .filter_map(|p| p.inline_data.as_ref())
        .find(|inline| !inline.data.is_empty())
        .map(|inline| {
            let mime = inline.mime_type.as_deref().filter(|m| !m.is_empty()).unwrap_or(DEFAULT_IMAGE_MIME);
            info!("🎯 Found image data with mime type: {}", mime);
            encode_data_uri(mime, &inline.data)
        })
        .ok_or(GenerationError::TextOnly)
}

pub struct LogoPainter {
    model: Arc<dyn GenerativeModel>,
    model_name: String,
    image_size: String,
}

impl LogoPainter {
    pub fn new(model: Arc<dyn GenerativeModel>, model_name: impl Into<String>, image_size: impl Into<String>) -> Self {
        Self { model, model_name: model_name.into(), image_size: image_size.into() }
    }

    pub fn build_request(&self, prompt: &str, request: &BrandRequest) -> GenerateContentRequest {
        let mut parts = vec![Part::text(prompt)];
        if let Some(reference) = &request.reference_image {
            parts.push(Part::inline(reference.mime_type.clone(), reference.data.to_vec()));
        }
        GenerateContentRequest {
            contents: vec![Content { role: Some("user".into()), parts }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["TEXT".into(), "IMAGE".into()]),
                image_config: Some(ImageConfig { image_size: self.image_size.clone() }),
                ..Default::default()
            }),
        }
    }

    /// Returns the image data URI and the prompt that produced it.
    pub async fn generate(&self, request: &BrandRequest, analysis: &AnalysisResult) -> Result<(String, String), GenerationError> {
        let prompt = build_logo_prompt(request, analysis);
        info!(
            "🎨 Painting logo for '{}' with {} (reference image: {})",
            request.store_name,
            self.model_name,
            request.reference_image.is_some()
        );
        let response = self.model
            .generate_content(&self.model_name, &self.build_request(&prompt, request))
            .await?;
        let image_url = extract_image(&response)?;
        info!("🖼️ Logo generated: {}", preview(&image_url));
        Ok((image_url, prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::testing::{response_with_parts, text_response, ScriptedModel};
    use crate::gemini::{Candidate, InlineData};
    use crate::models::ReferenceImage;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            visual_symbols: vec!["Lotus".into(), "Bamboo".into(), "Steam".into()],
            color_palette: "墨绿配香槟金".into(),
            english_translation: "Cloud Retreat".into(),
            design_reasoning: "宁静".into(),
        }
    }

    fn request() -> BrandRequest {
        BrandRequest { store_name: "云隐足道".into(), sub_text: "养生·SPA".into(), ..Default::default() }
    }

    #[test]
    fn calligraphy_font_only_for_traditional_classical_zen() {
        let expected = [
            (SpaStyle::Traditional, CALLIGRAPHY_FONT),
            (SpaStyle::Modern, DEFAULT_FONT),
            (SpaStyle::Luxury, DEFAULT_FONT),
            (SpaStyle::Thai, DEFAULT_FONT),
            (SpaStyle::Zen, CALLIGRAPHY_FONT),
            (SpaStyle::Minimalist, DEFAULT_FONT),
            (SpaStyle::Classical, CALLIGRAPHY_FONT),
        ];
        assert_eq!(expected.len(), SpaStyle::all().len());
        for (style, font) in expected {
            assert_eq!(font_style_for(style), font, "{style}");
        }
    }

    #[test]
    fn prompt_embeds_names_symbols_and_palette() {
        let prompt = build_logo_prompt(&request(), &analysis());
        assert!(prompt.contains("representation of: Lotus, Bamboo, Steam."));
        assert!(prompt.contains("Vibe: Traditional, Relaxing"));
        assert!(prompt.contains("Primary Text (Store Name): \"云隐足道\""));
        assert!(prompt.contains("Secondary Text (Slogan): \"养生·SPA\""));
        assert!(prompt.contains(&format!("Font Style: {CALLIGRAPHY_FONT}.")));
        assert!(prompt.contains("Palette: 墨绿配香槟金."));
        assert!(prompt.contains("No medical crosses."));
        assert!(prompt.contains("No photorealistic messy textures."));
        assert!(!prompt.contains("The user specifically requested"));
    }

    #[test]
    fn user_constraint_clause_appears_only_when_given() {
        let mut req = request();
        req.additional_requirements = "不要使用红色".into();
        let prompt = build_logo_prompt(&req, &analysis());
        assert!(prompt.contains("The user specifically requested: \"不要使用红色\". Please respect this constraint."));
    }

    #[test]
    fn reference_image_becomes_second_part() {
        let painter = LogoPainter::new(Arc::new(ScriptedModel::default()), "img", "2K");
        let mut req = request();
        req.set_reference_image(ReferenceImage { mime_type: "image/jpeg".into(), data: Bytes::from_static(&[9, 8, 7]) });
        let body = painter.build_request("prompt", &req);
        let parts = &body.contents[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.as_deref(), Some("prompt"));
        assert_eq!(parts[1], Part::inline("image/jpeg", vec![9, 8, 7]));
        let config = body.generation_config.unwrap();
        assert_eq!(config.image_config, Some(ImageConfig { image_size: "2K".into() }));
    }

    #[test]
    fn text_only_response_is_rejected() {
        let err = extract_image(&text_response("I cannot draw that")).unwrap_err();
        assert!(matches!(err, GenerationError::TextOnly));
        assert!(err.to_string().contains("text instead of image"));
    }

    #[test]
    fn empty_responses_are_distinguished() {
        assert!(matches!(extract_image(&Default::default()), Err(GenerationError::NoImage)));
        let no_content = GenerateContentResponse { candidates: vec![Candidate { content: None }] };
        assert!(matches!(extract_image(&no_content), Err(GenerationError::NoParts)));
        assert!(matches!(extract_image(&response_with_parts(vec![])), Err(GenerationError::NoParts)));
    }

    #[test]
    fn missing_mime_defaults_to_png() {
        let part = Part { text: None, inline_data: Some(InlineData { mime_type: None, data: vec![1, 2, 3] }) };
        let uri = extract_image(&response_with_parts(vec![Part::text("caption"), part])).unwrap();
        assert_eq!(uri, "data:image/png;base64,AQID");
    }

    #[test]
    fn data_uri_decodes_for_download() {
        let uri = encode_data_uri("image/jpeg", &[1, 2, 3]);
        assert_eq!(decode_data_uri(&uri), Some(("image/jpeg".to_string(), vec![1, 2, 3])));
        assert_eq!(decode_data_uri("https://example.com/logo.png"), None);
    }

    #[tokio::test]
    async fn generate_returns_data_uri_and_prompt() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(response_with_parts(vec![Part::inline("image/webp", vec![0xFF])]))]));
        let painter = LogoPainter::new(model.clone(), "gemini-3-pro-image-preview", "2K");
        let (uri, prompt) = painter.generate(&request(), &analysis()).await.unwrap();
        assert_eq!(uri, "data:image/webp;base64,/w==");
        assert_eq!(prompt, build_logo_prompt(&request(), &analysis()));
        assert_eq!(model.calls()[0].0, "gemini-3-pro-image-preview");
    }
}
