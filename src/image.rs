use crate::config::ImageConfig;
use tracing::{error, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    pub success: bool,
    pub image_url: Option<String>,
    pub prompt: Option<String>,
    pub error: Option<String>,
}

/// Builds deferred-rendering image references against an external provider.
/// Nothing is fetched here; the URL itself is the result.
#[derive(Debug, Clone)]
pub struct ImageDelegate {
    base_url: String,
    width: u32,
    height: u32,
    prompt_suffix: String,
}

impl ImageDelegate {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            width: config.width,
            height: config.height,
            prompt_suffix: config.prompt_suffix.clone(),
        }
    }

    pub fn generate(&self, prompt: &str) -> ImageResult {
        self.generate_with_seed(prompt, chrono::Utc::now().timestamp_millis())
    }

    fn generate_with_seed(&self, prompt: &str, seed: i64) -> ImageResult {
        info!("Generating image for prompt: \"{}\"", prompt);
        match self.build_url(prompt, seed) {
            Ok(url) => {
                info!("Image URL generated: {}", url);
                ImageResult {
                    success: true,
                    image_url: Some(url),
                    prompt: Some(prompt.to_string()),
                    error: None,
                }
            }
            Err(e) => {
                error!("Image generation error: {}", e);
                ImageResult {
                    success: false,
                    image_url: None,
                    prompt: Some(prompt.to_string()),
                    error: Some(e),
                }
            }
        }
    }

    fn build_url(&self, prompt: &str, seed: i64) -> Result<String, String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| format!("invalid image provider URL '{}': {}", self.base_url, e))?;

        let enhanced = format!("{}{}", prompt, self.prompt_suffix);
        url.path_segments_mut()
            .map_err(|_| format!("image provider URL '{}' cannot take a path", self.base_url))?
            .pop_if_empty()
            .push(&enhanced);

        url.query_pairs_mut()
            .append_pair("width", &self.width.to_string())
            .append_pair("height", &self.height.to_string())
            .append_pair("seed", &seed.to_string())
            .append_pair("nologo", "true");

        Ok(url.into())
    }
}

pub fn format_response(result: &ImageResult) -> String {
    match (result.success, result.image_url.as_deref()) {
        (true, Some(url)) => format!(
            "🎨 **Image Generated Successfully!**\n\n\
             Here's your image based on: *\"{}\"*\n\n\
             ![Generated Image]({})\n\n\
             *Powered by Pollinations AI - Free Image Generation*\n\n\
             ---\n\
             💡 **Tips:** Be more specific with your prompts for better results! Try adding details like:\n\
             - Art style (realistic, anime, oil painting, digital art)\n\
             - Colors and mood (vibrant, dark, peaceful)\n\
             - Camera angle (close-up, wide shot, aerial view)",
            result.prompt.as_deref().unwrap_or_default(),
            url
        ),
        _ => format!(
            "❌ Sorry, I couldn't generate the image. Error: {}\n\n\
             Please try again with a different prompt!",
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delegate() -> ImageDelegate {
        ImageDelegate::new(&ImageConfig::default())
    }

    #[test]
    fn builds_encoded_url_with_fixed_parameters() {
        let result = delegate().generate_with_seed("a red fox", 1700000000000);
        assert!(result.success);
        assert_eq!(
            result.image_url.as_deref(),
            Some(
                "https://image.pollinations.ai/prompt/a%20red%20fox,%20high%20quality,%20detailed,%20professional\
                 ?width=1024&height=1024&seed=1700000000000&nologo=true"
            )
        );
        assert_eq!(result.prompt.as_deref(), Some("a red fox"));
    }

    #[test]
    fn reserved_characters_stay_inside_the_path_segment() {
        let result = delegate().generate_with_seed("cats/dogs? #1", 1);
        let url = result.image_url.unwrap();
        assert!(url.starts_with("https://image.pollinations.ai/prompt/cats%2Fdogs%3F%20%231"));
        assert!(url.ends_with("?width=1024&height=1024&seed=1&nologo=true"));
    }

    #[test]
    fn seed_changes_between_calls() {
        let d = delegate();
        let first = d.generate_with_seed("a fox", 1).image_url;
        let second = d.generate_with_seed("a fox", 2).image_url;
        assert_ne!(first, second);
    }

    #[test]
    fn unusable_base_url_is_reported() {
        let d = ImageDelegate::new(&ImageConfig {
            base_url: "mailto:someone@example.com".into(),
            ..ImageConfig::default()
        });
        let result = d.generate("a fox");
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(format_response(&result).starts_with("❌ Sorry, I couldn't generate the image."));
    }

    #[test]
    fn success_response_embeds_image_and_prompt() {
        let result = delegate().generate_with_seed("a red fox", 5);
        let text = format_response(&result);
        assert!(text.contains("*\"a red fox\"*"));
        assert!(text.contains(&format!("![Generated Image]({})", result.image_url.unwrap())));
        assert!(text.contains("💡 **Tips:**"));
    }
}
