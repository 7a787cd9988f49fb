//! Heuristic detection of image-generation requests.
//!
//! Both decisions are table driven: extend or localize the tables, not the code.

/// Phrases that mark a message as an image request. Matched case-insensitively
/// anywhere in the message.
pub const TRIGGER_PHRASES: &[&str] = &[
    "create an image",
    "generate an image",
    "make an image",
    "draw",
    "create a picture",
    "generate a picture",
    "make a picture",
    "create image",
    "generate image",
    "make image",
    "image of",
    "picture of",
    "photo of",
    "illustration of",
    "artwork of",
    "design an image",
    "create art",
    "draw me",
    "paint",
    "visualize",
    "show me an image",
    "show me a picture",
    // Bengali
    "ছবি তৈরি",
    "ছবি বানাও",
    "ইমেজ তৈরি",
    "ছবি দেখাও",
];

/// Lead-in phrases stripped from the front of the subject, tried in order.
/// A phrase must come before any shorter phrase it contains.
pub const LEAD_IN_PHRASES: &[&str] = &[
    "create an image of",
    "generate an image of",
    "make an image of",
    "draw me an image of",
    "draw me a picture of",
    "draw me",
    "draw",
    "create a picture of",
    "generate a picture of",
    "make a picture of",
    "create image of",
    "generate image of",
    "make image of",
    "show me an image of",
    "show me a picture of",
    "an image of",
    "a picture of",
    "image of",
    "picture of",
    "photo of",
    "illustration of",
    "artwork of",
    "create art of",
    "paint",
    "visualize",
];

pub fn is_image_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRIGGER_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

pub fn extract_prompt(message: &str) -> String {
    for phrase in LEAD_IN_PHRASES {
        if let Some(end) = find_ignore_case(message, phrase) {
            let subject = message[end..].trim();
            if subject.is_empty() {
                break;
            }
            return subject.to_string();
        }
    }
    message.to_string()
}

/// Byte offset in `haystack` just past the first case-insensitive occurrence of
/// the lowercase `needle`.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    for (start, _) in haystack.char_indices() {
        let mut expected = needle.chars().peekable();
        for (offset, c) in haystack[start..].char_indices() {
            if !c.to_lowercase().all(|l| expected.next() == Some(l)) {
                break;
            }
            if expected.peek().is_none() {
                return Some(start + offset + c.len_utf8());
            }
        }
    }
    None
}
