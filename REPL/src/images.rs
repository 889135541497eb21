//! Image attachments referenced from text by `{{image:<id>}}` placeholders.
//!
//! Images live in a per-session [`ImageBuffer`] until the next turn is
//! processed. Backends receive the text with placeholders intact plus a
//! snapshot of the buffer, and can walk the message in document order with
//! [`iter_content_parts`] or rebuild it in another format with
//! [`reconstruct_message`].

use std::collections::{BTreeSet, HashMap};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ImageError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{image:([A-Za-z0-9_]+)\}\}").expect("valid placeholder regex"));

/// Images attached to one turn, keyed by id.
pub type Images = HashMap<String, ImageData>;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub data: Vec<u8>,
    pub media_type: String,
    pub timestamp: DateTime<Utc>,
}

impl ImageData {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One segment of a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedContent {
    pub text: String,
    pub parts: Vec<Part>,
    pub image_ids: BTreeSet<String>,
}

/// A part with its image resolved against a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentPart<'a> {
    Text(&'a str),
    Image {
        id: &'a str,
        image: Option<&'a ImageData>,
    },
}

pub fn placeholder(id: &str) -> String {
    format!("{{{{image:{}}}}}", id)
}

/// Detect an image MIME type from its leading bytes.
pub fn detect_media_type(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 {
        return None;
    }

    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if data.starts_with(b"\xff\xd8\xff") {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else if data.starts_with(b"BM") {
        Some("image/bmp")
    } else {
        None
    }
}

/// Split text into literal and placeholder parts. Ids that are not in any
/// buffer are still reported; resolving them is the caller's concern.
pub fn parse_image_references(text: &str) -> ParsedContent {
    let mut parts = Vec::new();
    let mut image_ids = BTreeSet::new();
    let mut last_end = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last_end {
            parts.push(Part::Text(text[last_end..whole.start()].to_string()));
        }
        let id = id.as_str().to_string();
        image_ids.insert(id.clone());
        parts.push(Part::Image(id));
        last_end = whole.end();
    }

    if last_end < text.len() {
        parts.push(Part::Text(text[last_end..].to_string()));
    }

    ParsedContent {
        text: text.to_string(),
        parts,
        image_ids,
    }
}

/// Walk a message in document order, resolving each placeholder.
pub fn iter_content_parts<'a>(
    text: &'a str,
    images: &'a Images,
) -> impl Iterator<Item = ContentPart<'a>> + 'a {
    let mut last_end = 0;
    let mut matches = PLACEHOLDER.captures_iter(text);
    let mut pending: Option<ContentPart<'a>> = None;

    std::iter::from_fn(move || {
        if let Some(part) = pending.take() {
            return Some(part);
        }
        match matches.next() {
            Some(caps) => {
                let whole = caps.get(0)?;
                let id = caps.get(1)?.as_str();
                let image = ContentPart::Image {
                    id,
                    image: images.get(id),
                };
                let before = &text[last_end..whole.start()];
                last_end = whole.end();
                if before.is_empty() {
                    Some(image)
                } else {
                    pending = Some(image);
                    Some(ContentPart::Text(before))
                }
            }
            None if last_end < text.len() => {
                let rest = &text[last_end..];
                last_end = text.len();
                Some(ContentPart::Text(rest))
            }
            None => None,
        }
    })
}

/// Map every part through `formatter` and concatenate the results.
pub fn reconstruct_message<F>(text: &str, images: &Images, mut formatter: F) -> String
where
    F: FnMut(ContentPart<'_>) -> String,
{
    iter_content_parts(text, images)
        .map(|part| formatter(part))
        .collect()
}

/// `data:` URL for an image, for inline embedding.
pub fn data_url(image: &ImageData) -> String {
    format!("data:{};base64,{}", image.media_type, STANDARD.encode(&image.data))
}

/// Message as a JSON array of text/image content blocks. Placeholders whose
/// image is missing are kept as literal text.
pub fn content_blocks(text: &str, images: &Images) -> Value {
    let mut blocks = Vec::new();
    for part in iter_content_parts(text, images) {
        match part {
            ContentPart::Text(text) => blocks.push(json!({ "type": "text", "text": text })),
            ContentPart::Image {
                image: Some(image), ..
            } => blocks.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": image.media_type,
                    "data": STANDARD.encode(&image.data),
                }
            })),
            ContentPart::Image { id, image: None } => {
                blocks.push(json!({ "type": "text", "text": placeholder(id) }))
            }
        }
    }
    Value::Array(blocks)
}

/// Per-session attachment store. Cleared after every processed turn.
#[derive(Debug, Default)]
pub struct ImageBuffer {
    images: Images,
    counter: usize,
}

impl ImageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an image, detecting its type. Unrecognized content is rejected.
    pub fn add(&mut self, data: Vec<u8>) -> Result<String, ImageError> {
        let media_type =
            detect_media_type(&data).ok_or(ImageError::UnrecognizedMediaType { len: data.len() })?;
        Ok(self.add_typed(data, media_type))
    }

    pub fn add_typed(&mut self, data: Vec<u8>, media_type: &str) -> String {
        self.counter += 1;
        let id = format!("img_{:03}", self.counter);
        debug!(id = %id, media_type, bytes = data.len(), "image attached");
        self.images
            .insert(id.clone(), ImageData::new(data, media_type));
        id
    }

    pub fn get(&self, id: &str) -> Option<&ImageData> {
        self.images.get(id)
    }

    pub fn images(&self) -> &Images {
        &self.images
    }

    pub fn snapshot(&self) -> Images {
        self.images.clone()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.images.is_empty() {
            debug!(count = self.images.len(), "clearing image buffer");
        }
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Vec<u8> {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&[0u8; 8]);
        data
    }

    fn buffer_with(ids: &[&str]) -> Images {
        ids.iter()
            .map(|id| (id.to_string(), ImageData::new(id.as_bytes().to_vec(), "image/png")))
            .collect()
    }

    #[test]
    fn test_detect_supported_signatures() {
        let pad = |mut v: Vec<u8>| {
            v.resize(16, 0);
            v
        };
        assert_eq!(detect_media_type(&png()), Some("image/png"));
        assert_eq!(detect_media_type(&pad(b"\xff\xd8\xff\xe0".to_vec())), Some("image/jpeg"));
        assert_eq!(detect_media_type(&pad(b"GIF87a".to_vec())), Some("image/gif"));
        assert_eq!(detect_media_type(&pad(b"GIF89a".to_vec())), Some("image/gif"));
        assert_eq!(detect_media_type(&pad(b"RIFF\0\0\0\0WEBP".to_vec())), Some("image/webp"));
        assert_eq!(detect_media_type(&pad(b"BM".to_vec())), Some("image/bmp"));
    }

    #[test]
    fn test_detect_rejects_short_and_unknown() {
        assert_eq!(detect_media_type(&[0x89, b'P', b'N', b'G', 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(detect_media_type(&[7u8; 20]), None);
        assert_eq!(detect_media_type(b"RIFF\0\0\0\0WAVEfmt "), None);
    }

    #[test]
    fn test_parse_splits_in_document_order() {
        let parsed = parse_image_references("Look at {{image:img_001}} and {{image:img_002}}");

        assert_eq!(
            parsed.parts,
            vec![
                Part::Text("Look at ".to_string()),
                Part::Image("img_001".to_string()),
                Part::Text(" and ".to_string()),
                Part::Image("img_002".to_string()),
            ]
        );
        assert_eq!(parsed.image_ids.len(), 2);
    }

    #[test]
    fn test_parse_dedups_ids_and_ignores_bad_tokens() {
        let parsed = parse_image_references("{{image:a}}{{image:a}} {{image:bad-id}} {{img:x}}");

        assert_eq!(parsed.parts[0], Part::Image("a".to_string()));
        assert_eq!(parsed.parts[1], Part::Image("a".to_string()));
        assert_eq!(parsed.image_ids.iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(
            parsed.parts[2],
            Part::Text(" {{image:bad-id}} {{img:x}}".to_string())
        );
    }

    #[test]
    fn test_parse_plain_text() {
        let parsed = parse_image_references("no images here");
        assert_eq!(parsed.parts, vec![Part::Text("no images here".to_string())]);
        assert!(parsed.image_ids.is_empty());
        assert!(parse_image_references("").parts.is_empty());
    }

    #[test]
    fn test_iterate_resolves_each_placeholder() {
        let images = buffer_with(&["img_001", "img_002"]);
        let text = "{{image:img_001}}first then {{image:img_002}} and {{image:img_001}}.";

        let parts: Vec<_> = iter_content_parts(text, &images).collect();
        let resolved: Vec<_> = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Image { id, image } => Some((*id, *image)),
                ContentPart::Text(_) => None,
            })
            .collect();

        assert_eq!(resolved.len(), 3);
        for (id, image) in resolved {
            assert_eq!(image, images.get(id));
        }

        let stripped: String = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(*t),
                ContentPart::Image { .. } => None,
            })
            .collect();
        assert_eq!(stripped, "first then  and .");
    }

    #[test]
    fn test_iterate_missing_image_is_absent() {
        let images = Images::new();
        let parts: Vec<_> = iter_content_parts("x {{image:gone}}", &images).collect();
        assert_eq!(
            parts,
            vec![
                ContentPart::Text("x "),
                ContentPart::Image {
                    id: "gone",
                    image: None
                }
            ]
        );
    }

    #[test]
    fn test_reconstruct_with_formatter() {
        let images = buffer_with(&["img_001"]);
        let out = reconstruct_message("see {{image:img_001}} / {{image:nope}}", &images, |part| {
            match part {
                ContentPart::Text(t) => t.to_string(),
                ContentPart::Image { image: Some(i), .. } => format!("[{}]", i.media_type),
                ContentPart::Image { id, image: None } => placeholder(id),
            }
        });
        assert_eq!(out, "see [image/png] / {{image:nope}}");
    }

    #[test]
    fn test_reconstruct_identity_round_trips() {
        let images = buffer_with(&["a"]);
        let text = "a{{image:a}}b{{image:zz}}";
        let out = reconstruct_message(text, &images, |part| match part {
            ContentPart::Text(t) => t.to_string(),
            ContentPart::Image { id, .. } => placeholder(id),
        });
        assert_eq!(out, text);
    }

    #[test]
    fn test_content_blocks() {
        let mut images = Images::new();
        images.insert("img_001".to_string(), ImageData::new(vec![1, 2, 3], "image/png"));

        let blocks = content_blocks("hi {{image:img_001}}{{image:lost}}", &images);
        let blocks = blocks.as_array().unwrap();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0]["text"], "hi ");
        assert_eq!(blocks[1]["type"], "image");
        assert_eq!(blocks[1]["source"]["media_type"], "image/png");
        assert_eq!(blocks[1]["source"]["data"], "AQID");
        assert_eq!(blocks[2]["text"], "{{image:lost}}");
    }

    #[test]
    fn test_data_url() {
        let image = ImageData::new(vec![1, 2, 3], "image/gif");
        assert_eq!(data_url(&image), "data:image/gif;base64,AQID");
    }

    #[test]
    fn test_buffer_assigns_sequential_ids() {
        let mut buffer = ImageBuffer::new();
        let first = buffer.add(png()).unwrap();
        let second = buffer.add(png()).unwrap();

        assert_eq!(first, "img_001");
        assert_eq!(second, "img_002");
        assert_eq!(buffer.get("img_001").unwrap().media_type, "image/png");
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.add(png()).unwrap(), "img_003");
    }

    #[test]
    fn test_buffer_rejects_unrecognized() {
        let mut buffer = ImageBuffer::new();
        let err = buffer.add(vec![0u8; 32]).unwrap_err();
        assert!(matches!(err, ImageError::UnrecognizedMediaType { len: 32 }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_placeholder_format() {
        assert_eq!(placeholder("img_007"), "{{image:img_007}}");
    }
}
