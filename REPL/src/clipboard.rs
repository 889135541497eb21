//! `/paste` action: attach a clipboard image or insert clipboard text.

use std::io::Cursor;

use anyhow::anyhow;
use arboard::Clipboard;
use image::{ImageFormat, RgbaImage};
use tracing::{debug, info};

use crate::action::{Action, ActionContext};
use crate::error::ImageError;
use crate::images::placeholder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    /// PNG-encoded image
    Image(Vec<u8>),
    Text(String),
    Empty,
}

pub fn paste_action(prefix: char) -> Action {
    Action::new("paste", "Paste image or text from the clipboard", "Input")
        .handler(|ctx| {
            let content = read_clipboard()?;
            apply_paste(ctx, content)
        })
        .command(format!("{}paste", prefix))
        .usage(format!("{}paste - Paste image or text from the clipboard", prefix))
        .key("f6")
        .keys_description("Paste from clipboard")
}

/// Read the system clipboard, preferring an image over text.
pub fn read_clipboard() -> Result<ClipboardContent, ImageError> {
    let mut clipboard = Clipboard::new().map_err(|e| ImageError::Clipboard(e.to_string()))?;

    if let Ok(img) = clipboard.get_image() {
        debug!(width = img.width, height = img.height, "clipboard holds an image");
        return encode_png(img.width, img.height, img.bytes.into_owned()).map(ClipboardContent::Image);
    }

    match clipboard.get_text() {
        Ok(text) if !text.is_empty() => Ok(ClipboardContent::Text(text)),
        _ => Ok(ClipboardContent::Empty),
    }
}

/// Encode raw RGBA pixels as PNG.
pub fn encode_png(width: usize, height: usize, rgba: Vec<u8>) -> Result<Vec<u8>, ImageError> {
    let (w, h) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(ImageError::Clipboard("clipboard image is too large".to_string())),
    };
    let img = RgbaImage::from_raw(w, h, rgba).ok_or_else(|| {
        ImageError::Clipboard(format!("pixel data does not match {}x{}", width, height))
    })?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ImageError::Clipboard(e.to_string()))?;
    Ok(out.into_inner())
}

pub(crate) fn apply_paste(ctx: &mut ActionContext<'_>, content: ClipboardContent) -> anyhow::Result<()> {
    match content {
        ClipboardContent::Image(png) => {
            let images = ctx
                .images
                .as_deref_mut()
                .ok_or_else(|| anyhow!("no attachment buffer available"))?;
            let id = images.add(png)?;
            info!(id = %id, "pasted image from clipboard");
            insert_or_emit(ctx, &placeholder(&id));
        }
        ClipboardContent::Text(text) => insert_or_emit(ctx, &text),
        ClipboardContent::Empty => ctx.emit("No content in clipboard"),
    }
    Ok(())
}

fn insert_or_emit(ctx: &mut ActionContext<'_>, text: &str) {
    if let Some(buffer) = ctx.buffer.as_deref_mut() {
        buffer.insert_text(text);
        return;
    }
    ctx.emit(text);
}
