//! External collaborator interfaces.
//!
//! Texture caching, text rasterization, and image encoding live outside this
//! core; these traits are the surfaces it calls through.

use opal_gpu::TargetId;

/// Texture/shader cache collaborator.
pub trait TextureStages {
    /// Bind a render target as the sampling source for a texture stage.
    fn bind_stage(&mut self, stage: u32, target: TargetId);
    fn disable_stage(&mut self, stage: u32);
    /// Evict stale cache entries; called once per presented frame.
    fn cleanup(&mut self);
}

/// Text rasterizer collaborator for the diagnostics overlay.
pub trait TextRenderer {
    /// Draw `text` at pixel position (`x`, `y`). `color` is packed
    /// `0xAARRGGBB`.
    fn render_text(&mut self, text: &str, x: i32, y: i32, color: u32);
}

/// Receives captured framebuffer contents; the image file format is the
/// sink's concern.
pub trait ScreenshotSink {
    fn write_image(&mut self, width: u32, height: u32, pixels: &[u8]) -> anyhow::Result<()>;
}

/// No-op texture stage collaborator for hosts without a texture cache.
#[derive(Debug, Default)]
pub struct NoopStages;

impl TextureStages for NoopStages {
    fn bind_stage(&mut self, _stage: u32, _target: TargetId) {}
    fn disable_stage(&mut self, _stage: u32) {}
    fn cleanup(&mut self) {}
}

/// No-op text rasterizer; overlay output is dropped.
#[derive(Debug, Default)]
pub struct NoopText;

impl TextRenderer for NoopText {
    fn render_text(&mut self, _text: &str, _x: i32, _y: i32, _color: u32) {}
}

/// Screenshot sink that discards captures.
#[derive(Debug, Default)]
pub struct DiscardScreenshots;

impl ScreenshotSink for DiscardScreenshots {
    fn write_image(&mut self, _width: u32, _height: u32, _pixels: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}
