/// Host-provided rendering options, consumed read-only by the core.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub fullscreen: bool,
    /// Letterbox the emulated aspect ratio instead of filling the window.
    pub stretch_to_fit: bool,
    /// Rasterize the presentation blit as lines (where the device allows it).
    pub wireframe: bool,
    pub show_fps: bool,
    /// Render the per-frame counter block instead of the bare FPS number.
    pub overlay_stats: bool,
    /// Capture the primary target when the frame counter reaches this value.
    pub save_frame_id: Option<u64>,
    /// Flip scanlines on capture so written images are bottom-up.
    pub flip_screenshots: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fullscreen: false,
            stretch_to_fit: false,
            wireframe: false,
            show_fps: false,
            overlay_stats: false,
            save_frame_id: None,
            flip_screenshots: true,
        }
    }
}

/// Fixed constants of the emulated device's addressable frame.
///
/// These describe the hardware being emulated, not the host display; the
/// defaults match the emulated rasterizer's 640x480 base frame and its
/// scissor-register origin bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub base_width: u32,
    pub base_height: u32,
    pub scissor_bias: i32,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            base_width: 640,
            base_height: 480,
            scissor_bias: 342,
        }
    }
}
