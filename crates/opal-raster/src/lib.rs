//! Framebuffer, render-target, and render-mode core of the emulated GPU.
//!
//! The emulated device interleaves color, depth, and alpha output through a
//! small set of hardware registers. This crate translates that model into
//! backend operations:
//!
//! - [`EfbTargets`] owns the off-screen color/depth/auxiliary targets and the
//!   attachment bindings that stand in for the device's framebuffer object
//! - [`EfbRenderer`] runs the render-mode state machine
//!   (Normal / Z-buffer-only / Z-buffer-alpha), the auxiliary-target flush,
//!   and the end-of-frame presentation pipeline
//! - [`scissor`] converts scissor register values into device rectangles
//! - the diagnostics overlay and screenshot capture ride along with
//!   presentation
//!
//! Everything is driven through `opal-gpu`'s [`RasterBackend`] trait; the
//! crate never talks to `wgpu` directly.

mod collab;
mod config;
mod overlay;
mod regs;
mod renderer;
pub mod scissor;
mod screenshot;
mod state_scope;
mod stats;
mod targets;

pub use collab::{
    DiscardScreenshots, NoopStages, NoopText, ScreenshotSink, TextRenderer, TextureStages,
};
pub use config::{RenderConfig, TargetSpec};
pub use regs::{PixelRegs, ScissorRegs};
pub use renderer::{EfbRenderer, FrameEnv, RenderMode, AUX_TARGET_FRAMES};
pub use screenshot::flip_scanlines;
pub use state_scope::{color_mask_from_regs, DrawStateScope};
pub use stats::FrameStats;
pub use targets::EfbTargets;

pub use opal_gpu::{ColorMask, GpuError, RasterBackend, ScissorRect, TargetId};
