//! Raster backend layer for Opal's fixed-function GPU emulation.
//!
//! This crate provides:
//! - a backend-agnostic model of the emulated device's mutable raster state
//!   (draw buffers, write masks, stencil, scissor) as the [`RasterBackend`]
//!   trait
//! - a `wgpu` implementation ([`WgpuBackend`]) that maps target bindings and
//!   full-screen blit passes onto render passes
//! - a deterministic [`RecordingBackend`] used by the framebuffer core's
//!   tests and by host-side debug hooks
//!
//! The framebuffer/render-mode core (`opal-raster`) drives this trait and
//! never talks to `wgpu` directly.

mod caps;
mod error;
mod hal;
mod recording;
mod stats;
mod wgpu_backend;

pub use caps::{DeviceCaps, MIN_TEXTURE_DIMENSION, MIN_VERTEX_ATTRIBUTES};
pub use error::GpuError;
pub use hal::{
    BlitDestination, BlitParams, ColorMask, DrawBuffers, DrawState, RasterBackend, ScissorRect,
    StencilMode, TargetId,
};
pub use recording::{BackendCall, RecordingBackend};
pub use stats::{BackendStats, BackendStatsSnapshot};
pub use wgpu_backend::WgpuBackend;
