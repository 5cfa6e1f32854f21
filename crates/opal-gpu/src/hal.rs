use crate::{DeviceCaps, GpuError};

/// Handle to a backend-owned render target texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u32);

impl TargetId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }
}

/// Device scissor rectangle, bottom-left origin, in target pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

bitflags::bitflags! {
    /// Per-channel color write enable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ColorMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

impl ColorMask {
    pub const RGB: Self = Self::RED.union(Self::GREEN).union(Self::BLUE);
}

/// Which color attachments receive fragment output from the external draw
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawBuffers {
    Color0,
    Color1,
    Both,
}

/// Stencil configuration for the depth-as-alpha passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilMode {
    Disabled,
    /// Always pass, write reference 1: stamp every written pixel.
    StampWrites,
    /// Pass only where the stencil equals 1, keep: gate on stamped pixels.
    PassStamped,
}

/// Destination of a full-screen blit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitDestination {
    /// The framebuffer's current color attachment 0.
    Offscreen,
    /// The visible surface (presented on the next [`RasterBackend::present`]).
    Surface,
}

/// Parameters of a full-screen blit pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlitParams {
    /// Channels written at the destination.
    pub color_mask: ColorMask,
    /// Pass only pixels previously stamped by [`StencilMode::StampWrites`].
    pub stencil_gate: bool,
    /// NDC scale of the destination quad; `[1.0, 1.0]` fills the target,
    /// smaller values letterbox and leave the border untouched.
    pub quad_scale: [f32; 2],
    /// Rasterize the quad as lines instead of filled triangles.
    pub wireframe: bool,
}

impl Default for BlitParams {
    fn default() -> Self {
        Self {
            color_mask: ColorMask::all(),
            stencil_gate: false,
            quad_scale: [1.0, 1.0],
            wireframe: false,
        }
    }
}

/// Snapshot of the draw state consumed by the external draw engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub scissor_test: bool,
    pub scissor_rect: Option<ScissorRect>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull: bool,
    pub blend: bool,
    pub programs: bool,
    pub color_mask: ColorMask,
    pub stencil: StencilMode,
}

impl DrawState {
    /// Known-minimal baseline applied before host-controlled blit passes:
    /// every test disabled, full color writes, no programmable stages.
    pub const BASELINE: Self = Self {
        scissor_test: false,
        scissor_rect: None,
        depth_test: false,
        depth_write: false,
        cull: false,
        blend: false,
        programs: false,
        color_mask: ColorMask::all(),
        stencil: StencilMode::Disabled,
    };
}

/// The device surface the framebuffer core drives.
///
/// All methods take `&mut self`: the emulated GPU is single-threaded and the
/// backend's binding state is the one sanctioned copy of the "current render
/// target" shared with external collaborators.
pub trait RasterBackend {
    fn caps(&self) -> &DeviceCaps;

    // Target lifecycle. Targets are created once at initialization and only
    // recreated on a full reinitialization cycle.
    fn create_color_target(
        &mut self,
        label: &'static str,
        width: u32,
        height: u32,
    ) -> Result<TargetId, GpuError>;
    fn create_depth_target(
        &mut self,
        label: &'static str,
        width: u32,
        height: u32,
        stencil: bool,
    ) -> Result<TargetId, GpuError>;
    fn destroy_target(&mut self, id: TargetId) -> Result<(), GpuError>;

    // Framebuffer attachments. `None` detaches (or, for the binding layer's
    // own wrappers, selects the default target).
    fn attach_color(&mut self, slot: u32, target: Option<TargetId>) -> Result<(), GpuError>;
    fn attach_depth(&mut self, target: Option<TargetId>) -> Result<(), GpuError>;
    /// Completeness check over the current attachments.
    fn verify_framebuffer(&self) -> Result<(), GpuError>;
    fn set_draw_buffers(&mut self, buffers: DrawBuffers);
    fn draw_buffers(&self) -> DrawBuffers;

    /// Route subsequent draws to the off-screen framebuffer.
    fn bind_offscreen(&mut self);
    /// Route subsequent draws to the visible surface.
    fn bind_surface(&mut self);

    // Draw state consumed by the external draw engine.
    fn reset_draw_state(&mut self);
    fn set_color_mask(&mut self, mask: ColorMask);
    fn set_depth(&mut self, test: bool, write: bool);
    fn set_cull(&mut self, enabled: bool);
    fn set_blend(&mut self, enabled: bool);
    fn set_programs_enabled(&mut self, enabled: bool);
    fn set_scissor_test(&mut self, enabled: bool);
    fn set_scissor_rect(&mut self, rect: ScissorRect);
    fn set_stencil(&mut self, mode: StencilMode);
    fn draw_state(&self) -> DrawState;

    /// Clear the stencil plane of the current depth attachment to zero.
    fn clear_stencil(&mut self) -> Result<(), GpuError>;
    /// Clear the current color attachment 0.
    fn clear_color(&mut self, rgba: [f64; 4]) -> Result<(), GpuError>;

    /// Texture-sample `src` across a full-target quad at the destination.
    fn blit(
        &mut self,
        src: TargetId,
        dst: BlitDestination,
        params: &BlitParams,
    ) -> Result<(), GpuError>;

    // Visible surface.
    fn surface_size(&self) -> (u32, u32);
    fn surface_offset(&self) -> (i32, i32);
    fn recreate_surface(&mut self, width: u32, height: u32) -> Result<(), GpuError>;
    /// Present the pending surface frame produced by a
    /// [`BlitDestination::Surface`] blit.
    fn present(&mut self) -> Result<(), GpuError>;

    /// Read back a color target as tightly packed RGBA8, top row first.
    fn read_target_pixels(&mut self, id: TargetId) -> Result<Vec<u8>, GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_disables_everything_but_color_writes() {
        let s = DrawState::BASELINE;
        assert!(!s.scissor_test && !s.depth_test && !s.cull && !s.blend && !s.programs);
        assert!(!s.depth_write);
        assert_eq!(s.color_mask, ColorMask::all());
        assert_eq!(s.stencil, StencilMode::Disabled);
    }

    #[test]
    fn rgb_mask_excludes_alpha() {
        assert!(!ColorMask::RGB.contains(ColorMask::ALPHA));
        assert_eq!(ColorMask::RGB | ColorMask::ALPHA, ColorMask::all());
    }
}
