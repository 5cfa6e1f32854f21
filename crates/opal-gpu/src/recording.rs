use std::collections::HashMap;

use crate::{
    BlitDestination, BlitParams, ColorMask, DeviceCaps, DrawBuffers, DrawState, GpuError,
    RasterBackend, ScissorRect, StencilMode, TargetId,
};

/// One recorded backend invocation.
///
/// State setters are recorded even when redundant; tests assert on exact call
/// sequences to pin down which operations a transition performs.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateColorTarget {
        label: &'static str,
        width: u32,
        height: u32,
    },
    CreateDepthTarget {
        stencil: bool,
    },
    DestroyTarget(TargetId),
    AttachColor {
        slot: u32,
        target: Option<TargetId>,
    },
    AttachDepth(Option<TargetId>),
    SetDrawBuffers(DrawBuffers),
    BindOffscreen,
    BindSurface,
    ResetDrawState,
    SetColorMask(ColorMask),
    SetDepth {
        test: bool,
        write: bool,
    },
    SetCull(bool),
    SetBlend(bool),
    SetPrograms(bool),
    SetScissorTest(bool),
    SetScissorRect(ScissorRect),
    SetStencil(StencilMode),
    ClearStencil,
    ClearColor([f64; 4]),
    Blit {
        src: TargetId,
        dst: BlitDestination,
        params: BlitParams,
    },
    RecreateSurface {
        width: u32,
        height: u32,
    },
    Present,
    ReadTargetPixels(TargetId),
}

#[derive(Debug, Clone, Copy)]
struct StoredTarget {
    width: u32,
    height: u32,
    is_depth: bool,
}

/// Deterministic in-memory [`RasterBackend`].
///
/// Records every call, tracks the same binding/draw state a real device
/// would, and can simulate degraded devices (no stencil, no MRT, failing
/// surface recreation, incomplete multi-target framebuffers). This doubles
/// as a debug hook: hosts can swap it in to trace the exact device-call
/// stream a frame produces.
#[derive(Debug)]
pub struct RecordingBackend {
    caps: DeviceCaps,
    calls: Vec<BackendCall>,

    targets: HashMap<u32, StoredTarget>,
    next_target: u32,

    color_attachments: [Option<TargetId>; 2],
    depth_attachment: Option<TargetId>,
    draw_buffers: DrawBuffers,
    state: DrawState,
    surface_bound: bool,

    surface_size: (u32, u32),
    surface_offset: (i32, i32),

    /// When set, `verify_framebuffer` fails while color attachment 1 is
    /// populated. Simulates a device that cannot render to two targets.
    pub fail_aux_verify: bool,
    /// Number of upcoming `recreate_surface` calls that should fail.
    pub fail_recreates: u32,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps::default())
    }

    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            calls: Vec::new(),
            targets: HashMap::new(),
            next_target: 1,
            color_attachments: [None, None],
            depth_attachment: None,
            draw_buffers: DrawBuffers::Color0,
            state: DrawState::BASELINE,
            surface_bound: false,
            surface_size: (640, 480),
            surface_offset: (0, 0),
            fail_aux_verify: false,
            fail_recreates: 0,
        }
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn color_attachment(&self, slot: u32) -> Option<TargetId> {
        self.color_attachments[slot as usize]
    }

    pub fn depth_attachment(&self) -> Option<TargetId> {
        self.depth_attachment
    }

    pub fn target_alive(&self, id: TargetId) -> bool {
        self.targets.contains_key(&id.as_raw())
    }

    pub fn surface_bound(&self) -> bool {
        self.surface_bound
    }

    fn lookup(&self, id: TargetId) -> Result<StoredTarget, GpuError> {
        self.targets
            .get(&id.as_raw())
            .copied()
            .ok_or(GpuError::UnknownTarget(id.as_raw()))
    }

    fn insert_target(&mut self, width: u32, height: u32, is_depth: bool) -> TargetId {
        let id = TargetId::from_raw(self.next_target);
        self.next_target += 1;
        self.targets.insert(
            id.as_raw(),
            StoredTarget {
                width,
                height,
                is_depth,
            },
        );
        id
    }
}

impl RasterBackend for RecordingBackend {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_color_target(
        &mut self,
        label: &'static str,
        width: u32,
        height: u32,
    ) -> Result<TargetId, GpuError> {
        self.calls.push(BackendCall::CreateColorTarget {
            label,
            width,
            height,
        });
        if width == 0 || height == 0 {
            return Err(GpuError::Backend(
                "target width/height must be non-zero".into(),
            ));
        }
        if width > self.caps.max_texture_dimension || height > self.caps.max_texture_dimension {
            return Err(GpuError::Backend(format!(
                "target {width}x{height} exceeds device limit {}",
                self.caps.max_texture_dimension
            )));
        }
        Ok(self.insert_target(width, height, false))
    }

    fn create_depth_target(
        &mut self,
        _label: &'static str,
        width: u32,
        height: u32,
        stencil: bool,
    ) -> Result<TargetId, GpuError> {
        self.calls.push(BackendCall::CreateDepthTarget { stencil });
        if stencil && !self.caps.has_stencil {
            return Err(GpuError::Unsupported("depth+stencil target"));
        }
        Ok(self.insert_target(width, height, true))
    }

    fn destroy_target(&mut self, id: TargetId) -> Result<(), GpuError> {
        self.calls.push(BackendCall::DestroyTarget(id));
        self.targets
            .remove(&id.as_raw())
            .map(|_| ())
            .ok_or(GpuError::UnknownTarget(id.as_raw()))
    }

    fn attach_color(&mut self, slot: u32, target: Option<TargetId>) -> Result<(), GpuError> {
        self.calls.push(BackendCall::AttachColor { slot, target });
        if slot as usize >= self.color_attachments.len() {
            return Err(GpuError::Backend(format!(
                "color attachment slot {slot} out of range"
            )));
        }
        if let Some(id) = target {
            let stored = self.lookup(id)?;
            if stored.is_depth {
                return Err(GpuError::Backend(
                    "depth target attached to a color slot".into(),
                ));
            }
        }
        self.color_attachments[slot as usize] = target;
        Ok(())
    }

    fn attach_depth(&mut self, target: Option<TargetId>) -> Result<(), GpuError> {
        self.calls.push(BackendCall::AttachDepth(target));
        if let Some(id) = target {
            let stored = self.lookup(id)?;
            if !stored.is_depth {
                return Err(GpuError::Backend(
                    "color target attached as depth".into(),
                ));
            }
        }
        self.depth_attachment = target;
        Ok(())
    }

    fn verify_framebuffer(&self) -> Result<(), GpuError> {
        if self.fail_aux_verify && self.color_attachments[1].is_some() {
            return Err(GpuError::IncompleteFramebuffer(
                "simulated: second color attachment unsupported".into(),
            ));
        }
        let mut dims = None;
        let attached = self
            .color_attachments
            .iter()
            .flatten()
            .copied()
            .chain(self.depth_attachment);
        for id in attached {
            let stored = self.lookup(id)?;
            match dims {
                None => dims = Some((stored.width, stored.height)),
                Some(d) if d != (stored.width, stored.height) => {
                    return Err(GpuError::IncompleteFramebuffer(format!(
                        "attachment dimensions differ: {d:?} vs {}x{}",
                        stored.width, stored.height
                    )));
                }
                Some(_) => {}
            }
        }
        if dims.is_none() {
            return Err(GpuError::IncompleteFramebuffer("no attachments".into()));
        }
        Ok(())
    }

    fn set_draw_buffers(&mut self, buffers: DrawBuffers) {
        self.calls.push(BackendCall::SetDrawBuffers(buffers));
        self.draw_buffers = buffers;
    }

    fn draw_buffers(&self) -> DrawBuffers {
        self.draw_buffers
    }

    fn bind_offscreen(&mut self) {
        self.calls.push(BackendCall::BindOffscreen);
        self.surface_bound = false;
    }

    fn bind_surface(&mut self) {
        self.calls.push(BackendCall::BindSurface);
        self.surface_bound = true;
    }

    fn reset_draw_state(&mut self) {
        self.calls.push(BackendCall::ResetDrawState);
        let rect = self.state.scissor_rect;
        self.state = DrawState::BASELINE;
        // The scissor rectangle survives a reset; only the test toggles.
        self.state.scissor_rect = rect;
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.calls.push(BackendCall::SetColorMask(mask));
        self.state.color_mask = mask;
    }

    fn set_depth(&mut self, test: bool, write: bool) {
        self.calls.push(BackendCall::SetDepth { test, write });
        self.state.depth_test = test;
        self.state.depth_write = write;
    }

    fn set_cull(&mut self, enabled: bool) {
        self.calls.push(BackendCall::SetCull(enabled));
        self.state.cull = enabled;
    }

    fn set_blend(&mut self, enabled: bool) {
        self.calls.push(BackendCall::SetBlend(enabled));
        self.state.blend = enabled;
    }

    fn set_programs_enabled(&mut self, enabled: bool) {
        self.calls.push(BackendCall::SetPrograms(enabled));
        self.state.programs = enabled;
    }

    fn set_scissor_test(&mut self, enabled: bool) {
        self.calls.push(BackendCall::SetScissorTest(enabled));
        self.state.scissor_test = enabled;
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.calls.push(BackendCall::SetScissorRect(rect));
        self.state.scissor_rect = Some(rect);
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        self.calls.push(BackendCall::SetStencil(mode));
        self.state.stencil = mode;
    }

    fn draw_state(&self) -> DrawState {
        self.state
    }

    fn clear_stencil(&mut self) -> Result<(), GpuError> {
        self.calls.push(BackendCall::ClearStencil);
        match self.depth_attachment {
            Some(_) => Ok(()),
            None => Err(GpuError::Backend("no depth attachment to clear".into())),
        }
    }

    fn clear_color(&mut self, rgba: [f64; 4]) -> Result<(), GpuError> {
        self.calls.push(BackendCall::ClearColor(rgba));
        match self.color_attachments[0] {
            Some(_) => Ok(()),
            None => Err(GpuError::Backend("no color attachment to clear".into())),
        }
    }

    fn blit(
        &mut self,
        src: TargetId,
        dst: BlitDestination,
        params: &BlitParams,
    ) -> Result<(), GpuError> {
        self.calls.push(BackendCall::Blit {
            src,
            dst,
            params: *params,
        });
        self.lookup(src)?;
        if dst == BlitDestination::Offscreen && self.color_attachments[0].is_none() {
            return Err(GpuError::Backend("no color attachment to blit into".into()));
        }
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn surface_offset(&self) -> (i32, i32) {
        self.surface_offset
    }

    fn recreate_surface(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        self.calls.push(BackendCall::RecreateSurface { width, height });
        if self.fail_recreates > 0 {
            self.fail_recreates -= 1;
            return Err(GpuError::Surface("simulated recreate failure".into()));
        }
        self.surface_size = (width, height);
        Ok(())
    }

    fn present(&mut self) -> Result<(), GpuError> {
        self.calls.push(BackendCall::Present);
        Ok(())
    }

    fn read_target_pixels(&mut self, id: TargetId) -> Result<Vec<u8>, GpuError> {
        self.calls.push(BackendCall::ReadTargetPixels(id));
        let stored = self.lookup(id)?;
        if stored.is_depth {
            return Err(GpuError::Backend("cannot read back a depth target".into()));
        }
        // Deterministic per-pixel pattern so round-trip tests can check
        // scanline ordering byte for byte.
        let mut pixels = Vec::with_capacity((stored.width * stored.height * 4) as usize);
        for y in 0..stored.height {
            for x in 0..stored.width {
                pixels.extend_from_slice(&[x as u8, y as u8, (x ^ y) as u8, 0xff]);
            }
        }
        Ok(pixels)
    }
}
