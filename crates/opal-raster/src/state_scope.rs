use opal_gpu::{ColorMask, RasterBackend};

use crate::PixelRegs;

/// Color write mask prescribed by the blend-mode write-enable register bits.
///
/// When neither channel group is enabled no device call is made and the
/// previous mask stays in effect.
pub fn color_mask_from_regs(regs: &PixelRegs) -> Option<ColorMask> {
    match (regs.color_update, regs.alpha_update) {
        (true, true) => Some(ColorMask::all()),
        (false, true) => Some(ColorMask::ALPHA),
        (true, false) => Some(ColorMask::RGB),
        (false, false) => None,
    }
}

/// Scoped reset/restore of the externally owned draw state.
///
/// Construction resets the backend to the known-minimal baseline for a
/// host-controlled pass; dropping the scope restores the state the register
/// mirror prescribes, on every exit path.
pub struct DrawStateScope<'a, B: RasterBackend> {
    backend: &'a mut B,
    cull: bool,
    depth_test: bool,
    depth_write: bool,
    blend: bool,
    color_mask: Option<ColorMask>,
}

impl<'a, B: RasterBackend> DrawStateScope<'a, B> {
    pub fn begin(backend: &'a mut B, regs: &PixelRegs) -> Self {
        backend.reset_draw_state();
        Self {
            backend,
            cull: regs.cull_enable,
            depth_test: regs.depth_test,
            depth_write: regs.depth_write,
            blend: regs.blend_enable,
            color_mask: color_mask_from_regs(regs),
        }
    }

    pub fn backend(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: RasterBackend> Drop for DrawStateScope<'_, B> {
    fn drop(&mut self) {
        let backend = &mut *self.backend;
        backend.set_scissor_test(true);
        if self.cull {
            backend.set_cull(true);
        }
        backend.set_depth(self.depth_test, self.depth_write);
        if self.blend {
            backend.set_blend(true);
        }
        backend.set_programs_enabled(true);
        if let Some(mask) = self.color_mask {
            backend.set_color_mask(mask);
        }
    }
}
