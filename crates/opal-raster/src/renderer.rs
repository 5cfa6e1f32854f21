use opal_gpu::{
    BlitDestination, BlitParams, ColorMask, DrawBuffers, GpuError, RasterBackend, StencilMode,
};

use crate::collab::{ScreenshotSink, TextRenderer, TextureStages};
use crate::overlay::{stats_text, Overlay, STATS_COLOR};
use crate::scissor;
use crate::screenshot::flip_scanlines;
use crate::state_scope::{color_mask_from_regs, DrawStateScope};
use crate::targets::EfbTargets;
use crate::{FrameStats, PixelRegs, RenderConfig, TargetSpec};

/// Presented frames the auxiliary target stays bound after being requested.
pub const AUX_TARGET_FRAMES: u32 = 10;

const TEXTURE_STAGES: u32 = 8;

/// Active render-target/write configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Color and depth against the primary targets.
    Normal,
    /// Depth rendered as color into the auxiliary target.
    ZBufferOnly,
    /// Depth-as-color with stencil stamping, later resolved into the primary
    /// target's alpha channel.
    ZBufferAlpha,
}

/// Collaborators and per-frame inputs handed to [`EfbRenderer::present`].
pub struct FrameEnv<'a> {
    pub regs: &'a PixelRegs,
    pub stats: &'a mut FrameStats,
    pub stages: &'a mut dyn TextureStages,
    pub text: &'a mut dyn TextRenderer,
    pub screenshots: &'a mut dyn ScreenshotSink,
    pub now_ms: u64,
}

/// The renderer context: owns the backend, the framebuffer targets, and all
/// render-mode and presentation bookkeeping. One instance per session.
pub struct EfbRenderer<B: RasterBackend> {
    backend: B,
    targets: EfbTargets,
    spec: TargetSpec,
    config: RenderConfig,
    mode: RenderMode,
    aux_countdown: u32,
    frame_count: u64,
    overlay: Overlay,
    was_fullscreen: bool,
}

impl<B: RasterBackend> EfbRenderer<B> {
    /// Set up the framebuffer targets and initial draw state.
    ///
    /// `width`/`height` is the fixed internal rendering resolution, not the
    /// window size. Fails on missing baseline capabilities or color-target
    /// allocation failure; everything else degrades.
    pub fn initialize(
        mut backend: B,
        spec: TargetSpec,
        config: RenderConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let targets = EfbTargets::initialize(&mut backend, width, height)?;
        if !targets.has_stencil() {
            tracing::warn!("stencil unavailable; depth-alpha render modes run as depth-only");
        }
        if config.wireframe && !backend.caps().supports_wireframe {
            tracing::warn!("wireframe overlay unavailable on this device");
        }

        backend.bind_offscreen();
        backend.set_scissor_test(true);
        if let Err(err) = backend.clear_color([0.0; 4]) {
            tracing::error!(%err, "clearing primary target at initialization");
        }

        let was_fullscreen = config.fullscreen;
        Ok(Self {
            backend,
            targets,
            spec,
            config,
            mode: RenderMode::Normal,
            aux_countdown: 0,
            frame_count: 0,
            overlay: Overlay::default(),
            was_fullscreen,
        })
    }

    pub fn render_mode(&self) -> RenderMode {
        self.mode
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn targets(&self) -> &EfbTargets {
        &self.targets
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    /// The auxiliary target, while its countdown keeps it bound.
    pub fn active_aux_target(&self) -> Option<opal_gpu::TargetId> {
        if self.aux_countdown > 0 {
            self.targets.aux()
        } else {
            None
        }
    }

    pub fn aux_target_active(&self) -> bool {
        self.active_aux_target().is_some()
    }

    /// Bind the auxiliary target at attachment slot 1 and arm its countdown.
    ///
    /// Called on every transition into [`RenderMode::Normal`] and by the
    /// host's register decoder when a depth-as-color copy is requested.
    /// No-op on devices without the auxiliary target.
    pub fn request_aux_target(&mut self) {
        let Some(aux) = self.targets.aux() else {
            tracing::debug!("auxiliary target requested but unavailable");
            return;
        };
        self.aux_countdown = AUX_TARGET_FRAMES;
        self.backend.set_draw_buffers(DrawBuffers::Both);
        if let Err(err) = self.backend.attach_color(1, Some(aux)) {
            tracing::error!(%err, "attaching auxiliary target");
        }
        debug_assert!(self.backend.verify_framebuffer().is_ok());
    }

    /// Transition the render-mode state machine.
    ///
    /// Self-transitions are no-ops. Requesting [`RenderMode::ZBufferAlpha`]
    /// without stencil support silently runs as [`RenderMode::ZBufferOnly`].
    /// Leaving [`RenderMode::Normal`] requires the auxiliary target armed and
    /// depth writes enabled; violations abort in debug builds.
    pub fn set_render_mode(
        &mut self,
        mode: RenderMode,
        regs: &PixelRegs,
        stages: &mut dyn TextureStages,
    ) {
        let mode = if mode == RenderMode::ZBufferAlpha && !self.targets.has_stencil() {
            RenderMode::ZBufferOnly
        } else {
            mode
        };
        if self.mode == mode {
            return;
        }

        match mode {
            RenderMode::Normal => {
                if self.mode == RenderMode::ZBufferAlpha {
                    self.flush_aux_to_primary(regs, stages);
                    self.backend.set_stencil(StencilMode::Disabled);
                }
                if let Some(mask) = color_mask_from_regs(regs) {
                    self.backend.set_color_mask(mask);
                }
                self.targets.bind_color(&mut self.backend, None);
                self.request_aux_target();
            }
            _ if self.mode == RenderMode::Normal => {
                debug_assert!(
                    self.aux_target_active(),
                    "z-buffer render modes require the auxiliary target"
                );
                debug_assert!(
                    regs.depth_write,
                    "z-buffer render modes require depth writes enabled"
                );
                if mode == RenderMode::ZBufferAlpha {
                    self.begin_stencil_stamp();
                }
                self.backend.set_draw_buffers(DrawBuffers::Color1);
                self.backend.set_color_mask(ColorMask::all());
            }
            RenderMode::ZBufferOnly => {
                debug_assert!(self.mode == RenderMode::ZBufferAlpha);
                debug_assert!(self.targets.has_stencil());
                // Resolve the stamped alpha, then continue depth-as-color
                // against the auxiliary target directly.
                self.flush_aux_to_primary(regs, stages);
                self.backend.set_stencil(StencilMode::Disabled);
                self.targets
                    .bind_color(&mut self.backend, self.targets.aux());
                self.backend.set_draw_buffers(DrawBuffers::Color0);
            }
            RenderMode::ZBufferAlpha => {
                debug_assert!(self.mode == RenderMode::ZBufferOnly);
                self.begin_stencil_stamp();
            }
        }

        self.mode = mode;
    }

    fn begin_stencil_stamp(&mut self) {
        self.backend.set_stencil(StencilMode::StampWrites);
        if let Err(err) = self.backend.clear_stencil() {
            tracing::error!(%err, "clearing stencil for depth-alpha stamping");
        }
    }

    /// Resolve the auxiliary target into the primary target's alpha channel
    /// through the stencil gate. The only path that moves data between the
    /// two off-screen targets; must run before any transition that drops
    /// auxiliary content.
    fn flush_aux_to_primary(&mut self, regs: &PixelRegs, stages: &mut dyn TextureStages) {
        let Some(aux) = self.targets.aux() else {
            return;
        };
        let quad_scale = self.flush_quad_scale();

        let mut scope = DrawStateScope::begin(&mut self.backend, regs);
        self.targets.bind_color(scope.backend(), None);
        scope.backend().set_draw_buffers(DrawBuffers::Color0);
        scope.backend().set_color_mask(ColorMask::ALPHA);

        stages.bind_stage(0, aux);
        for stage in 1..TEXTURE_STAGES {
            stages.disable_stage(stage);
        }

        scope.backend().set_stencil(StencilMode::PassStamped);
        let params = BlitParams {
            color_mask: ColorMask::ALPHA,
            stencil_gate: true,
            quad_scale,
            wireframe: false,
        };
        if let Err(err) = scope.backend().blit(aux, BlitDestination::Offscreen, &params) {
            tracing::error!(%err, "flushing auxiliary target into primary alpha");
        }
    }

    /// Destination quad scale for the flush pass: full-target, or aspect
    /// corrected when stretch-to-fit is active.
    fn flush_quad_scale(&self) -> [f32; 2] {
        if !self.config.stretch_to_fit {
            return [1.0, 1.0];
        }
        let (sw, sh) = self.backend.surface_size();
        let fw = self.spec.base_width as f32 / sw.max(1) as f32;
        let fh = self.spec.base_height as f32 / sh.max(1) as f32;
        let max = fw.max(fh);
        [fw / max, fh / max]
    }

    /// Convert the scissor registers and issue the device scissor rectangle.
    ///
    /// Returns whether a rectangle was issued; an empty register window
    /// issues nothing.
    pub fn apply_scissor(&mut self, regs: &PixelRegs) -> bool {
        let (w, h) = self.targets.size();
        let scale_x = w as f32 / self.spec.base_width as f32;
        let scale_y = h as f32 / self.spec.base_height as f32;
        match scissor::scissor_from_regs(&regs.scissor, &self.spec, scale_x, scale_y, h) {
            Some(rect) => {
                self.backend.set_scissor_rect(rect);
                true
            }
            None => false,
        }
    }

    /// Queue a transient overlay message for `duration_ms`.
    pub fn add_message(&mut self, text: impl Into<String>, duration_ms: u64, now_ms: u64) {
        self.overlay.add_message(text, duration_ms, now_ms);
    }

    /// End-of-frame presentation.
    ///
    /// Forces [`RenderMode::Normal`], resolves the primary target onto the
    /// visible surface, renders the diagnostics overlay, presents, resets
    /// per-frame bookkeeping, and rebinds the off-screen framebuffer. The
    /// frame counter increments exactly once per call, regardless of errors
    /// encountered along the way.
    pub fn present(&mut self, env: &mut FrameEnv<'_>) {
        self.set_render_mode(RenderMode::Normal, env.regs, env.stages);

        let wireframe = self.config.wireframe && self.backend.caps().supports_wireframe;
        let primary = self.targets.color();

        {
            let mut scope = DrawStateScope::begin(&mut self.backend, env.regs);
            scope.backend().bind_surface();

            if let Some(primary) = primary {
                env.stages.bind_stage(0, primary);
                for stage in 1..TEXTURE_STAGES {
                    env.stages.disable_stage(stage);
                }
                let params = BlitParams {
                    wireframe,
                    ..BlitParams::default()
                };
                if let Err(err) = scope
                    .backend()
                    .blit(primary, BlitDestination::Surface, &params)
                {
                    tracing::error!(%err, "resolving primary target onto the surface");
                }
                env.stages.disable_stage(0);
            }

            let fps = self.overlay.tick_fps(env.now_ms);
            if self.config.overlay_stats {
                let text = stats_text(env.stats, self.config.show_fps.then_some(fps));
                env.text.render_text(&text, 20, 20, STATS_COLOR);
            } else if self.config.show_fps {
                env.text.render_text(&format!("{fps}\n"), 20, 20, STATS_COLOR);
            }
            self.overlay.process_messages(env.now_ms, env.text);

            if let Err(err) = scope.backend().present() {
                tracing::error!(%err, "presenting frame");
            }
        }

        if self.config.save_frame_id == Some(self.frame_count) {
            if let Err(err) = self.save_render_target(env.screenshots) {
                tracing::error!(%err, "capturing render target screenshot");
            }
        }

        self.frame_count += 1;

        env.stats.reset_frame();
        env.stages.cleanup();

        self.backend.bind_offscreen();

        if self.aux_countdown > 0 {
            self.aux_countdown -= 1;
            if self.aux_countdown == 0 {
                self.backend.set_draw_buffers(DrawBuffers::Color0);
                if let Err(err) = self.backend.attach_color(1, None) {
                    tracing::error!(%err, "detaching auxiliary target");
                }
                self.set_render_mode(RenderMode::Normal, env.regs, env.stages);
            }
        }
    }

    /// Read back the primary target and hand it to the screenshot sink,
    /// flipping scanlines when the configuration asks for bottom-up output.
    pub fn save_render_target(&mut self, sink: &mut dyn ScreenshotSink) -> anyhow::Result<()> {
        let primary = self
            .targets
            .color()
            .ok_or_else(|| anyhow::anyhow!("primary target released"))?;
        let mut pixels = self.backend.read_target_pixels(primary)?;
        let (width, height) = self.targets.size();
        if self.config.flip_screenshots {
            flip_scanlines(&mut pixels, width, height);
        }
        sink.write_image(width, height, &pixels)
    }

    /// Recreate the rendering surface at a new size, reverting to the
    /// previous size on failure.
    ///
    /// When the revert fails too the session cannot continue; the fatal
    /// error is returned for the host to act on.
    pub fn reinit_view(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        let (old_width, old_height) = self.backend.surface_size();
        let width = width.max(16);
        let height = height.max(16);

        if let Err(err) = self.backend.recreate_surface(width, height) {
            tracing::error!(%err, old_width, old_height, "failed to recreate the rendering surface; reverting");
            self.backend
                .recreate_surface(old_width, old_height)
                .map_err(|revert_err| {
                    tracing::error!(%revert_err, "revert failed; rendering surface unrecoverable");
                    GpuError::SurfaceReinitFailed
                })?;
        }

        if self.was_fullscreen && !self.config.fullscreen {
            tracing::debug!("left fullscreen during surface reinitialization");
        }
        self.was_fullscreen = self.config.fullscreen;
        Ok(())
    }

    /// Release all device resources; safe to call multiple times.
    pub fn shutdown(&mut self) {
        self.targets.shutdown(&mut self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{DiscardScreenshots, NoopText};
    use opal_gpu::{BackendCall, DeviceCaps, RecordingBackend, TargetId};

    #[derive(Default)]
    struct RecordingStages {
        bound: Vec<(u32, TargetId)>,
        disabled: Vec<u32>,
        cleanups: u32,
    }

    impl TextureStages for RecordingStages {
        fn bind_stage(&mut self, stage: u32, target: TargetId) {
            self.bound.push((stage, target));
        }

        fn disable_stage(&mut self, stage: u32) {
            self.disabled.push(stage);
        }

        fn cleanup(&mut self) {
            self.cleanups += 1;
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        images: Vec<(u32, u32, Vec<u8>)>,
    }

    impl ScreenshotSink for CollectingSink {
        fn write_image(&mut self, width: u32, height: u32, pixels: &[u8]) -> anyhow::Result<()> {
            self.images.push((width, height, pixels.to_vec()));
            Ok(())
        }
    }

    fn regs() -> PixelRegs {
        PixelRegs {
            depth_test: true,
            depth_write: true,
            color_update: true,
            alpha_update: true,
            ..PixelRegs::default()
        }
    }

    fn renderer_with_caps(caps: DeviceCaps) -> EfbRenderer<RecordingBackend> {
        EfbRenderer::initialize(
            RecordingBackend::with_caps(caps),
            TargetSpec::default(),
            RenderConfig::default(),
            640,
            480,
        )
        .unwrap()
    }

    fn renderer() -> EfbRenderer<RecordingBackend> {
        renderer_with_caps(DeviceCaps::default())
    }

    fn present_once(r: &mut EfbRenderer<RecordingBackend>, now_ms: u64) {
        let regs = regs();
        let mut stats = FrameStats::default();
        let mut stages = RecordingStages::default();
        let mut text = NoopText;
        let mut shots = DiscardScreenshots;
        let mut env = FrameEnv {
            regs: &regs,
            stats: &mut stats,
            stages: &mut stages,
            text: &mut text,
            screenshots: &mut shots,
            now_ms,
        };
        r.present(&mut env);
    }

    #[test]
    fn repeated_mode_requests_issue_no_device_calls() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);
        assert_eq!(r.render_mode(), RenderMode::ZBufferOnly);

        let calls = r.backend.call_count();
        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);
        assert_eq!(r.backend.call_count(), calls);

        r.set_render_mode(RenderMode::Normal, &regs, &mut stages);
        let calls = r.backend.call_count();
        r.set_render_mode(RenderMode::Normal, &regs, &mut stages);
        assert_eq!(r.backend.call_count(), calls);
    }

    #[test]
    fn missing_stencil_downgrades_alpha_mode() {
        let caps = DeviceCaps {
            has_stencil: false,
            ..DeviceCaps::default()
        };
        let mut r = renderer_with_caps(caps);
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.set_render_mode(RenderMode::ZBufferAlpha, &regs, &mut stages);
        assert_eq!(r.render_mode(), RenderMode::ZBufferOnly);
        assert!(!r
            .backend
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::SetStencil(StencilMode::StampWrites))));
    }

    #[test]
    fn entering_zbuffer_only_routes_draws_to_slot_one() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.backend.clear_calls();
        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);

        assert_eq!(r.backend.draw_buffers(), DrawBuffers::Color1);
        assert_eq!(r.backend.draw_state().color_mask, ColorMask::all());
        assert_eq!(r.backend.color_attachment(1), r.targets().aux());
    }

    #[test]
    fn entering_zbuffer_alpha_stamps_the_stencil() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.backend.clear_calls();
        r.set_render_mode(RenderMode::ZBufferAlpha, &regs, &mut stages);

        let calls = r.backend.calls();
        let stamp = calls
            .iter()
            .position(|c| matches!(c, BackendCall::SetStencil(StencilMode::StampWrites)))
            .expect("stencil stamping enabled");
        let clear = calls
            .iter()
            .position(|c| matches!(c, BackendCall::ClearStencil))
            .expect("stencil cleared");
        assert!(stamp < clear);
        assert_eq!(r.backend.draw_buffers(), DrawBuffers::Color1);
    }

    #[test]
    fn alpha_to_only_flushes_and_rebinds_aux_as_color() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.set_render_mode(RenderMode::ZBufferAlpha, &regs, &mut stages);
        r.backend.clear_calls();
        stages.bound.clear();

        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);

        let aux = r.targets().aux().unwrap();
        let blit = r
            .backend
            .calls()
            .iter()
            .find_map(|c| match c {
                BackendCall::Blit { src, dst, params } => Some((*src, *dst, *params)),
                _ => None,
            })
            .expect("flush blit issued");
        assert_eq!(blit.0, aux);
        assert_eq!(blit.1, BlitDestination::Offscreen);
        assert_eq!(blit.2.color_mask, ColorMask::ALPHA);
        assert!(blit.2.stencil_gate);

        // Texture stage 0 sampled the auxiliary target, the rest were off.
        assert_eq!(stages.bound, vec![(0, aux)]);
        assert_eq!(stages.disabled, (1..8).collect::<Vec<_>>());

        // Afterwards the auxiliary target is the color destination.
        assert_eq!(r.backend.color_attachment(0), Some(aux));
        assert_eq!(r.backend.draw_buffers(), DrawBuffers::Color0);
        assert_eq!(r.backend.draw_state().stencil, StencilMode::Disabled);
    }

    #[test]
    fn round_trip_restores_register_color_mask() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.backend.set_color_mask(ColorMask::all());
        let before = r.backend.draw_state().color_mask;

        r.request_aux_target();
        r.set_render_mode(RenderMode::ZBufferAlpha, &regs, &mut stages);
        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);
        r.set_render_mode(RenderMode::Normal, &regs, &mut stages);

        assert_eq!(r.backend.draw_state().color_mask, before);
        assert_eq!(r.backend.color_attachment(0), r.targets().color());
    }

    #[test]
    fn returning_to_normal_rearms_the_countdown() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);
        r.set_render_mode(RenderMode::Normal, &regs, &mut stages);
        assert!(r.aux_target_active());
        assert_eq!(r.backend.draw_buffers(), DrawBuffers::Both);
        assert_eq!(r.backend.color_attachment(1), r.targets().aux());
    }

    #[test]
    fn countdown_expiry_detaches_aux_and_forces_normal() {
        let mut r = renderer();
        let regs = regs();
        let mut stages = RecordingStages::default();

        r.request_aux_target();
        r.set_render_mode(RenderMode::ZBufferOnly, &regs, &mut stages);

        // The first present forces Normal, which re-arms the countdown.
        for frame in 0..=AUX_TARGET_FRAMES {
            present_once(&mut r, frame as u64 * 16);
        }

        assert_eq!(r.render_mode(), RenderMode::Normal);
        assert!(!r.aux_target_active());
        assert_eq!(r.backend.color_attachment(1), None);
        assert_eq!(r.backend.draw_buffers(), DrawBuffers::Color0);
        // The target itself survives for the next excursion.
        assert!(r.targets().aux().is_some());
    }

    #[test]
    fn present_increments_frame_counter_exactly_once() {
        let mut r = renderer();
        assert_eq!(r.frame_count(), 0);
        present_once(&mut r, 0);
        assert_eq!(r.frame_count(), 1);
        present_once(&mut r, 16);
        assert_eq!(r.frame_count(), 2);
    }

    #[test]
    fn present_increments_frame_counter_even_when_degraded() {
        let mut r = renderer();
        // Shut down targets mid-session; presentation must still count.
        r.shutdown();
        present_once(&mut r, 0);
        assert_eq!(r.frame_count(), 1);
    }

    #[test]
    fn present_resets_stats_and_cleans_caches() {
        let mut r = renderer();
        let regs = regs();
        let mut stats = FrameStats {
            draw_calls: 9,
            shader_loads: 3,
            primitives: 500,
        };
        let mut stages = RecordingStages::default();
        let mut text = NoopText;
        let mut shots = DiscardScreenshots;
        let mut env = FrameEnv {
            regs: &regs,
            stats: &mut stats,
            stages: &mut stages,
            text: &mut text,
            screenshots: &mut shots,
            now_ms: 0,
        };
        r.present(&mut env);

        assert_eq!(stats, FrameStats::default());
        assert_eq!(stages.cleanups, 1);
        // Presentation sampled the primary target on stage 0.
        assert_eq!(stages.bound, vec![(0, r.targets().color().unwrap())]);
        // The off-screen framebuffer is bound for the next frame's draws.
        assert!(!r.backend.surface_bound());
    }

    #[test]
    fn present_blits_primary_to_surface_and_presents() {
        let mut r = renderer();
        present_once(&mut r, 0);

        let calls = r.backend.calls();
        let blit = calls
            .iter()
            .position(|c| {
                matches!(
                    c,
                    BackendCall::Blit {
                        dst: BlitDestination::Surface,
                        ..
                    }
                )
            })
            .expect("surface blit issued");
        let present = calls
            .iter()
            .position(|c| matches!(c, BackendCall::Present))
            .expect("surface presented");
        assert!(blit < present);
    }

    #[test]
    fn wireframe_toggle_respects_device_support() {
        let mut r = renderer();
        r.config_mut().wireframe = true;
        present_once(&mut r, 0);
        assert!(r.backend.calls().iter().any(|c| matches!(
            c,
            BackendCall::Blit {
                dst: BlitDestination::Surface,
                params: BlitParams {
                    wireframe: true,
                    ..
                },
                ..
            }
        )));

        let caps = DeviceCaps {
            supports_wireframe: false,
            ..DeviceCaps::default()
        };
        let mut r = renderer_with_caps(caps);
        r.config_mut().wireframe = true;
        present_once(&mut r, 0);
        assert!(!r.backend.calls().iter().any(|c| matches!(
            c,
            BackendCall::Blit {
                params: BlitParams {
                    wireframe: true,
                    ..
                },
                ..
            }
        )));
    }

    #[test]
    fn empty_scissor_issues_no_device_call() {
        let mut r = renderer();
        let mut regs = regs();
        regs.scissor = crate::ScissorRegs {
            tl_x: 900,
            tl_y: 342,
            br_x: 400,
            br_y: 821,
            offset_x: 171,
            offset_y: 171,
        };
        let calls = r.backend.call_count();
        assert!(!r.apply_scissor(&regs));
        assert_eq!(r.backend.call_count(), calls);
    }

    #[test]
    fn valid_scissor_issues_the_transformed_rect() {
        let mut r = renderer();
        let mut regs = regs();
        regs.scissor = crate::ScissorRegs {
            tl_x: 342,
            tl_y: 342,
            br_x: 981,
            br_y: 821,
            offset_x: 171,
            offset_y: 171,
        };
        assert!(r.apply_scissor(&regs));
        let rect = r.backend.draw_state().scissor_rect.unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 480 - 479);
        assert_eq!(rect.width, 639);
        assert_eq!(rect.height, 479);
    }

    #[test]
    fn screenshot_capture_round_trips_with_scanline_flip() {
        let mut r = renderer();
        r.config_mut().save_frame_id = Some(0);
        r.config_mut().flip_screenshots = true;

        let regs = regs();
        let mut stats = FrameStats::default();
        let mut stages = RecordingStages::default();
        let mut text = NoopText;
        let mut sink = CollectingSink::default();
        let mut env = FrameEnv {
            regs: &regs,
            stats: &mut stats,
            stages: &mut stages,
            text: &mut text,
            screenshots: &mut sink,
            now_ms: 0,
        };
        r.present(&mut env);
        // Only frame 0 matches the configured id.
        let mut env = FrameEnv {
            regs: &regs,
            stats: &mut stats,
            stages: &mut stages,
            text: &mut text,
            screenshots: &mut sink,
            now_ms: 16,
        };
        r.present(&mut env);

        assert_eq!(sink.images.len(), 1);
        let (width, height, ref pixels) = sink.images[0];
        assert_eq!((width, height), (640, 480));
        assert_eq!(pixels.len(), 640 * 480 * 4);

        // Undoing the flip yields the backend's own readback bytes.
        let mut unflipped = pixels.clone();
        flip_scanlines(&mut unflipped, width, height);
        let direct = r
            .backend
            .read_target_pixels(r.targets().color().unwrap())
            .unwrap();
        assert_eq!(unflipped, direct);
    }

    #[test]
    fn overlay_messages_render_during_presentation() {
        #[derive(Default)]
        struct CountingText(u32);
        impl TextRenderer for CountingText {
            fn render_text(&mut self, _text: &str, _x: i32, _y: i32, _color: u32) {
                self.0 += 1;
            }
        }

        let mut r = renderer();
        r.add_message("hello", 5000, 0);

        let regs = regs();
        let mut stats = FrameStats::default();
        let mut stages = crate::NoopStages;
        let mut text = CountingText::default();
        let mut shots = DiscardScreenshots;
        let mut env = FrameEnv {
            regs: &regs,
            stats: &mut stats,
            stages: &mut stages,
            text: &mut text,
            screenshots: &mut shots,
            now_ms: 100,
        };
        r.present(&mut env);
        // Shadow plus body.
        assert_eq!(text.0, 2);
    }

    #[test]
    fn reinit_view_reverts_on_failure() {
        let mut r = renderer();
        r.backend.fail_recreates = 1;
        assert!(r.reinit_view(800, 600).is_ok());
        assert_eq!(r.backend.surface_size(), (640, 480));

        r.backend.fail_recreates = 2;
        let err = r.reinit_view(800, 600).unwrap_err();
        assert!(matches!(err, GpuError::SurfaceReinitFailed));
    }

    #[test]
    fn reinit_view_clamps_tiny_sizes() {
        let mut r = renderer();
        r.reinit_view(2, 2).unwrap();
        assert_eq!(r.backend.surface_size(), (16, 16));
    }

    #[test]
    fn shutdown_releases_targets_once() {
        let mut r = renderer();
        r.shutdown();
        let calls = r.backend.call_count();
        r.shutdown();
        assert_eq!(r.backend.call_count(), calls);
    }
}
