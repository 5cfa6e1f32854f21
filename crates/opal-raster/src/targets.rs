use opal_gpu::{DrawBuffers, GpuError, RasterBackend, TargetId};

/// The framebuffer object: off-screen color, depth, and optional auxiliary
/// depth-as-color targets, sized to the fixed internal rendering resolution.
///
/// Created once at initialization and only recreated on a full
/// reinitialization cycle. The auxiliary target exists only on devices that
/// can render to two color attachments at once.
#[derive(Debug)]
pub struct EfbTargets {
    width: u32,
    height: u32,
    color: Option<TargetId>,
    depth: Option<TargetId>,
    aux: Option<TargetId>,
    has_stencil: bool,
}

impl EfbTargets {
    /// Allocate the targets and establish the initial attachments.
    ///
    /// Color-target failure is fatal. A failed depth+stencil allocation
    /// degrades to depth-only; an auxiliary target that cannot form a
    /// complete framebuffer is dropped. Both degradations are recoverable
    /// and logged once.
    pub fn initialize<B: RasterBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        backend.caps().verify_baseline()?;

        let color = backend.create_color_target("opal-raster.color target", width, height)?;

        let mut has_stencil = backend.caps().has_stencil;
        let depth = if has_stencil {
            match backend.create_depth_target("opal-raster.depth target", width, height, true) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(%err, "depth+stencil allocation failed; stencil render modes disabled");
                    has_stencil = false;
                    backend.create_depth_target("opal-raster.depth target", width, height, false)?
                }
            }
        } else {
            backend.create_depth_target("opal-raster.depth target", width, height, false)?
        };

        backend.attach_color(0, Some(color))?;
        backend.attach_depth(Some(depth))?;
        backend.verify_framebuffer()?;

        let mut aux = None;
        if backend.caps().max_color_attachments >= 2 {
            match backend.create_color_target("opal-raster.aux target", width, height) {
                Ok(id) => {
                    // Probe: attach at slot 1, check completeness, detach.
                    backend.attach_color(1, Some(id))?;
                    let complete = backend.verify_framebuffer();
                    backend.attach_color(1, None)?;
                    match complete {
                        Ok(()) => aux = Some(id),
                        Err(err) => {
                            tracing::warn!(%err, "auxiliary target dropped: framebuffer incomplete with two color attachments");
                            if let Err(err) = backend.destroy_target(id) {
                                tracing::error!(%err, "releasing rejected auxiliary target");
                            }
                        }
                    }
                }
                Err(err) => tracing::warn!(%err, "auxiliary target allocation failed"),
            }
        }
        if aux.is_none() {
            tracing::warn!(
                max_color_attachments = backend.caps().max_color_attachments,
                "depth-as-color passes disabled"
            );
        }

        backend.set_draw_buffers(DrawBuffers::Color0);

        Ok(Self {
            width,
            height,
            color: Some(color),
            depth: Some(depth),
            aux,
            has_stencil,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color(&self) -> Option<TargetId> {
        self.color
    }

    pub fn depth(&self) -> Option<TargetId> {
        self.depth
    }

    pub fn aux(&self) -> Option<TargetId> {
        self.aux
    }

    /// Whether the depth target carries a stencil plane.
    pub fn has_stencil(&self) -> bool {
        self.has_stencil
    }

    /// Rebind color attachment 0 to an explicit target, or back to the
    /// layer's own color target when `None`.
    pub fn bind_color<B: RasterBackend>(&self, backend: &mut B, target: Option<TargetId>) {
        if let Err(err) = backend.attach_color(0, target.or(self.color)) {
            tracing::error!(%err, "rebinding color attachment");
        }
    }

    /// Rebind the depth attachment to an explicit target, or back to the
    /// layer's own depth target when `None`.
    pub fn bind_depth<B: RasterBackend>(&self, backend: &mut B, target: Option<TargetId>) {
        if let Err(err) = backend.attach_depth(target.or(self.depth)) {
            tracing::error!(%err, "rebinding depth attachment");
        }
    }

    /// Release all owned device resources; repeated calls are no-ops.
    pub fn shutdown<B: RasterBackend>(&mut self, backend: &mut B) {
        for id in [self.color.take(), self.depth.take(), self.aux.take()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = backend.destroy_target(id) {
                tracing::error!(%err, "releasing render target");
            }
        }
    }
}
