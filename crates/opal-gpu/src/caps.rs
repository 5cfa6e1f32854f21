use crate::GpuError;

/// Minimum vertex attribute count required by the emulated vertex formats.
pub const MIN_VERTEX_ATTRIBUTES: u32 = 11;

/// Minimum 2D texture dimension required to hold the internal render targets.
pub const MIN_TEXTURE_DIMENSION: u32 = 1024;

/// Structured capability set queried once at initialization.
///
/// Core logic branches only on this struct; no capability is ever derived by
/// string-searching an extension list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub max_color_attachments: u32,
    pub max_texture_dimension: u32,
    pub max_vertex_attributes: u32,
    /// Whether a combined depth+stencil target can be allocated. Without it,
    /// stencil-dependent render modes are disabled.
    pub has_stencil: bool,
    /// Whether line polygon fill is available for the wireframe overlay.
    pub supports_wireframe: bool,
}

impl DeviceCaps {
    pub fn from_device(device: &wgpu::Device) -> Self {
        let limits = device.limits();
        Self {
            max_color_attachments: limits.max_color_attachments,
            max_texture_dimension: limits.max_texture_dimension_2d,
            max_vertex_attributes: limits.max_vertex_attributes,
            // `Depth24PlusStencil8` is a guaranteed format on every wgpu
            // backend; degraded devices are modeled by tests and hosts
            // overriding this flag.
            has_stencil: true,
            supports_wireframe: device.features().contains(wgpu::Features::POLYGON_MODE_LINE),
        }
    }

    /// Enforce the fatal-at-init minimums. A device failing any of these
    /// cannot run the emulated raster pipeline at all.
    pub fn verify_baseline(&self) -> Result<(), GpuError> {
        if self.max_vertex_attributes < MIN_VERTEX_ATTRIBUTES {
            return Err(GpuError::MissingCapability {
                what: "vertex attributes",
                minimum: MIN_VERTEX_ATTRIBUTES,
                actual: self.max_vertex_attributes,
            });
        }
        if self.max_texture_dimension < MIN_TEXTURE_DIMENSION {
            return Err(GpuError::MissingCapability {
                what: "2D texture dimension",
                minimum: MIN_TEXTURE_DIMENSION,
                actual: self.max_texture_dimension,
            });
        }
        Ok(())
    }
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_texture_dimension: 8192,
            max_vertex_attributes: 16,
            has_stencil: true,
            supports_wireframe: true,
        }
    }
}
