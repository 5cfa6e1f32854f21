use thiserror::Error;

/// Errors surfaced by raster backends.
///
/// Initialization-time errors are fatal to the session; errors returned from
/// steady-state operations are logged by the caller with a call-site
/// identifier and the frame proceeds with best-effort output.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("missing required device capability: {what} (need at least {minimum}, device reports {actual})")]
    MissingCapability {
        what: &'static str,
        minimum: u32,
        actual: u32,
    },

    #[error("framebuffer incomplete: {0}")]
    IncompleteFramebuffer(String),

    #[error("unknown target id {0}")]
    UnknownTarget(u32),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("rendering surface could not be recreated")]
    SurfaceReinitFailed,

    #[error("out of device memory")]
    OutOfMemory,
}
