//! Scissor register to device rectangle transform.
//!
//! Register coordinates live in a top-left-origin space carrying a constant
//! origin bias; the device wants a bottom-left-origin rectangle in target
//! pixels. Empty results mean "issue no device scissor at all", not a
//! degenerate rectangle.

use opal_gpu::ScissorRect;

use crate::{ScissorRegs, TargetSpec};

/// Map scissor register coordinates to a device scissor rectangle.
///
/// `offset` is the decoded offset pair in pixels. Left/top clamp to zero,
/// right/bottom clamp to the scaled base frame. Returns `None` when the
/// clamped rectangle is inverted.
pub fn device_scissor_rect(
    tl: (u16, u16),
    br: (u16, u16),
    offset: (i32, i32),
    spec: &TargetSpec,
    scale_x: f32,
    scale_y: f32,
    target_height: u32,
) -> Option<ScissorRect> {
    let bias = spec.scissor_bias;

    let mut left = (tl.0 as i32 - offset.0 - bias) as f32 * scale_x;
    if left < 0.0 {
        left = 0.0;
    }
    let mut top = (tl.1 as i32 - offset.1 - bias) as f32 * scale_y;
    if top < 0.0 {
        top = 0.0;
    }

    let mut right = (br.0 as i32 - offset.0 - bias) as f32 * scale_x;
    let max_right = spec.base_width as f32 * scale_x;
    if right > max_right {
        right = max_right;
    }
    let mut bottom = (br.1 as i32 - offset.1 - bias) as f32 * scale_y;
    let max_bottom = spec.base_height as f32 * scale_y;
    if bottom > max_bottom {
        bottom = max_bottom;
    }

    if right < left || bottom < top {
        return None;
    }

    // Top-left-origin to bottom-left-origin.
    let y = (target_height as i32 - bottom as i32).max(0);
    Some(ScissorRect {
        x: left as u32,
        y: y as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// [`device_scissor_rect`] over the raw register mirror.
pub fn scissor_from_regs(
    regs: &ScissorRegs,
    spec: &TargetSpec,
    scale_x: f32,
    scale_y: f32,
    target_height: u32,
) -> Option<ScissorRect> {
    device_scissor_rect(
        (regs.tl_x, regs.tl_y),
        (regs.br_x, regs.br_y),
        regs.offset_pixels(spec.scissor_bias),
        spec,
        scale_x,
        scale_y,
        target_height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TargetSpec {
        TargetSpec::default()
    }

    #[test]
    fn full_frame_registers_map_to_base_rect() {
        // The register values a full 640x480 frame produces.
        let rect =
            device_scissor_rect((342, 342), (981, 821), (0, 0), &spec(), 1.0, 1.0, 480).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 480 - 479);
        assert_eq!(rect.width, 639);
        assert_eq!(rect.height, 479);
    }

    #[test]
    fn coordinates_clamp_to_the_scaled_frame() {
        let rect =
            device_scissor_rect((0, 0), (2000, 2000), (0, 0), &spec(), 1.0, 1.0, 480).unwrap();
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 0);
        assert_eq!(rect.width, 640);
        assert_eq!(rect.height, 480);
    }

    #[test]
    fn scale_factors_stretch_clamp_bounds() {
        let rect =
            device_scissor_rect((0, 0), (2000, 2000), (0, 0), &spec(), 2.0, 1.5, 720).unwrap();
        assert_eq!(rect.width, 1280);
        assert_eq!(rect.height, 720);
        assert!(rect.x + rect.width <= 640 * 2);
    }

    #[test]
    fn inverted_rectangles_are_rejected() {
        // Right ends up left of left after the bias.
        assert!(device_scissor_rect((900, 342), (400, 821), (0, 0), &spec(), 1.0, 1.0, 480)
            .is_none());
        // Bottom above top.
        assert!(device_scissor_rect((342, 800), (981, 400), (0, 0), &spec(), 1.0, 1.0, 480)
            .is_none());
    }

    #[test]
    fn offsets_shift_the_window() {
        let with = device_scissor_rect((442, 442), (541, 541), (100, 100), &spec(), 1.0, 1.0, 480)
            .unwrap();
        let without =
            device_scissor_rect((342, 342), (441, 441), (0, 0), &spec(), 1.0, 1.0, 480).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn vertical_flip_against_target_height() {
        let rect =
            device_scissor_rect((342, 342), (982, 582), (0, 0), &spec(), 1.0, 1.0, 480).unwrap();
        // Bottom at 240 in top-origin space lands the rect at y = 240 in
        // bottom-origin space.
        assert_eq!(rect.y, 480 - 240);
        assert_eq!(rect.height, 240);
    }

    #[test]
    fn regs_wrapper_decodes_the_offset_register() {
        let regs = ScissorRegs {
            tl_x: 342,
            tl_y: 342,
            br_x: 981,
            br_y: 821,
            offset_x: 171,
            offset_y: 171,
        };
        let rect = scissor_from_regs(&regs, &spec(), 1.0, 1.0, 480).unwrap();
        assert_eq!((rect.x, rect.width), (0, 639));
    }
}
