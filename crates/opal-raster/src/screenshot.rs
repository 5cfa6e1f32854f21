/// Swap scanlines in place, converting between top-down and bottom-up pixel
/// order. Rows are tightly packed RGBA8.
pub fn flip_scanlines(pixels: &mut [u8], width: u32, height: u32) {
    let row = width as usize * 4;
    debug_assert_eq!(pixels.len(), row * height as usize);
    let height = height as usize;
    for y in 0..height / 2 {
        let top = y * row;
        let bottom = (height - 1 - y) * row;
        for i in 0..row {
            pixels.swap(top + i, bottom + i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_reverses_row_order() {
        // Two rows of one pixel each.
        let mut pixels = vec![1, 2, 3, 4, 5, 6, 7, 8];
        flip_scanlines(&mut pixels, 1, 2);
        assert_eq!(pixels, vec![5, 6, 7, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn flip_twice_is_identity() {
        let original: Vec<u8> = (0..3 * 5 * 4).map(|i| i as u8).collect();
        let mut pixels = original.clone();
        flip_scanlines(&mut pixels, 3, 5);
        assert_ne!(pixels, original);
        flip_scanlines(&mut pixels, 3, 5);
        assert_eq!(pixels, original);
    }

    #[test]
    fn middle_row_stays_put_for_odd_heights() {
        let mut pixels = vec![0u8; 3 * 4];
        pixels[4..8].copy_from_slice(&[9, 9, 9, 9]);
        flip_scanlines(&mut pixels, 1, 3);
        assert_eq!(&pixels[4..8], &[9, 9, 9, 9]);
    }
}
