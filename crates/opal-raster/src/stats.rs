/// Per-frame pipeline counters.
///
/// Owned by the host's stats collector; draw paths bump them, the overlay
/// reads them, and the presentation pipeline resets them once per presented
/// frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: u64,
    pub shader_loads: u64,
    pub primitives: u64,
}

impl FrameStats {
    pub fn add_draw_call(&mut self) {
        self.draw_calls += 1;
    }

    pub fn add_shader_load(&mut self) {
        self.shader_loads += 1;
    }

    pub fn add_primitives(&mut self, count: u64) {
        self.primitives += count;
    }

    pub fn reset_frame(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_every_counter() {
        let mut stats = FrameStats::default();
        stats.add_draw_call();
        stats.add_shader_load();
        stats.add_primitives(12);
        assert_ne!(stats, FrameStats::default());
        stats.reset_frame();
        assert_eq!(stats, FrameStats::default());
    }
}
