use crate::collab::TextRenderer;
use crate::FrameStats;

const MESSAGE_LEFT: i32 = 25;
const MESSAGE_TOP: i32 = 15;
const MESSAGE_LINE_HEIGHT: i32 = 15;
/// Messages fade out over their final second of life.
const FADE_WINDOW_MS: u64 = 1024;
const MESSAGE_RGB: u32 = 0x00ffff30;
pub(crate) const STATS_COLOR: u32 = 0xff00ffff;

#[derive(Debug)]
struct Message {
    text: String,
    expiry_ms: u64,
}

/// Transient on-screen message queue plus FPS bookkeeping.
///
/// Insertion order is display order, stacked top to bottom.
#[derive(Debug, Default)]
pub(crate) struct Overlay {
    messages: Vec<Message>,
    fps: FpsCounter,
}

#[derive(Debug, Default)]
struct FpsCounter {
    frames: u32,
    window_start_ms: u64,
    fps: u32,
}

impl FpsCounter {
    fn tick(&mut self, now_ms: u64) -> u32 {
        self.frames += 1;
        if now_ms.saturating_sub(self.window_start_ms) > 1000 {
            self.window_start_ms = now_ms;
            self.fps = self.frames;
            self.frames = 0;
        }
        self.fps
    }
}

impl Overlay {
    pub fn add_message(&mut self, text: impl Into<String>, duration_ms: u64, now_ms: u64) {
        self.messages.push(Message {
            text: text.into(),
            expiry_ms: now_ms.saturating_add(duration_ms),
        });
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Count one presented frame; FPS updates on one-second windows.
    pub fn tick_fps(&mut self, now_ms: u64) -> u32 {
        self.fps.tick(now_ms)
    }

    /// Render unexpired messages with a drop shadow and compact expired ones
    /// in place.
    pub fn process_messages(&mut self, now_ms: u64, text: &mut dyn TextRenderer) {
        let mut top = MESSAGE_TOP;
        self.messages.retain(|msg| {
            let time_left = msg.expiry_ms.saturating_sub(now_ms);
            let alpha = (message_alpha(time_left) as u32) << 24;
            text.render_text(&msg.text, MESSAGE_LEFT + 1, top + 1, alpha);
            text.render_text(&msg.text, MESSAGE_LEFT, top, MESSAGE_RGB | alpha);
            top += MESSAGE_LINE_HEIGHT;
            time_left > 0
        });
    }
}

fn message_alpha(time_left_ms: u64) -> u8 {
    if time_left_ms >= FADE_WINDOW_MS {
        0xff
    } else {
        (time_left_ms >> 2) as u8
    }
}

/// Overlay text block: optional FPS line first, then the per-frame counters.
pub(crate) fn stats_text(stats: &FrameStats, fps: Option<u32>) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    if let Some(fps) = fps {
        let _ = writeln!(out, "FPS: {fps}");
    }
    let _ = writeln!(out, "draw calls:   {}", stats.draw_calls);
    let _ = writeln!(out, "shader loads: {}", stats.shader_loads);
    let _ = writeln!(out, "primitives:   {}", stats.primitives);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingText {
        lines: Vec<(String, i32, i32, u32)>,
    }

    impl TextRenderer for RecordingText {
        fn render_text(&mut self, text: &str, x: i32, y: i32, color: u32) {
            self.lines.push((text.to_owned(), x, y, color));
        }
    }

    #[test]
    fn alpha_fades_over_the_final_window() {
        assert_eq!(message_alpha(FADE_WINDOW_MS), 0xff);
        assert_eq!(message_alpha(FADE_WINDOW_MS - 4), 0xff);
        assert_eq!(message_alpha(512), 128);
        assert_eq!(message_alpha(0), 0);
    }

    #[test]
    fn messages_render_in_insertion_order_and_expire() {
        let mut overlay = Overlay::default();
        let mut text = RecordingText::default();
        overlay.add_message("first", 100, 0);
        overlay.add_message("second", 5000, 0);

        overlay.process_messages(50, &mut text);
        // Shadow plus body per message, stacked downward.
        assert_eq!(text.lines.len(), 4);
        assert_eq!(text.lines[1].0, "first");
        assert_eq!(text.lines[3].0, "second");
        assert!(text.lines[3].2 > text.lines[1].2);
        assert_eq!(overlay.message_count(), 2);

        // "first" expires; it renders once more at zero alpha, then drops.
        text.lines.clear();
        overlay.process_messages(200, &mut text);
        assert_eq!(overlay.message_count(), 1);
        assert_eq!(text.lines[1].3 >> 24, 0);

        text.lines.clear();
        overlay.process_messages(300, &mut text);
        assert_eq!(text.lines.len(), 2);
        assert_eq!(text.lines[1].0, "second");
        // Top slot is reused after compaction.
        assert_eq!(text.lines[1].2, MESSAGE_TOP);
    }

    #[test]
    fn fps_updates_on_one_second_windows() {
        let mut overlay = Overlay::default();
        for frame in 0..60 {
            assert_eq!(overlay.tick_fps(frame * 16), 0);
        }
        // Crossing the window boundary publishes the count.
        let fps = overlay.tick_fps(1016);
        assert_eq!(fps, 61);
        assert_eq!(overlay.tick_fps(1032), 61);
    }

    #[test]
    fn stats_text_orders_fps_first() {
        let stats = FrameStats {
            draw_calls: 7,
            shader_loads: 2,
            primitives: 1234,
        };
        let text = stats_text(&stats, Some(60));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "FPS: 60");
        assert!(lines[1].starts_with("draw calls:"));
        assert!(lines[1].ends_with('7'));
        assert!(stats_text(&stats, None).starts_with("draw calls:"));
    }
}
