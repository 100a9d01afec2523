//! Per-frame state.

use glam::Mat4;

/// Where `execute_frame` is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Information about the frame being recorded, handed to pass rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Frames executed so far, this one included
    pub frame_count: u64,
    /// `frame_count` modulo the in-flight frame count
    pub frame_index: u32,
    pub swapchain_image_index: u32,
}

/// Scratch data owned by one in-flight frame.
///
/// Arenas rotate with the frame index, so the arena used by a frame is not
/// touched again until that frame's fence has been waited on.
#[derive(Debug, Default)]
pub struct FrameArena {
    pub index: u32,
    pub frames_recorded: u64,
    /// Model matrices gathered while recording, uploaded at submission
    pub model_matrices: Vec<Mat4>,
}

impl FrameArena {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Start a new frame in this arena.
    pub fn reset(&mut self) {
        self.model_matrices.clear();
        self.frames_recorded += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_capacity_but_drops_matrices() {
        let mut arena = FrameArena::new(1);
        arena.model_matrices.push(Mat4::IDENTITY);

        arena.reset();

        assert!(arena.model_matrices.is_empty());
        assert_eq!(arena.frames_recorded, 1);
        assert_eq!(arena.index, 1);
    }
}
