//! Platform-independent window abstraction.
//!
//! The engine calls into a [`Window`] once per frame boundary but owns none
//! of its behaviour. A windowing backend (or a test double) implements it.

/// Window operations the frame loop depends on.
pub trait Window {
    /// Whether the user asked to close the window. Polled before every frame.
    fn should_close(&self) -> bool;

    /// Presents the finished frame and pumps pending window events.
    fn swap_buffers(&mut self);

    /// Clears the window's own framebuffer before the renderer draws.
    fn clear_framebuffer(&mut self);

    /// Requests a new client area size in physical pixels.
    fn resize(&mut self, width: u32, height: u32);

    /// Current client area size in physical pixels.
    fn size(&self) -> (u32, u32);
}
