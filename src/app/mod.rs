//! Application Frame Loop
//!
//! [`Engine`] ties a [`Window`], a [`Renderer`] and the [`Gui`] registry
//! together:
//!
//! ```text
//! resize? ─▶ update fn ─▶ clear_framebuffer ─▶ render ─▶ gui ─▶ swap_buffers
//! ```
//!
//! ```rust,ignore
//! let mut engine = Engine::new(window, renderer);
//! engine.gui_mut().add_draw("fps", |stats| println!("{} tris", stats.triangles()));
//! engine.run();
//! ```

pub mod gui;
pub mod window;

pub use gui::{DrawId, Gui};
pub use window::Window;

use std::time::Instant;

use crate::renderer::device::RenderDevice;
use crate::renderer::{FrameStats, Renderer};
use crate::utils::FpsCounter;

/// Per-frame hook: renderer, seconds since start, seconds since last frame.
pub type UpdateFn<D> = Box<dyn FnMut(&mut Renderer<D>, f32, f32)>;

pub struct Engine<W: Window, D: RenderDevice> {
    window: W,
    renderer: Renderer<D>,
    gui: Gui,
    fps: FpsCounter,
    update_fn: Option<UpdateFn<D>>,
    size: (u32, u32),
    start_time: Instant,
    last_frame: Instant,
}

impl<W: Window, D: RenderDevice> Engine<W, D> {
    pub fn new(window: W, renderer: Renderer<D>) -> Self {
        let size = renderer.device().default_target_size();
        let now = Instant::now();
        Self {
            window,
            renderer,
            gui: Gui::new(),
            fps: FpsCounter::new(),
            update_fn: None,
            size,
            start_time: now,
            last_frame: now,
        }
    }

    pub fn set_update_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: FnMut(&mut Renderer<D>, f32, f32) + 'static,
    {
        self.update_fn = Some(Box::new(f));
        self
    }

    /// Runs frames until the window asks to close. Returns the frame count.
    pub fn run(&mut self) -> u64 {
        let mut frames = 0;
        while !self.window.should_close() {
            self.frame();
            frames += 1;
        }
        log::info!("Frame loop finished after {frames} frames");
        frames
    }

    /// Runs exactly one frame.
    pub fn frame(&mut self) -> FrameStats {
        let size = self.window.size();
        if size != self.size && size.0 > 0 && size.1 > 0 {
            self.renderer.resize(size.0, size.1);
            self.size = size;
        }

        let now = Instant::now();
        let total = now.duration_since(self.start_time).as_secs_f32();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        if let Some(update) = self.update_fn.as_mut() {
            update(&mut self.renderer, total, dt);
        }

        self.window.clear_framebuffer();
        let stats = self.renderer.render();
        self.gui.draw(&stats);
        self.window.swap_buffers();

        if let Some(fps) = self.fps.update() {
            log::debug!(
                "{fps:.1} fps, {} draw calls, {} triangles",
                stats.draw_calls,
                stats.triangles()
            );
        }
        stats
    }

    #[must_use]
    pub fn renderer(&self) -> &Renderer<D> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<D> {
        &mut self.renderer
    }

    #[must_use]
    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    #[must_use]
    pub fn gui(&self) -> &Gui {
        &self.gui
    }

    pub fn gui_mut(&mut self) -> &mut Gui {
        &mut self.gui
    }

    #[must_use]
    pub fn fps(&self) -> f32 {
        self.fps.current_fps
    }

    /// Tears down the renderer and hands back the window and device.
    pub fn shutdown(self) -> (W, D) {
        (self.window, self.renderer.shutdown())
    }
}
