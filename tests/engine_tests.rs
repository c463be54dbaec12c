//! Engine Frame Loop Tests
//!
//! Tests for:
//! - run(): frames until the window asks to close
//! - Per-frame order: update fn, clear, render, GUI callbacks, swap
//! - Window resize propagation to the renderer
//! - shutdown(): window and device handed back with resources released

use std::cell::RefCell;
use std::rc::Rc;

use ember::prelude::*;

type EventLog = Rc<RefCell<Vec<String>>>;

/// Window double that closes after a fixed number of swaps.
struct ScriptedWindow {
    frames_left: u32,
    size: (u32, u32),
    log: EventLog,
}

impl ScriptedWindow {
    fn new(frames: u32, log: &EventLog) -> Self {
        Self {
            frames_left: frames,
            size: (320, 240),
            log: Rc::clone(log),
        }
    }
}

impl Window for ScriptedWindow {
    fn should_close(&self) -> bool {
        self.frames_left == 0
    }

    fn swap_buffers(&mut self) {
        self.frames_left = self.frames_left.saturating_sub(1);
        self.log.borrow_mut().push("swap".into());
    }

    fn clear_framebuffer(&mut self) {
        self.log.borrow_mut().push("clear".into());
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }
}

fn engine(frames: u32, log: &EventLog) -> Engine<ScriptedWindow, HeadlessDevice> {
    let settings = RendererSettings {
        shader_dir: RendererSettings::builtin_shader_dir(),
        ..RendererSettings::default()
    };
    let renderer = Renderer::new(HeadlessDevice::new(320, 240), settings).unwrap();
    Engine::new(ScriptedWindow::new(frames, log), renderer)
}

// ============================================================================
// Loop Tests
// ============================================================================

#[test]
fn run_stops_when_window_closes() {
    let log = EventLog::default();
    let mut engine = engine(3, &log);

    assert_eq!(engine.run(), 3);
    assert_eq!(engine.renderer().device().frames_presented(), 3);
}

#[test]
fn closed_window_runs_no_frames() {
    let log = EventLog::default();
    let mut engine = engine(0, &log);

    assert_eq!(engine.run(), 0);
    assert!(log.borrow().is_empty());
}

#[test]
fn frame_steps_run_in_order() {
    let log = EventLog::default();
    let mut engine = engine(1, &log);
    let update_log = Rc::clone(&log);
    engine.set_update_fn(move |renderer, _, _| {
        let presented = renderer.device().frames_presented();
        update_log.borrow_mut().push(format!("update {presented}"));
    });
    let gui_log = Rc::clone(&log);
    engine
        .gui_mut()
        .add_draw("stats", move |stats| gui_log.borrow_mut().push(format!("gui {}", stats.frame)));

    engine.frame();

    assert_eq!(*log.borrow(), ["update 0", "clear", "gui 1", "swap"]);
}

#[test]
fn gui_receives_frame_stats() {
    let log = EventLog::default();
    let mut engine = engine(2, &log);
    let frames: Rc<RefCell<Vec<u64>>> = Rc::default();
    let sink = Rc::clone(&frames);
    engine
        .gui_mut()
        .add_draw("frames", move |stats| sink.borrow_mut().push(stats.frame));

    engine.run();

    assert_eq!(*frames.borrow(), [1, 2]);
    assert_eq!(engine.gui().names().collect::<Vec<_>>(), ["frames"]);
}

// ============================================================================
// Resize Tests
// ============================================================================

#[test]
fn window_resize_reaches_renderer() {
    let log = EventLog::default();
    let mut engine = engine(2, &log);

    engine.window_mut().resize(640, 360);
    engine.frame();

    let renderer = engine.renderer();
    assert_eq!(renderer.device().default_target_size(), (640, 360));
    let color = renderer.scene_target().color;
    assert_eq!(renderer.resources().get_resource(color).size(), (640, 360));
}

#[test]
fn zero_sized_window_keeps_previous_size() {
    let log = EventLog::default();
    let mut engine = engine(1, &log);

    engine.window_mut().resize(0, 0);
    engine.frame();

    assert_eq!(engine.renderer().device().default_target_size(), (320, 240));
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[test]
fn shutdown_returns_window_and_clean_device() {
    let log = EventLog::default();
    let mut engine = engine(1, &log);
    engine.run();

    let (window, device) = engine.shutdown();

    assert!(window.should_close());
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_textures(), 0);
    assert_eq!(device.live_programs(), 0);
}
