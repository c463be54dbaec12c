//! GUI draw registry.
//!
//! Overlays register a callback that runs once per frame after the scene is
//! rendered. The engine does not know what a callback draws.

use crate::renderer::FrameStats;

/// Identifies a registered draw callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawId(u32);

pub type DrawFn = Box<dyn FnMut(&FrameStats)>;

struct DrawEntry {
    id: DrawId,
    name: String,
    callback: DrawFn,
}

/// Ordered set of per-frame draw callbacks.
#[derive(Default)]
pub struct Gui {
    draws: Vec<DrawEntry>,
    next_id: u32,
}

impl Gui {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_draw<F>(&mut self, name: impl Into<String>, callback: F) -> DrawId
    where
        F: FnMut(&FrameStats) + 'static,
    {
        let id = DrawId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        log::debug!("GUI draw '{name}' registered as {id:?}");
        self.draws.push(DrawEntry {
            id,
            name,
            callback: Box::new(callback),
        });
        id
    }

    /// Returns whether `id` was registered.
    pub fn remove_draw(&mut self, id: DrawId) -> bool {
        let Some(index) = self.draws.iter().position(|d| d.id == id) else {
            return false;
        };
        let entry = self.draws.remove(index);
        log::debug!("GUI draw '{}' removed", entry.name);
        true
    }

    /// Runs every callback in registration order.
    pub fn draw(&mut self, stats: &FrameStats) {
        for entry in &mut self.draws {
            (entry.callback)(stats);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.draws.iter().map(|d| d.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn callbacks_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut gui = Gui::new();
        for name in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            gui.add_draw(name, move |_| log.borrow_mut().push(name));
        }
        gui.draw(&FrameStats::default());
        assert_eq!(*log.borrow(), ["a", "b", "c"]);
    }

    #[test]
    fn removed_callbacks_stop_running() {
        let hits = Rc::new(RefCell::new(0));
        let mut gui = Gui::new();
        let counter = Rc::clone(&hits);
        let id = gui.add_draw("stats", move |_| *counter.borrow_mut() += 1);

        gui.draw(&FrameStats::default());
        assert!(gui.remove_draw(id));
        assert!(!gui.remove_draw(id));
        gui.draw(&FrameStats::default());

        assert_eq!(*hits.borrow(), 1);
        assert!(gui.is_empty());
    }
}
