use crate::engine::ItemRef;

/// Everything the sync loop needs to hear from the rendering engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    ItemAdded,
    ItemRemoved,
    RoomsChanged,
    PointerReleased,
    FloorplanCommitted,
    ItemSelected(ItemRef),
    ItemUnselected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(usize);

/// Plain observer registry replacing the engine's internal callback lists.
/// Single-threaded, like the rest of the client.
pub struct Subscribers<E> {
    next: usize,
    entries: Vec<(usize, Box<dyn FnMut(&E)>)>,
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            next: 0,
            entries: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, f: impl FnMut(&E) + 'static) -> Subscription {
        let id = self.next;
        self.next += 1;
        self.entries.push((id, Box::new(f)));
        Subscription(id)
    }

    pub fn unsubscribe(&mut self, sub: Subscription) {
        self.entries.retain(|(id, _)| *id != sub.0);
    }

    pub fn emit(&mut self, event: &E) {
        for (_, f) in &mut self.entries {
            f(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}
