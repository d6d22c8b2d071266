use crate::scene::SceneDocument;

/// Handle to an item the engine reported as selected. `key` is whatever the
/// engine uses to find the object again; the rest is the metadata the bubble
/// needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRef {
    pub key: u64,
    pub name: String,
    pub device_id: Option<String>,
}

/// Seam to the 3D rendering engine. The controller never touches geometry or
/// camera math itself; it asks the engine to export/load scene documents and
/// to project a world position into viewport coordinates.
pub trait SceneView {
    fn export_document(&self) -> SceneDocument;
    fn load_document(&mut self, doc: &SceneDocument);

    /// World position of an item, or `None` when the engine no longer knows
    /// it (e.g. it was removed while selected).
    fn item_position(&self, item: &ItemRef) -> Option<[f64; 3]>;

    /// Projects through the current camera; `None` while the position is
    /// outside the viewport.
    fn project_to_viewport(&self, world: [f64; 3]) -> Option<(f64, f64)>;
}
