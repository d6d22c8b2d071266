use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use common::req::{Device, Floorplan, FloorplanUpsert, Mode};

use crate::api::Backend;
use crate::engine::{ItemRef, SceneView};
use crate::events::{SceneEvent, Subscribers, Subscription};
use crate::scene::{self, SceneDocument};

pub const AUTOSAVE_PERIOD: Duration = Duration::from_secs(1);
const FLOORPLAN_NAME: &str = "Current Floorplan";

/// Selection bubble state: the selected item, its device and the projected
/// viewport anchor the overlay is drawn at.
struct Bubble {
    item: ItemRef,
    device_id: String,
    device: Option<Device>,
    anchor: Option<(f64, f64)>,
}

/// Render-ready snapshot of the bubble. Fields the backend could not supply
/// show as "-" rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleView {
    pub name: String,
    pub device_id: String,
    pub mode: String,
    pub smell_class: String,
    pub last_seen: String,
    pub anchor: Option<(f64, f64)>,
}

struct SavePayload {
    id: Option<String>,
    body: FloorplanUpsert,
}

/// Session-scoped controller owning all mutable client state: the known
/// floorplan id, the dirty flag, the device cache and the bubble. Built once
/// at startup, never torn down.
pub struct SyncController<B, S> {
    api: B,
    engine: S,
    current_floorplan_id: Option<String>,
    dirty: bool,
    saving: bool,
    device_cache: HashMap<String, Device>,
    bubble: Option<Bubble>,
    pending_selection: Option<Option<ItemRef>>,
}

impl<B: Backend, S: SceneView> SyncController<B, S> {
    pub fn new(api: B, engine: S) -> Self {
        Self {
            api,
            engine,
            current_floorplan_id: None,
            dirty: false,
            saving: false,
            device_cache: HashMap::new(),
            bubble: None,
            pending_selection: None,
        }
    }

    pub fn engine(&self) -> &S {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut S {
        &mut self.engine
    }

    pub fn floorplan_id(&self) -> Option<&str> {
        self.current_floorplan_id.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn cached_device(&self, id: &str) -> Option<&Device> {
        self.device_cache.get(id)
    }

    /// Idempotent; any mutating UI interaction funnels through here.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Scene events arriving through the observer registry. Selection changes
    /// are deferred to the next tick, which is the next turn of the loop.
    pub fn handle_event(&mut self, event: &SceneEvent) {
        match event {
            SceneEvent::ItemAdded
            | SceneEvent::ItemRemoved
            | SceneEvent::RoomsChanged
            | SceneEvent::PointerReleased
            | SceneEvent::FloorplanCommitted => self.mark_dirty(),
            SceneEvent::ItemSelected(item) => self.pending_selection = Some(Some(item.clone())),
            SceneEvent::ItemUnselected => self.pending_selection = Some(None),
        }
    }

    /// Forwards every event from `subs` into the controller.
    pub fn attach(
        ctl: std::rc::Rc<std::cell::RefCell<Self>>,
        subs: &mut Subscribers<SceneEvent>,
    ) -> Subscription
    where
        B: 'static,
        S: 'static,
    {
        subs.subscribe(move |ev| ctl.borrow_mut().handle_event(ev))
    }

    /// Restore the most recent floorplan from the server, or fall back to the
    /// built-in scene (and schedule its save) when there is none.
    pub async fn load_initial(&mut self) {
        match self.api.latest_floorplan().await {
            Ok(Some(fp)) => match SceneDocument::from_wire(&fp.data) {
                Ok(doc) => {
                    self.engine.load_document(&doc);
                    self.current_floorplan_id = Some(fp.id);
                    self.dirty = false;
                    return;
                }
                Err(e) => log::warn!("stored floorplan is unreadable, starting fresh: {e:#}"),
            },
            Ok(None) => {}
            Err(e) => log::warn!("could not fetch latest floorplan: {e:#}"),
        }
        self.engine.load_document(&scene::default_scene());
        self.dirty = true;
    }

    /// One turn of the loop: apply a deferred selection change, save if
    /// anything is dirty, then re-anchor the bubble to the camera.
    pub async fn tick(&mut self) {
        if let Some(selection) = self.pending_selection.take() {
            match selection {
                Some(item) => self.select_item(item).await,
                None => self.deselect(),
            }
        }
        self.save_floorplan().await;
        self.refresh_bubble_anchor();
    }

    /// Drives `tick` forever at a fixed period. Ticks that would land while a
    /// previous one is still running are skipped, not queued.
    pub async fn run(&mut self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    // ===============================================
    // floorplan persistence
    // ===============================================

    /// Claims the save slot and snapshots the scene. `None` when there is
    /// nothing to save or a save is already in flight.
    fn begin_save(&mut self) -> Option<SavePayload> {
        if self.saving || !self.dirty {
            return None;
        }
        let data = match self.engine.export_document().to_wire() {
            Ok(data) => data,
            Err(e) => {
                log::error!("scene serialization failed: {e:#}");
                return None;
            }
        };
        self.saving = true;
        Some(SavePayload {
            id: self.current_floorplan_id.clone(),
            body: FloorplanUpsert {
                id: self.current_floorplan_id.clone(),
                name: Some(FLOORPLAN_NAME.to_string()),
                data: Some(data),
            },
        })
    }

    /// The in-flight flag drops no matter how the attempt ended. Failures
    /// keep the dirty flag set so the next tick retries.
    fn finish_save(&mut self, outcome: Result<Floorplan>) {
        self.saving = false;
        match outcome {
            Ok(fp) => {
                self.current_floorplan_id = Some(fp.id);
                self.dirty = false;
            }
            Err(e) => log::debug!("save failed, keeping dirty for the next tick: {e:#}"),
        }
    }

    pub async fn save_floorplan(&mut self) {
        let Some(payload) = self.begin_save() else {
            return;
        };
        let outcome = match &payload.id {
            Some(id) => self.api.update_floorplan(id, &payload.body).await,
            None => self.api.create_floorplan(&payload.body).await,
        };
        self.finish_save(outcome);
    }

    /// The explicit "apply floorplan edits" action: same upsert path as the
    /// timer, just not waiting for it.
    pub async fn apply_floorplan_edits(&mut self) {
        self.mark_dirty();
        self.save_floorplan().await;
    }

    // ===============================================
    // devices + bubble
    // ===============================================

    async fn fetch_device(&mut self, id: &str) -> Option<Device> {
        if let Some(dev) = self.device_cache.get(id) {
            return Some(dev.clone());
        }
        match self.api.device(id).await {
            Ok(Some(dev)) => {
                self.device_cache.insert(id.to_string(), dev.clone());
                Some(dev)
            }
            Ok(None) => None,
            Err(e) => {
                // not cached: the next selection refetches
                log::debug!("device fetch failed: {e:#}");
                None
            }
        }
    }

    pub async fn select_item(&mut self, item: ItemRef) {
        let Some(device_id) = item.device_id.clone() else {
            self.bubble = None;
            return;
        };
        let device = self.fetch_device(&device_id).await;
        let anchor = self.project(&item);
        self.bubble = Some(Bubble {
            item,
            device_id,
            device,
            anchor,
        });
    }

    pub fn deselect(&mut self) {
        self.bubble = None;
    }

    pub async fn set_device_mode(&mut self, mode: Mode) {
        let Some(device_id) = self.bubble.as_ref().map(|b| b.device_id.clone()) else {
            return;
        };
        match self.api.set_device_mode(&device_id, mode).await {
            Ok(dev) => {
                self.device_cache.insert(device_id, dev.clone());
                if let Some(b) = &mut self.bubble {
                    b.device = Some(dev);
                }
            }
            Err(e) => log::debug!("mode change failed: {e:#}"),
        }
    }

    /// User-initiated, so the failure is reported; local state is left as it
    /// was.
    pub async fn save_device_name(&mut self, name: &str) {
        let Some(device_id) = self.bubble.as_ref().map(|b| b.device_id.clone()) else {
            return;
        };
        match self.api.set_device_name(&device_id, name).await {
            Ok(dev) => {
                self.device_cache.insert(device_id, dev.clone());
                if let Some(b) = &mut self.bubble {
                    b.item.name = dev.name.clone();
                    b.device = Some(dev);
                }
            }
            Err(e) => log::error!("save device name failed: {e:#}"),
        }
    }

    /// Registers a device for an item being placed (the Add Items flow).
    pub async fn create_device(&mut self, name: &str) -> Option<Device> {
        match self.api.create_device(name).await {
            Ok(dev) => {
                self.device_cache.insert(dev.id.clone(), dev.clone());
                Some(dev)
            }
            Err(e) => {
                log::warn!("create device failed: {e:#}");
                None
            }
        }
    }

    fn project(&self, item: &ItemRef) -> Option<(f64, f64)> {
        self.engine
            .item_position(item)
            .and_then(|p| self.engine.project_to_viewport(p))
    }

    fn refresh_bubble_anchor(&mut self) {
        let anchor = match &self.bubble {
            Some(b) => self.project(&b.item),
            None => return,
        };
        if let Some(b) = &mut self.bubble {
            b.anchor = anchor;
        }
    }

    pub fn bubble(&self) -> Option<BubbleView> {
        self.bubble.as_ref().map(|b| {
            let device = b.device.as_ref();
            BubbleView {
                name: device
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| b.item.name.clone()),
                device_id: b.device_id.clone(),
                mode: device
                    .map(|d| d.mode.to_string())
                    .unwrap_or_else(|| "-".into()),
                smell_class: device
                    .map(|d| d.smell_class.to_string())
                    .unwrap_or_else(|| "-".into()),
                last_seen: device
                    .and_then(|d| d.last_seen)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into()),
                anchor: b.anchor,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::req::SmellClass;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn device(id: &str, name: &str) -> Device {
        Device {
            id: id.into(),
            name: name.into(),
            mode: Mode::Normal,
            smell_class: SmellClass::Background,
            last_seen: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        devices: RefCell<HashMap<String, Device>>,
        latest: RefCell<Option<Floorplan>>,
        device_gets: Cell<usize>,
        creates: Cell<usize>,
        updates: Cell<usize>,
        fail_saves: Cell<bool>,
        fail_device_gets: Cell<bool>,
        fail_renames: Cell<bool>,
    }

    impl FakeBackend {
        fn with_device(id: &str, name: &str) -> Self {
            let fake = Self::default();
            fake.devices.borrow_mut().insert(id.into(), device(id, name));
            fake
        }

        fn stored_floorplan(&self, body: &FloorplanUpsert, id: &str) -> Floorplan {
            Floorplan {
                id: id.into(),
                name: body.name.clone().unwrap_or_else(|| "Floorplan".into()),
                data: body.data.clone().unwrap_or_default(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        }
    }

    #[async_trait(?Send)]
    impl Backend for FakeBackend {
        async fn device(&self, id: &str) -> Result<Option<Device>> {
            self.device_gets.set(self.device_gets.get() + 1);
            if self.fail_device_gets.get() {
                anyhow::bail!("connection refused");
            }
            Ok(self.devices.borrow().get(id).cloned())
        }

        async fn create_device(&self, name: &str) -> Result<Device> {
            let id = format!("dev-{}", self.devices.borrow().len() + 1);
            let dev = device(&id, name);
            self.devices.borrow_mut().insert(id, dev.clone());
            Ok(dev)
        }

        async fn set_device_name(&self, id: &str, name: &str) -> Result<Device> {
            if self.fail_renames.get() {
                anyhow::bail!("connection refused");
            }
            let mut devices = self.devices.borrow_mut();
            let dev = devices
                .get_mut(id)
                .ok_or_else(|| anyhow::anyhow!("not found"))?;
            if !name.trim().is_empty() {
                dev.name = name.trim().to_string();
            }
            dev.updated_at = Utc::now();
            Ok(dev.clone())
        }

        async fn set_device_mode(&self, id: &str, mode: Mode) -> Result<Device> {
            let mut devices = self.devices.borrow_mut();
            let dev = devices
                .get_mut(id)
                .ok_or_else(|| anyhow::anyhow!("not found"))?;
            dev.mode = mode;
            dev.last_seen = Some(Utc::now());
            dev.updated_at = Utc::now();
            Ok(dev.clone())
        }

        async fn latest_floorplan(&self) -> Result<Option<Floorplan>> {
            Ok(self.latest.borrow().clone())
        }

        async fn create_floorplan(&self, body: &FloorplanUpsert) -> Result<Floorplan> {
            self.creates.set(self.creates.get() + 1);
            if self.fail_saves.get() {
                anyhow::bail!("connection refused");
            }
            let fp = self.stored_floorplan(body, "fp-1");
            *self.latest.borrow_mut() = Some(fp.clone());
            Ok(fp)
        }

        async fn update_floorplan(&self, id: &str, body: &FloorplanUpsert) -> Result<Floorplan> {
            self.updates.set(self.updates.get() + 1);
            if self.fail_saves.get() {
                anyhow::bail!("connection refused");
            }
            let fp = self.stored_floorplan(body, id);
            *self.latest.borrow_mut() = Some(fp.clone());
            Ok(fp)
        }
    }

    struct FakeScene {
        doc: SceneDocument,
        positions: HashMap<u64, [f64; 3]>,
        camera_pan: f64,
    }

    impl FakeScene {
        fn new() -> Self {
            Self {
                doc: SceneDocument::default(),
                positions: HashMap::from([(7, [10.0, 0.0, 20.0])]),
                camera_pan: 0.0,
            }
        }
    }

    impl SceneView for FakeScene {
        fn export_document(&self) -> SceneDocument {
            self.doc.clone()
        }

        fn load_document(&mut self, doc: &SceneDocument) {
            self.doc = doc.clone();
        }

        fn item_position(&self, item: &ItemRef) -> Option<[f64; 3]> {
            self.positions.get(&item.key).copied()
        }

        fn project_to_viewport(&self, world: [f64; 3]) -> Option<(f64, f64)> {
            Some((world[0] + self.camera_pan, world[2]))
        }
    }

    fn purifier_item() -> ItemRef {
        ItemRef {
            key: 7,
            name: "Lg Puricare".into(),
            device_id: Some("d1".into()),
        }
    }

    fn controller() -> SyncController<FakeBackend, FakeScene> {
        SyncController::new(FakeBackend::with_device("d1", "Lg Puricare"), FakeScene::new())
    }

    #[tokio::test]
    async fn dirty_follows_markings_until_a_successful_save() {
        let mut ctl = controller();
        assert!(!ctl.is_dirty());

        ctl.handle_event(&SceneEvent::ItemAdded);
        ctl.handle_event(&SceneEvent::PointerReleased);
        assert!(ctl.is_dirty());

        ctl.tick().await;
        assert!(!ctl.is_dirty());

        // nothing marked since the save: the next tick must not write
        ctl.tick().await;
        assert_eq!(ctl.api.creates.get() + ctl.api.updates.get(), 1);
    }

    #[tokio::test]
    async fn save_adopts_server_id_then_switches_to_update() {
        let mut ctl = controller();
        ctl.mark_dirty();
        ctl.tick().await;
        assert_eq!(ctl.floorplan_id(), Some("fp-1"));
        assert_eq!(ctl.api.creates.get(), 1);

        ctl.mark_dirty();
        ctl.tick().await;
        assert_eq!(ctl.api.creates.get(), 1);
        assert_eq!(ctl.api.updates.get(), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_dirty_and_retries_on_a_later_tick() {
        let mut ctl = controller();
        ctl.api.fail_saves.set(true);
        ctl.mark_dirty();
        ctl.tick().await;
        assert!(ctl.is_dirty());
        assert!(!ctl.saving);
        assert_eq!(ctl.api.creates.get(), 1);

        ctl.api.fail_saves.set(false);
        ctl.tick().await;
        assert!(!ctl.is_dirty());
        assert_eq!(ctl.api.creates.get(), 2);
    }

    #[tokio::test]
    async fn at_most_one_save_in_flight() {
        let mut ctl = controller();
        ctl.mark_dirty();

        let payload = ctl.begin_save().expect("slot is free");
        // a tick or manual trigger arriving mid-flight is dropped
        ctl.mark_dirty();
        assert!(ctl.begin_save().is_none());

        let fp = ctl.api.stored_floorplan(&payload.body, "fp-1");
        ctl.finish_save(Ok(fp));
        assert!(!ctl.saving);
        assert!(!ctl.is_dirty());
    }

    #[tokio::test]
    async fn failed_save_releases_the_slot() {
        let mut ctl = controller();
        ctl.mark_dirty();
        let _payload = ctl.begin_save().expect("slot is free");
        ctl.finish_save(Err(anyhow::anyhow!("connection refused")));
        assert!(ctl.is_dirty());
        assert!(ctl.begin_save().is_some(), "retry must be possible");
    }

    #[tokio::test]
    async fn selection_reads_through_the_cache() {
        let mut ctl = controller();
        ctl.select_item(purifier_item()).await;
        assert_eq!(ctl.api.device_gets.get(), 1);
        let bubble = ctl.bubble().unwrap();
        assert_eq!(bubble.mode, "NORMAL");
        assert_eq!(bubble.smell_class, "BACKGROUND");

        ctl.deselect();
        assert!(ctl.bubble().is_none());

        ctl.select_item(purifier_item()).await;
        assert_eq!(ctl.api.device_gets.get(), 1, "second selection hits the cache");
    }

    #[tokio::test]
    async fn failed_fetch_shows_placeholders_and_is_not_cached() {
        let mut ctl = controller();
        ctl.api.fail_device_gets.set(true);
        ctl.select_item(purifier_item()).await;
        let bubble = ctl.bubble().unwrap();
        assert_eq!(bubble.name, "Lg Puricare"); // item metadata, not an error
        assert_eq!(bubble.mode, "-");
        assert_eq!(bubble.last_seen, "-");

        ctl.api.fail_device_gets.set(false);
        ctl.select_item(purifier_item()).await;
        assert_eq!(ctl.api.device_gets.get(), 2, "failure must not poison the cache");
        assert_eq!(ctl.bubble().unwrap().mode, "NORMAL");
    }

    #[tokio::test]
    async fn items_without_a_device_show_no_bubble() {
        let mut ctl = controller();
        ctl.select_item(ItemRef {
            key: 9,
            name: "Bookshelf".into(),
            device_id: None,
        })
        .await;
        assert!(ctl.bubble().is_none());
        assert_eq!(ctl.api.device_gets.get(), 0);
    }

    #[tokio::test]
    async fn mode_change_replaces_cache_with_the_server_record() {
        let mut ctl = controller();
        ctl.select_item(purifier_item()).await;
        ctl.set_device_mode(Mode::Turbo).await;

        assert_eq!(ctl.bubble().unwrap().mode, "TURBO");
        assert_eq!(ctl.cached_device("d1").unwrap().mode, Mode::Turbo);

        // re-selection keeps serving the refreshed record from the cache
        ctl.select_item(purifier_item()).await;
        assert_eq!(ctl.api.device_gets.get(), 1);
        assert_eq!(ctl.bubble().unwrap().mode, "TURBO");
    }

    #[tokio::test]
    async fn rename_updates_bubble_and_cache() {
        let mut ctl = controller();
        ctl.select_item(purifier_item()).await;
        ctl.save_device_name("Living Room Purifier").await;
        assert_eq!(ctl.bubble().unwrap().name, "Living Room Purifier");
        assert_eq!(ctl.cached_device("d1").unwrap().name, "Living Room Purifier");
    }

    #[tokio::test]
    async fn failed_rename_leaves_local_state_alone() {
        let mut ctl = controller();
        ctl.select_item(purifier_item()).await;
        ctl.api.fail_renames.set(true);
        ctl.save_device_name("New Name").await;
        assert_eq!(ctl.bubble().unwrap().name, "Lg Puricare");
        assert_eq!(ctl.cached_device("d1").unwrap().name, "Lg Puricare");
    }

    #[tokio::test]
    async fn bubble_anchor_tracks_the_camera_every_tick() {
        let mut ctl = controller();
        ctl.select_item(purifier_item()).await;
        assert_eq!(ctl.bubble().unwrap().anchor, Some((10.0, 20.0)));

        ctl.engine_mut().camera_pan = 5.0;
        ctl.tick().await;
        assert_eq!(ctl.bubble().unwrap().anchor, Some((15.0, 20.0)));
    }

    #[tokio::test]
    async fn load_initial_adopts_the_latest_floorplan() {
        let mut ctl = controller();
        let doc = scene::default_scene();
        *ctl.api.latest.borrow_mut() = Some(Floorplan {
            id: "fp-9".into(),
            name: "Current Floorplan".into(),
            data: doc.to_wire().unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        ctl.load_initial().await;
        assert_eq!(ctl.floorplan_id(), Some("fp-9"));
        assert!(!ctl.is_dirty());
        assert_eq!(ctl.engine().doc, doc);
    }

    #[tokio::test]
    async fn load_initial_falls_back_to_the_default_scene() {
        let mut ctl = controller();
        ctl.load_initial().await;
        assert!(ctl.floorplan_id().is_none());
        assert!(ctl.is_dirty(), "fallback scene must be scheduled for save");
        assert_eq!(ctl.engine().doc, scene::default_scene());

        ctl.tick().await;
        assert_eq!(ctl.api.creates.get(), 1);
        assert_eq!(ctl.floorplan_id(), Some("fp-1"));
    }

    #[tokio::test]
    async fn created_devices_are_served_from_the_cache() {
        let mut ctl = controller();
        let dev = ctl.create_device("Bedroom Purifier").await.unwrap();
        ctl.select_item(ItemRef {
            key: 7,
            name: "Bedroom Purifier".into(),
            device_id: Some(dev.id.clone()),
        })
        .await;
        assert_eq!(ctl.api.device_gets.get(), 0);
        assert_eq!(ctl.bubble().unwrap().device_id, dev.id);
    }

    #[tokio::test]
    async fn apply_floorplan_edits_saves_right_away() {
        let mut ctl = controller();
        ctl.apply_floorplan_edits().await;
        assert!(!ctl.is_dirty());
        assert_eq!(ctl.api.creates.get(), 1);
    }

    #[tokio::test]
    async fn events_wired_through_the_registry_reach_the_controller() {
        let ctl = Rc::new(RefCell::new(controller()));
        let mut subs = Subscribers::new();
        let sub = SyncController::attach(ctl.clone(), &mut subs);

        subs.emit(&SceneEvent::RoomsChanged);
        assert!(ctl.borrow().is_dirty());

        subs.emit(&SceneEvent::ItemSelected(purifier_item()));
        assert!(ctl.borrow().bubble().is_none(), "selection is applied on the next tick");
        ctl.borrow_mut().tick().await;
        assert!(ctl.borrow().bubble().is_some());

        subs.emit(&SceneEvent::ItemUnselected);
        ctl.borrow_mut().tick().await;
        assert!(ctl.borrow().bubble().is_none());

        subs.unsubscribe(sub);
        assert!(subs.is_empty());
    }
}
