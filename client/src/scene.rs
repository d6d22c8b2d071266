use anyhow::Result;

fn one() -> f64 {
    1.0
}

/// One placed item in the scene, in the exact wire shape the floorplan
/// `data` document uses.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlacedItem {
    pub item_name: String,
    pub item_type: i32,
    pub model_url: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub xpos: f64,
    pub ypos: f64,
    pub zpos: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "one")]
    pub scale_x: f64,
    #[serde(default = "one")]
    pub scale_y: f64,
    #[serde(default = "one")]
    pub scale_z: f64,
    #[serde(default)]
    pub fixed: bool,
}

/// The floorplan `data` payload: room geometry (opaque to us, interpreted by
/// the engine) plus the item placements.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SceneDocument {
    #[serde(default)]
    pub floorplan: serde_json::Value,
    #[serde(default)]
    pub items: Vec<PlacedItem>,
}

impl SceneDocument {
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Scene shown before anything was ever saved: one rectangular room, no
/// items.
pub fn default_scene() -> SceneDocument {
    SceneDocument {
        floorplan: serde_json::json!({
            "corners": {
                "f90da5e3-9e0e-eba7-173d-eb0b071e838e": { "x": 204.851, "y": 289.052 },
                "da026c08-d76a-a944-8e7b-096b752da9ed": { "x": 672.211, "y": 289.052 },
                "4e3d65cb-54c0-0681-28bf-bddcc7bdb571": { "x": 672.211, "y": -178.308 },
                "71d4f128-ae80-3d58-9bd2-711c6ce6cdf2": { "x": 204.851, "y": -178.308 }
            },
            "walls": [
                { "corner1": "71d4f128-ae80-3d58-9bd2-711c6ce6cdf2", "corner2": "f90da5e3-9e0e-eba7-173d-eb0b071e838e" },
                { "corner1": "f90da5e3-9e0e-eba7-173d-eb0b071e838e", "corner2": "da026c08-d76a-a944-8e7b-096b752da9ed" },
                { "corner1": "da026c08-d76a-a944-8e7b-096b752da9ed", "corner2": "4e3d65cb-54c0-0681-28bf-bddcc7bdb571" },
                { "corner1": "4e3d65cb-54c0-0681-28bf-bddcc7bdb571", "corner2": "71d4f128-ae80-3d58-9bd2-711c6ce6cdf2" }
            ],
            "wallTextures": [],
            "floorTextures": {},
            "newFloorTextures": {}
        }),
        items: Vec::new(),
    }
}
