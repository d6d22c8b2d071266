// keep in sync with db.rs of backend
use chrono::{DateTime, Utc};

/// Fan mode of a purifier device. Stored and transmitted as the uppercase
/// variant name.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    #[default]
    Off,
    Low,
    Normal,
    High,
    Turbo,
}

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::Off, Mode::Low, Mode::Normal, Mode::High, Mode::Turbo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "OFF",
            Mode::Low => "LOW",
            Mode::Normal => "NORMAL",
            Mode::High => "HIGH",
            Mode::Turbo => "TURBO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smell classification reported for a device.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SmellClass {
    #[default]
    Background,
    Fragrance,
    Bad,
}

impl SmellClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmellClass::Background => "BACKGROUND",
            SmellClass::Fragrance => "FRAGRANCE",
            SmellClass::Bad => "BAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [SmellClass::Background, SmellClass::Fragrance, SmellClass::Bad]
            .into_iter()
            .find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for SmellClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device record as it travels over the wire. Timestamps are ISO-8601.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Device {
    pub id: String, // unique, key
    pub name: String,
    pub mode: Mode,
    pub smell_class: SmellClass,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Floorplan record. `data` is an opaque serialized scene document the
/// backend stores and returns verbatim.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Floorplan {
    pub id: String, // unique, key
    pub name: String,
    pub data: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Health {
    pub status: String,
    pub time: DateTime<Utc>,
}

/// Body for POST /api/devices and PUT /api/devices/:id. Everything is
/// optional; `id` is only honored on create, `created_at` only on the first
/// insert.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceUpsert {
    pub id: Option<String>,
    pub name: Option<String>,
    pub mode: Option<Mode>,
    pub smell_class: Option<SmellClass>,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body for PATCH /api/devices/:id/mode. The mode travels as a plain string
/// so the backend can reject unknown values with a proper error instead of a
/// deserialization failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModeChange {
    pub mode: Option<String>,
}

/// Body for POST /api/floorplans and PUT /api/floorplans/:id.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct FloorplanUpsert {
    pub id: Option<String>,
    pub name: Option<String>,
    pub data: Option<String>,
}
