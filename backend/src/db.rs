use crate::schema::{devices, floorplans};
use crate::utils;
use anyhow::Result;
use chrono::NaiveDateTime;
use common::req::{Device, DeviceUpsert, Floorplan, FloorplanUpsert, Mode, SmellClass};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use dotenvy::dotenv;
use std::env;

pub const DEFAULT_DEVICE_NAME: &str = "Lg Puricare";
pub const DEFAULT_FLOORPLAN_NAME: &str = "Floorplan";
const SEED_DEVICE_ID: &str = "lg-puricare-1";

#[derive(Debug, Queryable)]
pub struct DeviceRow {
    pub id: String,
    pub name: String,
    pub mode: String,
    pub smell_class: String,
    pub last_seen: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = devices)]
pub struct NewDeviceRow {
    pub id: String,
    pub name: String,
    pub mode: String,
    pub smell_class: String,
    pub last_seen: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Queryable)]
pub struct FloorplanRow {
    pub id: String,
    pub name: String,
    pub data: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = floorplans)]
pub struct NewFloorplanRow {
    pub id: String,
    pub name: String,
    pub data: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DeviceRow {
    fn into_dto(self) -> Device {
        Device {
            id: self.id,
            name: self.name,
            mode: Mode::parse(&self.mode).unwrap_or_default(),
            smell_class: SmellClass::parse(&self.smell_class).unwrap_or_default(),
            last_seen: self.last_seen.map(utils::to_utc),
            created_at: utils::to_utc(self.created_at),
            updated_at: utils::to_utc(self.updated_at),
        }
    }
}

impl FloorplanRow {
    fn into_dto(self) -> Floorplan {
        Floorplan {
            id: self.id,
            name: self.name,
            data: self.data,
            created_at: utils::to_utc(self.created_at),
            updated_at: utils::to_utc(self.updated_at),
        }
    }
}

#[derive(QueryableByName)]
struct TableColumn {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
}

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        use diesel::connection::SimpleConnection;
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Db {
    pub fn connect() -> Result<Self> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool_size = env::var("POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        Self::open(&database_url, pool_size)
    }

    pub fn open(database_url: &str, pool_size: u32) -> Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)?;
        Ok(Self { pool })
    }

    /// Additive schema reconciliation plus seeding, run once before the
    /// service accepts traffic. Columns are only ever added, never dropped or
    /// renamed.
    pub fn init(&self) -> Result<()> {
        use diesel::connection::SimpleConnection;

        let mut conn = self.pool.get()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'OFF',
                smell_class TEXT NOT NULL DEFAULT 'BACKGROUND',
                last_seen TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT '1970-01-01 00:00:00',
                updated_at TIMESTAMP NOT NULL DEFAULT '1970-01-01 00:00:00'
            );
            CREATE TABLE IF NOT EXISTS floorplans (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT '1970-01-01 00:00:00',
                updated_at TIMESTAMP NOT NULL DEFAULT '1970-01-01 00:00:00'
            );",
        )?;

        // older databases predate some of these columns
        ensure_column(&mut conn, "devices", "mode", "mode TEXT NOT NULL DEFAULT 'OFF'")?;
        ensure_column(
            &mut conn,
            "devices",
            "smell_class",
            "smell_class TEXT NOT NULL DEFAULT 'BACKGROUND'",
        )?;
        ensure_column(&mut conn, "devices", "last_seen", "last_seen TIMESTAMP NULL")?;
        ensure_column(
            &mut conn,
            "devices",
            "created_at",
            "created_at TIMESTAMP NOT NULL DEFAULT '1970-01-01 00:00:00'",
        )?;
        ensure_column(
            &mut conn,
            "devices",
            "updated_at",
            "updated_at TIMESTAMP NOT NULL DEFAULT '1970-01-01 00:00:00'",
        )?;

        let count: i64 = devices::table.count().get_result(&mut conn)?;
        if count == 0 {
            let now = utils::now();
            diesel::insert_into(devices::table)
                .values(&NewDeviceRow {
                    id: SEED_DEVICE_ID.to_string(),
                    name: DEFAULT_DEVICE_NAME.to_string(),
                    mode: Mode::Normal.to_string(),
                    smell_class: SmellClass::Background.to_string(),
                    last_seen: Some(now),
                    created_at: now,
                    updated_at: now,
                })
                .execute(&mut conn)?;
            log::info!("seeded device {SEED_DEVICE_ID}");
        }

        Ok(())
    }

    // ===============================================
    // devices
    // ===============================================

    pub fn devices(&self) -> Result<Vec<Device>> {
        let mut conn = self.pool.get()?;
        let rows = devices::table
            .order(devices::id.asc())
            .load::<DeviceRow>(&mut conn)?;
        Ok(rows.into_iter().map(DeviceRow::into_dto).collect())
    }

    pub fn device(&self, id: &str) -> Result<Option<Device>> {
        let mut conn = self.pool.get()?;
        let row = devices::table
            .find(id)
            .first::<DeviceRow>(&mut conn)
            .optional()?;
        Ok(row.map(DeviceRow::into_dto))
    }

    /// Insert-if-absent. Returns `None` when the id is already taken, which
    /// callers report as a conflict. A concurrent insert losing the race hits
    /// the primary-key constraint and is folded into the same `None`.
    pub fn create_device(&self, body: &DeviceUpsert) -> Result<Option<Device>> {
        let mut conn = self.pool.get()?;
        let now = utils::now();
        let id = body
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let row = NewDeviceRow {
            id: id.clone(),
            name: non_blank(body.name.as_deref()).unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            mode: body.mode.unwrap_or_default().to_string(),
            smell_class: body.smell_class.unwrap_or_default().to_string(),
            last_seen: Some(body.last_seen.map(utils::to_naive).unwrap_or(now)),
            created_at: body.created_at.map(utils::to_naive).unwrap_or(now),
            updated_at: now,
        };
        conn.immediate_transaction(|conn| {
            let existing = devices::table
                .find(id.as_str())
                .first::<DeviceRow>(conn)
                .optional()?;
            if existing.is_some() {
                return Ok(None);
            }
            match diesel::insert_into(devices::table).values(&row).execute(conn) {
                Ok(_) => {}
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
            let row = devices::table.find(id.as_str()).first::<DeviceRow>(conn)?;
            Ok(Some(row.into_dto()))
        })
    }

    /// PUT semantics: insert when missing (created = true), otherwise update
    /// the mutable fields. `created_at` is never touched on update, and a
    /// blank name means "keep the stored one".
    pub fn upsert_device(&self, id: &str, body: &DeviceUpsert) -> Result<(Device, bool)> {
        let mut conn = self.pool.get()?;
        let now = utils::now();
        conn.immediate_transaction(|conn| {
            let existing = devices::table
                .find(id)
                .first::<DeviceRow>(conn)
                .optional()?;
            match existing {
                None => {
                    let row = NewDeviceRow {
                        id: id.to_string(),
                        name: non_blank(body.name.as_deref())
                            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
                        mode: body.mode.unwrap_or_default().to_string(),
                        smell_class: body.smell_class.unwrap_or_default().to_string(),
                        last_seen: Some(body.last_seen.map(utils::to_naive).unwrap_or(now)),
                        created_at: body.created_at.map(utils::to_naive).unwrap_or(now),
                        updated_at: now,
                    };
                    diesel::insert_into(devices::table).values(&row).execute(conn)?;
                    let row = devices::table.find(id).first::<DeviceRow>(conn)?;
                    Ok((row.into_dto(), true))
                }
                Some(prev) => {
                    let name = non_blank(body.name.as_deref()).unwrap_or(prev.name);
                    let mode = body.mode.map(|m| m.to_string()).unwrap_or(prev.mode);
                    let smell_class = body
                        .smell_class
                        .map(|s| s.to_string())
                        .unwrap_or(prev.smell_class);
                    let last_seen = body
                        .last_seen
                        .map(utils::to_naive)
                        .or(prev.last_seen)
                        .or(Some(now));
                    diesel::update(devices::table.find(id))
                        .set((
                            devices::name.eq(name),
                            devices::mode.eq(mode),
                            devices::smell_class.eq(smell_class),
                            devices::last_seen.eq(last_seen),
                            devices::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    let row = devices::table.find(id).first::<DeviceRow>(conn)?;
                    Ok((row.into_dto(), false))
                }
            }
        })
    }

    /// Returns `None` when the device does not exist. On success the mode,
    /// `last_seen` and `updated_at` are refreshed together.
    pub fn set_device_mode(&self, id: &str, mode: Mode) -> Result<Option<Device>> {
        let mut conn = self.pool.get()?;
        let now = utils::now();
        conn.immediate_transaction(|conn| {
            let existing = devices::table
                .find(id)
                .first::<DeviceRow>(conn)
                .optional()?;
            if existing.is_none() {
                return Ok(None);
            }
            diesel::update(devices::table.find(id))
                .set((
                    devices::mode.eq(mode.to_string()),
                    devices::last_seen.eq(Some(now)),
                    devices::updated_at.eq(now),
                ))
                .execute(conn)?;
            let row = devices::table.find(id).first::<DeviceRow>(conn)?;
            Ok(Some(row.into_dto()))
        })
    }

    pub fn delete_device(&self, id: &str) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let n = diesel::delete(devices::table.find(id)).execute(&mut conn)?;
        Ok(n > 0)
    }

    // ===============================================
    // floorplans
    // ===============================================

    pub fn floorplans(&self) -> Result<Vec<Floorplan>> {
        let mut conn = self.pool.get()?;
        let rows = floorplans::table
            .order(floorplans::id.asc())
            .load::<FloorplanRow>(&mut conn)?;
        Ok(rows.into_iter().map(FloorplanRow::into_dto).collect())
    }

    pub fn floorplan(&self, id: &str) -> Result<Option<Floorplan>> {
        let mut conn = self.pool.get()?;
        let row = floorplans::table
            .find(id)
            .first::<FloorplanRow>(&mut conn)
            .optional()?;
        Ok(row.map(FloorplanRow::into_dto))
    }

    /// Most recently written floorplan; equal `updated_at` values are broken
    /// by descending id so the result is deterministic.
    pub fn latest_floorplan(&self) -> Result<Option<Floorplan>> {
        let mut conn = self.pool.get()?;
        let row = floorplans::table
            .order((floorplans::updated_at.desc(), floorplans::id.desc()))
            .first::<FloorplanRow>(&mut conn)
            .optional()?;
        Ok(row.map(FloorplanRow::into_dto))
    }

    pub fn create_floorplan(&self, body: &FloorplanUpsert, data: String) -> Result<Option<Floorplan>> {
        let mut conn = self.pool.get()?;
        let now = utils::now();
        let id = body
            .id
            .clone()
            .unwrap_or_else(|| format!("fp-{}", chrono::Utc::now().timestamp_millis()));
        let row = NewFloorplanRow {
            id: id.clone(),
            name: non_blank(body.name.as_deref())
                .unwrap_or_else(|| DEFAULT_FLOORPLAN_NAME.to_string()),
            data,
            created_at: now,
            updated_at: now,
        };
        conn.immediate_transaction(|conn| {
            let existing = floorplans::table
                .find(id.as_str())
                .first::<FloorplanRow>(conn)
                .optional()?;
            if existing.is_some() {
                return Ok(None);
            }
            match diesel::insert_into(floorplans::table).values(&row).execute(conn) {
                Ok(_) => {}
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
            let row = floorplans::table
                .find(id.as_str())
                .first::<FloorplanRow>(conn)?;
            Ok(Some(row.into_dto()))
        })
    }

    pub fn upsert_floorplan(
        &self,
        id: &str,
        body: &FloorplanUpsert,
        data: String,
    ) -> Result<(Floorplan, bool)> {
        let mut conn = self.pool.get()?;
        let now = utils::now();
        conn.immediate_transaction(|conn| {
            let existing = floorplans::table
                .find(id)
                .first::<FloorplanRow>(conn)
                .optional()?;
            match existing {
                None => {
                    let row = NewFloorplanRow {
                        id: id.to_string(),
                        name: non_blank(body.name.as_deref())
                            .unwrap_or_else(|| DEFAULT_FLOORPLAN_NAME.to_string()),
                        data,
                        created_at: now,
                        updated_at: now,
                    };
                    diesel::insert_into(floorplans::table).values(&row).execute(conn)?;
                    let row = floorplans::table.find(id).first::<FloorplanRow>(conn)?;
                    Ok((row.into_dto(), true))
                }
                Some(prev) => {
                    let name = non_blank(body.name.as_deref()).unwrap_or(prev.name);
                    diesel::update(floorplans::table.find(id))
                        .set((
                            floorplans::name.eq(name),
                            floorplans::data.eq(data),
                            floorplans::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    let row = floorplans::table.find(id).first::<FloorplanRow>(conn)?;
                    Ok((row.into_dto(), false))
                }
            }
        })
    }

    pub fn delete_floorplan(&self, id: &str) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let n = diesel::delete(floorplans::table.find(id)).execute(&mut conn)?;
        Ok(n > 0)
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn ensure_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let cols: Vec<TableColumn> =
        diesel::sql_query(format!("PRAGMA table_info({table})")).load(conn)?;
    if !cols.iter().any(|c| c.name == column) {
        diesel::sql_query(format!("ALTER TABLE {table} ADD COLUMN {definition}")).execute(conn)?;
        log::info!("added column {table}.{column}");
    }
    Ok(())
}
