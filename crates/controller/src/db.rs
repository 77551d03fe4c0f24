use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

use crate::log::LogRecord;
use crate::plant::{Plant, PlantDefaults};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// `sensor_data.kind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Moisture,
    TankLevel,
}

impl SensorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Moisture => "M",
            Self::TankLevel => "T",
        }
    }
}

/// `actuator_orders.kind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorKind {
    Valve,
    Light,
    Pump,
}

impl ActuatorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Valve => "V",
            Self::Light => "L",
            Self::Pump => "P",
        }
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/greenhouse/greenhouse.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every pooled connection to ":memory:" is its own database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    /// Persist one fact from the engine.
    pub async fn append(&self, record: &LogRecord, defaults: PlantDefaults) -> Result<()> {
        match record {
            LogRecord::Moisture { position, value } => {
                self.insert_sensor_data(SensorKind::Moisture, Some(*position), *value)
                    .await
            }
            LogRecord::TankLevel { value } => {
                self.insert_sensor_data(SensorKind::TankLevel, None, *value)
                    .await
            }
            LogRecord::LightOrder { position, on } => {
                self.insert_actuator_order(ActuatorKind::Light, Some(*position), flag(*on))
                    .await
            }
            LogRecord::ValveOrder { position, open } => {
                self.insert_actuator_order(ActuatorKind::Valve, Some(*position), flag(*open))
                    .await
            }
            LogRecord::PumpOrder { speed } => {
                self.insert_actuator_order(ActuatorKind::Pump, None, *speed)
                    .await
            }
            LogRecord::PlantAdded { position } => {
                self.insert_detected_plant(*position, defaults).await
            }
            LogRecord::PlantRemoved { position, plant_id } => {
                self.remove_plant(*position, plant_id.as_deref()).await
            }
        }
    }

    // ----------------------------
    // Fact log
    // ----------------------------

    pub async fn insert_sensor_data(
        &self,
        kind: SensorKind,
        position: Option<usize>,
        value: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_data (kind, position, value, ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(kind.code())
        .bind(position.map(|p| p as i64))
        .bind(value)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("insert_sensor_data failed")?;
        Ok(())
    }

    pub async fn insert_actuator_order(
        &self,
        kind: ActuatorKind,
        position: Option<usize>,
        status: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO actuator_orders (kind, position, status, ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(kind.code())
        .bind(position.map(|p| p as i64))
        .bind(status)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("insert_actuator_order failed")?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn count_sensor_data(&self, kind: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sensor_data WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .context("count_sensor_data failed")?;
        Ok(row.try_get("n")?)
    }

    #[cfg(test)]
    pub async fn count_actuator_orders(&self, kind: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM actuator_orders WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .context("count_actuator_orders failed")?;
        Ok(row.try_get("n")?)
    }

    // ----------------------------
    // Plant directory
    // ----------------------------

    /// Record a locally detected plant. An existing row at the position is
    /// replaced: the pot there was swapped without a removal being seen.
    pub async fn insert_detected_plant(
        &self,
        position: usize,
        defaults: PlantDefaults,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plants (position, uuid, moisture_goal, light_exposure_hours, detected_at)
            VALUES (?, NULL, ?, ?, ?)
            ON CONFLICT(position) DO UPDATE SET
              uuid=NULL,
              moisture_goal=excluded.moisture_goal,
              light_exposure_hours=excluded.light_exposure_hours,
              detected_at=excluded.detected_at
            "#,
        )
        .bind(position as i64)
        .bind(defaults.moisture_goal)
        .bind(defaults.light_exposure_hours)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("insert_detected_plant failed")?;
        Ok(())
    }

    /// Delete by uuid when known, otherwise by position.
    pub async fn remove_plant(&self, position: usize, uuid: Option<&str>) -> Result<()> {
        let query = match uuid {
            Some(uuid) => sqlx::query("DELETE FROM plants WHERE uuid = ?").bind(uuid.to_string()),
            None => sqlx::query("DELETE FROM plants WHERE position = ?").bind(position as i64),
        };
        query
            .execute(&self.pool)
            .await
            .context("remove_plant failed")?;
        Ok(())
    }

    /// What the sync service writes once the plant is registered remotely.
    #[cfg(test)]
    pub async fn upsert_plant(&self, plant: &Plant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plants (position, uuid, moisture_goal, light_exposure_hours, detected_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(position) DO UPDATE SET
              uuid=excluded.uuid,
              moisture_goal=excluded.moisture_goal,
              light_exposure_hours=excluded.light_exposure_hours
            "#,
        )
        .bind(plant.position as i64)
        .bind(plant.id.clone())
        .bind(plant.moisture_goal)
        .bind(plant.light_exposure_hours)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("upsert_plant failed")?;
        Ok(())
    }

    /// Current directory, missing goals filled from `defaults`.
    pub async fn load_plants(&self, defaults: PlantDefaults) -> Result<Vec<Plant>> {
        let rows = sqlx::query(
            r#"
            SELECT position, uuid, moisture_goal, light_exposure_hours
            FROM plants
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_plants failed")?;

        rows.into_iter()
            .map(|r| -> Result<Plant> {
                let position: i64 = r.try_get("position")?;
                let goal: Option<f64> = r.try_get("moisture_goal")?;
                let hours: Option<f64> = r.try_get("light_exposure_hours")?;
                Ok(Plant {
                    id: r.try_get("uuid")?,
                    position: usize::try_from(position)
                        .with_context(|| format!("negative plant position {position}"))?,
                    moisture_goal: goal.unwrap_or(defaults.moisture_goal),
                    light_exposure_hours: hours.unwrap_or(defaults.light_exposure_hours),
                })
            })
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
