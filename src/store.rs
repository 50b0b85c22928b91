//! PostgreSQL persistence for restaurants and their demand history.
//!
//! The connection is opened lazily on first use so that a store can be built on
//! one thread and used on the forecast worker. Migrations run once per connection.

use crate::db::models::{DemandRow, NewDemandRow, Restaurant};
use crate::models::demand::{DemandRecord, RestaurantProfile};
use crate::schema;
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{debug, info, warn};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("applying database migrations failed: {0}")]
    Migration(String),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
}

/// Read side used by the forecast orchestrator.
pub trait HistoryStore {
    fn restaurant_profile(&mut self, restaurant_id: i64) -> Result<Option<RestaurantProfile>, StoreError>;

    /// Ascending by date, one record per date. `sip` is left at 0.
    fn load_history(&mut self, restaurant_id: i64) -> Result<Vec<DemandRecord>, StoreError>;
}

/// Write side used by batch history generation.
pub trait RecordSink {
    /// Writes one record atomically; on error nothing of it is kept.
    fn insert_record(&mut self, record: &DemandRecord) -> Result<(), StoreError>;

    /// A failing row is logged and counted without aborting the rest. Connection and
    /// migration problems stop the export.
    fn export_records(&mut self, records: &[DemandRecord]) -> Result<ExportSummary, StoreError> {
        let mut summary = ExportSummary::default();
        for record in records {
            match self.insert_record(record) {
                Ok(()) => summary.inserted += 1,
                Err(StoreError::Query(e)) => {
                    warn!(
                        "Store: insert failed for restaurant {} on {}: {}",
                        record.restaurant_id, record.date, e
                    );
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Store: exported {} row(s), {} failed",
            summary.inserted, summary.failed
        );
        Ok(summary)
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub inserted: usize,
    pub failed: usize,
}

pub struct PgStore {
    database_url: String,
    conn: Option<PgConnection>,
}

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), StoreError> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(StoreError::Migration(e.to_string())),
    }
}

impl PgStore {
    pub fn new(database_url: &str) -> Self {
        PgStore {
            database_url: database_url.to_string(),
            conn: None,
        }
    }

    fn connection(&mut self) -> Result<&mut PgConnection, StoreError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let mut conn = PgConnection::establish(&self.database_url)?;
                info!("Connected to database");
                apply_database_migrations(&mut conn)?;
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }
}

impl RecordSink for PgStore {
    fn insert_record(&mut self, record: &DemandRecord) -> Result<(), StoreError> {
        use schema::demand_history::dsl as D;

        let row = NewDemandRow::from(record);
        self.connection()?
            .transaction::<_, diesel::result::Error, _>(|tx| {
                diesel::insert_into(D::demand_history).values(&row).execute(tx)
            })?;
        Ok(())
    }
}

impl HistoryStore for PgStore {
    fn restaurant_profile(&mut self, restaurant_id: i64) -> Result<Option<RestaurantProfile>, StoreError> {
        use schema::restaurants::dsl as R;

        let row: Option<Restaurant> = R::restaurants
            .filter(R::id.eq(restaurant_id))
            .select(Restaurant::as_select())
            .first(self.connection()?)
            .optional()?;
        Ok(row.map(RestaurantProfile::from))
    }

    fn load_history(&mut self, restaurant_id: i64) -> Result<Vec<DemandRecord>, StoreError> {
        use schema::demand_history::dsl as D;

        let rows: Vec<DemandRow> = D::demand_history
            .filter(D::restaurant_id.eq(restaurant_id))
            .order((D::date.asc(), D::id.asc()))
            .select(DemandRow::as_select())
            .load(self.connection()?)?;
        let total = rows.len();
        let rows = keep_last_per_date(rows);
        debug!(
            "Store: loaded {} row(s) for restaurant {} ({} duplicate(s) dropped)",
            rows.len(),
            restaurant_id,
            total - rows.len()
        );
        Ok(rows.into_iter().map(DemandRow::into_record).collect())
    }
}

/// Input ordered by (date, id); later rows supersede earlier ones for the same date.
fn keep_last_per_date(rows: Vec<DemandRow>) -> Vec<DemandRow> {
    let mut out: Vec<DemandRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match out.last_mut() {
            Some(last) if last.date == row.date => *last = row,
            _ => out.push(row),
        }
    }
    out
}
