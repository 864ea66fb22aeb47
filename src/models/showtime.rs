use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Showtime {
    pub id: i64,
    pub code: String,
    pub room_id: i64,
    pub starts_at: DateTime<Utc>,
    /// Price of a NORMAL seat in minor currency units.
    pub base_price: i64,
}

impl Showtime {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}
