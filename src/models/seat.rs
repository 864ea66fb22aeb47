use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::HolderToken;

/// Per-showtime seat status. Transitions only AVAILABLE -> HELD -> {AVAILABLE, SOLD}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Held,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Held => "HELD",
            SeatStatus::Sold => "SOLD",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "HELD" => Ok(SeatStatus::Held),
            "SOLD" => Ok(SeatStatus::Sold),
            other => Err(format!("unknown seat status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatCategory {
    Normal,
    Vip,
    Couple,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Normal => "NORMAL",
            SeatCategory::Vip => "VIP",
            SeatCategory::Couple => "COUPLE",
        }
    }
}

impl FromStr for SeatCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(SeatCategory::Normal),
            "VIP" => Ok(SeatCategory::Vip),
            "COUPLE" => Ok(SeatCategory::Couple),
            other => Err(format!("unknown seat category: {other}")),
        }
    }
}

/// A physical seat in a room. Fixed once the room is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: i64,
    pub row_label: String,
    pub column: i32,
    pub category: SeatCategory,
    /// The other half of a couple seat, if any. Links are symmetric.
    pub couple_seat_id: Option<i64>,
}

impl Seat {
    pub fn new(id: i64, row_label: &str, column: i32, category: SeatCategory) -> Self {
        Self {
            id,
            row_label: row_label.to_string(),
            column,
            category,
            couple_seat_id: None,
        }
    }

    pub fn coupled_with(mut self, other: i64) -> Self {
        self.couple_seat_id = Some(other);
        self
    }
}

/// Mutable part of a showtime seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatState {
    pub status: SeatStatus,
    pub holder: Option<HolderToken>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SeatState {
    pub fn available() -> Self {
        Self {
            status: SeatStatus::Available,
            holder: None,
            expires_at: None,
        }
    }

    pub fn held(holder: HolderToken, expires_at: DateTime<Utc>) -> Self {
        Self {
            status: SeatStatus::Held,
            holder: Some(holder),
            expires_at: Some(expires_at),
        }
    }

    pub fn sold() -> Self {
        Self {
            status: SeatStatus::Sold,
            holder: None,
            expires_at: None,
        }
    }

    pub fn is_held_by(&self, holder: &HolderToken) -> bool {
        self.status == SeatStatus::Held && self.holder.as_ref() == Some(holder)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One row of the ledger: a physical seat joined with its state for one showtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowtimeSeat {
    pub showtime_id: i64,
    pub seat_id: i64,
    pub row_label: String,
    pub column: i32,
    pub category: SeatCategory,
    pub couple_seat_id: Option<i64>,
    pub state: SeatState,
}

impl ShowtimeSeat {
    pub fn new(showtime_id: i64, seat: &Seat, state: SeatState) -> Self {
        Self {
            showtime_id,
            seat_id: seat.id,
            row_label: seat.row_label.clone(),
            column: seat.column,
            category: seat.category,
            couple_seat_id: seat.couple_seat_id,
            state,
        }
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.row_label, self.column)
    }

    pub fn to_record(&self) -> SeatRecord {
        SeatRecord {
            id: self.seat_id,
            label: self.label(),
            category: self.category,
            status: self.state.status,
            holder: self.state.holder.as_ref().map(|h| h.to_string()),
            expires_at: self.state.expires_at,
            couple_id: self.couple_seat_id,
        }
    }
}

/// A pending change to a locked seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatWrite {
    pub seat_id: i64,
    pub state: SeatState,
}

/// Seat as shown to clients and live viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRecord {
    pub id: i64,
    pub label: String,
    pub category: SeatCategory,
    pub status: SeatStatus,
    pub holder: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub couple_id: Option<i64>,
}

/// Row label -> seats of that row ordered by column.
pub type SeatMap = BTreeMap<String, Vec<SeatRecord>>;

pub fn group_by_row<'a, I>(seats: I) -> SeatMap
where
    I: IntoIterator<Item = &'a ShowtimeSeat>,
{
    let mut rows: BTreeMap<String, Vec<(i32, SeatRecord)>> = BTreeMap::new();
    for seat in seats {
        rows.entry(seat.row_label.clone())
            .or_default()
            .push((seat.column, seat.to_record()));
    }

    rows.into_iter()
        .map(|(row, mut seats)| {
            seats.sort_by_key(|(column, _)| *column);
            (row, seats.into_iter().map(|(_, record)| record).collect())
        })
        .collect()
}
