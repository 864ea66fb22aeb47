use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{normalize_ids, LedgerTx, LockSet, SeatKey, SeatLedger};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    BuyerInfo, HolderToken, Order, OrderStatus, SeatState, SeatWrite, Showtime, ShowtimeSeat, Ticket,
};

const SEAT_SELECT: &str = r#"
    SELECT ss.showtime_id, ss.seat_id, s.row_label, s.col, s.category, s.couple_seat_id,
           ss.status, ss.holder, ss.expires_at
    FROM showtime_seats ss
    JOIN seats s ON s.id = ss.seat_id
"#;

const ORDER_SELECT: &str = r#"
    SELECT id, showtime_id, holder, buyer_name, buyer_email, buyer_phone,
           payment_method, status, total_amount, created_at
    FROM orders
"#;

const TICKET_SELECT: &str = r#"
    SELECT id, order_id, showtime_id, seat_id, seat_label, price
    FROM tickets
    WHERE order_id = $1
    ORDER BY seat_id
"#;

type TicketRow = (Uuid, Uuid, i64, i64, String, i64);

#[derive(FromRow)]
struct SeatRow {
    showtime_id: i64,
    seat_id: i64,
    row_label: String,
    col: i32,
    category: String,
    couple_seat_id: Option<i64>,
    status: String,
    holder: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SeatRow> for ShowtimeSeat {
    type Error = LedgerError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let holder = row
            .holder
            .map(|h| h.parse::<HolderToken>())
            .transpose()
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;

        Ok(ShowtimeSeat {
            showtime_id: row.showtime_id,
            seat_id: row.seat_id,
            row_label: row.row_label,
            column: row.col,
            category: row.category.parse().map_err(LedgerError::Corrupt)?,
            couple_seat_id: row.couple_seat_id,
            state: SeatState {
                status: row.status.parse().map_err(LedgerError::Corrupt)?,
                holder,
                expires_at: row.expires_at,
            },
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    showtime_id: i64,
    holder: String,
    buyer_name: String,
    buyer_email: String,
    buyer_phone: Option<String>,
    payment_method: String,
    status: String,
    total_amount: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = LedgerError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            showtime_id: row.showtime_id,
            holder: row
                .holder
                .parse::<HolderToken>()
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            buyer: BuyerInfo {
                name: row.buyer_name,
                email: row.buyer_email,
                phone: row.buyer_phone,
            },
            payment_method: row.payment_method.parse().map_err(LedgerError::Corrupt)?,
            status: row.status.parse().map_err(LedgerError::Corrupt)?,
            total_amount: row.total_amount,
            created_at: row.created_at,
        })
    }
}

fn into_seats(rows: Vec<SeatRow>) -> LedgerResult<Vec<ShowtimeSeat>> {
    rows.into_iter().map(ShowtimeSeat::try_from).collect()
}

fn into_tickets(rows: Vec<TicketRow>) -> Vec<Ticket> {
    rows.into_iter()
        .map(|(id, order_id, showtime_id, seat_id, seat_label, price)| Ticket {
            id,
            order_id,
            showtime_id,
            seat_id,
            seat_label,
            price,
        })
        .collect()
}

/// Ledger over Postgres. Row locks are `SELECT ... FOR UPDATE` inside a transaction.
#[derive(Clone)]
pub struct PgSeatLedger {
    pool: PgPool,
}

impl PgSeatLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeatLedger for PgSeatLedger {
    async fn showtime(&self, showtime_id: i64) -> LedgerResult<Option<Showtime>> {
        let showtime = sqlx::query_as::<_, Showtime>(
            "SELECT id, code, room_id, starts_at, base_price FROM showtimes WHERE id = $1",
        )
        .bind(showtime_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(showtime)
    }

    async fn showtime_by_code(&self, code: &str) -> LedgerResult<Option<Showtime>> {
        let showtime = sqlx::query_as::<_, Showtime>(
            "SELECT id, code, room_id, starts_at, base_price FROM showtimes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(showtime)
    }

    async fn showtime_seats(&self, showtime_id: i64) -> LedgerResult<Vec<ShowtimeSeat>> {
        let rows = sqlx::query_as::<_, SeatRow>(&format!(
            "{SEAT_SELECT} WHERE ss.showtime_id = $1 ORDER BY s.row_label, s.col"
        ))
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await?;
        into_seats(rows)
    }

    async fn seats(&self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<ShowtimeSeat>> {
        let rows = sqlx::query_as::<_, SeatRow>(&format!(
            "{SEAT_SELECT} WHERE ss.showtime_id = $1 AND ss.seat_id = ANY($2) ORDER BY ss.seat_id"
        ))
        .bind(showtime_id)
        .bind(normalize_ids(seat_ids))
        .fetch_all(&self.pool)
        .await?;
        into_seats(rows)
    }

    async fn expired_holds(
        &self,
        now: DateTime<Utc>,
        showtime_id: Option<i64>,
    ) -> LedgerResult<Vec<SeatKey>> {
        let keys = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT showtime_id, seat_id
            FROM showtime_seats
            WHERE status = 'HELD'
              AND expires_at <= $1
              AND ($2::BIGINT IS NULL OR showtime_id = $2)
            ORDER BY showtime_id, seat_id
            "#,
        )
        .bind(now)
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn order(&self, order_id: Uuid) -> LedgerResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{ORDER_SELECT} WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn tickets(&self, order_id: Uuid) -> LedgerResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(TICKET_SELECT)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(into_tickets(rows))
    }

    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM orders WHERE status = 'PENDING' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx {
            tx,
            locked: LockSet::default(),
            locked_orders: HashMap::new(),
        }))
    }
}

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    locked: LockSet,
    locked_orders: HashMap<Uuid, Order>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_seats(&mut self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<ShowtimeSeat>> {
        let ids = normalize_ids(seat_ids);

        // ORDER BY sits below the row-lock step, so locks are taken in seat-id order
        let rows = sqlx::query_as::<_, SeatRow>(&format!(
            r#"{SEAT_SELECT}
            WHERE ss.showtime_id = $1
              AND (ss.seat_id = ANY($2)
                   OR ss.seat_id IN (SELECT couple_seat_id FROM seats
                                     WHERE id = ANY($2) AND couple_seat_id IS NOT NULL))
            ORDER BY ss.seat_id
            FOR UPDATE OF ss"#
        ))
        .bind(showtime_id)
        .bind(&ids[..])
        .fetch_all(&mut *self.tx)
        .await?;
        let seats = into_seats(rows)?;

        for seat_id in &ids {
            if !seats.iter().any(|s| s.seat_id == *seat_id) {
                return Err(LedgerError::SeatNotFound { showtime_id, seat_id: *seat_id });
            }
        }

        for seat in &seats {
            // keep buffered state for seats this transaction already wrote
            if !self.locked.contains(&(showtime_id, seat.seat_id)) {
                self.locked.insert(seat.clone());
            }
        }

        seats
            .iter()
            .map(|s| {
                self.locked
                    .get(&(showtime_id, s.seat_id))
                    .cloned()
                    .ok_or(LedgerError::NotLocked(s.seat_id))
            })
            .collect()
    }

    async fn write_seats(&mut self, showtime_id: i64, writes: &[SeatWrite]) -> LedgerResult<()> {
        self.locked.check_writes(showtime_id, writes)?;

        for write in writes {
            sqlx::query(
                r#"
                UPDATE showtime_seats
                SET status = $3, holder = $4, expires_at = $5, updated_at = NOW()
                WHERE showtime_id = $1 AND seat_id = $2
                "#,
            )
            .bind(showtime_id)
            .bind(write.seat_id)
            .bind(write.state.status.as_str())
            .bind(write.state.holder.as_ref().map(|h| h.to_string()))
            .bind(write.state.expires_at)
            .execute(&mut *self.tx)
            .await?;
        }

        self.locked.apply(showtime_id, writes);
        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> LedgerResult<Option<Order>> {
        if let Some(order) = self.locked_orders.get(&order_id) {
            return Ok(Some(order.clone()));
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!("{ORDER_SELECT} WHERE id = $1 FOR UPDATE"))
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        let order = row.map(Order::try_from).transpose()?;

        if let Some(order) = &order {
            self.locked_orders.insert(order_id, order.clone());
        }
        Ok(order)
    }

    async fn order_tickets(&mut self, order_id: Uuid) -> LedgerResult<Vec<Ticket>> {
        // on the transaction's own connection; a pool read here would need a second one
        let rows = sqlx::query_as::<_, TicketRow>(TICKET_SELECT)
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(into_tickets(rows))
    }

    async fn set_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> LedgerResult<()> {
        let order = self
            .locked_orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotLocked(order_id))?;

        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;

        order.status = status;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order, tickets: &[Ticket]) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, showtime_id, holder, buyer_name, buyer_email, buyer_phone,
                                payment_method, status, total_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.showtime_id)
        .bind(order.holder.to_string())
        .bind(&order.buyer.name)
        .bind(&order.buyer.email)
        .bind(&order.buyer.phone)
        .bind(order.payment_method.as_str())
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;

        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (id, order_id, showtime_id, seat_id, seat_label, price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(ticket.id)
            .bind(ticket.order_id)
            .bind(ticket.showtime_id)
            .bind(ticket.seat_id)
            .bind(&ticket.seat_label)
            .bind(ticket.price)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}
