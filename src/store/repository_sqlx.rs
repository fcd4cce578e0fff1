use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::model::{
    Contact, Destination, Group, GroupStatus, Interest, InterestStatus, MemberConfirmation,
    PaymentStatus,
};
use crate::store::repository::{DateWindow, InterestUpdate, Store};

/// SQLx-backed implementation of the Store port.
/// Responsible only for persistence and row mapping; every compound
/// operation runs in one transaction.
pub struct SqlxStore {
    pool: AnyPool,
}

impl SqlxStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

const INTEREST_COLS: &str = r#"
  interest_id, destination_id, contact_name, contact_email, contact_phone,
  party_size, date_from_ms, date_to_ms, budget_min, budget_max,
  status, group_id, created_ms
"#;

const GROUP_COLS: &str = r#"
  group_id, destination_id, name, date_from_ms, date_to_ms,
  min_size, max_size, current_size,
  base_price, final_price_per_person, price_calc,
  status, confirmation_deadline_ms,
  CAST(auto_confirm_enabled AS INTEGER) AS auto_confirm_i64,
  minimum_confirmation_rate, admin_notes, created_ms
"#;

const CONFIRMATION_COLS: &str = r#"
  confirmation_id, group_id, interest_id, token,
  confirmed, confirmed_ms, expires_ms,
  payment_status, payment_intent_id, payment_tx_id, amount_due,
  decline_reason, refund_attempts, refund_next_ms, created_ms
"#;

#[async_trait]
impl Store for SqlxStore {
    async fn insert_destination(&self, destination: &Destination) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO destinations(destination_id, name, base_price, max_discount, is_active)
VALUES (?, ?, ?, ?, ?);
"#,
        )
        .bind(destination.id.to_string())
        .bind(&destination.name)
        .bind(destination.base_price)
        .bind(destination.max_discount)
        .bind(if destination.is_active { 1i64 } else { 0i64 })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_destination(&self, id: Uuid) -> Result<Option<Destination>> {
        let row = sqlx::query(
            r#"
SELECT destination_id, name, base_price, max_discount,
       CAST(is_active AS INTEGER) AS is_active_i64
FROM destinations
WHERE destination_id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Destination {
                id: parse_uuid(r.get("destination_id"))?,
                name: r.get("name"),
                base_price: r.get("base_price"),
                max_discount: r.get("max_discount"),
                is_active: r.get::<i64, _>("is_active_i64") != 0,
            })),
            None => Ok(None),
        }
    }

    async fn insert_interest(&self, interest: &Interest) -> Result<()> {
        sqlx::query(&format!(
            r#"
INSERT INTO interests({INTEREST_COLS})
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#
        ))
        .bind(interest.id.to_string())
        .bind(interest.destination_id.to_string())
        .bind(&interest.contact.name)
        .bind(&interest.contact.email)
        .bind(interest.contact.phone.as_deref())
        .bind(interest.party_size as i64)
        .bind(dt_to_ms(interest.date_from))
        .bind(dt_to_ms(interest.date_to))
        .bind(interest.budget_min)
        .bind(interest.budget_max)
        .bind(interest.status.as_str())
        .bind(interest.group_id.map(|g| g.to_string()))
        .bind(dt_to_ms(interest.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_interest(&self, id: Uuid) -> Result<Option<Interest>> {
        let row = sqlx::query(&format!(
            "SELECT {INTEREST_COLS} FROM interests WHERE interest_id = ?;"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_interest(&r)?)),
            None => Ok(None),
        }
    }

    async fn load_open_interests(
        &self,
        destination_id: Uuid,
        window: &DateWindow,
    ) -> Result<Vec<Interest>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {INTEREST_COLS}
FROM interests
WHERE destination_id = ? AND status = 'open'
  AND date_from_ms >= ? AND date_from_ms <= ?
ORDER BY created_ms, interest_id;
"#
        ))
        .bind(destination_id.to_string())
        .bind(dt_to_ms(window.from))
        .bind(dt_to_ms(window.to))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_interest(&r) {
                Ok(i) => out.push(i),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the scan
                    tracing::warn!(error = %e, "skipping malformed interest row");
                }
            }
        }
        Ok(out)
    }

    async fn list_members(&self, group_id: Uuid) -> Result<Vec<Interest>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {INTEREST_COLS}
FROM interests
WHERE group_id = ?
ORDER BY created_ms, interest_id;
"#
        ))
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_interest).collect()
    }

    async fn set_interest_status(
        &self,
        interest_id: Uuid,
        status: InterestStatus,
        group_id: Option<Uuid>,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"
UPDATE interests SET status = ?, group_id = ? WHERE interest_id = ?;
"#,
        )
        .bind(status.as_str())
        .bind(group_id.map(|g| g.to_string()))
        .bind(interest_id.to_string())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() != 1 {
            bail!("interest not found: {interest_id}");
        }
        Ok(())
    }

    async fn destinations_with_open_interests(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
SELECT DISTINCT destination_id FROM interests WHERE status = 'open';
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| parse_uuid(r.get("destination_id")))
            .collect()
    }

    async fn create_group_with_members(&self, group: &Group, member_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_group_sql(&mut tx, group).await?;

        for id in member_ids {
            let res = sqlx::query(
                r#"
UPDATE interests SET status = 'matched', group_id = ?
WHERE interest_id = ? AND status = 'open';
"#,
            )
            .bind(group.id.to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

            // Guard miss: someone else took this interest. The whole cluster
            // is abandoned and re-attempted on the next run.
            if res.rows_affected() != 1 {
                tx.rollback().await?;
                bail!("interest {id} no longer open; abandoning cluster");
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let res = update_group_query(group).execute(&self.pool).await?;
        if res.rows_affected() != 1 {
            bail!("group not found: {}", group.id);
        }
        Ok(())
    }

    async fn load_group(&self, id: Uuid) -> Result<Option<Group>> {
        let row = sqlx::query(&format!("SELECT {GROUP_COLS} FROM groups WHERE group_id = ?;"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_group(&r)?)),
            None => Ok(None),
        }
    }

    async fn load_groups_by_status(&self, status: GroupStatus) -> Result<Vec<Group>> {
        let rows = sqlx::query(&format!(
            "SELECT {GROUP_COLS} FROM groups WHERE status = ? ORDER BY created_ms, group_id;"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_group(&r) {
                Ok(g) => out.push(g),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed group row");
                }
            }
        }
        Ok(out)
    }

    async fn load_groups_with_deadline(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {GROUP_COLS}
FROM groups
WHERE confirmation_deadline_ms IS NOT NULL
  AND status NOT IN ('confirmed', 'cancelled', 'merged');
"#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_group).collect()
    }

    async fn admit_members(&self, group: &Group, admitted_ids: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let res = update_group_query(group).execute(&mut *tx).await?;
        if res.rows_affected() != 1 {
            tx.rollback().await?;
            bail!("group not found: {}", group.id);
        }

        for id in admitted_ids {
            let res = sqlx::query(
                r#"
UPDATE interests SET status = 'matched', group_id = ?
WHERE interest_id = ? AND status = 'open';
"#,
            )
            .bind(group.id.to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

            if res.rows_affected() != 1 {
                tx.rollback().await?;
                bail!("interest {id} no longer open; abandoning admit");
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn merge_groups(
        &self,
        survivor: &Group,
        merged: &Group,
        moved_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for g in [survivor, merged] {
            let res = update_group_query(g).execute(&mut *tx).await?;
            if res.rows_affected() != 1 {
                tx.rollback().await?;
                bail!("group not found: {}", g.id);
            }
        }

        for id in moved_ids {
            let res = sqlx::query(
                r#"
UPDATE interests SET group_id = ?
WHERE interest_id = ? AND group_id = ?;
"#,
            )
            .bind(survivor.id.to_string())
            .bind(id.to_string())
            .bind(merged.id.to_string())
            .execute(&mut *tx)
            .await?;

            if res.rows_affected() != 1 {
                tx.rollback().await?;
                bail!("interest {id} not owned by merged group; abandoning merge");
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn begin_confirmation_round(
        &self,
        group: &Group,
        confirmations: &[MemberConfirmation],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Guard: only a forming or full group can enter a confirmation
        // round; a concurrent initiation loses here.
        let res = sqlx::query(
            r#"
UPDATE groups
SET status = ?, confirmation_deadline_ms = ?, final_price_per_person = ?, price_calc = ?
WHERE group_id = ? AND status IN ('forming', 'full');
"#,
        )
        .bind(group.status.as_str())
        .bind(group.confirmation_deadline.map(dt_to_ms))
        .bind(group.final_price_per_person)
        .bind(group.price_calc.to_string())
        .bind(group.id.to_string())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            bail!("group {} not initiable", group.id);
        }

        for c in confirmations {
            insert_confirmation_sql(&mut tx, c).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_confirmation_by_token(&self, token: &str) -> Result<Option<MemberConfirmation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIRMATION_COLS} FROM confirmations WHERE token = ?;"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_confirmation(&r)?)),
            None => Ok(None),
        }
    }

    async fn load_confirmation_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<MemberConfirmation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIRMATION_COLS} FROM confirmations WHERE payment_intent_id = ?;"
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_confirmation(&r)?)),
            None => Ok(None),
        }
    }

    async fn load_confirmations(&self, group_id: Uuid) -> Result<Vec<MemberConfirmation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONFIRMATION_COLS} FROM confirmations WHERE group_id = ? ORDER BY created_ms, confirmation_id;"
        ))
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_confirmation).collect()
    }

    async fn update_confirmation(&self, confirmation: &MemberConfirmation) -> Result<()> {
        let res = update_confirmation_query(confirmation)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() != 1 {
            bail!("confirmation not found: {}", confirmation.id);
        }
        Ok(())
    }

    async fn load_expired_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberConfirmation>> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {CONFIRMATION_COLS}
FROM confirmations
WHERE confirmed IS NULL AND expires_ms < ?
ORDER BY expires_ms;
"#
        ))
        .bind(dt_to_ms(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_confirmation).collect()
    }

    async fn load_refundable_confirmations(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<MemberConfirmation>> {
        let rows = sqlx::query(
            r#"
SELECT
  c.confirmation_id, c.group_id, c.interest_id, c.token,
  c.confirmed, c.confirmed_ms, c.expires_ms,
  c.payment_status, c.payment_intent_id, c.payment_tx_id, c.amount_due,
  c.decline_reason, c.refund_attempts, c.refund_next_ms, c.created_ms
FROM confirmations c
JOIN groups g ON g.group_id = c.group_id
WHERE g.status = 'cancelled'
  AND c.payment_status = 'paid'
  AND c.refund_attempts >= 1
  AND c.refund_attempts < ?
  AND c.refund_next_ms IS NOT NULL
  AND c.refund_next_ms <= ?;
"#,
        )
        .bind(max_attempts as i64)
        .bind(dt_to_ms(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_confirmation).collect()
    }

    async fn apply_group_transition(
        &self,
        group: &Group,
        interest_updates: &[InterestUpdate],
        confirmation_updates: &[MemberConfirmation],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let res = update_group_query(group).execute(&mut *tx).await?;
        if res.rows_affected() != 1 {
            tx.rollback().await?;
            bail!("group not found: {}", group.id);
        }

        for u in interest_updates {
            let res = sqlx::query(
                r#"
UPDATE interests SET status = ?, group_id = ? WHERE interest_id = ?;
"#,
            )
            .bind(u.status.as_str())
            .bind(u.group_id.map(|g| g.to_string()))
            .bind(u.interest_id.to_string())
            .execute(&mut *tx)
            .await?;

            if res.rows_affected() != 1 {
                tx.rollback().await?;
                bail!("interest not found: {}", u.interest_id);
            }
        }

        for c in confirmation_updates {
            let res = update_confirmation_query(c).execute(&mut *tx).await?;
            if res.rows_affected() != 1 {
                tx.rollback().await?;
                bail!("confirmation not found: {}", c.id);
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

/* =========================
Statement builders
========================= */

async fn insert_group_sql(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    group: &Group,
) -> Result<()> {
    sqlx::query(
        r#"
INSERT INTO groups(
  group_id, destination_id, name, date_from_ms, date_to_ms,
  min_size, max_size, current_size,
  base_price, final_price_per_person, price_calc,
  status, confirmation_deadline_ms,
  auto_confirm_enabled, minimum_confirmation_rate, admin_notes, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(group.id.to_string())
    .bind(group.destination_id.to_string())
    .bind(&group.name)
    .bind(dt_to_ms(group.date_from))
    .bind(dt_to_ms(group.date_to))
    .bind(group.min_size as i64)
    .bind(group.max_size as i64)
    .bind(group.current_size as i64)
    .bind(group.base_price)
    .bind(group.final_price_per_person)
    .bind(group.price_calc.to_string())
    .bind(group.status.as_str())
    .bind(group.confirmation_deadline.map(dt_to_ms))
    .bind(if group.auto_confirm_enabled { 1i64 } else { 0i64 })
    .bind(group.minimum_confirmation_rate)
    .bind(&group.admin_notes)
    .bind(dt_to_ms(group.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn update_group_query(
    group: &Group,
) -> sqlx::query::Query<'_, sqlx::Any, sqlx::any::AnyArguments<'_>> {
    sqlx::query(
        r#"
UPDATE groups SET
  name = ?, date_from_ms = ?, date_to_ms = ?,
  min_size = ?, max_size = ?, current_size = ?,
  base_price = ?, final_price_per_person = ?, price_calc = ?,
  status = ?, confirmation_deadline_ms = ?,
  auto_confirm_enabled = ?, minimum_confirmation_rate = ?, admin_notes = ?
WHERE group_id = ?;
"#,
    )
    .bind(&group.name)
    .bind(dt_to_ms(group.date_from))
    .bind(dt_to_ms(group.date_to))
    .bind(group.min_size as i64)
    .bind(group.max_size as i64)
    .bind(group.current_size as i64)
    .bind(group.base_price)
    .bind(group.final_price_per_person)
    .bind(group.price_calc.to_string())
    .bind(group.status.as_str())
    .bind(group.confirmation_deadline.map(dt_to_ms))
    .bind(if group.auto_confirm_enabled { 1i64 } else { 0i64 })
    .bind(group.minimum_confirmation_rate)
    .bind(&group.admin_notes)
    .bind(group.id.to_string())
}

async fn insert_confirmation_sql(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    c: &MemberConfirmation,
) -> Result<()> {
    sqlx::query(
        r#"
INSERT INTO confirmations(
  confirmation_id, group_id, interest_id, token,
  confirmed, confirmed_ms, expires_ms,
  payment_status, payment_intent_id, payment_tx_id, amount_due,
  decline_reason, refund_attempts, refund_next_ms, created_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(c.id.to_string())
    .bind(c.group_id.to_string())
    .bind(c.interest_id.to_string())
    .bind(&c.token)
    .bind(c.confirmed.map(|v| if v { 1i64 } else { 0i64 }))
    .bind(c.confirmed_at.map(dt_to_ms))
    .bind(dt_to_ms(c.expires_at))
    .bind(c.payment_status.as_str())
    .bind(c.payment_intent_id.as_deref())
    .bind(c.payment_tx_id.as_deref())
    .bind(c.amount_due)
    .bind(c.decline_reason.as_deref())
    .bind(c.refund_attempts as i64)
    .bind(c.refund_next_at.map(dt_to_ms))
    .bind(dt_to_ms(c.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn update_confirmation_query(
    c: &MemberConfirmation,
) -> sqlx::query::Query<'_, sqlx::Any, sqlx::any::AnyArguments<'_>> {
    sqlx::query(
        r#"
UPDATE confirmations SET
  confirmed = ?, confirmed_ms = ?, expires_ms = ?,
  payment_status = ?, payment_intent_id = ?, payment_tx_id = ?, amount_due = ?,
  decline_reason = ?, refund_attempts = ?, refund_next_ms = ?
WHERE confirmation_id = ?;
"#,
    )
    .bind(c.confirmed.map(|v| if v { 1i64 } else { 0i64 }))
    .bind(c.confirmed_at.map(dt_to_ms))
    .bind(dt_to_ms(c.expires_at))
    .bind(c.payment_status.as_str())
    .bind(c.payment_intent_id.as_deref())
    .bind(c.payment_tx_id.as_deref())
    .bind(c.amount_due)
    .bind(c.decline_reason.as_deref())
    .bind(c.refund_attempts as i64)
    .bind(c.refund_next_at.map(dt_to_ms))
    .bind(c.id.to_string())
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_interest(r: &sqlx::any::AnyRow) -> Result<Interest> {
    Ok(Interest {
        id: parse_uuid(r.get("interest_id"))?,
        destination_id: parse_uuid(r.get("destination_id"))?,
        contact: Contact {
            name: r.get("contact_name"),
            email: r.get("contact_email"),
            phone: r.get::<Option<String>, _>("contact_phone"),
        },
        party_size: i64_to_u32(r.get("party_size"))?,
        date_from: ms_to_dt(r.get("date_from_ms"))?,
        date_to: ms_to_dt(r.get("date_to_ms"))?,
        budget_min: r.get::<Option<f64>, _>("budget_min"),
        budget_max: r.get::<Option<f64>, _>("budget_max"),
        status: InterestStatus::parse(&r.get::<String, _>("status"))?,
        group_id: r
            .get::<Option<String>, _>("group_id")
            .map(|s| parse_uuid(s))
            .transpose()?,
        created_at: ms_to_dt(r.get("created_ms"))?,
    })
}

fn row_to_group(r: &sqlx::any::AnyRow) -> Result<Group> {
    let price_calc_raw: String = r.get("price_calc");
    let price_calc =
        serde_json::from_str(&price_calc_raw).context("invalid price_calc json")?;

    Ok(Group {
        id: parse_uuid(r.get("group_id"))?,
        destination_id: parse_uuid(r.get("destination_id"))?,
        name: r.get("name"),
        date_from: ms_to_dt(r.get("date_from_ms"))?,
        date_to: ms_to_dt(r.get("date_to_ms"))?,
        min_size: i64_to_u32(r.get("min_size"))?,
        max_size: i64_to_u32(r.get("max_size"))?,
        current_size: i64_to_u32(r.get("current_size"))?,
        base_price: r.get("base_price"),
        final_price_per_person: r.get("final_price_per_person"),
        price_calc,
        status: GroupStatus::parse(&r.get::<String, _>("status"))?,
        confirmation_deadline: r
            .get::<Option<i64>, _>("confirmation_deadline_ms")
            .map(ms_to_dt)
            .transpose()?,
        auto_confirm_enabled: r.get::<i64, _>("auto_confirm_i64") != 0,
        minimum_confirmation_rate: r.get("minimum_confirmation_rate"),
        admin_notes: r.get("admin_notes"),
        created_at: ms_to_dt(r.get("created_ms"))?,
    })
}

fn row_to_confirmation(r: &sqlx::any::AnyRow) -> Result<MemberConfirmation> {
    Ok(MemberConfirmation {
        id: parse_uuid(r.get("confirmation_id"))?,
        group_id: parse_uuid(r.get("group_id"))?,
        interest_id: parse_uuid(r.get("interest_id"))?,
        token: r.get("token"),
        confirmed: r.get::<Option<i64>, _>("confirmed").map(|v| v != 0),
        confirmed_at: r
            .get::<Option<i64>, _>("confirmed_ms")
            .map(ms_to_dt)
            .transpose()?,
        expires_at: ms_to_dt(r.get("expires_ms"))?,
        payment_status: PaymentStatus::parse(&r.get::<String, _>("payment_status"))?,
        payment_intent_id: r.get::<Option<String>, _>("payment_intent_id"),
        payment_tx_id: r.get::<Option<String>, _>("payment_tx_id"),
        amount_due: r.get("amount_due"),
        decline_reason: r.get::<Option<String>, _>("decline_reason"),
        refund_attempts: i64_to_u32(r.get("refund_attempts"))?,
        refund_next_at: r
            .get::<Option<i64>, _>("refund_next_ms")
            .map(ms_to_dt)
            .transpose()?,
        created_at: ms_to_dt(r.get("created_ms"))?,
    })
}

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).with_context(|| format!("invalid uuid: {s}"))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

fn i64_to_u32(v: i64) -> Result<u32> {
    if v < 0 || v > u32::MAX as i64 {
        bail!("out of range for u32: {v}");
    }
    Ok(v as u32)
}
