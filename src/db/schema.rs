use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Destinations (reference data; read-only for the engine)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS destinations (
  destination_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  base_price DOUBLE PRECISION NOT NULL,
  max_discount DOUBLE PRECISION NOT NULL,
  is_active BOOLEAN NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Interests
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS interests (
  interest_id TEXT PRIMARY KEY,
  destination_id TEXT NOT NULL,
  contact_name TEXT NOT NULL,
  contact_email TEXT NOT NULL,
  contact_phone TEXT,

  party_size INTEGER NOT NULL,
  date_from_ms BIGINT NOT NULL,
  date_to_ms BIGINT NOT NULL,

  budget_min DOUBLE PRECISION,
  budget_max DOUBLE PRECISION,

  status TEXT NOT NULL,
  group_id TEXT,

  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Groups
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS groups (
  group_id TEXT PRIMARY KEY,
  destination_id TEXT NOT NULL,
  name TEXT NOT NULL,

  date_from_ms BIGINT NOT NULL,
  date_to_ms BIGINT NOT NULL,

  min_size INTEGER NOT NULL,
  max_size INTEGER NOT NULL,
  current_size INTEGER NOT NULL,

  base_price DOUBLE PRECISION NOT NULL,
  final_price_per_person DOUBLE PRECISION NOT NULL,
  price_calc TEXT NOT NULL,

  status TEXT NOT NULL,
  confirmation_deadline_ms BIGINT,

  auto_confirm_enabled BOOLEAN NOT NULL,
  minimum_confirmation_rate DOUBLE PRECISION NOT NULL,

  admin_notes TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Member confirmations
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS confirmations (
  confirmation_id TEXT PRIMARY KEY,
  group_id TEXT NOT NULL,
  interest_id TEXT NOT NULL,

  token TEXT NOT NULL,

  confirmed INTEGER,
  confirmed_ms BIGINT,
  expires_ms BIGINT NOT NULL,

  payment_status TEXT NOT NULL,
  payment_intent_id TEXT,
  payment_tx_id TEXT,
  amount_due DOUBLE PRECISION NOT NULL,

  decline_reason TEXT,

  refund_attempts INTEGER NOT NULL,
  refund_next_ms BIGINT,

  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_interests_dest_status ON interests(destination_id, status);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_interests_group ON interests(group_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_groups_status ON groups(status);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_confirmations_token ON confirmations(token);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_confirmations_expires ON confirmations(expires_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
