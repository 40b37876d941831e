//! Common test utilities

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Setup test database - truncate tables and seed test data
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Compute hash dynamically to match what middleware expects
    let hash_check: String = sqlx::query_scalar("SELECT encode(sha256('test_key_123'::bytea), 'hex')")
        .fetch_one(&pool)
        .await
        .unwrap();

    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    // Clean up DB for fresh state
    sqlx::query(
        "TRUNCATE TABLE events, event_snapshots, event_snapshot_history, event_outbox, \
         api_keys, accounts, users, idempotency_keys, audit_logs CASCADE",
    )
    .execute(&mut *tx)
    .await
    .expect("Failed to clean up DB");

    // Seed test API Key with dynamically computed hash
    sqlx::query(
        r#"
        INSERT INTO api_keys (id, name, key_hash, key_prefix, permissions, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (key_prefix) DO NOTHING
        "#
    )
    .bind(uuid::Uuid::new_v4())
    .bind("Test Key")
    .bind(&hash_check)
    .bind("test_")
    .bind(vec!["admin".to_string(), "mint".to_string(), "read:users".to_string(), "write:users".to_string(), "write:transfers".to_string()])
    .bind(true)
    .execute(&mut *tx)
    .await
    .expect("Failed to seed API key");

    // Seed SYSTEM_MINT and SYSTEM_BURN users/accounts (required for mint/burn
    // operations; TRUNCATE above wipes the rows the migration seeds, so tests
    // have to recreate them with the same ids and account_type values).
    let mint_user_id: uuid::Uuid = "00000000-0000-0000-0000-000000000001".parse().unwrap();
    let mint_account_id: uuid::Uuid = "00000000-0000-0000-0000-0000000000a1".parse().unwrap();
    let burn_user_id: uuid::Uuid = "00000000-0000-0000-0000-000000000002".parse().unwrap();
    let burn_account_id: uuid::Uuid = "00000000-0000-0000-0000-0000000000a2".parse().unwrap();

    for (user_id, username) in [(mint_user_id, "system_mint"), (burn_user_id, "system_burn")] {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, is_active, is_system, created_at, updated_at)
            VALUES ($1, $2, $2 || '@internal.test', true, true, NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(username)
        .execute(&mut *tx)
        .await
        .expect("Failed to seed system user");
    }

    for (account_id, user_id, account_type) in [
        (mint_account_id, mint_user_id, "system_mint"),
        (burn_account_id, burn_user_id, "system_burn"),
    ] {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, account_type, is_active, created_at)
            VALUES ($1, $2, $3, true, NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .bind(account_type)
        .execute(&mut *tx)
        .await
        .expect("Failed to seed system account");

        sqlx::query(
            r#"
            INSERT INTO account_balances (account_id, balance, last_event_version)
            VALUES ($1, 0, 0)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await
        .expect("Failed to seed system account balance");

        let event_id = uuid::Uuid::new_v4();
        let payload = serde_json::json!({
            "type": "AccountCreated",
            "account_id": account_id,
            "user_id": user_id,
            "account_type": account_type,
            "created_at": "2026-01-01T00:00:00Z"
        });

        sqlx::query(
            r#"
            INSERT INTO events (id, aggregate_type, aggregate_id, event_type, version, event_data, context, created_at)
            VALUES ($1, 'Account', $2, 'AccountCreated', 0, $3, '{}', '2026-01-01 00:00:00+00')
            "#,
        )
        .bind(event_id)
        .bind(account_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .expect("Failed to seed system account event");
    }

    tx.commit().await.expect("Failed to commit transaction");

    pool
}
