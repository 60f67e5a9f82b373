use {bigdecimal::BigDecimal, sqlx::PgConnection};

#[derive(Clone, Debug, Default, PartialEq, sqlx::FromRow)]
pub struct Order {
    pub id: String,
    pub kind: String,
    pub fillability_status: String,
    pub quantity_filled: BigDecimal,
    pub quantity_remaining: BigDecimal,
    pub valid_from: i64,
    pub valid_until: i64,
    pub block_number: i64,
    pub log_index: i64,
    pub source: Option<String>,
    pub data: serde_json::Value,
}

pub async fn insert(ex: &mut PgConnection, order: &Order) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO orders (id, kind, fillability_status, quantity_filled, quantity_remaining, \
         valid_from, valid_until, block_number, log_index, source, data) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
        ON CONFLICT (id) DO NOTHING;";
    sqlx::query(QUERY)
        .bind(&order.id)
        .bind(&order.kind)
        .bind(&order.fillability_status)
        .bind(&order.quantity_filled)
        .bind(&order.quantity_remaining)
        .bind(order.valid_from)
        .bind(order.valid_until)
        .bind(order.block_number)
        .bind(order.log_index)
        .bind(&order.source)
        .bind(&order.data)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn single_order(
    ex: &mut PgConnection,
    id: &str,
) -> Result<Option<Order>, sqlx::Error> {
    const QUERY: &str = "SELECT * FROM orders WHERE id = $1;";
    sqlx::query_as(QUERY).bind(id).fetch_optional(ex).await
}

/// Explicit revalidation trigger: the only path that may move an order
/// back to `fillable` (e.g. after a balance top-up was observed).
pub async fn revalidate(ex: &mut PgConnection, id: &str) -> Result<u64, sqlx::Error> {
    const QUERY: &str = "\
        UPDATE orders SET fillability_status = 'fillable' \
        WHERE id = $1 AND fillability_status IN ('no-balance', 'expired');";
    let result = sqlx::query(QUERY).bind(id).execute(ex).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_order_round_trip() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let order = Order {
            id: "order".to_string(),
            kind: "order-book".to_string(),
            fillability_status: "fillable".to_string(),
            quantity_remaining: 1.into(),
            valid_until: i64::MAX,
            data: serde_json::json!({"maker": "0x00"}),
            ..Default::default()
        };
        insert(&mut db, &order).await.unwrap();
        // Upsert of an existing id is a no-op.
        let mut conflicting = order.clone();
        conflicting.fillability_status = "cancelled".to_string();
        insert(&mut db, &conflicting).await.unwrap();

        let stored = single_order(&mut db, "order").await.unwrap().unwrap();
        assert_eq!(stored, order);
        assert!(single_order(&mut db, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_revalidation_only_leaves_recoverable_states() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let order = Order {
            id: "order".to_string(),
            fillability_status: "no-balance".to_string(),
            ..Default::default()
        };
        insert(&mut db, &order).await.unwrap();
        assert_eq!(revalidate(&mut db, "order").await.unwrap(), 1);

        let filled = Order {
            id: "filled".to_string(),
            fillability_status: "filled".to_string(),
            ..Default::default()
        };
        insert(&mut db, &filled).await.unwrap();
        assert_eq!(revalidate(&mut db, "filled").await.unwrap(), 0);
    }
}
