use {
    crate::Address,
    bigdecimal::BigDecimal,
    sqlx::PgConnection,
};

/// One authoritative USD price per `(currency, day)`. The table is an
/// append-only cache: later writers for the same day lose.
#[derive(Clone, Debug, Default, PartialEq, sqlx::FromRow)]
pub struct Sample {
    pub currency: Address,
    /// Day-truncated unix timestamp.
    pub day: i64,
    pub value: BigDecimal,
}

pub async fn insert(ex: &mut PgConnection, sample: &Sample) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO usd_prices (currency, day, value) VALUES ($1, $2, $3) \
        ON CONFLICT (currency, day) DO NOTHING;";
    sqlx::query(QUERY)
        .bind(sample.currency)
        .bind(sample.day)
        .bind(&sample.value)
        .execute(ex)
        .await?;
    Ok(())
}

/// The most recent sample at or before the requested day, which may be
/// stale; the caller decides whether staleness is acceptable.
pub async fn sample_at_or_before(
    ex: &mut PgConnection,
    currency: Address,
    day: i64,
) -> Result<Option<Sample>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT * FROM usd_prices WHERE currency = $1 AND day <= $2 \
        ORDER BY day DESC LIMIT 1;";
    sqlx::query_as(QUERY)
        .bind(currency)
        .bind(day)
        .fetch_optional(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_samples_are_append_only() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let currency = Address([1; 20]);
        const DAY: i64 = 1_700_006_400;

        assert!(sample_at_or_before(&mut db, currency, DAY)
            .await
            .unwrap()
            .is_none());

        let sample = Sample {
            currency,
            day: DAY,
            value: 1850.into(),
        };
        insert(&mut db, &sample).await.unwrap();

        // The first writer for a day is authoritative.
        let conflicting = Sample {
            value: 9999.into(),
            ..sample.clone()
        };
        insert(&mut db, &conflicting).await.unwrap();
        let stored = sample_at_or_before(&mut db, currency, DAY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value, 1850.into());

        // A later day falls back to the stale sample.
        let stored = sample_at_or_before(&mut db, currency, DAY + 86_400)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.day, DAY);

        // An earlier day does not see the future sample.
        assert!(sample_at_or_before(&mut db, currency, DAY - 86_400)
            .await
            .unwrap()
            .is_none());
    }
}
