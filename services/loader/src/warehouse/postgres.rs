//! PostgreSQL warehouse.
//!
//! Staging writes are chunked multi-row INSERTs; every merge is a set-based
//! statement over the staging table. Each step commits its own transaction.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use super::{RunOutcome, RunStart, Warehouse};
use crate::config::{DateSource, DbConfig, FactDedup};
use crate::date_dim::DatePoint;
use crate::dimensions::{MergeCounts, ProductSource, NEW_CUSTOMER_GENDER};
use crate::products::StagedProduct;
use crate::staging::{rows_per_statement, StagedOrder, TEXT_COLUMNS};

const TABLE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS dim_date (
        date_id DATE PRIMARY KEY,
        year SMALLINT NOT NULL,
        quarter SMALLINT NOT NULL,
        month SMALLINT NOT NULL,
        month_name VARCHAR(15) NOT NULL,
        day SMALLINT NOT NULL,
        day_of_week SMALLINT NOT NULL,
        is_weekend BOOLEAN NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_platform (
        platform_id INT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        platform_name VARCHAR(50) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_product (
        product_id INT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        main_sku_code VARCHAR(120) NOT NULL UNIQUE,
        english_name VARCHAR(255),
        chinese_name VARCHAR(255),
        customer_code VARCHAR(100),
        category VARCHAR(100)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dim_customer (
        customer_id BIGINT PRIMARY KEY,
        gender VARCHAR(20),
        state_code CHAR(2),
        postal_code VARCHAR(20)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fact_sales (
        fact_id INT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        order_id VARCHAR(100),
        date_id DATE,
        product_id INT,
        customer_id BIGINT,
        platform_id INT,
        units INT NOT NULL DEFAULT 1,
        revenue NUMERIC(18,2) NOT NULL DEFAULT 0,
        state_code CHAR(2)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stg_product_master (
        row_no BIGINT NOT NULL,
        main_sku_code VARCHAR(120) NOT NULL,
        english_name VARCHAR(255),
        chinese_name VARCHAR(255),
        customer_code VARCHAR(100),
        category VARCHAR(100),
        load_ts TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS etl_runs (
        run_id UUID PRIMARY KEY,
        kind VARCHAR(20) NOT NULL,
        input_path TEXT NOT NULL,
        content_hash VARCHAR(80) NOT NULL,
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ,
        status VARCHAR(20) NOT NULL,
        error TEXT,
        detail JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
];

/// Typed staging columns, after the text columns, in insert order.
const TYPED_ORDER_COLUMNS: &[(&str, &str)] = &[
    ("create_time", "TIMESTAMP"),
    ("submit_time", "TIMESTAMP"),
    ("delivery_time", "TIMESTAMP"),
    ("picking_time", "TIMESTAMP"),
    ("volume_num", "DOUBLE PRECISION"),
    ("actual_weight_num", "DOUBLE PRECISION"),
    ("state_code", "CHAR(2)"),
    ("goods_number", "INT"),
    ("customer_id", "BIGINT"),
    ("product_key", "VARCHAR(120)"),
    ("row_no", "BIGINT NOT NULL"),
];

const PRODUCT_STAGING_COLUMNS: usize = 6;
const DATE_COLUMNS: usize = 8;

fn order_staging_ddl() -> String {
    let columns: Vec<String> = TEXT_COLUMNS
        .iter()
        .map(|c| format!("{} VARCHAR({})", c.column, c.width))
        .chain(
            TYPED_ORDER_COLUMNS
                .iter()
                .map(|(name, ty)| format!("{} {}", name, ty)),
        )
        .chain(std::iter::once(
            "load_ts TIMESTAMPTZ NOT NULL DEFAULT now()".to_string(),
        ))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS stg_order_export_raw ({})",
        columns.join(", ")
    )
}

fn order_insert_prefix() -> String {
    let names: Vec<&str> = TEXT_COLUMNS
        .iter()
        .map(|c| c.column)
        .chain(TYPED_ORDER_COLUMNS.iter().map(|(name, _)| *name))
        .collect();
    format!("INSERT INTO stg_order_export_raw ({}) ", names.join(", "))
}

/// Latest non-null value of `column` within each group, by load order.
fn latest(column: &str) -> String {
    format!(
        "(array_agg({col} ORDER BY row_no DESC) FILTER (WHERE {col} IS NOT NULL))[1] AS {col}",
        col = column
    )
}

fn product_candidates_cte(source: ProductSource) -> String {
    match source {
        ProductSource::OrderExport => r#"
            SELECT DISTINCT product_key AS main_sku_code,
                   NULL::VARCHAR AS english_name,
                   NULL::VARCHAR AS chinese_name,
                   NULL::VARCHAR AS customer_code,
                   NULL::VARCHAR AS category
            FROM stg_order_export_raw
            WHERE product_key IS NOT NULL AND product_key <> ''
            "#
        .to_string(),
        ProductSource::ProductMaster => format!(
            "SELECT main_sku_code, {}, {}, {}, {} FROM stg_product_master \
             WHERE main_sku_code <> '' GROUP BY main_sku_code",
            latest("english_name"),
            latest("chinese_name"),
            latest("customer_code"),
            latest("category"),
        ),
    }
}

fn customer_candidates_cte() -> String {
    format!(
        "SELECT customer_id, {}, {} FROM stg_order_export_raw \
         WHERE customer_id IS NOT NULL GROUP BY customer_id",
        latest("state_code"),
        latest("postal_code"),
    )
}

/// Customers missing a state or postal code take every non-null staged value.
fn customer_update_sql() -> String {
    format!(
        r#"
        WITH staged AS ({candidates})
        UPDATE dim_customer c
        SET state_code = COALESCE(s.state_code, c.state_code),
            postal_code = COALESCE(s.postal_code, c.postal_code)
        FROM staged s
        WHERE c.customer_id = s.customer_id
          AND (c.state_code IS NULL OR c.postal_code IS NULL)
          AND (c.state_code IS DISTINCT FROM COALESCE(s.state_code, c.state_code)
            OR c.postal_code IS DISTINCT FROM COALESCE(s.postal_code, c.postal_code))
        "#,
        candidates = customer_candidates_cte()
    )
}

fn fact_dedup_filter(dedup: FactDedup) -> &'static str {
    match dedup {
        FactDedup::None => "TRUE",
        FactDedup::OrderId => {
            "(q.order_id IS NULL OR (q.order_rank = 1 AND NOT EXISTS \
             (SELECT 1 FROM fact_sales f WHERE f.order_id = q.order_id)))"
        }
        FactDedup::OrderLine => {
            "(q.order_id IS NULL OR (q.line_rank = 1 AND NOT EXISTS \
             (SELECT 1 FROM fact_sales f WHERE f.order_id = q.order_id \
              AND f.product_id = q.product_id)))"
        }
    }
}

fn fact_insert_sql(source: DateSource, dedup: FactDedup) -> String {
    format!(
        r#"
        WITH qualified AS (
            SELECT r.row_no,
                   r.order_no AS order_id,
                   CAST(r.{col} AS DATE) AS date_id,
                   p.product_id,
                   r.customer_id,
                   pl.platform_id,
                   COALESCE(r.goods_number, 1) AS units,
                   r.state_code,
                   ROW_NUMBER() OVER (PARTITION BY r.order_no ORDER BY r.row_no) AS order_rank,
                   ROW_NUMBER() OVER (PARTITION BY r.order_no, p.product_id ORDER BY r.row_no) AS line_rank
            FROM stg_order_export_raw r
            JOIN dim_platform pl ON pl.platform_name = r.commerce_platform
            JOIN dim_product p ON p.main_sku_code = r.product_key
            WHERE r.{col} IS NOT NULL
        )
        INSERT INTO fact_sales (order_id, date_id, product_id, customer_id, platform_id, units, revenue, state_code)
        SELECT q.order_id, q.date_id, q.product_id, q.customer_id, q.platform_id, q.units, 0, q.state_code
        FROM qualified q
        WHERE {filter}
        ORDER BY q.row_no
        "#,
        col = source.column(),
        filter = fact_dedup_filter(dedup),
    )
}

pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }
}

impl Warehouse for PgWarehouse {
    async fn ensure_schema(&mut self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for ddl in TABLE_DDL {
            sqlx::query(ddl).execute(&mut *tx).await?;
        }
        sqlx::query(&order_staging_ddl()).execute(&mut *tx).await?;
        tx.commit().await?;
        debug!("schema ensured");
        Ok(())
    }

    async fn begin_run(&mut self, run: &RunStart) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO etl_runs (run_id, kind, input_path, content_hash, status)
            VALUES ($1, $2, $3, $4, 'running')
            "#,
        )
        .bind(run_id)
        .bind(run.kind.as_str())
        .bind(&run.input_path)
        .bind(&run.content_hash)
        .execute(&self.pool)
        .await
        .context("Failed to record run start")?;
        Ok(run_id)
    }

    async fn finish_run(&mut self, run_id: Uuid, outcome: &RunOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE etl_runs
            SET finished_at = now(), status = $2, error = $3, detail = detail || $4
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(outcome.status.as_str())
        .bind(outcome.error.as_deref())
        .bind(&outcome.detail)
        .execute(&self.pool)
        .await
        .context("Failed to record run outcome")?;
        Ok(())
    }

    async fn stage_orders(&mut self, rows: &[StagedOrder], chunk_size: usize) -> Result<u64> {
        let columns = TEXT_COLUMNS.len() + TYPED_ORDER_COLUMNS.len();
        let per_statement = rows_per_statement(chunk_size, columns);
        let prefix = order_insert_prefix();

        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE TABLE stg_order_export_raw")
            .execute(&mut *tx)
            .await?;

        let mut staged = 0;
        for chunk in rows.chunks(per_statement) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(prefix.as_str());
            qb.push_values(chunk.iter(), |mut b, row| {
                let rec = &row.record;
                for column in TEXT_COLUMNS {
                    b.push_bind(rec.text(column.field).map(str::to_string));
                }
                b.push_bind(rec.create_time)
                    .push_bind(rec.submit_time)
                    .push_bind(rec.delivery_time)
                    .push_bind(rec.picking_time)
                    .push_bind(rec.volume_num)
                    .push_bind(rec.actual_weight_num)
                    .push_bind(rec.state_code.clone())
                    .push_bind(rec.goods_number)
                    .push_bind(rec.customer_id)
                    .push_bind(rec.product_key.clone())
                    .push_bind(row.row_no);
            });
            staged += qb.build().execute(&mut *tx).await?.rows_affected();
            debug!(rows = chunk.len(), "staged order chunk");
        }
        tx.commit().await?;

        info!(table = "stg_order_export_raw", rows = staged, "staged orders");
        Ok(staged)
    }

    async fn stage_products(&mut self, rows: &[StagedProduct], chunk_size: usize) -> Result<u64> {
        let per_statement = rows_per_statement(chunk_size, PRODUCT_STAGING_COLUMNS);

        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE TABLE stg_product_master")
            .execute(&mut *tx)
            .await?;

        let mut staged = 0;
        for chunk in rows.chunks(per_statement) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO stg_product_master (row_no, main_sku_code, english_name, chinese_name, customer_code, category) ",
            );
            qb.push_values(chunk.iter(), |mut b, row| {
                b.push_bind(row.row_no)
                    .push_bind(row.main_sku_code.clone())
                    .push_bind(row.english_name.clone())
                    .push_bind(row.chinese_name.clone())
                    .push_bind(row.customer_code.clone())
                    .push_bind(row.category.clone());
            });
            staged += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        info!(table = "stg_product_master", rows = staged, "staged products");
        Ok(staged)
    }

    async fn upsert_platforms(&mut self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO dim_platform (platform_name)
            SELECT DISTINCT s.commerce_platform
            FROM stg_order_export_raw s
            WHERE s.commerce_platform IS NOT NULL AND s.commerce_platform <> ''
            ORDER BY s.commerce_platform
            ON CONFLICT (platform_name) DO NOTHING
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        info!(table = "dim_platform", inserted, "platforms merged");
        Ok(inserted)
    }

    async fn upsert_products(&mut self, source: ProductSource) -> Result<MergeCounts> {
        let candidates = product_candidates_cte(source);
        let update = format!(
            r#"
            WITH staged AS ({candidates})
            UPDATE dim_product p
            SET english_name = COALESCE(s.english_name, p.english_name),
                chinese_name = COALESCE(s.chinese_name, p.chinese_name),
                customer_code = COALESCE(s.customer_code, p.customer_code),
                category = COALESCE(s.category, p.category)
            FROM staged s
            WHERE p.main_sku_code = s.main_sku_code
              AND (COALESCE(s.english_name, p.english_name) IS DISTINCT FROM p.english_name
                OR COALESCE(s.chinese_name, p.chinese_name) IS DISTINCT FROM p.chinese_name
                OR COALESCE(s.customer_code, p.customer_code) IS DISTINCT FROM p.customer_code
                OR COALESCE(s.category, p.category) IS DISTINCT FROM p.category)
            "#
        );
        let insert = format!(
            r#"
            WITH staged AS ({candidates})
            INSERT INTO dim_product (main_sku_code, english_name, chinese_name, customer_code, category)
            SELECT main_sku_code, english_name, chinese_name, customer_code, category
            FROM staged
            ORDER BY main_sku_code
            ON CONFLICT (main_sku_code) DO NOTHING
            "#
        );

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&update).execute(&mut *tx).await?.rows_affected();
        let inserted = sqlx::query(&insert).execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        info!(table = "dim_product", ?source, inserted, updated, "products merged");
        Ok(MergeCounts { inserted, updated })
    }

    async fn upsert_customers(&mut self) -> Result<MergeCounts> {
        let candidates = customer_candidates_cte();
        let update = customer_update_sql();
        let insert = format!(
            r#"
            WITH staged AS ({candidates})
            INSERT INTO dim_customer (customer_id, gender, state_code, postal_code)
            SELECT customer_id, $1, state_code, postal_code
            FROM staged
            ON CONFLICT (customer_id) DO NOTHING
            "#
        );

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&update).execute(&mut *tx).await?.rows_affected();
        let inserted = sqlx::query(&insert)
            .bind(NEW_CUSTOMER_GENDER)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(table = "dim_customer", inserted, updated, "customers merged");
        Ok(MergeCounts { inserted, updated })
    }

    async fn ensure_dates(&mut self, points: &[DatePoint], chunk_size: usize) -> Result<u64> {
        let per_statement = rows_per_statement(chunk_size, DATE_COLUMNS);

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in points.chunks(per_statement) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO dim_date (date_id, year, quarter, month, month_name, day, day_of_week, is_weekend) ",
            );
            qb.push_values(chunk.iter(), |mut b, p| {
                b.push_bind(p.date)
                    .push_bind(p.year)
                    .push_bind(p.quarter)
                    .push_bind(p.month)
                    .push_bind(p.month_name)
                    .push_bind(p.day)
                    .push_bind(p.day_of_week)
                    .push_bind(p.is_weekend);
            });
            qb.push(" ON CONFLICT (date_id) DO NOTHING");
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_facts(&mut self, source: DateSource, dedup: FactDedup) -> Result<u64> {
        let sql = fact_insert_sql(source, dedup);
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        info!(table = "fact_sales", inserted, date_column = source.column(), ?dedup, "facts inserted");
        Ok(inserted)
    }
}
