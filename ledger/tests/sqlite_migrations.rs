mod common;
use common::{assert_sqlite_pragmas, setup_db};

use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::Integer;

#[derive(QueryableByName)]
struct TblCnt {
    #[diesel(sql_type = Integer)]
    cnt: i32,
}

#[test]
fn migrations_apply_and_pragmas_are_set() {
    let (_db, mut conn) = setup_db();

    assert_sqlite_pragmas(&mut conn);

    let tbls: TblCnt = sql_query(
        "SELECT COUNT(*) AS cnt
            FROM sqlite_master
            WHERE type='table'
            AND name IN ('watermark','partitions');",
    )
    .get_result(&mut conn)
    .unwrap();
    assert_eq!(tbls.cnt, 2, "expected both ledger tables to be present");

    sql_query(
        "INSERT INTO watermark (symbol, last_complete_minute_utc, updated_at_utc)
         VALUES ('BTCUSDT', '2026-01-15T10:00:00Z', '2026-01-15T10:00:01Z');",
    )
    .execute(&mut conn)
    .unwrap();

    sql_query(
        "INSERT INTO partitions (
            symbol, day, hour, path, row_count, min_ts, max_ts,
            schema_hash, content_hash, status, committed_at_utc
         ) VALUES (
            'BTCUSDT', '2026-01-15', 10, '/lake/part.parquet', 60,
            '2026-01-15T10:00:00Z', '2026-01-15T10:59:00Z',
            'schemahash', 'contenthash', 'COMMITTED', '2026-01-15T11:00:00Z'
         );",
    )
    .execute(&mut conn)
    .unwrap();

    // Primary key (symbol, day, hour) rejects a duplicate insert.
    let dup = sql_query(
        "INSERT INTO partitions (
            symbol, day, hour, path, row_count, min_ts, max_ts,
            schema_hash, content_hash, status, committed_at_utc
         ) VALUES (
            'BTCUSDT', '2026-01-15', 10, '/lake/other.parquet', 60,
            '2026-01-15T10:00:00Z', '2026-01-15T10:59:00Z',
            'x', 'y', 'COMMITTED', '2026-01-15T11:05:00Z'
         );",
    )
    .execute(&mut conn);
    assert!(dup.is_err(), "duplicate (symbol, day, hour) must be rejected");

    assert_eq!(common::count(&mut conn, "watermark"), 1);
    assert_eq!(common::count(&mut conn, "partitions"), 1);
}
