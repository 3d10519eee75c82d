use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use ledger::db::connection::connect_sqlite;

mod common;

#[test]
fn sqlite_connection_applies_pragmas() {
    let (db, mut conn) = common::setup_db();
    common::assert_sqlite_pragmas(&mut conn);

    let mut second = connect_sqlite(&db.path).expect("connect second");
    common::assert_sqlite_pragmas(&mut second);
}

#[test]
fn sqlite_begin_immediate_locking_smoke() {
    let (db, mut conn_a) = common::setup_db();
    let mut conn_b = connect_sqlite(&db.path).expect("connect second");

    sql_query("BEGIN IMMEDIATE;")
        .execute(&mut conn_a)
        .expect("begin immediate on first connection");

    let err = sql_query("BEGIN IMMEDIATE;").execute(&mut conn_b);
    assert!(err.is_err(), "expected second BEGIN IMMEDIATE to block");
    if let Err(e) = err {
        match e {
            DieselError::DatabaseError(DatabaseErrorKind::UnableToSendCommand, info) => {
                assert!(info.message().contains("database is locked"));
            }
            DieselError::DatabaseError(_, info) => {
                assert!(info.message().contains("database is locked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    sql_query("ROLLBACK;")
        .execute(&mut conn_a)
        .expect("rollback first connection");

    sql_query("BEGIN IMMEDIATE;")
        .execute(&mut conn_b)
        .expect("begin immediate after release");
    sql_query("ROLLBACK;")
        .execute(&mut conn_b)
        .expect("rollback second connection");
}
