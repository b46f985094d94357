//! Transaction round-trips and state-machine guards against file-backed
//! SQLite databases.

use sqlgate::{Db, DatabaseConfig, DbError, SqlValue, TransactionIsolation, params};
use tempfile::NamedTempFile;

async fn file_db(name: &str) -> (Db, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?max_connections=2", temp_file.path().display());
    let db = Db::new();
    db.register(name, DatabaseConfig::parse(&url).unwrap())
        .await
        .unwrap();
    (db, temp_file)
}

#[tokio::test]
async fn test_commit_makes_insert_visible() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    session
        .update("create table t(a, b)", params![])
        .await
        .unwrap();

    session.begin_transaction(None).await.unwrap();
    assert!(session.in_transaction());
    session
        .insert("insert into t values (?, ?)", params!["x", "y"])
        .await
        .unwrap();
    session.commit().await.unwrap();
    assert!(!session.in_transaction());

    let rows = session
        .query_all("select * from t", params![])
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![SqlValue::List(vec![
            SqlValue::Text("x".into()),
            SqlValue::Text("y".into()),
        ])]
    );
    db.unregister_all().await;
}

#[tokio::test]
async fn test_rollback_discards_insert() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    session
        .update("create table t(a, b)", params![])
        .await
        .unwrap();

    session.begin_transaction(None).await.unwrap();
    session
        .insert("insert into t values (?, ?)", params!["x", "y"])
        .await
        .unwrap();
    session.rollback().await.unwrap();
    assert!(!session.in_transaction());

    let rows = session
        .query_all("select * from t", params![])
        .await
        .unwrap();
    assert!(rows.is_empty());
    db.unregister_all().await;
}

#[tokio::test]
async fn test_uncommitted_rows_visible_on_transaction_connection() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    session.update("create table t(a)", params![]).await.unwrap();
    session.begin_transaction(None).await.unwrap();
    session
        .insert("insert into t values (?)", params![7])
        .await
        .unwrap();

    // same pinned connection, the open transaction sees its own write
    let count = session
        .query_one("select count(*) from t", params![])
        .await
        .unwrap();
    assert_eq!(count, Some(SqlValue::Int(1)));

    session.rollback().await.unwrap();
    db.unregister_all().await;
}

#[tokio::test]
async fn test_begin_inside_transaction_rolls_back_and_fails() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    session.update("create table t(a)", params![]).await.unwrap();
    session.begin_transaction(None).await.unwrap();
    session
        .insert("insert into t values (?)", params![1])
        .await
        .unwrap();

    let err = session.begin_transaction(None).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionState { .. }));
    // the dangling transaction was forcibly rolled back
    assert!(!session.in_transaction());
    let rows = session
        .query_all("select * from t", params![])
        .await
        .unwrap();
    assert!(rows.is_empty());
    db.unregister_all().await;
}

#[tokio::test]
async fn test_commit_and_rollback_outside_transaction() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, DbError::TransactionState { .. }));
    let err = session.rollback().await.unwrap_err();
    assert!(matches!(err, DbError::TransactionState { .. }));
    db.unregister_all().await;
}

#[tokio::test]
async fn test_cross_pool_statement_fails_and_clears_transaction() {
    let (db, _guard_a) = file_db("a").await;
    let temp_b = NamedTempFile::new().unwrap();
    let url_b = format!("sqlite:{}?max_connections=2", temp_b.path().display());
    db.register("b", DatabaseConfig::parse(&url_b).unwrap())
        .await
        .unwrap();

    let mut session = db.session();
    session.update("create table t(a)", params![]).await.unwrap();
    session.begin_transaction(None).await.unwrap();

    session.select("b").await.unwrap();
    let err = session
        .update("create table u(x)", params![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::TransactionState { .. }));
    assert!(
        err.to_string()
            .contains("mix multiple connections in a single transaction")
    );
    assert!(!session.in_transaction());

    // the session is usable again after the forced rollback
    session.update("create table u(x)", params![]).await.unwrap();
    db.unregister_all().await;
}

#[tokio::test]
async fn test_isolation_level_accepted() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    session.update("create table t(a)", params![]).await.unwrap();
    // SQLite ignores the level but the transaction must still work
    session
        .begin_transaction(Some(TransactionIsolation::Serializable))
        .await
        .unwrap();
    session
        .insert("insert into t values (?)", params![1])
        .await
        .unwrap();
    session.commit().await.unwrap();

    let count = session
        .query_one("select count(*) from t", params![])
        .await
        .unwrap();
    assert_eq!(count, Some(SqlValue::Int(1)));
    db.unregister_all().await;
}

#[tokio::test]
async fn test_driver_error_marks_connection_and_recovers() {
    let (db, _guard) = file_db("main").await;
    let mut session = db.session();

    let err = session
        .query_all("select * from missing_table", params![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Driver { .. }));

    // the error-flagged connection was probed at release; the pool stays usable
    session.update("create table t(a)", params![]).await.unwrap();
    let proxy = db.get("main").await.unwrap();
    assert_eq!(proxy.pool().busy_count(), 0);
    db.unregister_all().await;
}

#[tokio::test]
async fn test_transaction_pins_one_connection() {
    let (db, _guard) = file_db("main").await;
    let proxy = db.get("main").await.unwrap();
    let mut session = db.session();

    session.update("create table t(a)", params![]).await.unwrap();
    session.begin_transaction(None).await.unwrap();
    assert_eq!(proxy.pool().busy_count(), 1);

    // statements inside the transaction reuse the pinned connection
    session
        .insert("insert into t values (?)", params![1])
        .await
        .unwrap();
    assert_eq!(proxy.pool().busy_count(), 1);

    session.commit().await.unwrap();
    assert_eq!(proxy.pool().busy_count(), 0);
    db.unregister_all().await;
}
