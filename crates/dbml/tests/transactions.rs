mod common;

use common::{Recorder, new_log, schema, statements};
use dbml::{Database, DbmlError, Row, cond};

#[tokio::test]
async fn nested_levels_send_one_begin_and_one_commit() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema());

    db.begin().await.unwrap();
    db.begin().await.unwrap();
    assert_eq!(db.transaction_depth(), 2);
    db.rollback().await.unwrap();
    db.commit().await.unwrap();
    assert_eq!(db.transaction_depth(), 0);

    assert_eq!(statements(&log), vec!["master: BEGIN", "master: COMMIT"]);
    assert!(db.commit().await.unwrap_err().is_invalid_argument());
}

#[tokio::test]
async fn transact_rolls_back_to_original_depth_and_reraises() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema());

    let err = db
        .transact(|db| async move {
            db.insert("t_user", &[Row::new().with("name", "a")]).await?;
            db.begin().await?;
            Err::<(), _>(DbmlError::invalid("boom"))
        })
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(db.transaction_depth(), 0);
    assert_eq!(statements(&log), vec![
        "master: BEGIN",
        "master: INSERT INTO t_user (name) VALUES ($1)",
        "master: ROLLBACK",
    ]);
}

#[tokio::test]
async fn inner_failure_leaves_outer_transaction_open() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema());

    db.begin().await.unwrap();
    let result = db
        .transact(|_| async { Err::<(), _>(DbmlError::not_found("t_missing")) })
        .await;
    assert!(result.unwrap_err().is_not_found());
    assert_eq!(db.transaction_depth(), 1);
    assert_eq!(statements(&log), vec!["master: BEGIN"]);

    db.commit().await.unwrap();
    assert_eq!(statements(&log), vec!["master: BEGIN", "master: COMMIT"]);
}

#[tokio::test]
async fn transact_returns_the_closure_value() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema());
    let n = db
        .transact(|db| async move { db.delete("t_user", &cond!["id" => 1]).await })
        .await
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(statements(&log).last().map(String::as_str), Some("master: COMMIT"));
}

#[tokio::test]
async fn destroy_runs_children_first_inside_a_transaction() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema());
    db.destroy("t_user", &cond!["id" => 3]).await.unwrap();
    assert_eq!(statements(&log), vec![
        "master: BEGIN",
        "master: DELETE FROM t_comment WHERE article_id IN (SELECT id FROM t_article WHERE user_id IN (SELECT id FROM t_user WHERE id = $1))",
        "master: DELETE FROM t_article WHERE user_id IN (SELECT id FROM t_user WHERE id = $1)",
        "master: DELETE FROM t_user WHERE id = $1",
        "master: COMMIT",
    ]);
}
