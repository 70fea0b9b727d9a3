mod common;

use common::{Recorder, new_log, schema, statements};
use dbml::{Database, Row, cond};

#[tokio::test]
async fn gateways_resolve_tables_and_aliases() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema()).with_alias("posts", "t_article");

    let registry = db.gateways().unwrap();
    assert_eq!(
        registry.names().collect::<Vec<_>>(),
        vec!["posts", "t_article", "t_comment", "t_user"]
    );
    assert_eq!(db.gateway("posts").unwrap().table(), "t_article");
    assert!(db.gateway("articles").unwrap_err().is_not_found());

    let broken = Database::new(Recorder::new("master", &log), schema()).with_alias("x", "t_missing");
    assert!(broken.gateway("t_user").unwrap_err().is_not_found());
}

#[tokio::test]
async fn gateway_operations_are_bound_to_their_table() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema()).with_alias("posts", "t_article");
    let posts = db.gateway("posts").unwrap();

    posts.find(3).await.unwrap();
    posts.insert(&[Row::new().with("user_id", 1).with("title", "t")]).await.unwrap();
    posts.delete(&cond!["state" => 0]).await.unwrap();

    assert_eq!(statements(&log), vec![
        "master: SELECT * FROM t_article WHERE id = $1",
        "master: INSERT INTO t_article (user_id, title) VALUES ($1, $2)",
        "master: DELETE FROM t_article WHERE state = $1",
    ]);
}
