mod common;

use common::{Recorder, new_log, schema, statements};
use dbml::{Database, DbmlConfig, Row};

fn pair() -> (common::Log, Recorder, Recorder) {
    let log = new_log();
    let master = Recorder::new("master", &log);
    let slave = Recorder::new("slave", &log);
    (log, master, slave)
}

#[tokio::test]
async fn reads_use_slave_unless_pinned() {
    let (log, master, slave) = pair();
    let db = Database::new(master, schema()).with_slave(slave);
    let users = db.select().table("t_user");

    db.fetch_all(&users).await.unwrap();
    db.insert("t_user", &[Row::new().with("name", "a")]).await.unwrap();
    {
        let _pin = db.master_mode();
        assert!(db.is_master_mode());
        db.fetch_all(&users).await.unwrap();
    }
    assert!(!db.is_master_mode());
    db.fetch_all(&users).await.unwrap();

    assert_eq!(statements(&log), vec![
        "slave: SELECT * FROM t_user",
        "master: INSERT INTO t_user (name) VALUES ($1)",
        "master: SELECT * FROM t_user",
        "slave: SELECT * FROM t_user",
    ]);
}

#[tokio::test]
async fn reads_inside_a_transaction_use_master() {
    let (log, master, slave) = pair();
    let db = Database::new(master, schema()).with_slave(slave);
    db.transact(|db| async move { db.fetch_all(&db.select().table("t_user")).await })
        .await
        .unwrap();
    assert_eq!(statements(&log), vec![
        "master: BEGIN",
        "master: SELECT * FROM t_user",
        "master: COMMIT",
    ]);
}

#[tokio::test]
async fn each_link_caches_its_own_statements() {
    let (_log, master, slave) = pair();
    let db = Database::new(master.clone(), schema()).with_slave(slave.clone());
    let users = db.select().table("t_user");

    db.fetch_all(&users).await.unwrap();
    db.fetch_all(&users).await.unwrap();
    {
        let _pin = db.master_mode();
        db.fetch_all(&users).await.unwrap();
    }
    assert_eq!(slave.prepares(), 1);
    assert_eq!(master.prepares(), 1);

    let stats = db.statement_cache_stats();
    assert_eq!(stats[0].link, "master");
    assert_eq!((stats[0].hits, stats[0].misses), (0, 1));
    assert_eq!(stats[1].link, "slave");
    assert_eq!((stats[1].hits, stats[1].misses, stats[1].cached), (1, 1, 1));
}

#[tokio::test]
async fn disabled_cache_prepares_every_time() {
    let log = new_log();
    let master = Recorder::new("master", &log);
    let db = Database::with_config(master.clone(), schema(), DbmlConfig::new().no_statement_cache());
    let users = db.select().table("t_user");
    db.fetch_all(&users).await.unwrap();
    db.fetch_all(&users).await.unwrap();
    assert_eq!(master.prepares(), 2);
    assert_eq!(db.statement_cache_stats()[0].cached, 0);
}
