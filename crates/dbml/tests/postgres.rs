use dbml::{Connection, CsvColumn, CsvInput, Database, DbmlConfig, DbmlError, DbmlResult, LoadOptions, Query, Row, Value, cond};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_postgres::NoTls;

#[tokio::test]
async fn introspect_write_and_destroy_roundtrip() -> DbmlResult<()> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("DATABASE_URL is not set; skipping introspect_write_and_destroy_roundtrip");
            return Ok(());
        }
    };

    let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
        .await
        .map_err(DbmlError::from_db_error)?;
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before UNIX_EPOCH")
        .as_nanos();
    let namespace = format!("dbml_test_{}_{}", std::process::id(), nanos);
    client
        .batch_execute(&format!(
            "CREATE SCHEMA {namespace};
             SET search_path TO {namespace};
             CREATE TABLE t_user (id serial PRIMARY KEY, name text NOT NULL);
             CREATE TABLE t_article (
                 id serial PRIMARY KEY,
                 user_id integer NOT NULL REFERENCES t_user (id),
                 title text,
                 price numeric(10, 2)
             );
             CREATE TABLE t_category (
                 id integer PRIMARY KEY,
                 parent_id integer REFERENCES t_category (id)
             );"
        ))
        .await?;

    let db = Database::from_introspection(client, &[namespace.clone()], DbmlConfig::new()).await?;
    let result = roundtrip(&db).await;
    db.execute(&Query::new(format!("DROP SCHEMA {namespace} CASCADE"), Vec::new()))
        .await?;
    result
}

async fn roundtrip<C: Connection>(db: &Database<C>) -> DbmlResult<()> {
    let article = db.schema().table("t_article")?;
    assert_eq!(article.primary_key, vec!["id".to_string()]);
    assert_eq!(db.schema().foreign_keys("t_article")?.len(), 1);

    db.insert("t_user", &[Row::new().with("id", 1).with("name", "ann")])
        .await?;
    db.insert_or_throw(
        "t_article",
        &[
            Row::new().with("user_id", 1).with("title", "a"),
            Row::new().with("user_id", 1).with("title", "b"),
        ],
    )
    .await?;

    let rows = db
        .fetch_all(
            &db.select()
                .table("t_article A")
                .table("+t_user U")
                .column("A.title")
                .column("U.name")
                .order_by("A.title"),
        )
        .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::from("ann")));

    let loaded = db
        .load_csv(
            "t_article",
            &[
                CsvColumn::field("user_id"),
                CsvColumn::field("title"),
                CsvColumn::field("price"),
            ],
            &CsvInput::from("user_id,title,price\n1,c,9.99\n"),
            &LoadOptions::new().skip(1),
        )
        .await?;
    assert_eq!(loaded, 1);
    let price = db
        .fetch_value(
            &db.select()
                .table("t_article")
                .column("price")
                .where_("title", "c"),
        )
        .await?;
    assert_eq!(price, Some(Value::from("9.99")));

    assert_eq!(db.count(&db.select().table("t_article")).await?, 3);
    assert_eq!(db.destroy("t_user", &cond!["id" => 1]).await?, 1);
    assert!(!db.exists(&db.select().table("t_article")).await?);

    db.insert(
        "t_category",
        &[
            Row::new().with("id", 1).with("parent_id", Value::Null),
            Row::new().with("id", 2).with("parent_id", 1),
            Row::new().with("id", 3).with("parent_id", 2),
        ],
    )
    .await?;
    assert_eq!(db.destroy("t_category", &cond!["id" => 1]).await?, 3);
    assert!(!db.exists(&db.select().table("t_category")).await?);
    Ok(())
}
