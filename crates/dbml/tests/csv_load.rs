mod common;

use common::{Recorder, new_log, schema, statements};
use dbml::{CsvColumn, CsvInput, Database, LoadOptions, Value};

#[tokio::test]
async fn skip_and_chunk_insert_every_row_in_order() {
    let log = new_log();
    let conn = Recorder::new("master", &log);
    let db = Database::new(conn.clone(), schema());
    conn.push_affected(2);
    conn.push_affected(1);

    let columns = [
        CsvColumn::field("user_id"),
        CsvColumn::transform("title", |raw| Value::Text(raw.trim().to_uppercase())),
        CsvColumn::field("state").or(0),
    ];
    let input = CsvInput::from("user_id,title\n1, first\n2,second\n3,third,7\n");
    let written = db
        .load_csv("t_article", &columns, &input, &LoadOptions::new().skip(1).chunk(2))
        .await
        .unwrap();
    assert_eq!(written, 3);

    assert_eq!(statements(&log), vec![
        "master: BEGIN",
        "master: INSERT INTO t_article (user_id, title, state) VALUES ($1, $2, $3), ($4, $5, $6)",
        "master: INSERT INTO t_article (user_id, title, state) VALUES ($1, $2, $3)",
        "master: COMMIT",
    ]);
    let calls = log.lock().unwrap();
    assert_eq!(calls[1].params, vec![
        Value::from("1"),
        Value::from("FIRST"),
        Value::Int(0),
        Value::from("2"),
        Value::from("SECOND"),
        Value::Int(0),
    ]);
    assert_eq!(calls[2].params, vec![
        Value::from("3"),
        Value::from("THIRD"),
        Value::from("7"),
    ]);
}

#[tokio::test]
async fn dry_run_load_returns_statements() {
    let log = new_log();
    let db = Database::new(Recorder::new("master", &log), schema());
    let queries = db
        .dry_run()
        .load_csv(
            "t_user",
            &[CsvColumn::field("name"), CsvColumn::literal("email", "none")],
            &CsvInput::from("a\nb\nc\n"),
            &LoadOptions::new().chunk(0),
        )
        .unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(
        queries[0].sql,
        "INSERT INTO t_user (name, email) VALUES (?, ?), (?, ?), (?, ?)"
    );
    assert!(statements(&log).is_empty());
}
