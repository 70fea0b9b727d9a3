use super::*;
use crate::schema::{ColumnMeta, DbSchema, TableMeta};

fn schema() -> Arc<Schema> {
    let snapshot = DbSchema::new()
        .with_table(
            TableMeta::new("t_user")
                .column(ColumnMeta::new("id", "integer").auto_increment())
                .column(ColumnMeta::new("name", "text"))
                .primary_key(["id"]),
        )
        .with_table(
            TableMeta::new("t_article")
                .column(ColumnMeta::new("id", "integer").auto_increment())
                .column(ColumnMeta::new("user_id", "integer").not_null())
                .column(ColumnMeta::new("title", "text"))
                .column(ColumnMeta::new("views", "integer"))
                .primary_key(["id"])
                .foreign_key("fk_article_user", ["user_id"], "t_user", ["id"]),
        )
        .with_table(
            TableMeta::new("t_comment")
                .column(ColumnMeta::new("id", "integer").auto_increment())
                .column(ColumnMeta::new("article_id", "integer"))
                .column(ColumnMeta::new("body", "text"))
                .primary_key(["id"])
                .foreign_key("fk_comment_article", ["article_id"], "t_article", ["id"]),
        )
        .with_table(
            TableMeta::new("t_message")
                .column(ColumnMeta::new("id", "integer"))
                .column(ColumnMeta::new("sender_id", "integer"))
                .column(ColumnMeta::new("receiver_id", "integer"))
                .primary_key(["id"])
                .foreign_key("fk_message_sender", ["sender_id"], "t_user", ["id"])
                .foreign_key("fk_message_receiver", ["receiver_id"], "t_user", ["id"]),
        )
        .with_table(
            TableMeta::new("t_top")
                .column(ColumnMeta::new("code", "text"))
                .primary_key(["code"]),
        )
        .with_table(
            TableMeta::new("t_mid")
                .column(ColumnMeta::new("code", "text"))
                .primary_key(["code"])
                .foreign_key("fk_mid_top", ["code"], "t_top", ["code"]),
        )
        .with_table(
            TableMeta::new("t_leaf")
                .column(ColumnMeta::new("id", "integer"))
                .column(ColumnMeta::new("mid_code", "text"))
                .primary_key(["id"])
                .foreign_key("fk_leaf_mid", ["mid_code"], "t_mid", ["code"]),
        )
        .with_table(
            TableMeta::new("t_y")
                .column(ColumnMeta::new("id", "integer"))
                .column(ColumnMeta::new("code", "integer")),
        )
        .with_table(
            TableMeta::new("t_m")
                .column(ColumnMeta::new("id", "integer"))
                .foreign_key("fk_m_y_id", ["id"], "t_y", ["id"])
                .foreign_key("fk_m_y_code", ["id"], "t_y", ["code"]),
        )
        .with_table(
            TableMeta::new("t_x")
                .column(ColumnMeta::new("m_id", "integer"))
                .foreign_key("fk_x_m", ["m_id"], "t_m", ["id"]),
        )
        .with_table(
            TableMeta::new("t_pair")
                .column(ColumnMeta::new("mainid", "integer"))
                .column(ColumnMeta::new("subid", "integer"))
                .primary_key(["mainid", "subid"]),
        );
    Arc::new(Schema::new(snapshot))
}

fn sql(builder: &SelectBuilder) -> (String, Vec<Value>) {
    builder.build().unwrap().into_parts()
}

#[test]
fn join_through_foreign_key() {
    let builder = SelectBuilder::new(schema())
        .table("t_article AS A.id,title")
        .table("+t_comment C.body")
        .where_("A.id", 1);
    assert_eq!(
        sql(&builder),
        (
            "SELECT A.id, A.title, C.body FROM t_article A INNER JOIN t_comment C ON C.article_id = A.id WHERE A.id = ?"
                .to_string(),
            vec![Value::Int(1)]
        )
    );
}

#[test]
fn ambiguous_keys_need_a_name() {
    let err = SelectBuilder::new(schema())
        .table("t_message M")
        .table("+t_user U")
        .build()
        .unwrap_err();
    assert!(err.is_ambiguous());
    assert!(err.to_string().contains("fk_message_sender"));
    assert!(err.to_string().contains("fk_message_receiver"));

    let builder = SelectBuilder::new(schema())
        .table("t_message M")
        .table("+t_user:fk_message_sender U");
    assert_eq!(
        sql(&builder).0,
        "SELECT * FROM t_message M INNER JOIN t_user U ON U.id = M.sender_id"
    );
}

#[test]
fn indirect_relation_is_used_when_no_direct_key_exists() {
    let builder = SelectBuilder::new(schema()).table("t_top").table("+t_leaf");
    assert_eq!(
        sql(&builder).0,
        "SELECT * FROM t_top INNER JOIN t_leaf ON t_leaf.mid_code = t_top.code"
    );
}

#[test]
fn divergent_paths_give_no_condition_join() {
    let err = SelectBuilder::new(schema())
        .table("t_y")
        .table("+t_x")
        .build()
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("no-condition join"));

    // an explicit map makes it work
    let builder = SelectBuilder::new(schema()).table("t_y").table("+t_x{m_id: id}");
    assert_eq!(
        sql(&builder).0,
        "SELECT * FROM t_y INNER JOIN t_x ON t_x.m_id = t_y.id"
    );
}

#[test]
fn auto_join_follows_nullability() {
    let builder = SelectBuilder::new(schema()).table("t_article A").table("~t_user U");
    assert_eq!(
        sql(&builder).0,
        "SELECT * FROM t_article A INNER JOIN t_user U ON U.id = A.user_id"
    );
    let builder = SelectBuilder::new(schema()).table("t_user U").table("~t_article A");
    assert_eq!(
        sql(&builder).0,
        "SELECT * FROM t_user U LEFT JOIN t_article A ON A.user_id = U.id"
    );
}

#[test]
fn primary_key_shorthand() {
    let builder = SelectBuilder::new(schema()).table("t_article(1,2) AS A");
    assert_eq!(
        sql(&builder),
        (
            "SELECT * FROM t_article A WHERE A.id IN (?,?)".to_string(),
            vec![Value::Int(1), Value::Int(2)]
        )
    );
    let builder = SelectBuilder::new(schema()).table("t_article(5)");
    assert_eq!(sql(&builder).0, "SELECT * FROM t_article WHERE t_article.id = ?");

    let builder = SelectBuilder::new(schema()).table("t_pair((1,2),(3,4))");
    assert_eq!(
        sql(&builder),
        (
            "SELECT * FROM t_pair WHERE (t_pair.mainid, t_pair.subid) IN ((?,?),(?,?))".to_string(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
        )
    );
}

#[test]
fn scopes_go_to_where_on_base_and_on_for_joins() {
    let mut registry = ScopeRegistry::new();
    registry
        .add(
            "t_article",
            "published",
            Scope::new().where_("A.status", "published").order_by("A.id DESC"),
        )
        .add("t_comment", "visible", Scope::new().where_("C.hidden", false));
    let registry = Arc::new(registry);

    let builder = SelectBuilder::new(schema())
        .with_scopes(Arc::clone(&registry))
        .table("t_article@published A");
    assert_eq!(
        sql(&builder),
        (
            "SELECT * FROM t_article A WHERE A.status = ? ORDER BY A.id DESC".to_string(),
            vec![Value::from("published")]
        )
    );

    let builder = SelectBuilder::new(schema())
        .with_scopes(Arc::clone(&registry))
        .table("t_article A")
        .table("+t_comment@visible C");
    assert_eq!(
        sql(&builder),
        (
            "SELECT * FROM t_article A INNER JOIN t_comment C ON C.article_id = A.id AND C.hidden = ?"
                .to_string(),
            vec![Value::Bool(false)]
        )
    );

    let err = SelectBuilder::new(schema())
        .with_scopes(registry)
        .table("t_article@nope")
        .build()
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn order_and_range_from_descriptor() {
    let builder = SelectBuilder::new(schema()).table("t_article-id+title#10-20 A");
    assert_eq!(
        sql(&builder).0,
        "SELECT * FROM t_article A ORDER BY A.id DESC, A.title ASC LIMIT 10 OFFSET 10"
    );
}

#[test]
fn sub_query_condition() {
    let sub = SelectBuilder::new(schema())
        .table("t_user.id")
        .where_("name:LIKE%", "a");
    let builder = SelectBuilder::new(schema())
        .table("t_article A")
        .where_("A.user_id", sub);
    assert_eq!(
        sql(&builder),
        (
            "SELECT * FROM t_article A WHERE A.user_id IN (SELECT t_user.id FROM t_user WHERE name LIKE ?)"
                .to_string(),
            vec![Value::from("a%")]
        )
    );
}

#[test]
fn anywhere_key_expands_over_columns() {
    let builder = SelectBuilder::new(schema())
        .table("t_article A")
        .where_("*", "rust");
    assert_eq!(
        sql(&builder),
        (
            "SELECT * FROM t_article A WHERE A.title LIKE ?".to_string(),
            vec![Value::from("%rust%")]
        )
    );
}

#[test]
fn double_star_left_joins_parents() {
    let builder = SelectBuilder::new(schema()).table("t_comment.**");
    assert_eq!(
        sql(&builder).0,
        "SELECT t_comment.*, t_article.* FROM t_comment LEFT JOIN t_article ON t_article.id = t_comment.article_id"
    );
}

#[test]
fn parameters_follow_clause_order() {
    let mut registry = ScopeRegistry::new();
    registry.add("t_comment", "visible", Scope::new().where_("C.hidden", false));
    let builder = SelectBuilder::new(schema())
        .with_scopes(Arc::new(registry))
        .select(Expression::new("? AS flag", [1]))
        .table("t_article A")
        .table("+t_comment@visible C")
        .where_("A.views:>", 5)
        .group_by("A.id")
        .having("COUNT(C.id):>=", 2);
    let (text, params) = sql(&builder);
    assert_eq!(
        text,
        "SELECT ? AS flag FROM t_article A INNER JOIN t_comment C ON C.article_id = A.id AND C.hidden = ? WHERE A.views > ? GROUP BY A.id HAVING COUNT(C.id) >= ?"
    );
    assert_eq!(
        params,
        vec![Value::Int(1), Value::Bool(false), Value::Int(5), Value::Int(2)]
    );
}

#[test]
fn derived_table_and_count() {
    let inner = SelectBuilder::new(schema()).table("t_article.id").where_("views:>", 10);
    let builder = SelectBuilder::new(schema()).table_query(inner, "hot");
    let count = builder.build_count().unwrap();
    assert_eq!(
        count.sql,
        "SELECT COUNT(*) AS count FROM (SELECT * FROM (SELECT t_article.id FROM t_article WHERE views > ?) AS hot) AS counted"
    );
    assert_eq!(count.params, vec![Value::Int(10)]);
}

#[test]
fn join_without_base_is_rejected() {
    let err = SelectBuilder::new(schema()).table("+t_user").build().unwrap_err();
    assert!(err.is_invalid_argument());
}
