//! # dbml
//!
//! A descriptor-driven query builder for PostgreSQL.
//!
//! ## Features
//!
//! - **Table descriptors**: `+t_comment(1,2)@visible[hidden = false]:fk_comment_article C`
//!   describes a join type, table, primary keys, scopes, conditions, foreign key and alias
//!   in one string
//! - **Condition trees**: nested `key => value` lists flattened by [`where_into`], with
//!   operator suffixes, optional entries and alternating AND/OR per nesting level
//! - **Foreign-key joins**: ON clauses derived from the schema, including indirect paths
//!   and virtual keys
//! - **Schema cache**: lazy introspection persisted through a [`CacheStore`]
//! - **CRUD helpers**: insert/update/upsert/modify/delete/destroy/duplicate with OrThrow
//!   variants, nested transactions, master/slave routing and a dry-run mode
//!
//! ## Example
//!
//! ```ignore
//! use dbml::{cond, Database, DbmlConfig};
//!
//! let db = Database::from_introspection(client, &["public".into()], DbmlConfig::new()).await?;
//!
//! let rows = db
//!     .fetch_all(
//!         &db.select()
//!             .table("t_article A")
//!             .table("+t_comment C")
//!             .where_conds(cond!["A.state" => 1, ["C.id:>" => 10, "!C.title:%LIKE%" => keyword]])
//!             .order_by("A.id DESC")
//!             .limit(None, 20),
//!     )
//!     .await?;
//!
//! let sql = db.dry_run().destroy("t_article", &cond!["id" => 1])?;
//! ```

pub mod anywhere;
pub mod client;
pub mod condition;
pub mod config;
pub mod crud;
pub mod database;
pub mod descriptor;
pub mod error;
pub mod expr;
pub mod gateway;
pub mod ident;
pub mod load;
pub mod schema;
pub mod scope;
pub mod select;
pub mod value;

mod statement_cache;

pub use anywhere::{Anywhere, AnywhereOptions, AnywhereOverride};
pub use client::Connection;
pub use condition::{Cond, Conditions, Conjunction, Node, QueryContext, WhereInto, normalize, where_into};
pub use config::{DbmlConfig, StatementCacheConfig};
pub use database::{Database, DryRun, LinkStats, MasterMode};
pub use descriptor::{JoinType, TableDescriptor};
pub use error::{DbmlError, DbmlResult};
pub use expr::{Expression, Query};
pub use gateway::{Gateway, GatewayRegistry};
pub use load::{CsvColumn, CsvInput, CsvSource, LoadOptions};
pub use schema::{
    CacheStore, ColumnMeta, DbSchema, FileStore, ForeignKey, MemoryStore, Schema, SchemaProvider,
    TableMeta,
};
pub use scope::{Scope, ScopeRegistry};
pub use select::{SelectBuilder, TableSource};
pub use value::{Row, Value};
