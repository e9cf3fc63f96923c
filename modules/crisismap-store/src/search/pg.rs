//! Report search compiled to SQL over the `crowd_reports` table.
//!
//! The rows are the documents, so a report is searchable as soon as its
//! write commits and every instance sharing the database sees the same
//! results. Field names follow the report documents built by the model:
//! `text`, `author`, `updated`, `score`, `topic_id`, `hidden`, `reviewed`,
//! `location`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::query::{alternatives, parse_query, words, CmpOp, Query};
use super::{Document, SearchIndex};
use crate::error::StoreResult;

/// Lowercased words of a text column, the form text values are matched in.
const TEXT_WORDS: &str = "regexp_split_to_array(lower({col}), '[^[:alnum:]]+')";

#[derive(Clone)]
pub struct PgSearchIndex {
    pool: PgPool,
}

impl PgSearchIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchIndex for PgSearchIndex {
    async fn put(&self, _documents: Vec<Document>) {}

    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<String>> {
        let parsed = parse_query(query)?;
        let mut qb = select_ids(&parsed, limit);
        let ids = qb.build_query_scalar::<String>().fetch_all(&self.pool).await?;
        debug!(query, hits = ids.len(), "Report search query");
        Ok(ids)
    }

    fn needs_documents(&self) -> bool {
        false
    }
}

fn select_ids(query: &Query, limit: usize) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT id FROM crowd_reports WHERE ");
    push_query(&mut qb, query);
    qb.push(" ORDER BY updated DESC, id ASC LIMIT ");
    qb.push_bind(limit as i64);
    qb
}

fn push_query(qb: &mut QueryBuilder<'static, Postgres>, query: &Query) {
    match query {
        Query::All => {
            qb.push("TRUE");
        }
        Query::And(parts) => push_joined(qb, parts, " AND "),
        Query::Or(parts) => push_joined(qb, parts, " OR "),
        Query::Not(inner) => {
            qb.push("NOT (");
            push_query(qb, inner);
            qb.push(")");
        }
        Query::Term(value) => push_text_match(qb, "text", value),
        Query::Field { name, op, value } => push_field(qb, name, *op, value),
        Query::Distance {
            field,
            center,
            op,
            meters,
        } => {
            if field != "location" {
                qb.push("FALSE");
                return;
            }
            // Reports without a location are stored at (90, 90).
            qb.push("((lat, lon) <> (90.0, 90.0) AND 12742000.0 * asin(LEAST(1.0, sqrt(power(sin(radians(lat - ");
            qb.push_bind(center.lat);
            qb.push(") / 2), 2) + cos(radians(");
            qb.push_bind(center.lat);
            qb.push(")) * cos(radians(lat)) * power(sin(radians(lon - ");
            qb.push_bind(center.lon);
            qb.push(") / 2), 2)))) ");
            qb.push(sql_op(*op));
            qb.push(" ");
            qb.push_bind(*meters);
            qb.push(")");
        }
    }
}

fn push_joined(qb: &mut QueryBuilder<'static, Postgres>, parts: &[Query], separator: &str) {
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        qb.push("(");
        push_query(qb, part);
        qb.push(")");
    }
    qb.push(")");
}

fn push_field(qb: &mut QueryBuilder<'static, Postgres>, name: &str, op: CmpOp, value: &str) {
    let equality = matches!(op, CmpOp::Eq | CmpOp::Has);
    match name {
        "text" | "author" if equality => push_text_match(qb, name, value),
        "topic_id" if equality => {
            let topics: Vec<String> = alternatives(value).map(str::to_string).collect();
            qb.push("topic_ids && ");
            qb.push_bind(topics);
            qb.push("::text[]");
        }
        "hidden" | "reviewed" if equality => {
            let flags: Vec<bool> = alternatives(value)
                .filter_map(|alt| match alt {
                    "True" => Some(true),
                    "False" => Some(false),
                    _ => None,
                })
                .collect();
            qb.push(format!("{name} = ANY("));
            qb.push_bind(flags);
            qb.push("::bool[])");
        }
        "updated" | "score" => {
            let Ok(number) = value.parse::<f64>() else {
                qb.push("FALSE");
                return;
            };
            let column = if name == "updated" {
                "EXTRACT(EPOCH FROM updated)::float8"
            } else {
                "score"
            };
            qb.push(format!("{column} {} ", sql_op(op)));
            qb.push_bind(number);
        }
        _ => {
            qb.push("FALSE");
        }
    }
}

/// Matches when every word of some alternative in `value` appears in the
/// column.
fn push_text_match(qb: &mut QueryBuilder<'static, Postgres>, column: &str, value: &str) {
    let needles: Vec<Vec<String>> = alternatives(value)
        .map(|alt| words(alt).collect::<Vec<_>>())
        .filter(|words| !words.is_empty())
        .collect();
    if needles.is_empty() {
        qb.push("FALSE");
        return;
    }
    let haystack = TEXT_WORDS.replace("{col}", column);
    qb.push("(");
    for (i, words) in needles.into_iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(format!("{haystack} @> "));
        qb.push_bind(words);
        qb.push("::text[]");
    }
    qb.push(")");
}

fn sql_op(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq | CmpOp::Has => "=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    }
}
