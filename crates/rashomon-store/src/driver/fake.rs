//! In-memory `CqlDriver` used by every test in this crate.
//!
//! A `Mutex`-guarded in-memory map standing in for the real backend: the
//! map is a tiny CQL-subset interpreter, since the driver contract only
//! ever sees opaque `(cql, params)` pairs. It understands exactly the
//! statement shapes `ddl`/`query` emit — not general CQL — and implements
//! Cassandra's last-write-wins-by-timestamp and `[applied]` lightweight-
//! transaction conventions closely enough to exercise real read-repair
//! and conditional-write scenarios end to end.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};

use super::{Batch, CqlDriver, ExecOptions, QueryResult, Row, RowStream, Statement, StreamOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl Cmp {
    fn matches(self, lhs: &JsonValue, rhs: &JsonValue) -> bool {
        let ord = json_cmp(lhs, rhs);
        match self {
            Cmp::Eq => ord == Ordering::Equal,
            Cmp::Ne => ord != Ordering::Equal,
            Cmp::Lt => ord == Ordering::Less,
            Cmp::Le => ord != Ordering::Greater,
            Cmp::Gt => ord == Ordering::Greater,
            Cmp::Ge => ord != Ordering::Less,
        }
    }
}

/// A generic ordering over JSON scalars, sufficient for the attribute
/// types this store uses (strings/uuids compare lexicographically,
/// numbers numerically).
fn json_cmp(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&b.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => a.cmp(b),
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Less,
        (_, JsonValue::Null) => Ordering::Greater,
        _ => format!("{a}").cmp(&format!("{b}")),
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    values: Row,
    ts: i64,
}

#[derive(Debug, Default)]
struct Table {
    primary_key: Vec<String>,
    rows: Vec<StoredRow>,
}

impl Table {
    fn pk_values(&self, row: &Row) -> Vec<JsonValue> {
        self.primary_key
            .iter()
            .map(|k| row.get(k).cloned().unwrap_or(JsonValue::Null))
            .collect()
    }

    fn find_index(&self, pk: &[JsonValue]) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| self.pk_values(&r.values) == pk)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    tables: HashMap<String, Table>,
}

/// In-memory simulator for a single-node wide-column store.
#[derive(Debug, Default)]
pub struct FakeCqlDriver {
    keyspaces: Mutex<HashMap<String, Keyspace>>,
}

impl FakeCqlDriver {
    pub fn new() -> Self {
        FakeCqlDriver::default()
    }
}

fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        s[1..s.len() - 1].replace("\"\"", "\"")
    } else {
        s.to_string()
    }
}

fn parse_keyspace_table(qualified: &str) -> (String, String) {
    let mut parts = qualified.splitn(2, '.');
    let ks = unquote(parts.next().unwrap_or_default());
    let table = unquote(parts.next().unwrap_or_default());
    (ks, table)
}

fn parse_where(fragment: &str, params: &[JsonValue]) -> Vec<(String, Cmp, JsonValue)> {
    if fragment.trim().is_empty() {
        return Vec::new();
    }
    let mut clauses = Vec::new();
    let mut param_idx = 0;
    for clause in fragment.split(" AND ") {
        let clause = clause.trim();
        let close_quote = clause[1..].find('"').unwrap() + 1;
        let col = unquote(&clause[..=close_quote]);
        let rest = clause[close_quote + 1..].trim();
        let op_text = rest.trim_end_matches('?').trim();
        let cmp = match op_text {
            "=" => Cmp::Eq,
            "<" => Cmp::Lt,
            "<=" => Cmp::Le,
            ">" => Cmp::Gt,
            ">=" => Cmp::Ge,
            "!=" => Cmp::Ne,
            other => panic!("fake driver: unsupported operator '{other}'"),
        };
        let value = params.get(param_idx).cloned().unwrap_or(JsonValue::Null);
        param_idx += 1;
        clauses.push((col, cmp, value));
    }
    clauses
}

impl FakeCqlDriver {
    fn create_keyspace(&self, cql: &str) {
        let name_start = cql.find('"').unwrap();
        let name_end = cql[name_start + 1..].find('"').unwrap() + name_start + 1;
        let ks = unquote(&cql[name_start..=name_end]);
        self.keyspaces.lock().unwrap().entry(ks).or_default();
    }

    fn drop_keyspace(&self, cql: &str) {
        let name_start = cql.find('"').unwrap();
        let name_end = cql[name_start + 1..].find('"').unwrap() + name_start + 1;
        let ks = unquote(&cql[name_start..=name_end]);
        self.keyspaces.lock().unwrap().remove(&ks);
    }

    fn create_table(&self, cql: &str) -> Result<()> {
        let after_kw = cql
            .splitn(2, "TABLE ")
            .nth(1)
            .ok_or_else(|| StoreError::Fatal("malformed CREATE TABLE".to_string()))?;
        let after_kw = after_kw.trim_start_matches("IF NOT EXISTS ");
        let paren = after_kw.find('(').unwrap();
        let qualified = after_kw[..paren].trim();
        let (ks, table) = parse_keyspace_table(qualified);

        let close = find_matching_paren(after_kw, paren);
        let body = &after_kw[paren + 1..close];
        let items = split_top_level(body);

        let mut primary_key = Vec::new();
        for item in &items {
            if item.starts_with("PRIMARY KEY") {
                let pk_open = item.find('(').unwrap();
                let pk_close = find_matching_paren(item, pk_open);
                let pk_body = &item[pk_open + 1..pk_close];
                for component in split_top_level(pk_body) {
                    if component.starts_with('(') {
                        let inner = component.trim_start_matches('(').trim_end_matches(')');
                        for hash_col in split_top_level(inner) {
                            primary_key.push(unquote(&hash_col));
                        }
                    } else {
                        primary_key.push(unquote(&component));
                    }
                }
            }
        }

        let mut keyspaces = self.keyspaces.lock().unwrap();
        let keyspace = keyspaces
            .get_mut(&ks)
            .ok_or_else(|| StoreError::NotFound(format!("keyspace '{ks}' does not exist")))?;
        keyspace.tables.entry(table).or_insert_with(|| Table {
            primary_key,
            rows: Vec::new(),
        });
        Ok(())
    }

    fn insert(&self, cql: &str, params: &[JsonValue], ts: i64) -> Result<QueryResult> {
        let if_not_exists = cql.contains("IF NOT EXISTS");
        let after_kw = cql.splitn(2, "INTO ").nth(1).unwrap();
        let paren = after_kw.find('(').unwrap();
        let qualified = after_kw[..paren].trim();
        let (ks, table) = parse_keyspace_table(qualified);

        let cols_close = find_matching_paren(after_kw, paren);
        let cols: Vec<String> = split_top_level(&after_kw[paren + 1..cols_close])
            .into_iter()
            .map(|c| unquote(&c))
            .collect();

        let mut row = Row::new();
        for (col, value) in cols.iter().zip(params.iter()) {
            row.insert(col.clone(), value.clone());
        }

        let mut keyspaces = self.keyspaces.lock().unwrap();
        let table_ref = get_table_mut(&mut keyspaces, &ks, &table)?;
        let pk = table_ref.pk_values(&row);

        if let Some(idx) = table_ref.find_index(&pk) {
            if if_not_exists {
                return Ok(applied_result(false));
            }
            if ts >= table_ref.rows[idx].ts {
                table_ref.rows[idx] = StoredRow { values: row, ts };
            }
        } else {
            table_ref.rows.push(StoredRow { values: row, ts });
        }
        Ok(applied_result(true))
    }

    fn update(&self, cql: &str, params: &[JsonValue]) -> Result<QueryResult> {
        let has_if = cql.contains(" IF ");
        let set_start = cql.find("SET ").unwrap() + 4;
        let where_start = cql.find(" WHERE ").unwrap();
        let set_fragment = &cql[set_start..where_start];

        let rest_after_where = &cql[where_start + 7..];
        let (where_fragment, if_fragment) = if has_if {
            let if_idx = rest_after_where.find(" IF ").unwrap();
            (&rest_after_where[..if_idx], Some(&rest_after_where[if_idx + 4..]))
        } else {
            (rest_after_where, None)
        };

        let set_cols: Vec<String> = set_fragment
            .split(',')
            .map(|assign| unquote(assign.split('=').next().unwrap()))
            .collect();

        let qualified = cql
            .splitn(2, "UPDATE ")
            .nth(1)
            .unwrap()
            .split(" SET ")
            .next()
            .unwrap()
            .trim();
        let (ks, table) = parse_keyspace_table(qualified);

        let mut param_idx = 0;
        let set_values: Vec<JsonValue> = set_cols
            .iter()
            .map(|_| {
                let v = params[param_idx].clone();
                param_idx += 1;
                v
            })
            .collect();

        let where_clauses = parse_where(where_fragment, &params[param_idx..]);
        param_idx += where_clauses.len();
        let if_clauses = if_fragment
            .map(|f| parse_where(f, &params[param_idx..]))
            .unwrap_or_default();

        let mut keyspaces = self.keyspaces.lock().unwrap();
        let table_ref = get_table_mut(&mut keyspaces, &ks, &table)?;

        let matching: Vec<usize> = table_ref
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| row_matches(&r.values, &where_clauses))
            .map(|(i, _)| i)
            .collect();

        if matching.is_empty() {
            // An unconditional UPDATE on an absent primary key upserts, as
            // in real CQL; a conditional one reports not-applied.
            if if_fragment.is_some() {
                return Ok(applied_result(false));
            }
            let mut row = Row::new();
            for (col, _, value) in &where_clauses {
                row.insert(col.clone(), value.clone());
            }
            for (col, value) in set_cols.iter().zip(set_values.iter()) {
                row.insert(col.clone(), value.clone());
            }
            table_ref.rows.push(StoredRow { values: row, ts: 0 });
            return Ok(QueryResult::default());
        }

        for idx in matching {
            if !if_clauses.is_empty() && !row_matches(&table_ref.rows[idx].values, &if_clauses) {
                return Ok(applied_result(false));
            }
            for (col, value) in set_cols.iter().zip(set_values.iter()) {
                table_ref.rows[idx].values.insert(col.clone(), value.clone());
            }
        }
        if if_fragment.is_some() {
            Ok(applied_result(true))
        } else {
            Ok(QueryResult::default())
        }
    }

    fn delete(&self, cql: &str, params: &[JsonValue]) -> Result<QueryResult> {
        let qualified = cql.splitn(2, "FROM ").nth(1).unwrap().split(" WHERE ").next().unwrap();
        let (ks, table) = parse_keyspace_table(qualified.trim());
        let where_start = cql.find(" WHERE ").map(|i| i + 7).unwrap_or(cql.len());
        let where_fragment = &cql[where_start..];
        let where_clauses = parse_where(where_fragment, params);

        let mut keyspaces = self.keyspaces.lock().unwrap();
        let table_ref = get_table_mut(&mut keyspaces, &ks, &table)?;
        table_ref.rows.retain(|r| !row_matches(&r.values, &where_clauses));
        Ok(QueryResult::default())
    }

    fn select(&self, cql: &str, params: &[JsonValue]) -> Result<QueryResult> {
        let after_select = cql.splitn(2, "SELECT ").nth(1).unwrap();
        let from_idx = after_select.find(" FROM ").unwrap();
        let projection = after_select[..from_idx].trim();
        let rest = &after_select[from_idx + 6..];

        let where_idx = rest.find(" WHERE ");
        let order_idx = rest.find(" ORDER BY ");
        let limit_idx = rest.find(" LIMIT ");

        let table_end = where_idx.or(order_idx).or(limit_idx).unwrap_or(rest.len());
        let qualified = rest[..table_end].trim();
        let (ks, table) = parse_keyspace_table(qualified);

        let where_fragment = match (where_idx, order_idx, limit_idx) {
            (Some(w), oi, li) => {
                let end = [oi, li].into_iter().flatten().min().unwrap_or(rest.len());
                &rest[w + 7..end]
            }
            _ => "",
        };
        let where_clauses = parse_where(where_fragment, params);

        let order_by: Option<(String, bool)> = order_idx.map(|o| {
            let end = limit_idx.unwrap_or(rest.len());
            let fragment = rest[o + 10..end].trim();
            let mut parts = fragment.split_whitespace();
            let col = unquote(parts.next().unwrap());
            let desc = parts.next().map(|d| d.eq_ignore_ascii_case("desc")).unwrap_or(false);
            (col, desc)
        });

        let limit: Option<usize> = limit_idx.map(|l| rest[l + 7..].trim().parse().unwrap());

        let keyspaces = self.keyspaces.lock().unwrap();
        let table_ref = get_table(&keyspaces, &ks, &table)?;

        let mut matching: Vec<Row> = table_ref
            .rows
            .iter()
            .filter(|r| row_matches(&r.values, &where_clauses))
            .map(|r| r.values.clone())
            .collect();

        if let Some((col, desc)) = &order_by {
            matching.sort_by(|a, b| {
                let av = a.get(col).cloned().unwrap_or(JsonValue::Null);
                let bv = b.get(col).cloned().unwrap_or(JsonValue::Null);
                let ord = json_cmp(&av, &bv);
                if *desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = limit {
            matching.truncate(limit);
        }

        if projection != "*" {
            let cols: Vec<String> = projection.split(',').map(|c| unquote(c.trim())).collect();
            matching = matching
                .into_iter()
                .map(|row| {
                    cols.iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                })
                .collect();
        }

        Ok(QueryResult { rows: matching })
    }
}

fn row_matches(row: &Row, clauses: &[(String, Cmp, JsonValue)]) -> bool {
    clauses.iter().all(|(col, cmp, value)| {
        let current = row.get(col).cloned().unwrap_or(JsonValue::Null);
        cmp.matches(&current, value)
    })
}

fn applied_result(applied: bool) -> QueryResult {
    let mut row = Row::new();
    row.insert("[applied]".to_string(), JsonValue::Bool(applied));
    QueryResult { rows: vec![row] }
}

fn find_matching_paren(s: &str, open_idx: usize) -> usize {
    let mut depth = 0i32;
    for (i, c) in s.char_indices().skip(open_idx) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    panic!("fake driver: unbalanced parentheses in '{s}'");
}

fn get_table<'a>(
    keyspaces: &'a HashMap<String, Keyspace>,
    ks: &str,
    table: &str,
) -> Result<&'a Table> {
    keyspaces
        .get(ks)
        .and_then(|k| k.tables.get(table))
        .ok_or_else(|| StoreError::NotFound(format!("table '{ks}.{table}' does not exist")))
}

fn get_table_mut<'a>(
    keyspaces: &'a mut HashMap<String, Keyspace>,
    ks: &str,
    table: &str,
) -> Result<&'a mut Table> {
    keyspaces
        .get_mut(ks)
        .and_then(|k| k.tables.get_mut(table))
        .ok_or_else(|| StoreError::NotFound(format!("table '{ks}.{table}' does not exist")))
}

struct FakeRowStream {
    rows: Vec<Row>,
    cursor: usize,
}

#[async_trait]
impl RowStream for FakeRowStream {
    async fn next_page(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let end = (self.cursor + max_rows).min(self.rows.len());
        let page = self.rows[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(page)
    }
}

#[async_trait]
impl CqlDriver for FakeCqlDriver {
    async fn execute(&self, statement: &Statement, _opts: ExecOptions) -> Result<QueryResult> {
        self.execute_with_ts(statement, 0)
    }

    async fn batch(&self, batch: &Batch, _opts: ExecOptions) -> Result<()> {
        let ts = batch.timestamp.unwrap_or(0);
        for statement in &batch.statements {
            self.execute_with_ts(statement, ts)?;
        }
        Ok(())
    }

    async fn stream(
        &self,
        statement: &Statement,
        opts: StreamOptions,
    ) -> Result<Box<dyn RowStream>> {
        let result = self
            .execute(
                statement,
                ExecOptions {
                    consistency: opts.consistency,
                    prepared: true,
                },
            )
            .await?;
        Ok(Box::new(FakeRowStream {
            rows: result.rows,
            cursor: 0,
        }))
    }
}

impl FakeCqlDriver {
    fn execute_with_ts(&self, statement: &Statement, ts: i64) -> Result<QueryResult> {
        let cql = statement.cql.trim();
        if cql.starts_with("CREATE KEYSPACE") {
            self.create_keyspace(cql);
            Ok(QueryResult::default())
        } else if cql.starts_with("DROP KEYSPACE") {
            self.drop_keyspace(cql);
            Ok(QueryResult::default())
        } else if cql.starts_with("CREATE TABLE") {
            self.create_table(cql)?;
            Ok(QueryResult::default())
        } else if cql.starts_with("INSERT") {
            self.insert(cql, &statement.params, ts)
        } else if cql.starts_with("UPDATE") {
            self.update(cql, &statement.params)
        } else if cql.starts_with("DELETE") {
            self.delete(cql, &statement.params)
        } else if cql.starts_with("SELECT") {
            self.select(cql, &statement.params)
        } else {
            Err(StoreError::Fatal(format!("fake driver: unsupported statement '{cql}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Consistency, ExecOptions};

    #[tokio::test]
    async fn create_keyspace_then_table_then_insert_then_select() {
        let driver = FakeCqlDriver::new();
        let opts = ExecOptions {
            consistency: Consistency::One,
            prepared: true,
        };

        driver
            .execute(
                &Statement::new(
                    "CREATE KEYSPACE IF NOT EXISTS \"ks1\" WITH replication = {'class': 'SimpleStrategy'}",
                    vec![],
                ),
                opts,
            )
            .await
            .unwrap();

        driver
            .execute(
                &Statement::new(
                    "CREATE TABLE IF NOT EXISTS \"ks1\".\"data\" (\"key\" text, \"body\" text, PRIMARY KEY ((\"key\")))",
                    vec![],
                ),
                opts,
            )
            .await
            .unwrap();

        driver
            .execute(
                &Statement::new(
                    "INSERT INTO \"ks1\".\"data\" (\"key\",\"body\") VALUES (?,?)",
                    vec![JsonValue::String("k1".into()), JsonValue::String("hello".into())],
                ),
                opts,
            )
            .await
            .unwrap();

        let result = driver
            .execute(
                &Statement::new(
                    "SELECT * FROM \"ks1\".\"data\" WHERE \"key\" = ?",
                    vec![JsonValue::String("k1".into())],
                ),
                opts,
            )
            .await
            .unwrap();

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("body").unwrap(), "hello");
    }

    #[tokio::test]
    async fn insert_if_not_exists_reports_applied_false_on_conflict() {
        let driver = FakeCqlDriver::new();
        let opts = ExecOptions::default();
        driver
            .execute(&Statement::new("CREATE KEYSPACE IF NOT EXISTS \"ks\" WITH replication = {}", vec![]), opts)
            .await
            .unwrap();
        driver
            .execute(
                &Statement::new(
                    "CREATE TABLE IF NOT EXISTS \"ks\".\"data\" (\"key\" text, PRIMARY KEY ((\"key\")))",
                    vec![],
                ),
                opts,
            )
            .await
            .unwrap();

        let insert = Statement::new(
            "INSERT INTO \"ks\".\"data\" (\"key\") VALUES (?) IF NOT EXISTS",
            vec![JsonValue::String("k".into())],
        );
        let first = driver.execute(&insert, opts).await.unwrap();
        assert_eq!(first.rows[0].get("[applied]").unwrap(), &JsonValue::Bool(true));

        let second = driver.execute(&insert, opts).await.unwrap();
        assert_eq!(second.rows[0].get("[applied]").unwrap(), &JsonValue::Bool(false));
    }
}
