//! In-memory store for tests.
//!
//! Interprets the SOQL subset the engine emits (`SELECT .. FROM .. WHERE`
//! with `=`, `IN (..)`, `AND` and parentheses), pages results with a
//! configurable page size, records every query and fetch, and supports
//! failure injection per file or per request.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use base64::Engine as _;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::field_text;

use super::{CreateOutcome, FieldSchema, ObjectSchema, QueryPage, Store, StoreMessage};

pub struct MemoryStore {
    identity: String,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    blobs: HashMap<String, Vec<u8>>,
    page_size: usize,
    cursors: HashMap<String, Vec<Value>>,
    queries: Vec<String>,
    continuations: Vec<String>,
    fetches: Vec<String>,
    uploads: usize,
    fail_fetch: HashSet<String>,
    fail_upload: HashSet<String>,
    fail_link_entity: HashSet<String>,
    fail_link_requests: bool,
    fail_queries: bool,
    drop_resolve: bool,
    next_id: usize,
    next_cursor: usize,
}

impl MemoryStore {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            inner: Mutex::new(Inner {
                page_size: 2000,
                ..Inner::default()
            }),
        }
    }

    pub fn set_page_size(&self, size: usize) {
        self.inner.lock().unwrap().page_size = size;
    }

    pub fn insert(&self, object: &str, row: Value) {
        self.inner
            .lock()
            .unwrap()
            .tables
            .entry(object.to_string())
            .or_default()
            .push(row);
    }

    pub fn put_blob(&self, version_id: &str, bytes: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .blobs
            .insert(version_id.to_string(), bytes.to_vec());
    }

    pub fn rows(&self, object: &str) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn blob(&self, version_id: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().blobs.get(version_id).cloned()
    }

    pub fn queries(&self) -> Vec<String> {
        self.inner.lock().unwrap().queries.clone()
    }

    pub fn continuations(&self) -> Vec<String> {
        self.inner.lock().unwrap().continuations.clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.inner.lock().unwrap().fetches.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.inner.lock().unwrap().uploads
    }

    pub fn fail_fetch(&self, version_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_fetch
            .insert(version_id.to_string());
    }

    pub fn fail_upload(&self, title: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_upload
            .insert(title.to_string());
    }

    pub fn fail_link_entity(&self, entity_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_link_entity
            .insert(entity_id.to_string());
    }

    pub fn fail_link_requests(&self) {
        self.inner.lock().unwrap().fail_link_requests = true;
    }

    /// Every query is answered with a server error.
    pub fn fail_queries(&self) {
        self.inner.lock().unwrap().fail_queries = true;
    }

    /// Newly created versions stop being visible to queries, as when the
    /// target silently drops inserts past a storage limit.
    pub fn drop_resolve(&self) {
        self.inner.lock().unwrap().drop_resolve = true;
    }
}

impl Inner {
    fn page(&mut self, mut rows: Vec<Value>) -> QueryPage {
        let total_size = rows.len();
        if rows.len() <= self.page_size {
            return QueryPage {
                total_size,
                done: true,
                records: rows,
                next_records_url: None,
            };
        }
        let rest = rows.split_off(self.page_size);
        self.next_cursor += 1;
        let cursor = format!("/query/cursor-{}", self.next_cursor);
        self.cursors.insert(cursor.clone(), rest);
        QueryPage {
            total_size,
            done: false,
            records: rows,
            next_records_url: Some(cursor),
        }
    }

    fn mint_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:06}", self.next_id)
    }
}

impl Store for MemoryStore {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn query(&self, soql: &str) -> Result<QueryPage> {
        let mut inner = self.inner.lock().unwrap();
        inner.queries.push(soql.to_string());
        if inner.fail_queries {
            return Err(Error::Store {
                status: 500,
                message: "UNKNOWN_EXCEPTION: query failed".into(),
            });
        }

        let parsed = parse_select(soql)?;
        let hide_created = inner.drop_resolve && parsed.object == "ContentVersion";
        let rows: Vec<Value> = inner
            .tables
            .get(&parsed.object)
            .map(|rows| {
                rows.iter()
                    .filter(|row| parsed.filter.as_ref().is_none_or(|f| f.matches(row)))
                    .filter(|row| !(hide_created && row.get("_created").is_some()))
                    .map(|row| project(row, &parsed.fields))
                    .collect()
            })
            .unwrap_or_default();

        Ok(inner.page(rows))
    }

    async fn query_more(&self, next: &str) -> Result<QueryPage> {
        let mut inner = self.inner.lock().unwrap();
        inner.continuations.push(next.to_string());
        let rows = inner.cursors.remove(next).ok_or_else(|| Error::Store {
            status: 400,
            message: format!("INVALID_QUERY_LOCATOR: {next}"),
        })?;
        Ok(inner.page(rows))
    }

    async fn describe(&self, object: &str) -> Result<ObjectSchema> {
        let inner = self.inner.lock().unwrap();
        let rows = inner.tables.get(object).ok_or_else(|| Error::Store {
            status: 404,
            message: format!("NOT_FOUND: {object}"),
        })?;
        let mut names: Vec<String> = rows
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|o| o.keys().cloned())
            .filter(|k| !k.starts_with('_'))
            .collect();
        names.sort();
        names.dedup();
        Ok(ObjectSchema {
            name: object.to_string(),
            fields: names
                .into_iter()
                .map(|name| FieldSchema {
                    label: name.clone(),
                    name,
                    field_type: "string".into(),
                })
                .collect(),
        })
    }

    async fn fetch_version_data(&self, version_id: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetches.push(version_id.to_string());
        if inner.fail_fetch.contains(version_id) {
            return Err(Error::Store {
                status: 503,
                message: "SERVER_UNAVAILABLE".into(),
            });
        }
        inner.blobs.get(version_id).cloned().ok_or_else(|| Error::Store {
            status: 404,
            message: format!("NOT_FOUND: {version_id}"),
        })
    }

    async fn create(&self, object: &str, records: Vec<Value>) -> Result<Vec<CreateOutcome>> {
        let mut inner = self.inner.lock().unwrap();
        if object == "ContentDocumentLink" && inner.fail_link_requests {
            return Err(Error::Store {
                status: 500,
                message: "UNKNOWN_EXCEPTION".into(),
            });
        }

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let failure = match object {
                "ContentVersion" => field_text(&record, "Title")
                    .filter(|t| inner.fail_upload.contains(t))
                    .map(|_| "STORAGE_LIMIT_EXCEEDED"),
                "ContentDocumentLink" => field_text(&record, "LinkedEntityId")
                    .filter(|e| inner.fail_link_entity.contains(e))
                    .map(|_| "INSUFFICIENT_ACCESS_ON_CROSS_REFERENCE_ENTITY"),
                _ => None,
            };
            if let Some(code) = failure {
                outcomes.push(CreateOutcome {
                    id: None,
                    success: false,
                    errors: vec![StoreMessage {
                        status_code: Some(code.into()),
                        message: "rejected".into(),
                    }],
                });
                continue;
            }

            let mut row = record;
            let id = if object == "ContentVersion" {
                let data = field_text(&row, "VersionData").unwrap_or_default();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                let id = inner.mint_id("068T");
                let doc = inner.mint_id("069T");
                let path = field_text(&row, "PathOnClient").unwrap_or_default();
                let ext = path.rsplit_once('.').map(|(_, e)| e.to_string());
                if let Some(obj) = row.as_object_mut() {
                    obj.remove("VersionData");
                    obj.insert("ContentDocumentId".into(), json!(doc));
                    obj.insert("ContentSize".into(), json!(bytes.len()));
                    obj.insert("IsLatest".into(), json!(true));
                    obj.insert("VersionNumber".into(), json!("1"));
                    obj.insert("FileExtension".into(), json!(ext));
                    obj.insert("_created".into(), json!(true));
                }
                inner.blobs.insert(id.clone(), bytes);
                inner.uploads += 1;
                id
            } else {
                inner.mint_id("a0T")
            };
            if let Some(obj) = row.as_object_mut() {
                obj.insert("Id".into(), json!(id));
            }
            inner.tables.entry(object.to_string()).or_default().push(row);
            outcomes.push(CreateOutcome {
                id: Some(id),
                success: true,
                errors: Vec::new(),
            });
        }
        Ok(outcomes)
    }
}

fn project(row: &Value, fields: &[String]) -> Value {
    let mut out = serde_json::Map::new();
    out.insert("attributes".into(), json!({"type": "row"}));
    for field in fields {
        let value = row
            .as_object()
            .and_then(|o| o.iter().find(|(k, _)| k.eq_ignore_ascii_case(field)))
            .map_or(Value::Null, |(_, v)| v.clone());
        out.insert(field.clone(), value);
    }
    Value::Object(out)
}

// ── SOQL subset ───────────────────────────────────────────────

struct Select {
    fields: Vec<String>,
    object: String,
    filter: Option<Predicate>,
}

#[derive(Debug)]
enum Predicate {
    And(Vec<Predicate>),
    Eq(String, String),
    In(String, Vec<String>),
}

impl Predicate {
    fn matches(&self, row: &Value) -> bool {
        match self {
            Self::And(parts) => parts.iter().all(|p| p.matches(row)),
            Self::Eq(field, value) => field_text(row, field).as_deref() == Some(value.as_str()),
            Self::In(field, values) => {
                field_text(row, field).is_some_and(|v| values.iter().any(|x| *x == v))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(String),
    Open,
    Close,
    Comma,
    Equals,
}

fn invalid(soql: &str) -> Error {
    Error::Store {
        status: 400,
        message: format!("MALFORMED_QUERY: {soql}"),
    }
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\n' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '\'' => {
                chars.next();
                let mut lit = String::new();
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                lit.push(escaped);
                            }
                        }
                        '\'' => break,
                        other => lit.push(other),
                    }
                }
                tokens.push(Token::Literal(lit));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || "(),='".contains(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    tokens
}

fn parse_select(soql: &str) -> Result<Select> {
    let rest = soql.strip_prefix("SELECT ").ok_or_else(|| invalid(soql))?;
    let (fields, rest) = rest.split_once(" FROM ").ok_or_else(|| invalid(soql))?;
    let (object, where_clause) = match rest.split_once(" WHERE ") {
        Some((o, w)) => (o, Some(w)),
        None => (rest, None),
    };

    let filter = match where_clause {
        Some(clause) => {
            let tokens = tokenize(clause);
            let mut pos = 0;
            let pred = parse_and(&tokens, &mut pos).ok_or_else(|| invalid(soql))?;
            if pos != tokens.len() {
                return Err(invalid(soql));
            }
            Some(pred)
        }
        None => None,
    };

    Ok(Select {
        fields: fields.split(',').map(|f| f.trim().to_string()).collect(),
        object: object.trim().to_string(),
        filter,
    })
}

fn parse_and(tokens: &[Token], pos: &mut usize) -> Option<Predicate> {
    let mut parts = vec![parse_term(tokens, pos)?];
    while matches!(tokens.get(*pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case("AND")) {
        *pos += 1;
        parts.push(parse_term(tokens, pos)?);
    }
    Some(if parts.len() == 1 {
        parts.remove(0)
    } else {
        Predicate::And(parts)
    })
}

fn parse_term(tokens: &[Token], pos: &mut usize) -> Option<Predicate> {
    match tokens.get(*pos)? {
        Token::Open => {
            *pos += 1;
            let inner = parse_and(tokens, pos)?;
            (tokens.get(*pos)? == &Token::Close).then_some(())?;
            *pos += 1;
            Some(inner)
        }
        Token::Word(field) => {
            let field = field.clone();
            *pos += 1;
            match tokens.get(*pos)? {
                Token::Equals => {
                    *pos += 1;
                    let value = literal(tokens.get(*pos)?)?;
                    *pos += 1;
                    Some(Predicate::Eq(field, value))
                }
                Token::Word(w) if w.eq_ignore_ascii_case("IN") => {
                    *pos += 1;
                    (tokens.get(*pos)? == &Token::Open).then_some(())?;
                    *pos += 1;
                    let mut values = Vec::new();
                    loop {
                        values.push(literal(tokens.get(*pos)?)?);
                        *pos += 1;
                        match tokens.get(*pos)? {
                            Token::Comma => *pos += 1,
                            Token::Close => {
                                *pos += 1;
                                break;
                            }
                            _ => return None,
                        }
                    }
                    Some(Predicate::In(field, values))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn literal(token: &Token) -> Option<String> {
    match token {
        Token::Literal(s) | Token::Word(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filters_and_projects() {
        let store = MemoryStore::new("mem://a");
        store.insert("Account", json!({"Id": "1", "Region__c": "EMEA", "Code__c": "a'b"}));
        store.insert("Account", json!({"Id": "2", "Region__c": "APAC", "Code__c": "c"}));

        let page = store
            .query("SELECT Id, Code__c FROM Account WHERE (Region__c = 'EMEA') AND Code__c IN ('a\\'b', 'z')")
            .await
            .unwrap();
        assert!(page.done);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0]["Id"], "1");
        assert!(page.records[0].get("Region__c").is_none());
    }

    #[tokio::test]
    async fn test_rejects_malformed_query() {
        let store = MemoryStore::new("mem://a");
        let result = store.query("SELECT Id FROM Account WHERE Id IN (").await;
        assert!(matches!(result, Err(Error::Store { status: 400, .. })));
    }
}
