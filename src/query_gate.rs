//! Query Safety Gate
//!
//! The generative backend proposes a lookup query from a natural-language
//! instruction; nothing it says is trusted. `validate` re-derives safety from
//! the text alone and is the only way to obtain a [`ValidatedQuery`], the sole
//! input the lookup service accepts.

use crate::config::{EntityDescriptors, RelationshipDescriptor};
use crate::error::{Result, ValidatorError};
use crate::llm::{strip_code_fences, CompletionBackend};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{SetExpr, Statement, TableFactor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const FORBIDDEN_KEYWORDS: [&str; 7] = ["insert", "update", "delete", "drop", "alter", "join", "union"];

lazy_static! {
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
    static ref LEADING_SELECT: Regex = Regex::new(r"(?i)^select\b").unwrap();
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?is)\blimit\s+\d+\b(\s*;)?").unwrap();
    static ref FROM_WORD: Regex = Regex::new(r"(?i)\bfrom\b").unwrap();
    static ref FORBIDDEN: Vec<(&'static str, Regex)> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|word| (*word, Regex::new(&format!(r"(?i)\b{}\b", word)).unwrap()))
        .collect();
}

/// Why a generated query was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryValidationError {
    #[error("Only SELECT statements are allowed")]
    NotSelect,

    #[error("Multiple SQL statements detected")]
    MultipleStatements,

    #[error("SELECT must contain FROM clause")]
    MissingFrom,

    #[error("Forbidden SQL keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("Unauthorized table access: {0}")]
    UnauthorizedTable(String),
}

/// Raw text proposed by the generator. Never executed as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery(String);

impl GeneratedQuery {
    pub fn new(text: impl Into<String>) -> Self {
        GeneratedQuery(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single read-only statement over one authorized table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    table: String,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

pub struct QuerySafetyGate {
    backend: Arc<dyn CompletionBackend>,
    entities: EntityDescriptors,
    relationship: RelationshipDescriptor,
}

impl QuerySafetyGate {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        entities: EntityDescriptors,
        relationship: RelationshipDescriptor,
    ) -> Self {
        Self {
            backend,
            entities,
            relationship,
        }
    }

    /// Ask the generator for exactly one lookup query.
    pub async fn generate(&self, instruction: &str) -> Result<GeneratedQuery> {
        let prompt = self.generation_prompt(instruction);
        let text = self
            .backend
            .complete(&prompt)
            .await
            .map_err(|e| ValidatorError::QueryGeneration(e.to_string()))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidatorError::QueryGeneration("generator returned no query".to_string()));
        }
        debug!("Generated query: {}", text);
        Ok(GeneratedQuery::new(text))
    }

    /// Statically verify a generated query against one configured table.
    pub fn validate(
        &self,
        query: &GeneratedQuery,
        allowed_table: &str,
    ) -> std::result::Result<ValidatedQuery, QueryValidationError> {
        let configured = self
            .entities
            .tables()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(allowed_table));
        if !configured {
            return Err(QueryValidationError::UnauthorizedTable(allowed_table.to_string()));
        }
        let sql = validate_query_text(query.as_str(), allowed_table)?;
        Ok(ValidatedQuery {
            sql,
            table: allowed_table.to_string(),
        })
    }

    /// Generate, then validate. Fails closed on either step.
    pub async fn generate_validated(&self, instruction: &str, allowed_table: &str) -> Result<ValidatedQuery> {
        let generated = self.generate(instruction).await?;
        self.validate(&generated, allowed_table).map_err(|e| {
            warn!("Rejected generated query for table '{}': {} ({})", allowed_table, e, generated.as_str());
            ValidatorError::QueryValidation(e)
        })
    }

    fn generation_prompt(&self, instruction: &str) -> String {
        let mut schema = Vec::new();
        for (_, descriptor) in self.entities.iter() {
            let mut columns = vec![descriptor.id_column.as_str(), descriptor.name_column.as_str()];
            if descriptor.table.eq_ignore_ascii_case(&self.relationship.table) {
                columns.push(self.relationship.role_column.as_str());
                columns.push(self.relationship.application_column.as_str());
            }
            schema.push(format!("{}({})", descriptor.table, columns.into_iter().unique().join(", ")));
        }

        let role = &self.entities.role;
        format!(
            r#"You generate SQL SELECT statements for an IAM database.

SCHEMA:
{schema}

STRICT RULES:
- EXACTLY one SELECT statement on a single line
- SELECT only the ID column of the requested table
- WHERE must filter only on the matching name column(s)
- Quote identifiers with double quotes and values with single quotes
- NO SELECT *
- NO JOIN, UNION or subqueries
- NO INSERT, UPDATE, DELETE, DROP or ALTER
- NO comments
- Return ONLY the raw SQL, no markdown, no explanation

Example: SELECT "{id}" FROM "{table}" WHERE "{name}" = 'HR Analyst' LIMIT 1

Instruction: {instruction}"#,
            schema = schema.join("\n"),
            id = role.id_column,
            table = role.table,
            name = role.name_column,
            instruction = instruction,
        )
    }
}

/// Re-derive safety of `text` for `allowed_table`, returning the statement to run.
///
/// Markup is stripped and any prose around the `SELECT ... (LIMIT n)?` span is
/// cut away. The keyword scan covers the whole stripped text, literals
/// included, so a name like `'Delete Team'` is rejected too.
pub fn validate_query_text(text: &str, allowed_table: &str) -> std::result::Result<String, QueryValidationError> {
    let cleaned = strip_code_fences(text).trim();
    let statement = extract_statement(cleaned);

    if !LEADING_SELECT.is_match(statement) {
        return Err(QueryValidationError::NotSelect);
    }

    let body = statement.trim_end();
    if body.char_indices().any(|(i, c)| c == ';' && i + 1 < body.len()) {
        return Err(QueryValidationError::MultipleStatements);
    }

    if !FROM_WORD.is_match(body) {
        return Err(QueryValidationError::MissingFrom);
    }

    for (word, pattern) in FORBIDDEN.iter() {
        if pattern.is_match(cleaned) {
            return Err(QueryValidationError::ForbiddenKeyword(word.to_string()));
        }
    }

    let sql = body.trim_end_matches(';').trim_end();
    if !reads_only(sql, allowed_table) {
        return Err(QueryValidationError::UnauthorizedTable(allowed_table.to_string()));
    }

    Ok(sql.to_string())
}

/// Cut the statement out of surrounding prose: through `LIMIT n` when present,
/// otherwise up to the first line or sentence break outside quotes.
fn extract_statement(text: &str) -> &str {
    let start = match SELECT_WORD.find(text) {
        Some(m) => m.start(),
        None => return text,
    };
    let candidate = &text[start..];
    match LIMIT_CLAUSE.find(candidate) {
        Some(m) => candidate[..m.end()].trim(),
        None => candidate[..statement_end(candidate)].trim(),
    }
}

fn statement_end(text: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') | (None, '`') => quote = Some(c),
            (None, '\n') => return i,
            (None, '.') => {
                if chars.peek().map_or(true, |(_, next)| next.is_whitespace()) {
                    return i;
                }
            }
            _ => {}
        }
    }
    text.len()
}

/// True when `sql` is one plain `SELECT` over `allowed_table` alone: no other
/// table, no join, no derived table, no nested query anywhere in the text.
fn reads_only(sql: &str, allowed_table: &str) -> bool {
    let dialect = SQLiteDialect {};

    // Literals tokenize as strings, so only real SELECT keywords are counted.
    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!("Tokenizer rejected query: {}", e);
            return false;
        }
    };
    let selects = tokens
        .iter()
        .filter(|token| matches!(token, Token::Word(word) if word.keyword == Keyword::SELECT))
        .count();
    if selects != 1 {
        return false;
    }

    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("Parser rejected query: {}", e);
            return false;
        }
    };
    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        _ => return false,
    };
    if query.with.is_some() {
        return false;
    }
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => return false,
    };
    let from = match select.from.as_slice() {
        [from] if from.joins.is_empty() => from,
        _ => return false,
    };
    match &from.relation {
        TableFactor::Table { name, args: None, .. } => {
            matches!(name.0.as_slice(), [ident] if ident.value.eq_ignore_ascii_case(allowed_table))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedBackend;

    fn gate(reply: &'static str) -> QuerySafetyGate {
        QuerySafetyGate::new(
            Arc::new(FixedBackend(reply)),
            EntityDescriptors::default(),
            RelationshipDescriptor::default(),
        )
    }

    #[test]
    fn test_simple_select_passes() {
        let sql = validate_query_text(r#"SELECT "role_id" FROM "roles" WHERE "role_name" = 'HR Analyst' LIMIT 1"#, "roles")
            .unwrap();
        assert_eq!(sql, r#"SELECT "role_id" FROM "roles" WHERE "role_name" = 'HR Analyst' LIMIT 1"#);
    }

    #[test]
    fn test_case_insensitive_statement_passes() {
        assert!(validate_query_text("select id from Roles where role_name = 'HR Analyst' limit 1", "roles").is_ok());
    }

    #[test]
    fn test_table_allow_list() {
        let sql = "SELECT id FROM roles WHERE role_name = 'HR Analyst'";
        assert_eq!(
            validate_query_text(sql, "users"),
            Err(QueryValidationError::UnauthorizedTable("users".to_string()))
        );
        assert!(validate_query_text(sql, "roles").is_ok());
    }

    #[test]
    fn test_statement_shape() {
        assert_eq!(validate_query_text("SELECT 1", "roles"), Err(QueryValidationError::MissingFrom));
        assert_eq!(
            validate_query_text("SELECT id FROM roles; DROP TABLE roles", "roles"),
            Err(QueryValidationError::MultipleStatements)
        );
        assert_eq!(
            validate_query_text("DELETE FROM roles", "roles"),
            Err(QueryValidationError::NotSelect)
        );
        assert_eq!(validate_query_text("", "roles"), Err(QueryValidationError::NotSelect));
    }

    #[test]
    fn test_trailing_semicolon_is_allowed_and_trimmed() {
        assert_eq!(
            validate_query_text("SELECT user_id FROM users WHERE user_name = 'a';", "users").unwrap(),
            "SELECT user_id FROM users WHERE user_name = 'a'"
        );
    }

    #[test]
    fn test_forbidden_keywords_anywhere() {
        for word in FORBIDDEN_KEYWORDS {
            let sql = format!("SELECT id FROM users WHERE note = 'x' AND {} = 1", word.to_uppercase());
            assert_eq!(
                validate_query_text(&sql, "users"),
                Err(QueryValidationError::ForbiddenKeyword(word.to_string())),
                "keyword {}",
                word
            );
        }
    }

    #[test]
    fn test_keyword_inside_literal_still_rejected() {
        assert_eq!(
            validate_query_text(r#"SELECT * FROM Users WHERE name = "DELETE""#, "users"),
            Err(QueryValidationError::ForbiddenKeyword("delete".to_string()))
        );
    }

    #[test]
    fn test_keyword_as_substring_is_fine() {
        assert!(validate_query_text("SELECT updated_at FROM users WHERE user_name = 'Dropbox Admin'", "users").is_ok());
    }

    #[test]
    fn test_join_rejected() {
        assert_eq!(
            validate_query_text("SELECT u.user_id FROM users u JOIN roles r ON 1=1", "users"),
            Err(QueryValidationError::ForbiddenKeyword("join".to_string()))
        );
    }

    #[test]
    fn test_comma_join_and_subquery_table_rejected() {
        assert!(matches!(
            validate_query_text("SELECT user_id FROM users, roles", "users"),
            Err(QueryValidationError::UnauthorizedTable(_))
        ));
        assert!(matches!(
            validate_query_text("SELECT user_id FROM users WHERE user_id IN (SELECT role_id FROM roles)", "users"),
            Err(QueryValidationError::UnauthorizedTable(_))
        ));
    }

    #[test]
    fn test_aliased_comma_join_rejected() {
        assert_eq!(
            validate_query_text("SELECT r.role_name FROM users u, roles r", "users"),
            Err(QueryValidationError::UnauthorizedTable("users".to_string()))
        );
    }

    #[test]
    fn test_parenthesised_from_rejected() {
        let queries = [
            "SELECT user_id FROM users WHERE user_name IN (SELECT name FROM(sqlite_master))",
            "SELECT user_id FROM users WHERE user_name = (SELECT role_name FROM(roles) LIMIT 1)",
            "SELECT user_id FROM (SELECT user_id FROM users)",
            "SELECT user_id FROM(users)",
        ];
        for sql in queries {
            assert_eq!(
                validate_query_text(sql, "users"),
                Err(QueryValidationError::UnauthorizedTable("users".to_string())),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_schema_catalogue_rejected() {
        assert!(matches!(
            validate_query_text("SELECT name FROM sqlite_master", "users"),
            Err(QueryValidationError::UnauthorizedTable(_))
        ));
        assert!(matches!(
            validate_query_text("SELECT user_id FROM users WHERE EXISTS (SELECT 1 FROM sqlite_master)", "users"),
            Err(QueryValidationError::UnauthorizedTable(_))
        ));
    }

    #[test]
    fn test_select_inside_literal_is_not_a_subquery() {
        assert!(validate_query_text("SELECT user_id FROM users WHERE user_name = 'Select Team'", "users").is_ok());
    }

    #[test]
    fn test_prose_after_statement_without_limit() {
        assert_eq!(
            validate_query_text(
                "SELECT app_id FROM applications WHERE app_name = 'Workday'\nThis returns the id.",
                "applications"
            )
            .unwrap(),
            "SELECT app_id FROM applications WHERE app_name = 'Workday'"
        );
        assert_eq!(
            validate_query_text(
                "SELECT u.user_id FROM users u WHERE u.user_name = 'Aaron.Nichols'. That is the lookup.",
                "users"
            )
            .unwrap(),
            "SELECT u.user_id FROM users u WHERE u.user_name = 'Aaron.Nichols'"
        );
    }

    #[test]
    fn test_similar_table_name_rejected() {
        assert!(validate_query_text("SELECT user_id FROM users_archive", "users").is_err());
        assert!(validate_query_text("SELECT user_id FROM main.users", "users").is_err());
    }

    #[test]
    fn test_quoted_table_forms() {
        assert!(validate_query_text(r#"SELECT user_id FROM "users""#, "users").is_ok());
        assert!(validate_query_text("SELECT user_id FROM `Users`", "users").is_ok());
    }

    #[test]
    fn test_markup_and_prose_are_stripped() {
        let text = "```sql\nSELECT \"app_id\" FROM \"applications\" WHERE \"app_name\" = 'Workday' LIMIT 1\n```";
        assert_eq!(
            validate_query_text(text, "applications").unwrap(),
            r#"SELECT "app_id" FROM "applications" WHERE "app_name" = 'Workday' LIMIT 1"#
        );

        let text = "Here is the query: SELECT app_id FROM applications WHERE app_name = 'Workday' LIMIT 1. It returns the id.";
        assert_eq!(
            validate_query_text(text, "applications").unwrap(),
            "SELECT app_id FROM applications WHERE app_name = 'Workday' LIMIT 1"
        );
    }

    #[test]
    fn test_mutation_after_limit_is_still_caught() {
        assert_eq!(
            validate_query_text("SELECT id FROM roles LIMIT 1; DROP TABLE roles", "roles"),
            Err(QueryValidationError::ForbiddenKeyword("drop".to_string()))
        );
    }

    #[tokio::test]
    async fn test_gate_rejects_unconfigured_table() {
        let gate = gate("SELECT secret FROM credentials");
        let generated = gate.generate("anything").await.unwrap();
        assert_eq!(
            gate.validate(&generated, "credentials"),
            Err(QueryValidationError::UnauthorizedTable("credentials".to_string()))
        );
    }

    #[tokio::test]
    async fn test_generate_validated_fails_closed() {
        let gate = gate("UPDATE users SET user_name = 'x'");
        let err = gate.generate_validated("look up user x", "users").await.unwrap_err();
        assert!(matches!(err, ValidatorError::QueryValidation(QueryValidationError::NotSelect)));

        let gate = gate_ok();
        let validated = gate.generate_validated("look up role", "roles").await.unwrap();
        assert_eq!(validated.table(), "roles");
    }

    fn gate_ok() -> QuerySafetyGate {
        gate(r#"SELECT "role_id" FROM "roles" WHERE "role_name" = 'HR Analyst' LIMIT 1"#)
    }

    #[test]
    fn test_prompt_lists_schema_and_instruction() {
        let prompt = gate("").generation_prompt("selects user_id from users where user_name equals 'x'");
        assert!(prompt.contains("users(user_id, user_name)"));
        assert!(prompt.contains("roles(role_id, role_name, app_name)"));
        assert!(prompt.ends_with("Instruction: selects user_id from users where user_name equals 'x'"));
    }
}
