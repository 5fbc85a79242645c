//! Query Validator
//!
//! Syntactic gate between generated text and a live backend. The shallow SQL
//! check only looks at the leading verb; it blocks obviously destructive or
//! non-query statements and is not a security boundary. Strict mode parses
//! the SQL with `sqlparser` and only admits a single read-only statement.
//!
//! Resource-config expressions are checked in code in both modes: they must be
//! a `SELECT` projection and may not name a table or join.

use crate::error::{CopilotError, Result};
use crate::nlq::query::{CandidateQuery, Dialect, ValidatedQuery};
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::str::FromStr;

pub const SQL_ALLOWED_VERBS: [&str; 3] = ["select", "with", "explain"];

const CONFIG_FORBIDDEN_KEYWORDS: [&str; 2] = ["from", "join"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Shallow,
    Strict,
}

impl FromStr for ValidationMode {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "shallow" => Ok(ValidationMode::Shallow),
            "strict" => Ok(ValidationMode::Strict),
            other => Err(CopilotError::Config(format!("Unknown validation mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryValidator {
    mode: ValidationMode,
}

impl QueryValidator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn validate(&self, candidate: &CandidateQuery) -> Result<ValidatedQuery> {
        let text = candidate.text.trim();
        match candidate.dialect {
            Dialect::WarehouseSql => {
                check_sql_verb(text)?;
                if self.mode == ValidationMode::Strict {
                    check_sql_statement(text)?;
                }
            }
            Dialect::ResourceConfigDsl => check_config_expression(text)?,
        }
        Ok(ValidatedQuery::new(text.to_string(), candidate.dialect))
    }
}

fn check_sql_verb(text: &str) -> Result<()> {
    let lowered = text.to_lowercase();
    if SQL_ALLOWED_VERBS.iter().any(|verb| lowered.starts_with(verb)) {
        Ok(())
    } else {
        Err(CopilotError::invalid_query(
            text,
            "expected a SQL query starting with SELECT, WITH or EXPLAIN",
        ))
    }
}

fn check_sql_statement(text: &str) -> Result<()> {
    let statements = Parser::parse_sql(&GenericDialect {}, text)
        .map_err(|e| CopilotError::invalid_query(text, format!("SQL does not parse: {}", e)))?;

    match statements.as_slice() {
        [statement] => check_read_only(text, statement),
        [] => Err(CopilotError::invalid_query(text, "no SQL statement found")),
        _ => Err(CopilotError::invalid_query(
            text,
            format!("expected one statement, found {}", statements.len()),
        )),
    }
}

fn check_read_only(text: &str, statement: &Statement) -> Result<()> {
    match statement {
        Statement::Query(_) | Statement::ExplainTable { .. } => Ok(()),
        // EXPLAIN ANALYZE runs its statement, so the inner statement must be read-only too
        Statement::Explain { statement, .. } => check_read_only(text, statement),
        _ => Err(CopilotError::invalid_query(text, "only read-only queries are allowed")),
    }
}

fn check_config_expression(text: &str) -> Result<()> {
    let tokens = tokenize_outside_literals(text);

    match tokens.first() {
        Some(Token::Word(word)) if word == "select" => {}
        _ => {
            return Err(CopilotError::invalid_query(
                text,
                "expected a resource query starting with SELECT",
            ))
        }
    }

    for (idx, token) in tokens.iter().enumerate() {
        match token {
            Token::Word(word) if CONFIG_FORBIDDEN_KEYWORDS.contains(&word.as_str()) => {
                return Err(CopilotError::invalid_query(
                    text,
                    format!("{} is not allowed in resource queries", word.to_uppercase()),
                ));
            }
            Token::Semicolon if idx + 1 < tokens.len() => {
                return Err(CopilotError::invalid_query(text, "only one resource query is allowed"));
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Lower-cased identifier or keyword.
    Word(String),
    Semicolon,
}

/// Split into lower-cased words, skipping quoted literals and punctuation.
fn tokenize_outside_literals(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token::Word(current.to_lowercase()));
            current.clear();
        }
    };

    for c in text.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                flush(&mut current, &mut tokens);
                quote = Some(c);
            }
            ';' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Semicolon);
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => current.push(c),
            _ => flush(&mut current, &mut tokens),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(text: &str) -> CandidateQuery {
        CandidateQuery::new(text, Dialect::WarehouseSql)
    }

    fn config(text: &str) -> CandidateQuery {
        CandidateQuery::new(text, Dialect::ResourceConfigDsl)
    }

    #[test]
    fn test_shallow_accepts_allowed_verbs_case_insensitively() {
        let validator = QueryValidator::default();
        for text in [
            "SELECT service, cost FROM x",
            "  with t as (select 1) select * from t  ",
            "Explain select 1",
            "\n\tselect 1",
        ] {
            let validated = validator.validate(&sql(text)).unwrap();
            assert_eq!(validated.text(), text.trim());
            assert_eq!(validated.dialect(), Dialect::WarehouseSql);
        }
    }

    #[test]
    fn test_shallow_rejects_other_verbs() {
        let validator = QueryValidator::default();
        for text in [
            "DROP TABLE billing",
            "delete from x",
            "Here is your query: SELECT 1",
            "",
            "   ",
            "insert into x values (1)",
        ] {
            let err = validator.validate(&sql(text)).unwrap_err();
            assert_eq!(err.kind(), "InvalidQueryError", "{text}");
        }
    }

    #[test]
    fn test_shallow_is_prefix_only() {
        // Shallow mode does not parse, so a malformed query with a valid verb passes
        let validator = QueryValidator::new(ValidationMode::Shallow);
        assert!(validator.validate(&sql("select ((( from")).is_ok());
        assert!(validator.validate(&sql("select 1; drop table x")).is_ok());
    }

    #[test]
    fn test_strict_rejects_unparsable_and_multi_statement_sql() {
        let validator = QueryValidator::new(ValidationMode::Strict);
        assert!(validator.validate(&sql("select ((( from")).is_err());
        assert!(validator.validate(&sql("select 1; drop table x")).is_err());
        assert!(validator
            .validate(&sql("SELECT \"lineitem/productcode\", sum(\"lineitem/unblendedcost\") FROM cur.cur_data GROUP BY 1"))
            .is_ok());
        assert!(validator
            .validate(&sql("WITH t AS (SELECT 1 AS a) SELECT a FROM t"))
            .is_ok());
    }

    #[test]
    fn test_strict_rejects_explain_of_write() {
        let validator = QueryValidator::new(ValidationMode::Strict);
        assert!(validator.validate(&sql("EXPLAIN SELECT 1")).is_ok());
        assert!(validator.validate(&sql("EXPLAIN ANALYZE DELETE FROM billing")).is_err());
    }

    #[test]
    fn test_config_expression_accepts_projection_and_aggregation() {
        let validator = QueryValidator::default();
        for text in [
            "SELECT resourceId, resourceType WHERE resourceType = 'AWS::EC2::Instance'",
            "SELECT COUNT(*) WHERE resourceType = 'AWS::S3::Bucket'",
            "select awsRegion, COUNT(*) WHERE resourceType = 'AWS::EC2::Volume' GROUP BY awsRegion",
            "SELECT resourceId WHERE configuration.state.name = 'stopped';",
            "SELECT resourceId WHERE tags.value = 'from finance; join later'",
        ] {
            assert!(validator.validate(&config(text)).is_ok(), "{text}");
        }
    }

    #[test]
    fn test_config_expression_rejects_tables_and_joins() {
        let validator = QueryValidator::new(ValidationMode::Strict);
        let cases = [
            ("SELECT resourceId FROM resources", "FROM"),
            ("SELECT a.resourceId JOIN b ON a.x = b.x", "JOIN"),
            ("COUNT(*)", "SELECT"),
            ("SELECT resourceId; SELECT awsRegion", "one resource query"),
            ("DROP TABLE billing", "SELECT"),
        ];
        for (text, fragment) in cases {
            let err = validator.validate(&config(text)).unwrap_err();
            assert!(err.to_string().contains(fragment), "{text}: {err}");
        }
    }

    #[test]
    fn test_validation_mode_from_str() {
        assert_eq!("Strict".parse::<ValidationMode>().unwrap(), ValidationMode::Strict);
        assert_eq!(" shallow ".parse::<ValidationMode>().unwrap(), ValidationMode::Shallow);
        assert!("paranoid".parse::<ValidationMode>().is_err());
    }
}
