//! Statement grammar collaborators

use std::ops::ControlFlow;

use sqlparser::{
    ast::{ObjectName, Statement as SqlStatement, visit_relations},
    dialect::MySqlDialect,
    parser::Parser,
    tokenizer::{Token, Tokenizer},
};
use thiserror::Error;

use crate::traits::GrammarParser;

/// Fields a grammar derives from statement text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStatement {
    pub action: String,
    pub schema: Option<String>,
    pub table:  Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("statement text is empty")]
    Empty,
    #[error("statement could not be parsed: {0}")]
    Syntax(String),
    #[error("text holds {0} statements, expected one")]
    MultipleStatements(usize),
    #[error("no grammar configured")]
    Unsupported,
}

/// Grammar backed by `sqlparser` with the MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlGrammar;

impl GrammarParser for SqlGrammar {
    fn parse_statement(&self, text: &str) -> Result<ParsedStatement, GrammarError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GrammarError::Empty);
        }

        let statements = Parser::parse_sql(&MySqlDialect {}, text)
            .map_err(|e| GrammarError::Syntax(e.to_string()))?;
        let statement = match statements.as_slice() {
            [] => return Err(GrammarError::Empty),
            [statement] => statement,
            _ => return Err(GrammarError::MultipleStatements(statements.len())),
        };

        let action = match statement_action(statement) {
            Some(action) => action.to_string(),
            None => leading_verb(text).ok_or(GrammarError::Empty)?,
        };

        let (schema, table) = match first_relation(statement) {
            Some(name) => split_relation(&name),
            None => (None, None),
        };

        Ok(ParsedStatement {
            action,
            schema,
            table,
        })
    }
}

/// Grammar that never parses; extraction falls back to the leading verb.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrammar;

impl GrammarParser for NoGrammar {
    fn parse_statement(&self, _text: &str) -> Result<ParsedStatement, GrammarError> {
        Err(GrammarError::Unsupported)
    }
}

fn first_relation(statement: &SqlStatement) -> Option<ObjectName> {
    let mut first = None;
    let _ = visit_relations(statement, |name| {
        first = Some(name.clone());
        ControlFlow::<()>::Break(())
    });
    first
}

// `db.table` or `table`; catalog prefixes beyond two parts are ignored
fn split_relation(name: &ObjectName) -> (Option<String>, Option<String>) {
    let mut parts = name.0.iter().rev().map(|ident| ident.value.clone());
    let table = parts.next();
    let schema = parts.next();
    (schema, table)
}

// Action by statement kind; `None` leaves it to the leading keyword
fn statement_action(statement: &SqlStatement) -> Option<&'static str> {
    let action = match statement {
        SqlStatement::Query(_) => "select",
        SqlStatement::Insert { .. } => "insert",
        SqlStatement::Update { .. } => "update",
        SqlStatement::Delete { .. } => "delete",
        SqlStatement::Drop { .. } => "drop",
        SqlStatement::Truncate { .. } => "truncate",
        SqlStatement::AlterTable { .. } => "alter",
        SqlStatement::CreateTable { .. }
        | SqlStatement::CreateView { .. }
        | SqlStatement::CreateIndex { .. }
        | SqlStatement::CreateDatabase { .. }
        | SqlStatement::CreateSchema { .. } => "create",
        SqlStatement::Grant { .. } => "grant",
        SqlStatement::Revoke { .. } => "revoke",
        _ => return None,
    };
    Some(action)
}

/// Leading keyword of `text`, lowercased.
///
/// Comments and opening parentheses before the keyword are skipped. Returns
/// `None` when the text does not tokenize, starts with anything but a bare
/// word, or holds more than one statement.
pub(crate) fn leading_verb(text: &str) -> Option<String> {
    let tokens = Tokenizer::new(&MySqlDialect {}, text).tokenize().ok()?;
    let mut significant = tokens
        .into_iter()
        .filter(|token| !matches!(token, Token::Whitespace(_) | Token::EOF));

    let Token::Word(word) = significant.by_ref().find(|token| *token != Token::LParen)? else {
        return None;
    };
    if word.quote_style.is_some() {
        return None;
    }

    // Anything after a separator is a second statement
    let mut rest = significant.skip_while(|token| *token != Token::SemiColon);
    if rest.any(|token| token != Token::SemiColon) {
        return None;
    }

    Some(word.value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::select_qualified("select a, b from d.t", "select", Some("d"), Some("t"))]
    #[case::select_unqualified("SELECT * FROM users WHERE id = 1", "select", None, Some("users"))]
    #[case::insert("insert into shop.orders values (1, 2)", "insert", Some("shop"), Some("orders"))]
    #[case::update("UPDATE accounts SET x = 1", "update", None, Some("accounts"))]
    #[case::delete("delete from logs.events where id < 10", "delete", Some("logs"), Some("events"))]
    #[case::no_relation("select 1", "select", None, None)]
    fn test_sql_grammar_extracts_fields(
        #[case] sql: &str,
        #[case] action: &str,
        #[case] schema: Option<&str>,
        #[case] table: Option<&str>,
    ) {
        let parsed = SqlGrammar.parse_statement(sql).unwrap();
        assert_eq!(parsed.action, action);
        assert_eq!(parsed.schema.as_deref(), schema);
        assert_eq!(parsed.table.as_deref(), table);
    }

    #[rstest]
    #[case::block_comment_delete("/* select */ DELETE FROM d.t", "delete")]
    #[case::line_comment_drop("-- select\nDROP TABLE d.t", "drop")]
    #[case::hash_comment_delete("# select\nDELETE FROM d.t", "delete")]
    #[case::create_table("CREATE TABLE d.t (id INT)", "create")]
    #[case::alter_table("ALTER TABLE d.t ADD COLUMN c INT", "alter")]
    #[case::drop_upper("DROP TABLE IF EXISTS d.t", "drop")]
    #[case::trailing_separator("select 1;", "select")]
    fn test_sql_grammar_action_from_statement_kind(#[case] sql: &str, #[case] action: &str) {
        assert_eq!(SqlGrammar.parse_statement(sql).unwrap().action, action);
    }

    #[rstest]
    #[case::select_then_drop("select 1; drop table d.t", 2)]
    #[case::three("select 1; select 2; delete from t", 3)]
    fn test_sql_grammar_rejects_several_statements(#[case] sql: &str, #[case] count: usize) {
        assert_eq!(
            SqlGrammar.parse_statement(sql),
            Err(GrammarError::MultipleStatements(count))
        );
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("   ")]
    #[case::garbage("selec * from t")]
    #[case::truncated("select a from")]
    fn test_sql_grammar_rejects(#[case] sql: &str) {
        assert!(SqlGrammar.parse_statement(sql).is_err());
    }

    #[test]
    fn test_no_grammar_always_fails() {
        assert_eq!(
            NoGrammar.parse_statement("select 1"),
            Err(GrammarError::Unsupported)
        );
    }

    #[test]
    fn test_closure_grammar() {
        let stub = |text: &str| -> Result<ParsedStatement, GrammarError> {
            Ok(ParsedStatement {
                action: text.len().to_string(),
                ..ParsedStatement::default()
            })
        };
        assert_eq!(stub.parse_statement("abc").unwrap().action, "3");
    }

    #[rstest]
    #[case::plain("show databases", Some("show"))]
    #[case::upper("  SELECT 1", Some("select"))]
    #[case::paren("(select 1)", Some("select"))]
    #[case::punctuation_only("(( ;", None)]
    #[case::empty("", None)]
    #[case::block_comment("/* select */ delete from t", Some("delete"))]
    #[case::line_comment("-- select\ndrop table t", Some("drop"))]
    #[case::comment_only("/* select */", None)]
    #[case::quoted_first("`select` from t", None)]
    #[case::second_statement("select 1; drop table t", None)]
    #[case::trailing_separators("select 1 ;;", Some("select"))]
    #[case::unterminated_comment("/* select", None)]
    fn test_leading_verb(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(leading_verb(text).as_deref(), expected);
    }
}
