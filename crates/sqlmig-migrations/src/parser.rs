//! Migration file parser.
//!
//! A migration file is plain SQL split into sections by directive comments:
//!
//! ```sql
//! -- +migrate Up
//! CREATE TABLE people (id INT);
//!
//! -- +migrate StatementBegin
//! CREATE FUNCTION touch() RETURNS trigger AS $$
//! BEGIN
//!     NEW.updated_at = now();
//!     RETURN NEW;
//! END;
//! $$ LANGUAGE plpgsql;
//! -- +migrate StatementEnd
//!
//! -- +migrate Down notransaction
//! DROP TABLE people;
//! ```
//!
//! Outside a `StatementBegin`/`StatementEnd` block a statement ends at the
//! first line whose code (ignoring a trailing `--` comment) ends with `;`.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlmig_core::{MigrateError, MigrateResult};

use crate::migration::LoadedMigration;

static DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--\s*\+migrate\b(.*)$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Up,
    Down,
}

struct ParseState<'a> {
    id: &'a str,
    section: Section,
    seen_section: bool,
    in_block: bool,
    buffer: String,
    result: LoadedMigration,
}

impl<'a> ParseState<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            section: Section::None,
            seen_section: false,
            in_block: false,
            buffer: String::new(),
            result: LoadedMigration::default(),
        }
    }

    fn error(&self, line_no: usize, message: impl std::fmt::Display) -> MigrateError {
        MigrateError::Parse {
            migration_id: self.id.to_string(),
            message: format!("line {line_no}: {message}"),
        }
    }

    fn flush(&mut self) {
        let statement = std::mem::take(&mut self.buffer);
        match self.section {
            Section::Up => self.result.up.push(statement),
            Section::Down => self.result.down.push(statement),
            Section::None => {}
        }
    }

    fn directive(&mut self, line_no: usize, rest: &str) -> MigrateResult<()> {
        let mut words = rest.split_whitespace();
        let command = words
            .next()
            .ok_or_else(|| self.error(line_no, "empty +migrate directive"))?;
        let options: Vec<&str> = words.collect();

        match command {
            "Up" | "Down" => {
                if self.in_block {
                    return Err(self.error(
                        line_no,
                        format!("{command} directive inside a StatementBegin block"),
                    ));
                }
                if !self.buffer.trim().is_empty() {
                    return Err(self.error(
                        line_no,
                        "statement before this directive is missing its terminating ';'",
                    ));
                }
                self.buffer.clear();
                let mut no_transaction = false;
                for option in options {
                    if option == "notransaction" {
                        no_transaction = true;
                    } else {
                        return Err(self.error(line_no, format!("unknown option '{option}'")));
                    }
                }
                self.seen_section = true;
                if command == "Up" {
                    self.section = Section::Up;
                    self.result.disable_transaction_up = no_transaction;
                } else {
                    self.section = Section::Down;
                    self.result.disable_transaction_down = no_transaction;
                }
            }
            "StatementBegin" => {
                if self.section == Section::None {
                    return Err(self.error(line_no, "StatementBegin before any Up/Down directive"));
                }
                if self.in_block {
                    return Err(self.error(line_no, "nested StatementBegin"));
                }
                if !self.buffer.trim().is_empty() {
                    return Err(self.error(
                        line_no,
                        "statement before StatementBegin is missing its terminating ';'",
                    ));
                }
                self.buffer.clear();
                self.in_block = true;
            }
            "StatementEnd" => {
                if !self.in_block {
                    return Err(self.error(line_no, "StatementEnd without StatementBegin"));
                }
                self.in_block = false;
                self.flush();
            }
            other => {
                return Err(self.error(line_no, format!("unknown directive '{other}'")));
            }
        }
        Ok(())
    }

    fn line(&mut self, line_no: usize, line: &str) -> MigrateResult<()> {
        let trimmed = line.trim();

        if self.section == Section::None {
            if trimmed.is_empty() || trimmed.starts_with("--") {
                return Ok(());
            }
            return Err(self.error(line_no, "SQL found before the first Up/Down directive"));
        }

        if self.in_block {
            self.buffer.push_str(line);
            self.buffer.push('\n');
            return Ok(());
        }

        if self.buffer.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            return Ok(());
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        if ends_with_semicolon(line) {
            self.flush();
        }
        Ok(())
    }

    fn finish(self, line_no: usize) -> MigrateResult<LoadedMigration> {
        if self.in_block {
            return Err(self.error(line_no, "StatementBegin block is never closed"));
        }
        if !self.buffer.trim().is_empty() {
            return Err(self.error(
                line_no,
                "unexpected unfinished SQL statement (missing ';'?)",
            ));
        }
        if !self.seen_section {
            return Err(MigrateError::Parse {
                migration_id: self.id.to_string(),
                message: "no Up/Down directives found, so no statements were parsed".to_string(),
            });
        }
        Ok(self.result)
    }
}

/// Returns `true` if the code part of `line` ends with `;`.
///
/// Everything from the first whitespace-separated word starting with `--` is
/// treated as a comment.
fn ends_with_semicolon(line: &str) -> bool {
    line.split_whitespace()
        .take_while(|word| !word.starts_with("--"))
        .last()
        .is_some_and(|word| word.ends_with(';'))
}

/// Parses the text of migration `id`.
///
/// # Errors
///
/// Returns [`MigrateError::Parse`] when the file has no Up/Down directive,
/// uses an unknown directive or option, leaves a statement without its
/// terminating `;`, or misplaces `StatementBegin`/`StatementEnd`.
pub fn parse_migration(id: &str, text: &str) -> MigrateResult<LoadedMigration> {
    let mut state = ParseState::new(id);
    let mut line_no = 0;

    for (idx, raw) in text.lines().enumerate() {
        line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if let Some(caps) = DIRECTIVE.captures(line.trim()) {
            let rest = caps.get(1).map_or("", |m| m.as_str());
            state.directive(line_no, rest)?;
        } else {
            state.line(line_no, line)?;
        }
    }

    state.finish(line_no)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> LoadedMigration {
        parse_migration("1_test.sql", text).unwrap()
    }

    fn parse_err(text: &str) -> String {
        parse_migration("1_test.sql", text).unwrap_err().to_string()
    }

    #[test]
    fn test_simple_up_down() {
        let m = parse(
            "-- +migrate Up\nCREATE TABLE people (id int);\n\n-- +migrate Down\nDROP TABLE people;\n",
        );
        assert_eq!(m.up, vec!["CREATE TABLE people (id int);\n"]);
        assert_eq!(m.down, vec!["DROP TABLE people;\n"]);
        assert!(!m.disable_transaction_up);
        assert!(!m.disable_transaction_down);
    }

    #[test]
    fn test_multiline_and_multiple_statements() {
        let m = parse(
            "-- +migrate Up\nCREATE TABLE a (\n  id int\n);\nINSERT INTO a VALUES (1);\n",
        );
        assert_eq!(m.up.len(), 2);
        assert_eq!(m.up[0], "CREATE TABLE a (\n  id int\n);\n");
        assert!(m.down.is_empty());
    }

    #[test]
    fn test_trailing_comment_after_semicolon() {
        let m = parse("-- +migrate Up\nSELECT 1; -- one\nSELECT 2;\n");
        assert_eq!(m.up.len(), 2);
    }

    #[test]
    fn test_semicolon_inside_comment_does_not_end_statement() {
        let m = parse("-- +migrate Up\nSELECT 1 -- not yet;\n;\n");
        assert_eq!(m.up.len(), 1);
    }

    #[test]
    fn test_notransaction() {
        let m = parse(
            "-- +migrate Up notransaction\nCREATE INDEX CONCURRENTLY i ON t (c);\n-- +migrate Down\nDROP INDEX i;\n",
        );
        assert!(m.disable_transaction_up);
        assert!(!m.disable_transaction_down);
    }

    #[test]
    fn test_statement_block() {
        let m = parse(
            "-- +migrate Up\n-- +migrate StatementBegin\nCREATE FUNCTION f() AS $$\nBEGIN\n  x;\nEND;\n$$;\n-- +migrate StatementEnd\nSELECT 1;\n",
        );
        assert_eq!(m.up.len(), 2);
        assert!(m.up[0].contains("BEGIN\n  x;\nEND;"));
    }

    #[test]
    fn test_header_comments_are_ignored() {
        let m = parse("-- a description\n\n-- +migrate Up\nSELECT 1;\n");
        assert_eq!(m.up.len(), 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let m = parse("-- +migrate Up\r\nSELECT 1;\r\n-- +migrate Down\r\nSELECT 2;\r\n");
        assert_eq!(m.up, vec!["SELECT 1;\n"]);
        assert_eq!(m.down, vec!["SELECT 2;\n"]);
    }

    #[test]
    fn test_error_no_directives() {
        assert!(parse_err("-- nothing here\n").contains("no Up/Down directives"));
    }

    #[test]
    fn test_error_sql_before_directive() {
        assert!(parse_err("SELECT 1;\n-- +migrate Up\n").contains("before the first Up/Down"));
    }

    #[test]
    fn test_error_unfinished_statement() {
        let err = parse_err("-- +migrate Up\nSELECT 1\n");
        assert!(err.contains("unfinished SQL statement"));
        assert!(err.contains("1_test.sql"));
    }

    #[test]
    fn test_error_unfinished_before_down() {
        assert!(parse_err("-- +migrate Up\nSELECT 1\n-- +migrate Down\n")
            .contains("missing its terminating"));
    }

    #[test]
    fn test_error_unknown_directive() {
        assert!(parse_err("-- +migrate Sideways\n").contains("unknown directive 'Sideways'"));
    }

    #[test]
    fn test_error_unknown_option() {
        assert!(parse_err("-- +migrate Up fast\n").contains("unknown option 'fast'"));
    }

    #[test]
    fn test_error_unmatched_statement_end() {
        assert!(parse_err("-- +migrate Up\n-- +migrate StatementEnd\n")
            .contains("StatementEnd without StatementBegin"));
    }

    #[test]
    fn test_error_unterminated_block() {
        assert!(parse_err("-- +migrate Up\n-- +migrate StatementBegin\nSELECT 1;\n")
            .contains("never closed"));
    }

    #[test]
    fn test_ends_with_semicolon() {
        assert!(ends_with_semicolon("SELECT 1;"));
        assert!(ends_with_semicolon("SELECT 1;   -- trailing"));
        assert!(!ends_with_semicolon("SELECT 1 -- x;"));
        assert!(!ends_with_semicolon(""));
    }
}
