//! Schema-alias rewriting of query text.
//!
//! An alias registered as `addAlias("foo", "bar")` causes every occurrence of
//! the marker `<foo>.` in a query, case-insensitively, to be rewritten to
//! `bar.` before execution. Aliases apply in registration order.

use crate::error::{DbError, DbResult};
use parking_lot::RwLock;
use regex::Regex;

struct AliasRule {
    pattern: Regex,
    replacement: String,
}

#[derive(Default)]
struct TranslatorState {
    aliases: Vec<String>,
    rules: Vec<AliasRule>,
}

/// Rewrites `<alias>.` markers in query text into concrete schema prefixes.
///
/// Reads vastly outnumber writes; a read-write lock keeps `translate` cheap
/// for concurrent callers.
#[derive(Default)]
pub struct SchemaAliasTranslator {
    state: RwLock<TranslatorState>,
}

impl SchemaAliasTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an alias with a schema.
    ///
    /// Registering the same alias twice (case-insensitively) is a
    /// configuration error.
    pub fn add_alias(&self, alias: &str, schema: &str) -> DbResult<()> {
        let alias = alias.to_lowercase();
        let pattern = Regex::new(&format!("(?i){}", regex::escape(&format!("<{alias}>."))))
            .map_err(|e| DbError::configuration(format!("invalid schema alias '{alias}': {e}")))?;
        let mut state = self.state.write();
        if state.aliases.contains(&alias) {
            return Err(DbError::configuration(format!(
                "schema alias '{alias}' already registered"
            )));
        }
        state.rules.push(AliasRule {
            pattern,
            replacement: format!("{schema}."),
        });
        state.aliases.push(alias);
        Ok(())
    }

    /// Apply every registered alias to a query, in registration order.
    pub fn translate(&self, query: &str) -> String {
        let state = self.state.read();
        let mut query = query.to_string();
        for rule in &state.rules {
            if rule.pattern.is_match(&query) {
                query = rule
                    .pattern
                    .replace_all(&query, regex::NoExpand(&rule.replacement))
                    .into_owned();
            }
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_basic() {
        let t = SchemaAliasTranslator::new();
        t.add_alias("foo", "bar").unwrap();
        assert_eq!(t.translate("select * from <foo>.t"), "select * from bar.t");
    }

    #[test]
    fn test_translate_case_insensitive() {
        let t = SchemaAliasTranslator::new();
        t.add_alias("Foo", "bar").unwrap();
        assert_eq!(
            t.translate("select * from <FOO>.t join <foo>.u"),
            "select * from bar.t join bar.u"
        );
    }

    #[test]
    fn test_translate_no_match_unchanged() {
        let t = SchemaAliasTranslator::new();
        t.add_alias("foo", "bar").unwrap();
        assert_eq!(t.translate("select * from other.t"), "select * from other.t");
        // marker without the trailing dot is not an alias
        assert_eq!(t.translate("select '<foo>'"), "select '<foo>'");
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let t = SchemaAliasTranslator::new();
        t.add_alias("foo", "bar").unwrap();
        let err = t.add_alias("FOO", "baz").unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[test]
    fn test_registration_order_applies() {
        let t = SchemaAliasTranslator::new();
        t.add_alias("a", "first").unwrap();
        t.add_alias("b", "second").unwrap();
        assert_eq!(
            t.translate("select <a>.x, <b>.y from <a>.t"),
            "select first.x, second.y from first.t"
        );
    }

    #[test]
    fn test_replacement_is_literal() {
        let t = SchemaAliasTranslator::new();
        // '$' in a schema name must not be treated as a capture reference
        t.add_alias("foo", "sch$ma").unwrap();
        assert_eq!(t.translate("<foo>.t"), "sch$ma.t");
    }
}
