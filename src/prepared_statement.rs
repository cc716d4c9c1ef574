//! Component B — SQL template classification and `#?` multi-bind expansion.
//!
//! A statement is classified once, at construction, into either a
//! single-bind template (cacheable — handed to `Connection::prepare_cached`
//! verbatim) or a multi-bind template containing one or more `#?` markers
//! (never cached, since the expanded text depends on the argument arity of
//! each call). See §4.B.

use crate::error::Error;
use crate::value::Value;

pub(crate) const MULTI_BIND_TOKEN: &str = "#?";

/// The classified shape of one SQL string: where the `#?` sites are and how
/// many plain `?` marks surround them.
#[derive(Debug, Clone)]
pub struct SqlTemplate {
    raw: String,
    is_multi_bind: bool,
    fixed_bind_points: usize,
    /// `raw` split on `#?`; only populated when `is_multi_bind`.
    fragments: Vec<String>,
}

impl SqlTemplate {
    pub fn parse(sql: &str) -> Self {
        if sql.contains(MULTI_BIND_TOKEN) {
            let fragments: Vec<String> = sql.split(MULTI_BIND_TOKEN).map(String::from).collect();
            let fixed = fragments.iter().map(|f| f.matches('?').count()).sum();
            SqlTemplate {
                raw: sql.to_string(),
                is_multi_bind: true,
                fixed_bind_points: fixed,
                fragments,
            }
        } else {
            SqlTemplate {
                raw: sql.to_string(),
                is_multi_bind: false,
                fixed_bind_points: sql.matches('?').count(),
                fragments: Vec::new(),
            }
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_multi_bind(&self) -> bool {
        self.is_multi_bind
    }

    pub fn fixed_bind_points(&self) -> usize {
        self.fixed_bind_points
    }

    /// Number of `#?` sites in the template.
    pub fn multi_bind_sites(&self) -> usize {
        self.fragments.len().saturating_sub(1)
    }

    /// Expand against one call's arguments, in left-to-right textual order:
    /// the fixed `?` marks preceding a `#?` site consume their arguments
    /// first, then the site itself consumes exactly one argument (a
    /// sequence, a set, or null) and expands it into `n` fresh `?` marks.
    ///
    /// Only meaningful when `is_multi_bind()`; a non-multi-bind template
    /// just binds `args` as given and never calls this.
    pub fn expand(&self, args: &[Value]) -> Result<(String, Vec<Value>), Error> {
        let mut sql = String::new();
        let mut bound = Vec::with_capacity(args.len());
        let mut args = args.iter().cloned();

        for (i, fragment) in self.fragments.iter().enumerate() {
            sql.push_str(fragment);
            for _ in 0..fragment.matches('?').count() {
                if let Some(v) = args.next() {
                    bound.push(v);
                }
            }
            let is_last_fragment = i + 1 == self.fragments.len();
            if !is_last_fragment {
                let collection = args.next().ok_or_else(|| Error::InvalidMultiBind {
                    sql: self.raw.clone(),
                    index: i,
                    actual: "missing".to_string(),
                })?;
                if !collection.is_multi_bind_collection() && !matches!(collection, Value::Null) {
                    return Err(Error::InvalidMultiBind {
                        sql: self.raw.clone(),
                        index: i,
                        actual: collection.type_name().to_string(),
                    });
                }
                // An empty sequence/set contributes zero `?` marks and the
                // empty string — producing `IN ()`, which SQLite rejects at
                // prepare time. Left as-is per the design decision in
                // SPEC_FULL.md §9: callers of `#?`-based helpers must guard
                // against empty collections themselves.
                let items = collection.multi_bind_items();
                if !items.is_empty() {
                    let marks = vec!["?"; items.len()].join(",");
                    sql.push_str(&marks);
                }
                bound.extend(items);
            }
        }

        Ok((sql, bound))
    }
}

/// A statement pre-classified once and reused across calls. Reuse here is
/// purely about skipping repeated `#?` scanning — the underlying native
/// statement is still cached (or not) per-call by `rusqlite`, per §4.B.
pub struct PreparedStatement {
    template: SqlTemplate,
}

impl PreparedStatement {
    pub fn new(sql: impl AsRef<str>) -> Self {
        PreparedStatement {
            template: SqlTemplate::parse(sql.as_ref()),
        }
    }

    pub(crate) fn template(&self) -> &SqlTemplate {
        &self.template
    }

    pub fn raw_sql(&self) -> &str {
        self.template.raw()
    }

    pub fn is_multi_bind(&self) -> bool {
        self.template.is_multi_bind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bind_counts_question_marks() {
        let t = SqlTemplate::parse("SELECT * FROM jobs WHERE uuid = ?");
        assert!(!t.is_multi_bind());
        assert_eq!(t.fixed_bind_points(), 1);
        assert_eq!(t.multi_bind_sites(), 0);
    }

    #[test]
    fn multi_bind_expands_sequence_in_order() {
        let t = SqlTemplate::parse("SELECT * FROM jobs WHERE uuid IN (#?) AND active = ?");
        assert!(t.is_multi_bind());
        assert_eq!(t.fixed_bind_points(), 1);
        assert_eq!(t.multi_bind_sites(), 1);

        let args = vec![
            Value::Sequence(vec![Value::Text("a".into()), Value::Text("b".into())]),
            Value::Bool(true),
        ];
        let (sql, bound) = t.expand(&args).unwrap();
        assert_eq!(sql, "SELECT * FROM jobs WHERE uuid IN (?,?) AND active = ?");
        assert_eq!(
            bound,
            vec![
                Value::Text("a".into()),
                Value::Text("b".into()),
                Value::Bool(true)
            ]
        );
    }

    #[test]
    fn multi_bind_with_scalar_is_an_error() {
        let t = SqlTemplate::parse("SELECT * FROM jobs WHERE uuid IN (#?)");
        let err = t.expand(&[Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, Error::InvalidMultiBind { .. }));
    }

    #[test]
    fn multi_bind_with_empty_sequence_yields_empty_parens() {
        let t = SqlTemplate::parse("SELECT * FROM jobs WHERE uuid IN (#?)");
        let (sql, bound) = t.expand(&[Value::Sequence(Vec::new())]).unwrap();
        assert_eq!(sql, "SELECT * FROM jobs WHERE uuid IN ()");
        assert!(bound.is_empty());
    }
}
