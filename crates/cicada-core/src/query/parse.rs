//! The `key:value` query syntax.
//!
//! A query string is whitespace-separated `key:value` clauses. Values may
//! be double-quoted to contain spaces. Unknown keys are a hard parse
//! error; a typo must not silently widen a search.
//!
//! ```text
//! status:open label:bug no-label:ui author:jane title:"login broken"
//! sort:edit-desc
//! ```
//!
//! Keys: `status`, `author`, `actor`, `label`, `no-label`, `title`,
//! `sort` (`id`, `creation`, `edit`, each optionally suffixed `-asc` or
//! `-desc`).

use std::str::FromStr;

use super::{OrderBy, OrderDirection, Query};
use crate::error::Error;
use crate::op::data::{Label, Status};

/// A query string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryParseError {
    #[error("unknown query key '{key}'")]
    UnknownKey { key: String },

    #[error("clause '{token}' is not of the form key:value")]
    MissingSeparator { token: String },

    #[error("bad value for '{key}': {reason}")]
    BadValue { key: &'static str, reason: String },

    #[error("unclosed double quote")]
    UnclosedQuote,
}

impl From<QueryParseError> for Error {
    fn from(err: QueryParseError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Parse a query string. The empty string parses to [`Query::empty`].
///
/// # Errors
///
/// Returns the first [`QueryParseError`] hit, left to right.
pub fn parse(input: &str) -> Result<Query, QueryParseError> {
    let mut query = Query::empty();

    for token in tokenize(input)? {
        let Some((key, value)) = token.split_once(':') else {
            return Err(QueryParseError::MissingSeparator { token });
        };

        match key {
            "status" => {
                let status = Status::from_str(value).map_err(|reason| {
                    QueryParseError::BadValue {
                        key: "status",
                        reason,
                    }
                })?;
                query.status.push(status);
            }
            "author" => query.authors.push(value.to_owned()),
            "actor" => query.actors.push(value.to_owned()),
            "label" => query.labels.push(parse_label("label", value)?),
            "no-label" => query.no_labels.push(parse_label("no-label", value)?),
            "title" => query.title = Some(value.to_owned()),
            "sort" => {
                let (by, direction) = parse_sort(value)?;
                query.order_by = by;
                query.order_direction = direction;
            }
            _ => {
                return Err(QueryParseError::UnknownKey {
                    key: key.to_owned(),
                });
            }
        }
    }

    Ok(query)
}

fn parse_label(key: &'static str, value: &str) -> Result<Label, QueryParseError> {
    Label::new(value).map_err(|e| QueryParseError::BadValue {
        key,
        reason: e.to_string(),
    })
}

fn parse_sort(value: &str) -> Result<(OrderBy, OrderDirection), QueryParseError> {
    let (field, direction) = match value.rsplit_once('-') {
        Some((field, "asc")) => (field, OrderDirection::Ascending),
        Some((field, "desc")) => (field, OrderDirection::Descending),
        _ => (value, default_direction_of(value)?),
    };

    let by = match field {
        "id" => OrderBy::Id,
        "creation" => OrderBy::Creation,
        "edit" => OrderBy::Edit,
        other => {
            return Err(QueryParseError::BadValue {
                key: "sort",
                reason: format!("unknown sort field '{other}'"),
            });
        }
    };
    Ok((by, direction))
}

/// Bare sort fields keep the conventional direction: ids ascending, times
/// newest first.
fn default_direction_of(field: &str) -> Result<OrderDirection, QueryParseError> {
    match field {
        "id" => Ok(OrderDirection::Ascending),
        "creation" | "edit" => Ok(OrderDirection::Descending),
        other => Err(QueryParseError::BadValue {
            key: "sort",
            reason: format!("unknown sort field '{other}'"),
        }),
    }
}

/// Split on whitespace outside double quotes; quotes are stripped.
fn tokenize(input: &str) -> Result<Vec<String>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(QueryParseError::UnclosedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_parses_to_no_filters() {
        let query = parse("").unwrap();
        assert_eq!(query, Query::empty());
    }

    #[test]
    fn full_query_parses() {
        let query = parse(
            "status:closed author:jane actor:bob label:bug no-label:ui \
             title:login sort:creation-asc",
        )
        .unwrap();

        assert_eq!(query.status, vec![Status::Closed]);
        assert_eq!(query.authors, vec!["jane".to_owned()]);
        assert_eq!(query.actors, vec!["bob".to_owned()]);
        assert_eq!(query.labels, vec![Label::new("bug").unwrap()]);
        assert_eq!(query.no_labels, vec![Label::new("ui").unwrap()]);
        assert_eq!(query.title.as_deref(), Some("login"));
        assert_eq!(query.order_by, OrderBy::Creation);
        assert_eq!(query.order_direction, OrderDirection::Ascending);
    }

    #[test]
    fn quoted_values_may_contain_spaces() {
        let query = parse("title:\"login is broken\" label:\"needs info\"").unwrap();
        assert_eq!(query.title.as_deref(), Some("login is broken"));
        assert_eq!(query.labels, vec![Label::new("needs info").unwrap()]);
    }

    #[test]
    fn unknown_key_is_a_hard_error() {
        assert_eq!(
            parse("stats:open"),
            Err(QueryParseError::UnknownKey {
                key: "stats".into()
            })
        );
    }

    #[test]
    fn clause_without_separator_is_rejected() {
        assert_eq!(
            parse("open"),
            Err(QueryParseError::MissingSeparator {
                token: "open".into()
            })
        );
    }

    #[test]
    fn bad_status_value_is_rejected() {
        assert!(matches!(
            parse("status:ajar"),
            Err(QueryParseError::BadValue { key: "status", .. })
        ));
    }

    #[test]
    fn unclosed_quote_is_rejected() {
        assert_eq!(
            parse("title:\"dangling"),
            Err(QueryParseError::UnclosedQuote)
        );
    }

    #[test]
    fn repeated_clauses_accumulate() {
        let query = parse("status:open status:closed label:a label:b").unwrap();
        assert_eq!(query.status.len(), 2);
        assert_eq!(query.labels.len(), 2);
    }

    #[test]
    fn sort_defaults() {
        assert_eq!(
            parse("sort:id").unwrap().order_direction,
            OrderDirection::Ascending
        );
        assert_eq!(
            parse("sort:edit").unwrap().order_direction,
            OrderDirection::Descending
        );
        assert!(parse("sort:alphabetical").is_err());
    }

    #[test]
    fn from_str_round_trip() {
        let query: Query = "status:open sort:edit-desc".parse().unwrap();
        assert_eq!(query.status, vec![Status::Open]);
    }
}
