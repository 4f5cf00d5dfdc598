//! The operator grammar.
//!
//! Symbolic comparison tokens (`=`, `<>`, `like`, `elemMatch`, `$size`, ...) are resolved once,
//! when a predicate is appended, into the closed [`Operator`] enum. Compilation then matches
//! exhaustively over it to render the native comparison fragment for a single field.

use std::{fmt, str::FromStr};

use bson::{Bson, Document, doc};

use crate::{
    coerce::type_name,
    error::{QueryError, QueryResult},
};

/// Comparison and array operators understood by the query compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal to (arrays match when any element is equal).
    Eq,
    /// Not equal to.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// SQL-style `LIKE` pattern, matched case-insensitively.
    Like,
    /// Negated `LIKE`.
    NotLike,
    /// Value is one of a list.
    In,
    /// Value is none of a list.
    NotIn,
    /// Field presence.
    Exists,
    /// BSON type check, by type number or alias.
    Type,
    /// `[divisor, remainder]` modulo check.
    Mod,
    /// Array contains every listed value.
    All,
    /// Array has exactly the given length.
    Size,
    /// At least one array element matches the given condition.
    ElemMatch,
    /// Regular expression match.
    Regex,
    /// Negated regular expression match.
    NotRegex,
}

impl Operator {
    /// Resolves an operator token. Matching is case-insensitive and accepts `$`-prefixed native aliases.
    pub fn parse(token: &str) -> QueryResult<Self> {
        let lowered = token.trim().to_ascii_lowercase();

        Ok(match lowered.as_str() {
            "=" | "==" | "$eq" => Operator::Eq,
            "!=" | "<>" | "$ne" => Operator::Ne,
            "<" | "$lt" => Operator::Lt,
            "<=" | "$lte" => Operator::Lte,
            ">" | "$gt" => Operator::Gt,
            ">=" | "$gte" => Operator::Gte,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "in" | "$in" => Operator::In,
            "not in" | "$nin" => Operator::NotIn,
            "exists" | "$exists" => Operator::Exists,
            "type" | "$type" => Operator::Type,
            "mod" | "$mod" => Operator::Mod,
            "all" | "$all" => Operator::All,
            "size" | "$size" => Operator::Size,
            "elemmatch" | "$elemmatch" => Operator::ElemMatch,
            "regex" | "regexp" | "$regex" => Operator::Regex,
            "not regex" | "not regexp" => Operator::NotRegex,
            _ => return Err(QueryError::UnsupportedOperator(token.to_string())),
        })
    }

    /// Canonical token for this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Exists => "exists",
            Operator::Type => "type",
            Operator::Mod => "mod",
            Operator::All => "all",
            Operator::Size => "size",
            Operator::ElemMatch => "elemMatch",
            Operator::Regex => "regex",
            Operator::NotRegex => "not regex",
        }
    }

    /// Checks the value shape this operator needs and normalizes it.
    ///
    /// Runs when the predicate is appended, so malformed values fail before any I/O.
    /// `like` patterns and delimited regex strings are rewritten into a native
    /// `{ $regex, $options }` document here.
    pub fn prepare(&self, value: Bson) -> QueryResult<Bson> {
        match self {
            Operator::In | Operator::NotIn | Operator::All => match value {
                Bson::Array(_) => Ok(value),
                other => Err(self.mismatch("array", &other)),
            },
            Operator::Mod => match &value {
                Bson::Array(items) if items.len() == 2 && items.iter().all(is_integer) => Ok(value),
                other => Err(self.mismatch("[divisor, remainder]", other)),
            },
            Operator::Size => match value {
                Bson::Int32(_) | Bson::Int64(_) => Ok(value),
                other => Err(self.mismatch("int", &other)),
            },
            Operator::Exists => match value {
                Bson::Boolean(_) => Ok(value),
                Bson::Int32(n) => Ok(Bson::Boolean(n != 0)),
                Bson::Int64(n) => Ok(Bson::Boolean(n != 0)),
                other => Err(self.mismatch("bool", &other)),
            },
            Operator::Type => match value {
                Bson::Int32(_) | Bson::Int64(_) | Bson::String(_) => Ok(value),
                other => Err(self.mismatch("type number or alias", &other)),
            },
            Operator::ElemMatch => match value {
                Bson::Document(_) => Ok(value),
                other => Err(self.mismatch("document", &other)),
            },
            Operator::Like | Operator::NotLike => match value {
                Bson::String(pattern) => Ok(Bson::Document(doc! {
                    "$regex": like_to_regex(&pattern),
                    "$options": "i",
                })),
                Bson::RegularExpression(regex) => Ok(Bson::Document(pattern_document(
                    regex.pattern.as_str(),
                    regex.options.as_str(),
                ))),
                other => Err(self.mismatch("string", &other)),
            },
            Operator::Regex | Operator::NotRegex => match value {
                Bson::String(delimited) => Ok(Bson::Document(parse_delimited(&delimited)?)),
                Bson::RegularExpression(regex) => Ok(Bson::Document(pattern_document(
                    regex.pattern.as_str(),
                    regex.options.as_str(),
                ))),
                other => Err(self.mismatch("regex or delimited pattern string", &other)),
            },
            Operator::Eq
            | Operator::Ne
            | Operator::Lt
            | Operator::Lte
            | Operator::Gt
            | Operator::Gte => Ok(value),
        }
    }

    /// Renders the native comparison fragment placed under the field name.
    ///
    /// Equality renders the bare value so the store's array-contains semantics apply.
    pub fn fragment(&self, value: &Bson) -> Bson {
        let operand = value.clone();

        match self {
            Operator::Eq => operand,
            Operator::Ne => Bson::Document(doc! { "$ne": operand }),
            Operator::Lt => Bson::Document(doc! { "$lt": operand }),
            Operator::Lte => Bson::Document(doc! { "$lte": operand }),
            Operator::Gt => Bson::Document(doc! { "$gt": operand }),
            Operator::Gte => Bson::Document(doc! { "$gte": operand }),
            Operator::In => Bson::Document(doc! { "$in": operand }),
            Operator::NotIn => Bson::Document(doc! { "$nin": operand }),
            Operator::Exists => Bson::Document(doc! { "$exists": operand }),
            Operator::Type => Bson::Document(doc! { "$type": operand }),
            Operator::Mod => Bson::Document(doc! { "$mod": operand }),
            Operator::All => Bson::Document(doc! { "$all": operand }),
            Operator::Size => Bson::Document(doc! { "$size": operand }),
            Operator::ElemMatch => Bson::Document(doc! { "$elemMatch": operand }),
            Operator::Like | Operator::Regex => operand,
            Operator::NotLike | Operator::NotRegex => Bson::Document(doc! { "$not": operand }),
        }
    }

    fn mismatch(&self, expected: &str, got: &Bson) -> QueryError {
        QueryError::invalid(format!(
            "operator \"{}\" expects {expected}, got \"{}\"",
            self.as_str(),
            type_name(got)
        ))
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(token: &str) -> QueryResult<Self> {
        Operator::parse(token)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translates a `LIKE` pattern into an anchored regular expression.
///
/// `%` matches any run of characters. Every other character is literal, with regex
/// metacharacters escaped.
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 4);

    if !pattern.starts_with('%') {
        regex.push('^');
    }

    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
            | '#' | '-' | '/' => {
                regex.push('\\');
                regex.push(ch);
            }
            _ => regex.push(ch),
        }
    }

    if !pattern.ends_with('%') {
        regex.push('$');
    }

    regex
}

/// Parses a `/pattern/flags` string (any non-alphanumeric delimiter) into a pattern document.
pub fn parse_delimited(value: &str) -> QueryResult<Document> {
    let mut chars = value.chars();
    let delimiter = chars
        .next()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && *c != '\\')
        .ok_or_else(|| QueryError::invalid(format!("\"{value}\" is not a delimited regex pattern")))?;

    let body = &value[delimiter.len_utf8()..];
    let end = body
        .rfind(delimiter)
        .ok_or_else(|| QueryError::invalid(format!("regex \"{value}\" is missing its closing delimiter")))?;

    let flags = &body[end + delimiter.len_utf8()..];
    if !flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'u')) {
        return Err(QueryError::invalid(format!("regex \"{value}\" has unsupported flags \"{flags}\"")));
    }

    Ok(pattern_document(&body[..end], flags))
}

fn pattern_document(pattern: &str, options: &str) -> Document {
    if options.is_empty() {
        doc! { "$regex": pattern }
    } else {
        doc! { "$regex": pattern, "$options": options }
    }
}

fn is_integer(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_case_insensitive_with_native_aliases() {
        assert_eq!(Operator::parse("REGEX").unwrap(), Operator::Regex);
        assert_eq!(Operator::parse("regexp").unwrap(), Operator::Regex);
        assert_eq!(Operator::parse("$size").unwrap(), Operator::Size);
        assert_eq!(Operator::parse("elemMatch").unwrap(), Operator::ElemMatch);
        assert_eq!(Operator::parse("<>").unwrap(), Operator::Ne);
        assert_eq!("not regexp".parse::<Operator>().unwrap(), Operator::NotRegex);
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let err = Operator::parse("between").unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator(token) if token == "between"));
    }

    #[test]
    fn like_translates_wildcards_and_escapes() {
        assert_eq!(like_to_regex("%doe"), ".*doe$");
        assert_eq!(like_to_regex("jo_n%"), "^jo_n.*");
        assert_eq!(like_to_regex("1.5+"), "^1\\.5\\+$");
    }

    #[test]
    fn like_renders_case_insensitive_regex() {
        let value = Operator::Like.prepare(Bson::String("%Doe".into())).unwrap();
        assert_eq!(
            Operator::Like.fragment(&value),
            Bson::Document(doc! { "$regex": ".*Doe$", "$options": "i" })
        );
        assert_eq!(
            Operator::NotLike.fragment(&value),
            Bson::Document(doc! { "$not": { "$regex": ".*Doe$", "$options": "i" } })
        );
    }

    #[test]
    fn delimited_regex_strings_are_parsed() {
        assert_eq!(parse_delimited("/.*doe/i").unwrap(), doc! { "$regex": ".*doe", "$options": "i" });
        assert_eq!(parse_delimited("#a/b#").unwrap(), doc! { "$regex": "a/b" });
        assert!(parse_delimited(".*doe").is_err());
        assert!(parse_delimited("/.*doe/q").is_err());
    }

    #[test]
    fn value_shapes_are_checked_on_prepare() {
        assert!(Operator::Mod.prepare(Bson::Array(vec![15.into(), 0.into()])).is_ok());
        assert!(Operator::Mod.prepare(Bson::Int32(15)).is_err());
        assert!(Operator::In.prepare(Bson::String("a".into())).is_err());
        assert!(Operator::ElemMatch.prepare(Bson::Int32(1)).is_err());
        assert_eq!(Operator::Exists.prepare(Bson::Int32(0)).unwrap(), Bson::Boolean(false));
    }

    #[test]
    fn fragments_use_native_operators() {
        assert_eq!(Operator::Eq.fragment(&Bson::Int32(3)), Bson::Int32(3));
        assert_eq!(Operator::Size.fragment(&Bson::Int32(2)), Bson::Document(doc! { "$size": 2 }));
        assert_eq!(
            Operator::Mod.fragment(&Bson::Array(vec![15.into(), 0.into()])),
            Bson::Document(doc! { "$mod": [15, 0] })
        );
        assert_eq!(
            Operator::NotIn.fragment(&Bson::Array(vec!["a".into()])),
            Bson::Document(doc! { "$nin": ["a"] })
        );
    }
}
