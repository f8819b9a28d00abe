use std::fmt;

/// A single command argument.
///
/// Scalars are submitted as-is. `Keys` and `Pairs` model the collection
/// arguments of bulk commands (`MGET [keys]`, `MSET {key: value}`); when such
/// an argument sits at a key position its members are the keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Float(f64),
    Keys(Vec<String>),
    Pairs(Vec<(String, String)>),
}

impl Arg {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "STRING",
            Self::Int(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Keys(_) => "KEYS",
            Self::Pairs(_) => "PAIRS",
        }
    }

    /// Textual form of a scalar argument.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Keys(_) | Self::Pairs(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Key names carried by this argument when it sits at a key position.
    pub fn key_names(&self) -> Vec<&str> {
        match self {
            Self::Str(s) => vec![s.as_str()],
            Self::Keys(keys) => keys.iter().map(String::as_str).collect(),
            Self::Pairs(pairs) => pairs.iter().map(|(k, _)| k.as_str()).collect(),
            Self::Int(_) | Self::Float(_) => Vec::new(),
        }
    }

    /// Rewrites every key carried by this argument.
    pub fn map_keys(&self, f: impl Fn(&str) -> String) -> Arg {
        match self {
            Self::Str(s) => Self::Str(f(s)),
            Self::Keys(keys) => Self::Keys(keys.iter().map(|k| f(k)).collect()),
            Self::Pairs(pairs) => {
                Self::Pairs(pairs.iter().map(|(k, v)| (f(k), v.clone())).collect())
            }
            other => other.clone(),
        }
    }

    /// Flattens arguments into their wire form: collections expand in place.
    pub fn flatten(args: &[Arg]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Self::Keys(keys) => out.extend(keys.iter().cloned()),
                Self::Pairs(pairs) => {
                    for (k, v) in pairs {
                        out.push(k.clone());
                        out.push(v.clone());
                    }
                }
                scalar => out.extend(scalar.to_text()),
            }
        }
        out
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keys(keys) => write!(f, "[{}]", keys.join(", ")),
            Self::Pairs(pairs) => {
                let rendered: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            scalar => write!(f, "{}", scalar.to_text().unwrap_or_default()),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<String>> for Arg {
    fn from(keys: Vec<String>) -> Self {
        Self::Keys(keys)
    }
}

impl From<Vec<(String, String)>> for Arg {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::Pairs(pairs)
    }
}

/// A reply from a node or from the routing layer.
///
/// `Nil` doubles as the "no result" sentinel: an absent key and a node that
/// failed the call are indistinguishable through it.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Status(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Bulk(String),
    Array(Vec<Reply>),
    Map(Vec<(String, Reply)>),
}

impl Reply {
    pub fn ok() -> Self {
        Self::Status("OK".to_string())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "NIL",
            Self::Status(_) => "STATUS",
            Self::Bool(_) => "BOOLEAN",
            Self::Int(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Bulk(_) => "BULK",
            Self::Array(_) => "ARRAY",
            Self::Map(_) => "MAP",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// True for `+OK` and boolean `true`.
    pub fn is_ok(&self) -> bool {
        match self {
            Self::Status(s) => s.eq_ignore_ascii_case("OK"),
            Self::Bool(b) => *b,
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(*b as i64),
            Self::Bulk(s) | Self::Status(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Bulk(s) | Self::Status(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bulk(s) | Self::Status(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Bulk(s) | Self::Status(s) => Some(s),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Array of scalars as strings; `None` if this is not an array.
    pub fn into_strings(self) -> Option<Vec<String>> {
        self.into_array()
            .map(|items| items.into_iter().filter_map(Reply::into_string).collect())
    }

    pub fn into_map(self) -> Option<Vec<(String, Reply)>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn bulk_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(items.into_iter().map(|s| Self::Bulk(s.into())).collect())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "(nil)"),
            Self::Status(s) => write!(f, "{}", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "(integer) {}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Bulk(s) => write!(f, "\"{}\"", s),
            Self::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                let rendered: Vec<String> = items.iter().map(|r| r.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Map(entries) => {
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{} => {}", k, v))
                    .collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl From<i64> for Reply {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Reply {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Self::Bulk(s)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Self::Bulk(s.to_string())
    }
}

impl From<Option<String>> for Reply {
    fn from(value: Option<String>) -> Self {
        value.map(Self::Bulk).unwrap_or(Self::Nil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_expands_collections() {
        let args = vec![
            Arg::from("dst"),
            Arg::Keys(vec!["a".into(), "b".into()]),
            Arg::Pairs(vec![("k".into(), "v".into())]),
            Arg::Int(5),
        ];
        assert_eq!(Arg::flatten(&args), vec!["dst", "a", "b", "k", "v", "5"]);
    }

    #[test]
    fn test_key_names_and_map_keys() {
        let pairs = Arg::Pairs(vec![("x{t}".into(), "1".into()), ("y".into(), "2".into())]);
        assert_eq!(pairs.key_names(), vec!["x{t}", "y"]);

        let upper = pairs.map_keys(|k| k.to_uppercase());
        assert_eq!(
            upper,
            Arg::Pairs(vec![("X{T}".into(), "1".into()), ("Y".into(), "2".into())])
        );
        assert_eq!(Arg::Int(3).key_names(), Vec::<&str>::new());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Arg::from("42").as_i64(), Some(42));
        assert_eq!(Arg::Float(2.0).as_i64(), Some(2));
        assert_eq!(Arg::Float(2.5).as_i64(), None);
        assert_eq!(Reply::Bulk("7".into()).as_i64(), Some(7));
        assert_eq!(Reply::Bool(true).as_i64(), Some(1));
    }

    #[test]
    fn test_reply_helpers() {
        assert!(Reply::ok().is_ok());
        assert!(Reply::Bool(true).is_ok());
        assert!(!Reply::Int(1).is_ok());
        assert!(Reply::Nil.is_nil());

        let arr = Reply::bulk_array(["a", "b"]);
        assert_eq!(arr.clone().into_strings(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(Reply::from(None::<String>), Reply::Nil);
        assert_eq!(arr.to_string(), "[\"a\", \"b\"]");
    }
}
