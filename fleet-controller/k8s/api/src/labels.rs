use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

/// A parsed cluster selector.
///
/// Selectors are written as comma-separated requirements:
///
/// - `key` and `!key` test for presence and absence;
/// - `key=value`, `key==value` and `key!=value` compare a single value;
/// - `key in (a,b)` and `key notin (a,b)` compare against a set.
///
/// A cluster matches when it satisfies every requirement, so the empty
/// selector matches every cluster. `!=` and `notin` are satisfied when the
/// key is absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(Vec<Requirement>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("selector has an empty requirement")]
    EmptyRequirement,

    #[error("malformed requirement {0:?}")]
    Malformed(String),

    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid label value {0:?}")]
    InvalidValue(String),
}

// === impl Selector ===

impl Selector {
    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.iter().all(|r| r.matches(labels.as_ref()))
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }

        split_requirements(s)
            .into_iter()
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            req.fmt(f)?;
        }
        Ok(())
    }
}

/// Splits on commas that are not enclosed in parentheses.
fn split_requirements(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

// === impl Requirement ===

impl Requirement {
    fn parse(s: &str) -> Result<Self, SelectorError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SelectorError::EmptyRequirement);
        }

        if let Some(open) = s.find('(') {
            return Self::parse_set(s, open);
        }

        if let Some(key) = s.strip_prefix('!') {
            return Ok(Self {
                key: parse_key(key.trim())?,
                operator: Operator::DoesNotExist,
            });
        }

        if let Some((key, value)) = s.split_once("!=") {
            return Ok(Self {
                key: parse_key(key.trim())?,
                operator: Operator::NotIn(Some(parse_value(value.trim())?).into_iter().collect()),
            });
        }

        let pair = s.split_once("==").or_else(|| s.split_once('='));
        if let Some((key, value)) = pair {
            return Ok(Self {
                key: parse_key(key.trim())?,
                operator: Operator::In(Some(parse_value(value.trim())?).into_iter().collect()),
            });
        }

        Ok(Self {
            key: parse_key(s)?,
            operator: Operator::Exists,
        })
    }

    fn parse_set(s: &str, open: usize) -> Result<Self, SelectorError> {
        let malformed = || SelectorError::Malformed(s.to_string());

        let inner = s[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
        let mut head = s[..open].split_whitespace();
        let (key, op) = match (head.next(), head.next(), head.next()) {
            (Some(key), Some(op), None) => (key, op),
            _ => return Err(malformed()),
        };

        let values = inner
            .split(',')
            .map(|v| parse_value(v.trim()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if inner.trim().is_empty() {
            return Err(malformed());
        }

        let operator = match op {
            "in" => Operator::In(values),
            "notin" => Operator::NotIn(values),
            _ => return Err(malformed()),
        };
        Ok(Self {
            key: parse_key(key)?,
            operator,
        })
    }

    fn matches(&self, labels: &Map) -> bool {
        match &self.operator {
            Operator::In(values) => labels
                .get(&self.key)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Operator::NotIn(values) => labels
                .get(&self.key)
                .map(|v| !values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(values: &BTreeSet<String>) -> String {
            values.iter().cloned().collect::<Vec<_>>().join(",")
        }

        match &self.operator {
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
            Operator::In(values) if values.len() == 1 => write!(f, "{}={}", self.key, join(values)),
            Operator::NotIn(values) if values.len() == 1 => {
                write!(f, "{}!={}", self.key, join(values))
            }
            Operator::In(values) => write!(f, "{} in ({})", self.key, join(values)),
            Operator::NotIn(values) => write!(f, "{} notin ({})", self.key, join(values)),
        }
    }
}

/// Label keys are an optional DNS subdomain prefix followed by `/` and a name.
fn parse_key(key: &str) -> Result<String, SelectorError> {
    let invalid = || SelectorError::InvalidKey(key.to_string());

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if !is_dns_subdomain(prefix) {
                return Err(invalid());
            }
            name
        }
        None => key,
    };
    if name.is_empty() || !is_label_name(name) {
        return Err(invalid());
    }
    Ok(key.to_string())
}

fn parse_value(value: &str) -> Result<String, SelectorError> {
    if value.is_empty() || is_label_name(value) {
        return Ok(value.to_string());
    }
    Err(SelectorError::InvalidValue(value.to_string()))
}

fn is_label_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= 253
        && s.split('.').all(|part| {
            let bytes = part.as_bytes();
            !bytes.is_empty()
                && bytes.len() <= 63
                && bytes[0].is_ascii_alphanumeric()
                && bytes[bytes.len() - 1].is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        })
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
