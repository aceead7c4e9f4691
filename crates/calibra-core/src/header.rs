use std::fmt;

use crate::consts::{KEY_COMMENT, KEY_HISTORY};

/// A scalar header value.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    String(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
}

impl HeaderValue {
    /// Numeric view of the value. Numeric-looking strings are accepted since
    /// some acquisition software quotes every value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse().ok(),
            Self::Logical(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Loose equality used for instrument-configuration checks: numbers
    /// compare by value regardless of integer/float encoding, strings compare
    /// without surrounding whitespace.
    pub fn matches(&self, other: &HeaderValue) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.trim() == b.trim(),
            (Self::Logical(a), Self::Logical(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for HeaderValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Logical(v)
    }
}

/// One keyword record.
#[derive(Clone, Debug, PartialEq)]
pub struct Card {
    pub keyword: String,
    pub value: HeaderValue,
    pub comment: Option<String>,
}

/// Ordered keyword/value header attached to an image.
///
/// Keywords are stored upper-case. `HISTORY` and `COMMENT` may repeat; every
/// other keyword appears at most once when written through [`Header::set`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

/// True for keywords whose cards accumulate instead of replacing each other.
pub fn is_commentary(keyword: &str) -> bool {
    keyword.eq_ignore_ascii_case(KEY_HISTORY) || keyword.eq_ignore_ascii_case(KEY_COMMENT)
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    /// Append a card as-is, keeping duplicates. Used when parsing files.
    pub fn push_card(&mut self, card: Card) {
        self.cards.push(card);
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|c| c.keyword.eq_ignore_ascii_case(key))
            .map(|c| &c.value)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a keyword. Commentary keywords append a new card; any other
    /// keyword replaces the first existing card in place, or is appended.
    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        let keyword = key.to_ascii_uppercase();
        let value = value.into();
        if !is_commentary(&keyword) {
            if let Some(card) = self.cards.iter_mut().find(|c| c.keyword == keyword) {
                card.value = value;
                return;
            }
        }
        self.cards.push(Card {
            keyword,
            value,
            comment: None,
        });
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.cards.len();
        self.cards.retain(|c| !c.keyword.eq_ignore_ascii_case(key));
        self.cards.len() != before
    }

    pub fn append_history(&mut self, text: impl Into<String>) {
        self.set(KEY_HISTORY, HeaderValue::String(text.into()));
    }

    /// All HISTORY entries in order.
    pub fn history(&self) -> Vec<&str> {
        self.cards
            .iter()
            .filter(|c| c.keyword == KEY_HISTORY)
            .filter_map(|c| c.value.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut h = Header::new();
        h.set("exptime", 10.0);
        h.set("OBJECT", "M42");
        h.set("EXPTIME", 20.0);
        assert_eq!(h.len(), 2);
        assert_eq!(h.get_f64("EXPTIME"), Some(20.0));
        assert_eq!(h.cards().next().unwrap().keyword, "EXPTIME");
    }

    #[test]
    fn test_history_accumulates() {
        let mut h = Header::new();
        h.append_history("BIAS: a.fits");
        h.set("HISTORY", "DARK: b.fits");
        assert_eq!(h.history(), vec!["BIAS: a.fits", "DARK: b.fits"]);
    }

    #[test]
    fn test_numeric_matching() {
        assert!(HeaderValue::Integer(2).matches(&HeaderValue::Float(2.0)));
        assert!(HeaderValue::from("R ").matches(&HeaderValue::from("R")));
        assert!(!HeaderValue::from("R").matches(&HeaderValue::from("V")));
        assert_eq!(HeaderValue::from(" 30 ").as_f64(), Some(30.0));
    }
}
