//! Named arguments and argument rendering styles

use serde::{Deserialize, Serialize};

/// Convention for rendering named arguments into a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentStyle {
    /// `$name = value;` assignments placed before the script
    Variables,
    /// `-name value` parameters appended after the script
    #[default]
    DashParameters,
    /// Same token shape as dash parameters, kept as discrete argv tokens.
    ///
    /// Values are passed through without quoting or escaping.
    Exec,
}

impl ArgumentStyle {
    /// Prefix put in front of every argument name
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Variables => "$",
            Self::DashParameters | Self::Exec => "-",
        }
    }

    /// Prefix for an optional style, falling back to the default style
    pub fn resolve_prefix(style: Option<Self>) -> &'static str {
        style.unwrap_or_default().prefix()
    }

    /// Name with the style prefix applied exactly once
    pub fn qualify(self, name: &str) -> String {
        let prefix = self.prefix();
        if name.starts_with(prefix) {
            name.to_string()
        } else {
            format!("{}{}", prefix, name)
        }
    }
}

/// Insertion-ordered named arguments.
///
/// A `None` value is a bare flag in parameter styles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments {
    entries: Vec<(String, Option<String>)>,
}

impl Arguments {
    /// Create an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a valued argument
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, Some(value.into()));
        self
    }

    /// Add a flag argument
    pub fn with_flag(mut self, name: impl Into<String>) -> Self {
        self.insert(name, None);
        self
    }

    /// Insert an argument, replacing the value of an existing name in place
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up an argument. The outer `Option` tells whether the name is present.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_deref())
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no arguments
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for Arguments
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let mut arguments = Self::new();
        for (name, value) in iter {
            arguments.insert(name, value.map(Into::into));
        }
        arguments
    }
}
