use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::InvalidDelimiters;

/// Node of a compiled template.
///
/// The root returned by a compile is always a single `Multi`. Text fields
/// borrow from the template source; use [`Node::into_owned`] to detach a
/// tree from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node<'a> {
    /// Children in document order
    Multi(Vec<Node<'a>>),
    /// Literal text, emitted verbatim
    Static(Cow<'a, str>),
    /// `{{name args..}}`, `{{{name}}}` or `{{&name}}`
    Interpolation {
        escape: Escape,
        callee: Fetch<'a>,
        args: Vec<Argument<'a>>,
    },
    /// `{{#name}}..{{/name}}`
    Section(Section<'a>),
    /// `{{^name}}..{{/name}}`
    InvertedSection(Section<'a>),
    /// `{{>name}}` or `{{<name}}`
    Partial {
        name: Cow<'a, str>,
        /// Indentation found before a tag that opened its line
        padding: Cow<'a, str>,
    },
}

/// Shared payload of normal and inverted sections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section<'a> {
    pub callee: Fetch<'a>,
    pub body: Vec<Node<'a>>,
    /// Source text between the opening and the closing tag
    pub raw: Cow<'a, str>,
    /// Delimiters in effect when the section was closed
    pub delimiters: Delimiters<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Escape {
    Escaped,
    Unescaped,
}

/// A dotted lookup path, e.g. `user.name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fetch<'a>(pub Vec<Cow<'a, str>>);

impl<'a> Fetch<'a> {
    pub fn from_path(path: &'a str) -> Self {
        Fetch(path.split('.').map(Cow::Borrowed).collect())
    }

    pub fn segments(&self) -> &[Cow<'a, str>] {
        &self.0
    }

    pub fn into_owned(self) -> Fetch<'static> {
        Fetch(
            self.0
                .into_iter()
                .map(|s| Cow::Owned(s.into_owned()))
                .collect(),
        )
    }
}

impl fmt::Display for Fetch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Positional argument of an interpolation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument<'a> {
    /// Quoted literal, quotes removed
    Static(Cow<'a, str>),
    /// Numeral kept as written
    Number(Cow<'a, str>),
    Fetch(Fetch<'a>),
    /// All `key=value` arguments of the tag, always last
    Hash(HashArgs<'a>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HashArgs<'a>(pub Vec<(Cow<'a, str>, HashValue<'a>)>);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashValue<'a> {
    Static(Cow<'a, str>),
    Number(Cow<'a, str>),
    Fetch(Fetch<'a>),
}

impl<'a> HashArgs<'a> {
    pub fn get(&self, key: &str) -> Option<&HashValue<'a>> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Open/close markers bounding a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delimiters<'a> {
    pub open: Cow<'a, str>,
    pub close: Cow<'a, str>,
}

impl<'a> Delimiters<'a> {
    pub fn new(
        open: impl Into<Cow<'a, str>>,
        close: impl Into<Cow<'a, str>>,
    ) -> Result<Self, InvalidDelimiters> {
        let (open, close) = (open.into(), close.into());
        for marker in [&open, &close] {
            if marker.is_empty() || marker.contains(char::is_whitespace) {
                return Err(InvalidDelimiters(marker.to_string()));
            }
        }
        Ok(Self { open, close })
    }

    /// Splits `"<% %>"` on its first whitespace run.
    pub fn parse_pair(pair: &'a str) -> Result<Self, InvalidDelimiters> {
        let pair = pair.trim();
        let (open, close) = pair
            .split_once(char::is_whitespace)
            .ok_or_else(|| InvalidDelimiters(pair.to_string()))?;
        Self::new(open, close.trim_start())
    }

    pub fn into_owned(self) -> Delimiters<'static> {
        Delimiters {
            open: Cow::Owned(self.open.into_owned()),
            close: Cow::Owned(self.close.into_owned()),
        }
    }
}

impl Default for Delimiters<'_> {
    fn default() -> Self {
        Self {
            open: Cow::Borrowed("{{"),
            close: Cow::Borrowed("}}"),
        }
    }
}

impl FromStr for Delimiters<'static> {
    type Err = InvalidDelimiters;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Delimiters::parse_pair(s).map(Delimiters::into_owned)
    }
}

impl<'a> Node<'a> {
    /// Convert to a tree that owns all of its text.
    pub fn into_owned(self) -> Node<'static> {
        match self {
            Node::Multi(nodes) => Node::Multi(nodes.into_iter().map(Node::into_owned).collect()),
            Node::Static(text) => Node::Static(Cow::Owned(text.into_owned())),
            Node::Interpolation {
                escape,
                callee,
                args,
            } => Node::Interpolation {
                escape,
                callee: callee.into_owned(),
                args: args.into_iter().map(Argument::into_owned).collect(),
            },
            Node::Section(section) => Node::Section(section.into_owned()),
            Node::InvertedSection(section) => Node::InvertedSection(section.into_owned()),
            Node::Partial { name, padding } => Node::Partial {
                name: Cow::Owned(name.into_owned()),
                padding: Cow::Owned(padding.into_owned()),
            },
        }
    }
}

impl Section<'_> {
    pub fn into_owned(self) -> Section<'static> {
        Section {
            callee: self.callee.into_owned(),
            body: self.body.into_iter().map(Node::into_owned).collect(),
            raw: Cow::Owned(self.raw.into_owned()),
            delimiters: self.delimiters.into_owned(),
        }
    }
}

impl Argument<'_> {
    pub fn into_owned(self) -> Argument<'static> {
        match self {
            Argument::Static(s) => Argument::Static(Cow::Owned(s.into_owned())),
            Argument::Number(n) => Argument::Number(Cow::Owned(n.into_owned())),
            Argument::Fetch(fetch) => Argument::Fetch(fetch.into_owned()),
            Argument::Hash(hash) => Argument::Hash(HashArgs(
                hash.0
                    .into_iter()
                    .map(|(k, v)| (Cow::Owned(k.into_owned()), v.into_owned()))
                    .collect(),
            )),
        }
    }
}

impl HashValue<'_> {
    pub fn into_owned(self) -> HashValue<'static> {
        match self {
            HashValue::Static(s) => HashValue::Static(Cow::Owned(s.into_owned())),
            HashValue::Number(n) => HashValue::Number(Cow::Owned(n.into_owned())),
            HashValue::Fetch(fetch) => HashValue::Fetch(fetch.into_owned()),
        }
    }
}
