use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::args::{scan_arguments, token_pattern};
use crate::ast::{Delimiters, Escape, Fetch, Node, Section};
use crate::cursor::Cursor;
use crate::error::SyntaxError;

static SIGIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A[#^/=!<>&{]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A\s*").expect("valid regex"));
static NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A\r?\n").expect("valid regex"));
static ALLOWED_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[A-Za-z0-9_?!/.\-]*").expect("valid regex"));

/// Compiles mustache templates into a [`Node`] tree.
///
/// A `Parser` only carries configuration. Each call to [`Parser::compile`]
/// works on fresh state, so delimiter changes made inside one template never
/// leak into the next.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    delimiters: Delimiters<'static>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every compile with `delimiters` instead of `{{ }}`.
    pub fn with_delimiters(delimiters: Delimiters<'static>) -> Self {
        Self { delimiters }
    }

    pub fn delimiters(&self) -> &Delimiters<'static> {
        &self.delimiters
    }

    /// Compile `template`, returning a `Node::Multi` root.
    pub fn compile<'a>(&self, template: &'a str) -> Result<Node<'a>, SyntaxError> {
        tracing::debug!(len = template.len(), "compiling template");
        let result = Compiler::new(template, self.delimiters.clone()).and_then(Compiler::run);
        match &result {
            Ok(Node::Multi(nodes)) => tracing::debug!(nodes = nodes.len(), "compiled template"),
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(line = err.line, column = err.column, message = %err.message, "compile failed")
            }
        }
        result
    }
}

/// What the sigil after the open delimiter asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Section,
    InvertedSection,
    Close,
    Comment,
    SetDelimiters,
    Partial,
    /// `{` when `brace` is set, `&` otherwise
    Unescaped { brace: bool },
    Escaped,
}

impl TagKind {
    fn from_sigil(sigil: Option<char>) -> Self {
        match sigil {
            Some('#') => TagKind::Section,
            Some('^') => TagKind::InvertedSection,
            Some('/') => TagKind::Close,
            Some('!') => TagKind::Comment,
            Some('=') => TagKind::SetDelimiters,
            Some('<') | Some('>') => TagKind::Partial,
            Some('{') => TagKind::Unescaped { brace: true },
            Some('&') => TagKind::Unescaped { brace: false },
            _ => TagKind::Escaped,
        }
    }

    /// Comments and delimiter changes may contain anything up to the close.
    fn takes_any_content(self) -> bool {
        matches!(self, TagKind::Comment | TagKind::SetDelimiters)
    }

    fn is_interpolation(self) -> bool {
        matches!(self, TagKind::Escaped | TagKind::Unescaped { .. })
    }
}

/// Patterns that depend on the live delimiter pair.
#[derive(Debug)]
struct TagPatterns {
    /// Optional indentation, then the open delimiter
    open: Regex,
    /// Next tag, with its indentation when the tag opens a line
    text_end: Regex,
    comment_end: Regex,
    delimiters_end: Regex,
    argument: Regex,
}

impl TagPatterns {
    /// Fails only when a marker is too large for the regex size limit.
    fn new(delimiters: &Delimiters<'_>) -> Result<Self, regex::Error> {
        let open = regex::escape(&delimiters.open);
        let close = regex::escape(&delimiters.close);

        Ok(Self {
            open: Regex::new(&format!(r"\A([ \t]*){open}"))?,
            text_end: Regex::new(&format!(r"(?m)(?:^[ \t]*)?{open}"))?,
            comment_end: Regex::new(&format!(r"\s*!?{close}"))?,
            delimiters_end: Regex::new(&format!(r"\s*=?{close}"))?,
            argument: token_pattern(&delimiters.close)?,
        })
    }
}

/// An open section waiting for its closing tag.
#[derive(Debug)]
struct SectionFrame<'a> {
    name: &'a str,
    inverted: bool,
    callee: Fetch<'a>,
    /// Offset of the opening tag's delimiter, for error reporting
    opened_at: usize,
    /// Offset just past the opening tag, once it has been fully scanned
    body_start: Option<usize>,
    body: Vec<Node<'a>>,
}

/// Mutable state of a single compile.
struct Compiler<'a> {
    cursor: Cursor<'a>,
    delimiters: Delimiters<'a>,
    patterns: TagPatterns,
    root: Vec<Node<'a>>,
    sections: Vec<SectionFrame<'a>>,
}

impl<'a> Compiler<'a> {
    fn new(template: &'a str, delimiters: Delimiters<'a>) -> Result<Self, SyntaxError> {
        let cursor = Cursor::new(template);
        let patterns = TagPatterns::new(&delimiters)
            .map_err(|_| SyntaxError::at(template, 0, "Invalid delimiters"))?;
        Ok(Self {
            cursor,
            patterns,
            delimiters,
            root: Vec::new(),
            sections: Vec::new(),
        })
    }

    fn run(mut self) -> Result<Node<'a>, SyntaxError> {
        while !self.cursor.is_eos() {
            if !self.scan_tag()? {
                self.scan_text();
            }
        }

        if let Some(frame) = self.sections.pop() {
            return Err(self.error_at(
                format!("Unclosed section {:?}", frame.name),
                frame.opened_at,
            ));
        }

        Ok(Node::Multi(self.root))
    }

    /// Buffer receiving nodes at section depth `depth`.
    fn buffer(&mut self, depth: usize) -> &mut Vec<Node<'a>> {
        match depth.checked_sub(1) {
            Some(index) => &mut self.sections[index].body,
            None => &mut self.root,
        }
    }

    fn output(&mut self) -> &mut Vec<Node<'a>> {
        self.buffer(self.sections.len())
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        self.error_at(message, self.cursor.pos())
    }

    fn error_at(&self, message: impl Into<String>, offset: usize) -> SyntaxError {
        SyntaxError::at(self.cursor.source(), offset, message)
    }

    /// Scan one tag at the cursor. Returns `false` if none starts here.
    fn scan_tag(&mut self) -> Result<bool, SyntaxError> {
        let start_of_line = self.cursor.at_line_start();
        let depth = self.sections.len();
        let insert_at = self.buffer(depth).len();

        let Some(caps) = self.cursor.captures(&self.patterns.open) else {
            return Ok(false);
        };
        let mut padding = caps.get(1).map_or("", |m| m.as_str());
        let tag_start = self.cursor.pos() - self.delimiters.open.len();

        if !start_of_line {
            if !padding.is_empty() {
                self.output().push(Node::Static(Cow::Borrowed(padding)));
            }
            padding = "";
        }

        let sigil = self
            .cursor
            .scan(&SIGIL)
            .and_then(|s| s.chars().next());
        let kind = TagKind::from_sigil(sigil);
        self.cursor.skip(&WHITESPACE);

        let content = if kind.takes_any_content() {
            let end = match kind {
                TagKind::Comment => &self.patterns.comment_end,
                _ => &self.patterns.delimiters_end,
            };
            match self.cursor.scan_until_exclusive(end) {
                Some(content) => content,
                None => return Err(self.error("Unclosed tag")),
            }
        } else {
            self.cursor.scan(&ALLOWED_CONTENT).unwrap_or("")
        };

        if content.is_empty() {
            return Err(self.error("Illegal content in tag"));
        }
        tracing::trace!(?kind, content, offset = tag_start, "tag");

        let mut closes_section = false;
        let mut new_delimiters = None;

        match kind {
            TagKind::Section | TagKind::InvertedSection => {
                self.sections.push(SectionFrame {
                    name: content,
                    inverted: kind == TagKind::InvertedSection,
                    callee: Fetch::from_path(content),
                    opened_at: tag_start,
                    body_start: None,
                    body: Vec::new(),
                });
            }
            TagKind::Close => {
                let Some(frame) = self.sections.last() else {
                    return Err(self.error(format!("Closing unopened {content:?}")));
                };
                if frame.name != content {
                    return Err(self.error_at(
                        format!("Unclosed section {:?}", frame.name),
                        frame.opened_at,
                    ));
                }
                closes_section = true;
            }
            TagKind::Comment => {}
            TagKind::SetDelimiters => match Delimiters::parse_pair(content) {
                Ok(delimiters) => match TagPatterns::new(&delimiters) {
                    Ok(patterns) => new_delimiters = Some((delimiters, patterns)),
                    Err(_) => return Err(self.error("Invalid delimiters")),
                },
                Err(_) => return Err(self.error("Invalid delimiters")),
            },
            TagKind::Partial => {
                self.output().push(Node::Partial {
                    name: Cow::Borrowed(content),
                    padding: Cow::Borrowed(padding),
                });
            }
            TagKind::Escaped | TagKind::Unescaped { .. } => {}
        }

        self.cursor.skip(&WHITESPACE);

        if kind.is_interpolation() {
            let close = match kind {
                TagKind::Unescaped { brace: true } => {
                    Cow::Owned(["}", self.delimiters.close.as_ref()].concat())
                }
                _ => self.delimiters.close.clone(),
            };
            let args = scan_arguments(&mut self.cursor, &close, &self.patterns.argument)?;
            let escape = match kind {
                TagKind::Escaped => Escape::Escaped,
                _ => Escape::Unescaped,
            };
            self.output().push(Node::Interpolation {
                escape,
                callee: Fetch::from_path(content),
                args,
            });
        } else {
            if let Some(sigil) = sigil {
                self.cursor.skip_str(sigil.encode_utf8(&mut [0; 4]));
            }
            if !self.cursor.skip_str(&self.delimiters.close) {
                return Err(self.error("Unclosed tag"));
            }
        }

        if start_of_line && !self.standalone(kind) && !padding.is_empty() {
            self.buffer(depth)
                .insert(insert_at, Node::Static(Cow::Borrowed(padding)));
        }

        if closes_section {
            self.close_section(tag_start);
        }

        if let Some((delimiters, patterns)) = new_delimiters {
            tracing::debug!(open = %delimiters.open, close = %delimiters.close, "delimiters changed");
            self.patterns = patterns;
            self.delimiters = delimiters;
        }

        if let Some(frame) = self.sections.last_mut() {
            frame.body_start.get_or_insert(self.cursor.pos());
        }

        Ok(true)
    }

    /// Swallow the rest of a line that holds nothing but a block tag.
    fn standalone(&mut self, kind: TagKind) -> bool {
        if kind.is_interpolation() {
            return false;
        }
        self.cursor.is_eos() || self.cursor.skip(&NEWLINE)
    }

    /// Pop the innermost section, whose closing tag starts at `raw_end`.
    fn close_section(&mut self, raw_end: usize) {
        let Some(frame) = self.sections.pop() else {
            return;
        };
        let raw_start = frame.body_start.unwrap_or(raw_end).min(raw_end);
        let section = Section {
            callee: frame.callee,
            body: frame.body,
            raw: Cow::Borrowed(&self.cursor.source()[raw_start..raw_end]),
            delimiters: self.delimiters.clone(),
        };
        let node = if frame.inverted {
            Node::InvertedSection(section)
        } else {
            Node::Section(section)
        };
        self.output().push(node);
    }

    fn scan_text(&mut self) {
        let text = match self.cursor.scan_until_exclusive(&self.patterns.text_end) {
            Some(text) => text,
            None => {
                let rest = self.cursor.rest();
                self.cursor.terminate();
                rest
            }
        };
        if !text.is_empty() {
            self.output().push(Node::Static(Cow::Borrowed(text)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Argument, HashArgs, HashValue};

    fn compile(input: &str) -> Vec<Node<'_>> {
        match Parser::new().compile(input).unwrap() {
            Node::Multi(nodes) => nodes,
            other => panic!("Expected Multi root, got {other:?}"),
        }
    }

    fn section<'n, 'a>(node: &'n Node<'a>) -> &'n Section<'a> {
        match node {
            Node::Section(section) | Node::InvertedSection(section) => section,
            other => panic!("Expected section, got {other:?}"),
        }
    }

    fn text(s: &str) -> Node<'_> {
        Node::Static(Cow::Borrowed(s))
    }

    fn var(path: &str) -> Node<'_> {
        Node::Interpolation {
            escape: Escape::Escaped,
            callee: Fetch::from_path(path),
            args: vec![],
        }
    }

    #[test]
    fn test_parse_simple_interpolation() {
        let nodes = compile("<h1>{{header}}</h1>\n");
        assert_eq!(nodes, vec![text("<h1>"), var("header"), text("</h1>\n")]);
    }

    #[test]
    fn test_parse_dotted_and_spaced() {
        let nodes = compile("{{ user.name }}");
        assert_eq!(nodes, vec![var("user.name")]);
    }

    #[test]
    fn test_parse_unescaped() {
        let nodes = compile("{{{html}}} {{& raw }}");
        assert_eq!(nodes.len(), 3);
        assert!(matches!(
            &nodes[0],
            Node::Interpolation { escape: Escape::Unescaped, callee, .. } if callee.to_string() == "html"
        ));
        assert_eq!(nodes[1], text(" "));
        assert!(matches!(
            &nodes[2],
            Node::Interpolation { escape: Escape::Unescaped, callee, .. } if callee.to_string() == "raw"
        ));
    }

    #[test]
    fn test_triple_mustache_needs_balancing_brace() {
        let err = Parser::new().compile("{{{html}}").unwrap_err();
        assert_eq!(err.message, "Unclosed tag");
    }

    #[test]
    fn test_parse_section_with_tab() {
        let nodes = compile("{{#list}}\t{{/list}}");
        assert_eq!(
            nodes,
            vec![Node::Section(Section {
                callee: Fetch::from_path("list"),
                body: vec![text("\t")],
                raw: Cow::Borrowed("\t"),
                delimiters: Delimiters::default(),
            })]
        );
    }

    #[test]
    fn test_parse_inverted_section() {
        let nodes = compile("{{^empty}}none{{/empty}}");
        assert!(matches!(&nodes[0], Node::InvertedSection(s) if s.raw == "none"));
    }

    #[test]
    fn test_nested_sections() {
        let nodes = compile("{{#a}}x{{#b}}y{{/b}}z{{/a}}");
        let outer = section(&nodes[0]);
        assert_eq!(outer.raw, "x{{#b}}y{{/b}}z");
        assert_eq!(outer.body.len(), 3);
        assert_eq!(section(&outer.body[1]).raw, "y");
    }

    #[test]
    fn test_arguments() {
        let nodes = compile("{{ truncate name count=10 ellipsis=\"...\" }}");
        assert_eq!(
            nodes,
            vec![Node::Interpolation {
                escape: Escape::Escaped,
                callee: Fetch::from_path("truncate"),
                args: vec![
                    Argument::Fetch(Fetch::from_path("name")),
                    Argument::Hash(HashArgs(vec![
                        (Cow::Borrowed("count"), HashValue::Number(Cow::Borrowed("10"))),
                        (Cow::Borrowed("ellipsis"), HashValue::Static(Cow::Borrowed("..."))),
                    ])),
                ],
            }]
        );
    }

    #[test]
    fn test_comment_is_dropped() {
        let nodes = compile("a{{! anything {{ goes\n here }}b");
        assert_eq!(nodes, vec![text("a"), text("b")]);
    }

    #[test]
    fn test_partial_with_padding() {
        let nodes = compile("  {{> item}}\nafter");
        assert_eq!(
            nodes,
            vec![
                Node::Partial {
                    name: Cow::Borrowed("item"),
                    padding: Cow::Borrowed("  "),
                },
                text("after"),
            ]
        );
    }

    #[test]
    fn test_inline_partial_has_no_padding() {
        let nodes = compile("x {{<item}}");
        assert_eq!(
            nodes,
            vec![
                text("x "),
                Node::Partial {
                    name: Cow::Borrowed("item"),
                    padding: Cow::Borrowed(""),
                },
            ]
        );
    }

    #[test]
    fn test_standalone_lines_are_removed() {
        let nodes = compile("{{#a}}\n  line\n  {{/a}}\n");
        let body = section(&nodes[0]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(body.body, vec![text("  line\n")]);
        assert_eq!(body.raw, "  line\n  ");
    }

    #[test]
    fn test_standalone_crlf() {
        let nodes = compile("{{! note }}\r\nbody");
        assert_eq!(nodes, vec![text("body")]);
    }

    #[test]
    fn test_padding_restored_when_line_has_content() {
        let nodes = compile("  {{#a}}x{{/a}}\n");
        assert_eq!(nodes[0], text("  "));
        assert!(matches!(&nodes[1], Node::Section(s) if s.raw == "x"));
        assert_eq!(nodes[2], text("\n"));
    }

    #[test]
    fn test_padding_restored_after_earlier_nodes() {
        let nodes = compile("a\n  {{#b}}x{{/b}}");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], text("a\n"));
        assert_eq!(nodes[1], text("  "));
        assert_eq!(section(&nodes[2]).raw, "x");
    }

    #[test]
    fn test_padding_restored_inside_section_body() {
        let nodes = compile("{{#o}}\n  {{#i}}x{{/i}}\n{{/o}}");
        let outer = section(&nodes[0]);
        assert_eq!(outer.body.len(), 3);
        assert_eq!(outer.body[0], text("  "));
        assert_eq!(section(&outer.body[1]).raw, "x");
        assert_eq!(outer.body[2], text("\n"));

        let nodes = compile("{{#o}}\nhead\n  {{#i}}x{{/i}}\n{{/o}}");
        let outer = section(&nodes[0]);
        assert_eq!(outer.body[0], text("head\n"));
        assert_eq!(outer.body[1], text("  "));
        assert_eq!(section(&outer.body[2]).raw, "x");
        assert_eq!(outer.body[3], text("\n"));
    }

    #[test]
    fn test_interpolation_keeps_indentation() {
        assert_eq!(compile("  {{name}}\n"), vec![text("  "), var("name"), text("\n")]);
    }

    #[test]
    fn test_interpolation_on_last_line_keeps_padding() {
        assert_eq!(compile("  {{name}}"), vec![text("  "), var("name")]);
        assert_eq!(
            compile("a\n\t{{&name}}"),
            vec![
                text("a\n"),
                text("\t"),
                Node::Interpolation {
                    escape: Escape::Unescaped,
                    callee: Fetch::from_path("name"),
                    args: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_standalone_at_end_of_input() {
        let nodes = compile("a\n  {{! done }}");
        assert_eq!(nodes, vec![text("a\n")]);
    }

    #[test]
    fn test_set_delimiters() {
        let nodes = compile("{{=<% %>=}}<% name %>{{literal}}");
        assert_eq!(nodes, vec![var("name"), text("{{literal}}")]);
    }

    #[test]
    fn test_section_reports_closing_delimiters() {
        let nodes = compile("{{#a}}{{=| |=}}|/a|");
        let closed = section(&nodes[0]);
        assert_eq!(closed.delimiters.open, "|");
        assert_eq!(closed.delimiters.close, "|");
        assert_eq!(closed.raw, "{{=| |=}}");
    }

    #[test]
    fn test_delimiters_do_not_leak_between_compiles() {
        let parser = Parser::new();
        parser.compile("{{=<% %>=}}").unwrap();
        let nodes = match parser.compile("{{x}}").unwrap() {
            Node::Multi(nodes) => nodes,
            _ => unreachable!(),
        };
        assert_eq!(nodes, vec![var("x")]);
    }

    #[test]
    fn test_configured_delimiters() {
        let parser = Parser::with_delimiters("[[ ]]".parse().unwrap());
        let root = parser.compile("{{a}}[[b]]").unwrap();
        assert_eq!(root, Node::Multi(vec![text("{{a}}"), var("b")]));
    }

    #[test]
    fn test_invalid_set_delimiters() {
        let err = Parser::new().compile("{{=<%=}}").unwrap_err();
        assert_eq!(err.message, "Invalid delimiters");
    }

    #[test]
    fn test_oversized_set_delimiters() {
        let source = format!("{{{{={} >=}}}}x", "<".repeat(2_000_000));
        let err = Parser::new().compile(&source).unwrap_err();
        assert_eq!(err.message, "Invalid delimiters");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_oversized_configured_delimiters() {
        let delimiters = Delimiters::new("<".repeat(2_000_000), ">").unwrap();
        let err = Parser::with_delimiters(delimiters).compile("x").unwrap_err();
        assert_eq!(err.message, "Invalid delimiters");
        assert_eq!((err.line, err.column), (1, 0));
    }

    #[test]
    fn test_unclosed_section() {
        let err = Parser::new().compile("{{#a}}text").unwrap_err();
        assert_eq!(err.message, "Unclosed section \"a\"");
        assert_eq!((err.line, err.column), (1, 0));
    }

    #[test]
    fn test_unclosed_section_reports_opening_line() {
        let err = Parser::new().compile("one\n  {{#a}}\ntwo\n").unwrap_err();
        assert_eq!(err.message, "Unclosed section \"a\"");
        assert_eq!((err.line, err.column), (2, 2));
        assert_eq!(err.source_line, "  {{#a}}");
    }

    #[test]
    fn test_mismatched_close() {
        let err = Parser::new().compile("{{#a}}\n{{/b}}").unwrap_err();
        assert_eq!(err.message, "Unclosed section \"a\"");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_closing_unopened() {
        let err = Parser::new().compile("{{/a}}").unwrap_err();
        assert_eq!(err.message, "Closing unopened \"a\"");
    }

    #[test]
    fn test_illegal_content() {
        let err = Parser::new().compile("x {{#}}").unwrap_err();
        assert_eq!(err.message, "Illegal content in tag");
        assert_eq!(err.column, 5);
    }

    #[test]
    fn test_unclosed_tag() {
        assert_eq!(
            Parser::new().compile("{{#a b}}{{/a}}").unwrap_err().message,
            "Unclosed tag"
        );
        assert_eq!(
            Parser::new().compile("{{! never closed").unwrap_err().message,
            "Unclosed tag"
        );
    }

    #[test]
    fn test_lone_open_brace_text() {
        let nodes = compile("a { b } c");
        assert_eq!(nodes, vec![text("a { b } c")]);
    }
}
