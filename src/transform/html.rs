//! HTML build blocks and minification.
//!
//! Build blocks are comment pairs wrapping a list of asset references:
//!
//! ```html
//! <!-- build:css styles/vendor.css -->
//! <link rel="stylesheet" href="/bower_components/a.css">
//! <link rel="stylesheet" href="/bower_components/b.css">
//! <!-- endbuild -->
//! ```
//!
//! The whole block is replaced by a single reference to the target path. The
//! minifier then works on a flat token stream, without building a tree.

use std::borrow::Cow;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::{Captures, Regex};

use crate::config::{HtmlConfig, Layout};
use crate::task::{Artifact, Artifacts, TaskContext};
use crate::transform::{Transform, expand, relative, report};

/// Rewrites build blocks and minifies every HTML page of the source tree.
#[derive(Debug, Clone)]
pub struct Html {
    base: Utf8PathBuf,
    dist: Utf8PathBuf,
    options: HtmlConfig,
}

impl Html {
    pub fn new(layout: &Layout, options: HtmlConfig) -> Self {
        Self {
            base: layout.src.clone(),
            dist: layout.dist.clone(),
            options,
        }
    }
}

impl Transform for Html {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Artifacts> {
        let mut artifacts = Vec::new();

        for file in expand([self.base.join("**/*.html").as_str()])? {
            let text = std::fs::read_to_string(&file)?;
            let html = minify(&useref(&text), &self.options);
            let rel = relative(&file, &self.base)?;

            artifacts.push(Artifact::new(self.dist.join(rel), html));
        }

        report("html", &artifacts, true);
        Ok(artifacts)
    }
}

static BUILD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(\w+)(?:\([^)]*\))?(?:\s+([^\s>]+))?\s*-->.*?<!--\s*endbuild\s*-->")
        .expect("valid build block regex")
});

/// Replaces build blocks with one reference to their target.
///
/// `css` and `js` blocks become a stylesheet link and a script tag, `remove`
/// blocks disappear, blocks of any other type are left alone.
pub fn useref(html: &str) -> Cow<'_, str> {
    BUILD_BLOCK.replace_all(html, |caps: &Captures| match (&caps[1], caps.get(2)) {
        ("css", Some(target)) => format!(r#"<link rel="stylesheet" href="{}">"#, target.as_str()),
        ("js", Some(target)) => format!(r#"<script src="{}"></script>"#, target.as_str()),
        ("remove", _) => String::new(),
        _ => caps[0].to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Comment(&'a str),
    /// Doctype and other `<!...>` or `<?...>` markup, kept verbatim.
    Markup(&'a str),
    Start(Tag<'a>),
    End(&'a str),
    Text(&'a str),
    /// Contents of elements whose text must not be touched.
    Raw(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tag<'a> {
    name: &'a str,
    attrs: Vec<Attr<'a>>,
    self_closing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attr<'a> {
    name: &'a str,
    value: Option<&'a str>,
}

const RAW_TEXT: &[&str] = &["script", "style", "pre", "textarea"];

const INLINE: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "button", "cite", "code", "data", "dfn", "em", "i",
    "img", "input", "kbd", "label", "mark", "q", "s", "samp", "select", "small", "span",
    "strong", "sub", "sup", "time", "u", "var", "wbr",
];

const BOOLEAN: &[&str] = &[
    "allowfullscreen", "async", "autofocus", "autoplay", "checked", "controls", "default",
    "defer", "disabled", "formnovalidate", "hidden", "ismap", "loop", "multiple", "muted",
    "nomodule", "novalidate", "open", "readonly", "required", "reversed", "selected",
];

/// End tags the parser of a browser infers on its own.
const OPTIONAL_END: &[&str] = &[
    "html", "head", "body", "li", "dt", "dd", "option", "thead", "tbody", "tfoot", "tr", "td",
    "th",
];

const EMPTY_REMOVABLE: &[&str] = &["class", "id", "style", "title", "lang", "dir"];

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    let find = |from: usize, needle: &str| html[from..].find(needle).map(|i| from + i);

    while pos < html.len() {
        let rest = &html[pos..];

        if rest.starts_with("<!--") {
            let end = find(pos + 4, "-->").map_or(html.len(), |i| i + 3);
            tokens.push(Token::Comment(&html[pos..end]));
            pos = end;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = find(pos, ">").map_or(html.len(), |i| i + 1);
            tokens.push(Token::Markup(&html[pos..end]));
            pos = end;
            continue;
        }

        if rest.starts_with("</") && bytes.get(pos + 2).is_some_and(u8::is_ascii_alphabetic) {
            let end = find(pos, ">").map_or(html.len(), |i| i + 1);
            let name = html[pos + 2..end].trim_end_matches('>').trim();
            tokens.push(Token::End(name));
            pos = end;
            continue;
        }

        if rest.starts_with('<') && bytes.get(pos + 1).is_some_and(u8::is_ascii_alphabetic) {
            let (tag, end) = parse_tag(html, pos + 1);
            pos = end;

            let raw = RAW_TEXT.iter().any(|raw| tag.name.eq_ignore_ascii_case(raw));
            let name = tag.name;
            tokens.push(Token::Start(tag));

            if raw {
                let close = format!("</{}", name.to_ascii_lowercase());
                let end = html[pos..]
                    .to_ascii_lowercase()
                    .find(&close)
                    .map_or(html.len(), |i| pos + i);
                if end > pos {
                    tokens.push(Token::Raw(&html[pos..end]));
                }
                pos = end;
            }
            continue;
        }

        // text runs until the next '<' that isn't the current character
        let step = rest.chars().next().map_or(1, char::len_utf8);
        let end = find(pos + step, "<").unwrap_or(html.len());
        tokens.push(Token::Text(&html[pos..end]));
        pos = end;
    }

    tokens
}

/// Parses a start tag whose name begins at `pos`, returns the tag and the
/// offset right after it.
fn parse_tag(html: &str, mut pos: usize) -> (Tag<'_>, usize) {
    let bytes = html.as_bytes();
    let len = bytes.len();

    let is_space = |b: u8| b.is_ascii_whitespace();

    let start = pos;
    while pos < len && !is_space(bytes[pos]) && bytes[pos] != b'>' && bytes[pos] != b'/' {
        pos += 1;
    }
    let name = &html[start..pos];

    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        while pos < len && is_space(bytes[pos]) {
            pos += 1;
        }
        if pos >= len {
            break;
        }
        match bytes[pos] {
            b'>' => {
                pos += 1;
                break;
            }
            b'/' => {
                pos += 1;
                if bytes.get(pos) == Some(&b'>') {
                    self_closing = true;
                    pos += 1;
                    break;
                }
                continue;
            }
            _ => {}
        }

        let start = pos;
        while pos < len
            && !is_space(bytes[pos])
            && !matches!(bytes[pos], b'=' | b'>')
            && !(bytes[pos] == b'/' && bytes.get(pos + 1) == Some(&b'>'))
        {
            pos += 1;
        }
        let attr_name = &html[start..pos];

        while pos < len && is_space(bytes[pos]) {
            pos += 1;
        }

        let value = if bytes.get(pos) == Some(&b'=') {
            pos += 1;
            while pos < len && is_space(bytes[pos]) {
                pos += 1;
            }
            match bytes.get(pos) {
                Some(&quote @ (b'"' | b'\'')) => {
                    let start = pos + 1;
                    let end = html[start..]
                        .find(quote as char)
                        .map_or(len, |i| start + i);
                    pos = (end + 1).min(len);
                    Some(&html[start..end])
                }
                _ => {
                    let start = pos;
                    while pos < len && !is_space(bytes[pos]) && bytes[pos] != b'>' {
                        pos += 1;
                    }
                    Some(&html[start..pos])
                }
            }
        } else {
            None
        };

        if !attr_name.is_empty() {
            attrs.push(Attr {
                name: attr_name,
                value,
            });
        }
    }

    (
        Tag {
            name,
            attrs,
            self_closing,
        },
        pos,
    )
}

fn is_inline(token: Option<&Token>) -> bool {
    let name = match token {
        Some(Token::Start(tag)) => tag.name,
        Some(Token::End(name)) => name,
        Some(Token::Text(_)) => return true,
        _ => return false,
    };
    INLINE.iter().any(|inline| name.eq_ignore_ascii_case(inline))
}

/// Whether an attribute is dropped entirely.
fn is_removable(tag: &str, attr: &Attr, options: &HtmlConfig) -> bool {
    let name = attr.name.to_ascii_lowercase();
    let value = attr.value.map(|v| v.trim().to_ascii_lowercase());
    let value = value.as_deref();

    if options.remove_empty_attributes
        && value.is_some_and(str::is_empty)
        && (EMPTY_REMOVABLE.contains(&name.as_str()) || name.starts_with("on"))
    {
        return true;
    }

    if options.remove_redundant_attributes {
        let redundant = matches!(
            (tag, name.as_str(), value),
            ("input", "type", Some("text"))
                | ("form", "method", Some("get"))
                | ("script", "language", Some("javascript"))
                | ("area", "shape", Some("rect"))
                | ("button", "type", Some("submit"))
        );
        if redundant {
            return true;
        }
    }

    if options.remove_script_type_attributes
        && tag == "script"
        && name == "type"
        && matches!(value, Some("text/javascript" | "application/javascript"))
    {
        return true;
    }

    options.remove_style_link_type_attributes
        && matches!(tag, "style" | "link")
        && name == "type"
        && value == Some("text/css")
}

fn can_unquote(value: &str) -> bool {
    !value.is_empty()
        && !value.ends_with('/')
        && !value
            .chars()
            .any(|c| c.is_ascii_whitespace() || matches!(c, '"' | '\'' | '`' | '=' | '<' | '>'))
}

fn write_tag(out: &mut String, tag: &Tag, options: &HtmlConfig) {
    let name = tag.name.to_ascii_lowercase();

    out.push('<');
    out.push_str(tag.name);

    let mut last_unquoted = false;

    for attr in &tag.attrs {
        if is_removable(&name, attr, options) {
            continue;
        }

        out.push(' ');
        out.push_str(attr.name);
        last_unquoted = false;

        let Some(value) = attr.value else {
            continue;
        };

        if options.collapse_boolean_attributes
            && BOOLEAN.contains(&attr.name.to_ascii_lowercase().as_str())
        {
            continue;
        }

        out.push('=');
        if options.remove_attribute_quotes && can_unquote(value) {
            out.push_str(value);
            last_unquoted = true;
        } else if value.contains('"') {
            out.push('\'');
            out.push_str(value);
            out.push('\'');
        } else {
            out.push('"');
            out.push_str(value);
            out.push('"');
        }
    }

    if tag.self_closing {
        out.push_str(if last_unquoted { " />" } else { "/>" });
    } else {
        out.push('>');
    }
}

fn collapse(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            space = true;
        } else {
            if space {
                out.push(' ');
                space = false;
            }
            out.push(c);
        }
    }
    if space {
        out.push(' ');
    }

    out
}

/// Minifies an HTML document according to the enabled switches.
pub fn minify(html: &str, options: &HtmlConfig) -> String {
    let tokens = tokenize(html);
    let mut out = String::with_capacity(html.len());

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Comment(text) => {
                let conditional = text.starts_with("<!--[if") || text.starts_with("<!--<![");
                if !options.remove_comments || conditional {
                    out.push_str(text);
                }
            }
            Token::Markup(text) | Token::Raw(text) => out.push_str(text),
            Token::Start(tag) => write_tag(&mut out, tag, options),
            Token::End(name) => {
                let optional = OPTIONAL_END.iter().any(|tag| name.eq_ignore_ascii_case(tag));
                if !(options.remove_optional_tags && optional) {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
            }
            Token::Text(text) if options.collapse_whitespace => {
                let mut text = collapse(text);

                let prev = i.checked_sub(1).and_then(|i| tokens.get(i));
                let next = tokens.get(i + 1);

                if text.starts_with(' ') && !is_inline(prev) {
                    text.remove(0);
                }
                if text.ends_with(' ') && !is_inline(next) {
                    text.pop();
                }

                out.push_str(&text);
            }
            Token::Text(text) => out.push_str(text),
        }
    }

    out
}
