//! Line-level parsing of the OpenSSH configuration grammar.

/// A single keyword/value directive.
///
/// Keywords are normalized to lowercase; values keep their original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// The lowercased keyword.
    pub keyword: String,
    /// The value, with surrounding quotes stripped.
    pub value: String,
}

/// Parse one line into a directive.
///
/// Returns `None` for blank lines, comments, and lines that do not start
/// with a keyword. A keyword is a run of letters, optionally followed by
/// `=`, then the value. A value starting with `"` extends to the last `"`
/// on the line.
pub(crate) fn parse_line(line: &str) -> Option<Directive> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let keyword_end = line
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(line.len());
    if keyword_end == 0 {
        return None;
    }
    let keyword = line[..keyword_end].to_ascii_lowercase();

    let mut rest = line[keyword_end..].trim_start();
    if let Some(after_eq) = rest.strip_prefix('=') {
        rest = after_eq.trim_start();
    }
    let value = unquote(rest.trim_end()).to_string();

    Some(Directive { keyword, value })
}

/// Parse a whole file's contents into directives, dropping what isn't one.
pub(crate) fn parse_directives(contents: &str) -> impl Iterator<Item = Directive> + '_ {
    contents.lines().filter_map(parse_line)
}

fn unquote(value: &str) -> &str {
    if value.starts_with('"') {
        // A quoted value ends at the last quote on the line.
        match value.rfind('"') {
            Some(last) if last > 0 => &value[1..last],
            _ => &value[1..],
        }
    } else {
        value
    }
}
