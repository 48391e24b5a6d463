//! RegExp objects over the host matcher.
//!
//! The engine treats the matcher as opaque: a pattern is handed to
//! `fancy-regex` (which covers the backreference and lookaround forms JS
//! programs use), and match data comes back as byte ranges per capture group.
//! Flag translation happens here; `lastIndex` lives as an ordinary property
//! on the regexp object so user code can read and write it.

use std::fmt::Write;

use crate::error::JsError;

/// Parsed `gimsuy` flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RegexpFlags {
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub dot_all: bool,
    pub unicode: bool,
    pub sticky: bool,
}

impl RegexpFlags {
    /// Parses a flag string, rejecting unknown and duplicate flags.
    pub fn parse(flags: &str, line: u32) -> Result<Self, JsError> {
        let mut parsed = Self::default();
        for ch in flags.chars() {
            let slot = match ch {
                'g' => &mut parsed.global,
                'i' => &mut parsed.ignore_case,
                'm' => &mut parsed.multiline,
                's' => &mut parsed.dot_all,
                'u' => &mut parsed.unicode,
                'y' => &mut parsed.sticky,
                _ => return Err(JsError::syntax(format!("invalid regexp flag \"{ch}\""), line)),
            };
            if *slot {
                return Err(JsError::syntax(format!("duplicate regexp flag \"{ch}\""), line));
            }
            *slot = true;
        }
        Ok(parsed)
    }

    /// The canonical flag string, in `gimsuy` order.
    pub fn to_flag_string(self) -> String {
        let mut out = String::new();
        for (set, ch) in [
            (self.global, 'g'),
            (self.ignore_case, 'i'),
            (self.multiline, 'm'),
            (self.dot_all, 's'),
            (self.unicode, 'u'),
            (self.sticky, 'y'),
        ] {
            if set {
                out.push(ch);
            }
        }
        out
    }
}

/// The regexp payload of a heap object.
#[derive(Debug, Clone)]
pub(crate) struct RegexpObject {
    pub source: String,
    pub flags: RegexpFlags,
    /// Index into the VM's compiled-pattern cache.
    pub compiled: u32,
}

/// A pattern compiled against the host matcher, shared across clones.
#[derive(Debug)]
pub(crate) struct CompiledRegexp {
    pub re: fancy_regex::Regex,
    /// Capture-group names in group order; index 0 is the whole match.
    pub group_names: Vec<Option<String>>,
}

/// Compiles a JS pattern + flags against the host matcher.
pub(crate) fn compile(source: &str, flags: RegexpFlags) -> Result<CompiledRegexp, JsError> {
    let mut pattern = String::with_capacity(source.len() + 8);
    let mut inline = String::new();
    if flags.ignore_case {
        inline.push('i');
    }
    if flags.multiline {
        inline.push('m');
    }
    if flags.dot_all {
        inline.push('s');
    }
    if !inline.is_empty() {
        let _ = write!(pattern, "(?{inline})");
    }
    pattern.push_str(source);
    let re = fancy_regex::Regex::new(&pattern)
        .map_err(|err| JsError::syntax(format!("invalid regexp /{source}/: {err}"), 0))?;
    let group_names = re.capture_names().map(|n| n.map(str::to_owned)).collect();
    Ok(CompiledRegexp { re, group_names })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        let flags = RegexpFlags::parse("gim", 1).unwrap();
        assert!(flags.global && flags.ignore_case && flags.multiline);
        assert_eq!(flags.to_flag_string(), "gim");
    }

    #[test]
    fn duplicate_flag_rejected() {
        assert!(RegexpFlags::parse("gg", 1).is_err());
        assert!(RegexpFlags::parse("q", 1).is_err());
    }

    #[test]
    fn named_groups_surface() {
        let compiled = compile(r"(?<year>\d{4})-(\d{2})", RegexpFlags::default()).unwrap();
        assert_eq!(compiled.group_names.len(), 3);
        assert_eq!(compiled.group_names[1].as_deref(), Some("year"));
        assert_eq!(compiled.group_names[2], None);
    }
}
