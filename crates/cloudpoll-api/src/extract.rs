// Anchor-based extraction rules
//
// A few vendors only answer with HTML. Values are pulled out of those
// pages by locating a fixed start anchor and cutting either up to an end
// anchor or a fixed number of characters. Every rule carries a name and a
// version so a changed page layout shows up as a new rule, not as a silent
// offset tweak. A rule that does not match fails closed with a typed error.

use thiserror::Error;

/// How an extracted value ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Value runs up to (not including) the next occurrence of this anchor.
    Anchor(&'static str),
    /// Value is exactly this many characters long.
    Length(usize),
}

/// A versioned "find the value after this anchor" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRule {
    pub name: &'static str,
    pub version: u16,
    pub start: &'static str,
    pub end: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("rule {rule}: start anchor {anchor:?} not found")]
    StartAnchorMissing { rule: String, anchor: &'static str },

    #[error("rule {rule}: end anchor {anchor:?} not found")]
    EndAnchorMissing { rule: String, anchor: &'static str },

    #[error("rule {rule}: wanted {wanted} characters, only {available} available")]
    TooShort {
        rule: String,
        wanted: usize,
        available: usize,
    },

    #[error("rule {rule}: matched an empty value")]
    Empty { rule: String },
}

impl ExtractionRule {
    pub const fn new(name: &'static str, version: u16, start: &'static str, end: Terminator) -> Self {
        Self {
            name,
            version,
            start,
            end,
        }
    }

    /// `name@vN`, used in logs and error messages.
    pub fn id(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }

    /// Extract the first value matched by this rule.
    pub fn apply<'a>(&self, text: &'a str) -> Result<&'a str, ExtractError> {
        self.locate(text).map(|(value, _)| value)
    }

    /// Extract every non-overlapping match, in document order.
    ///
    /// Stops at the first position where the rule no longer matches; a
    /// page without any match yields an empty list.
    pub fn scan_all<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut found = Vec::new();
        let mut rest = text;
        while let Ok((value, consumed)) = self.locate(rest) {
            found.push(value);
            rest = &rest[consumed..];
        }
        found
    }

    /// Returns the value and the byte offset just past it.
    fn locate<'a>(&self, text: &'a str) -> Result<(&'a str, usize), ExtractError> {
        let start = text
            .find(self.start)
            .ok_or_else(|| ExtractError::StartAnchorMissing {
                rule: self.id(),
                anchor: self.start,
            })?
            + self.start.len();
        let rest = &text[start..];

        let len = match self.end {
            Terminator::Anchor(anchor) => {
                rest.find(anchor)
                    .ok_or_else(|| ExtractError::EndAnchorMissing {
                        rule: self.id(),
                        anchor,
                    })?
            }
            Terminator::Length(wanted) => match rest.char_indices().nth(wanted) {
                Some((offset, _)) => offset,
                None => {
                    let available = rest.chars().count();
                    if available < wanted {
                        return Err(ExtractError::TooShort {
                            rule: self.id(),
                            wanted,
                            available,
                        });
                    }
                    rest.len()
                }
            },
        };

        let value = &rest[..len];
        if value.trim().is_empty() {
            return Err(ExtractError::Empty { rule: self.id() });
        }
        Ok((value, start + len))
    }
}
