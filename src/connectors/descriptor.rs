//! Location descriptor tokenizing
//!
//! Descriptors are colon-delimited; the first token names the scheme. Only
//! connectors interpret the remaining tokens.

/// Token separator
pub const SEPARATOR: char = ':';

/// A descriptor split into scheme and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDescriptor<'a> {
    scheme: &'a str,
    args: Vec<&'a str>,
}

impl<'a> LocationDescriptor<'a> {
    /// Split `descriptor`. Returns `None` for an empty scheme.
    pub fn parse(descriptor: &'a str) -> Option<Self> {
        let mut tokens = descriptor.split(SEPARATOR);
        let scheme = tokens.next().filter(|s| !s.is_empty())?;
        Some(Self {
            scheme,
            args: tokens.collect(),
        })
    }

    pub fn scheme(&self) -> &'a str {
        self.scheme
    }

    /// Total token count, scheme included
    pub fn token_count(&self) -> usize {
        self.args.len() + 1
    }

    /// Argument `index` (0-based, after the scheme), if present and non-empty
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied().filter(|a| !a.is_empty())
    }
}
