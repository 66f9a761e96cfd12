pub mod build;
pub mod node;

use std::fmt::{self, Display, Formatter};

/// Source line a node was parsed from, used to annotate faults.
///
/// Line `0` means the producer of the tree did not record a position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Line(u32);

impl Line {
    pub const UNKNOWN: Line = Line(0);

    pub const fn new(line: u32) -> Self {
        Self(line)
    }

    pub fn get(self) -> Option<u32> {
        (self.0 > 0).then_some(self.0)
    }

    pub fn is_known(self) -> bool {
        self.0 > 0
    }

    /// Returns `self`, or `other` when this line is unknown.
    pub fn or(self, other: Line) -> Line {
        if self.is_known() { self } else { other }
    }
}

impl From<u32> for Line {
    fn from(line: u32) -> Self {
        Self(line)
    }
}

impl Display for Line {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(line) => write!(f, "line {}", line),
            None => write!(f, "unknown line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_display() {
        assert_eq!(Line::new(12).to_string(), "line 12");
        assert_eq!(Line::UNKNOWN.to_string(), "unknown line");
    }

    #[test]
    fn test_line_or() {
        assert_eq!(Line::UNKNOWN.or(Line::new(3)), Line::new(3));
        assert_eq!(Line::new(1).or(Line::new(3)), Line::new(1));
    }
}
