//! Annotation types
//!
//! One tagged record covers highlights, notes and bookmarks. The position of
//! an annotation is held in exactly one of two representations:
//!
//! - a logical document location (`#pdfloc(...)`, as written by e-readers)
//! - page-relative bounding boxes (as stored by reference managers)
//!
//! Either representation can describe a point or a range.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ImportError;

/// Maximum coordinate difference (in PDF points) for two boxes to be the same
pub const BOX_TOLERANCE: f64 = 0.01;

/// Kind of annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    /// Text highlight
    Highlight,
    /// Text note with content
    Note,
    /// Bookmark (position marker)
    Bookmark,
}

/// The two position representations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Representation {
    /// Logical document location
    Logical,
    /// Page-relative bounding boxes
    Boxes,
}

impl Representation {
    /// The other representation
    pub fn alternate(self) -> Self {
        match self {
            Representation::Logical => Representation::Boxes,
            Representation::Boxes => Representation::Logical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Representation::Logical => "logical",
            Representation::Boxes => "boxes",
        }
    }
}

impl Default for Representation {
    fn default() -> Self {
        Representation::Boxes
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Representation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "logical" | "pdfloc" => Ok(Representation::Logical),
            "boxes" | "bbox" | "bboxes" => Ok(Representation::Boxes),
            other => Err(format!("unknown representation: {}", other)),
        }
    }
}

/// A point in time, flagged with whether the store recorded it exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub at: DateTime<Utc>,
    /// False when the time was approximated (e.g. from a file mtime)
    pub exact: bool,
}

impl Timestamp {
    pub fn exact(at: DateTime<Utc>) -> Self {
        Self { at, exact: true }
    }

    pub fn approximate(at: DateTime<Utc>) -> Self {
        Self { at, exact: false }
    }
}

/// A logical PDF location: `#pdfloc(hash,page,step,step,...)`
///
/// The hash identifies the document revision the location was computed
/// against; the steps address a node and character offset within the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PdfLoc {
    pub hash: String,
    pub page: u32,
    pub steps: Vec<u32>,
}

impl fmt::Display for PdfLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#pdfloc({},{}", self.hash, self.page)?;
        for step in &self.steps {
            write!(f, ",{}", step)?;
        }
        f.write_str(")")
    }
}

impl FromStr for PdfLoc {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ImportError::Malformed(format!("invalid pdfloc: {}", s));

        let inner = s
            .trim()
            .strip_prefix("#pdfloc(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(malformed)?;

        let mut parts = inner.split(',').map(str::trim);
        let hash = parts.next().filter(|h| !h.is_empty()).ok_or_else(malformed)?;
        let page = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(malformed)?;
        let steps = parts
            .map(|p| p.parse::<u32>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PdfLoc {
            hash: hash.to_string(),
            page,
            steps,
        })
    }
}

/// Position expressed as logical document locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogicalPosition {
    Point { at: PdfLoc },
    Range { start: PdfLoc, end: PdfLoc },
}

impl LogicalPosition {
    pub fn page(&self) -> u32 {
        match self {
            LogicalPosition::Point { at } => at.page,
            LogicalPosition::Range { start, .. } => start.page,
        }
    }
}

/// An axis-aligned box on one page, in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageBox {
    pub page: u32,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PageBox {
    pub fn new(page: u32, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { page, x1, y1, x2, y2 }
    }

    /// Same page and every coordinate within [`BOX_TOLERANCE`]
    pub fn approx_eq(&self, other: &PageBox) -> bool {
        self.page == other.page
            && close(self.x1, other.x1)
            && close(self.y1, other.y1)
            && close(self.x2, other.x2)
            && close(self.y2, other.y2)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= BOX_TOLERANCE
}

/// Position expressed as page bounding boxes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoxPosition {
    Point { page: u32, x: f64, y: f64 },
    /// One box per line fragment, in reading order
    Range { boxes: Vec<PageBox> },
}

impl BoxPosition {
    /// A range over `boxes`, or `None` when there are no boxes
    pub fn range(boxes: Vec<PageBox>) -> Option<Self> {
        if boxes.is_empty() {
            None
        } else {
            Some(BoxPosition::Range { boxes })
        }
    }

    pub fn page(&self) -> u32 {
        match self {
            BoxPosition::Point { page, .. } => *page,
            BoxPosition::Range { boxes } => boxes.first().map(|b| b.page).unwrap_or(0),
        }
    }

    pub fn approx_eq(&self, other: &BoxPosition) -> bool {
        match (self, other) {
            (
                BoxPosition::Point { page, x, y },
                BoxPosition::Point {
                    page: other_page,
                    x: other_x,
                    y: other_y,
                },
            ) => page == other_page && close(*x, *other_x) && close(*y, *other_y),
            (BoxPosition::Range { boxes }, BoxPosition::Range { boxes: other_boxes }) => {
                boxes.len() == other_boxes.len()
                    && boxes.iter().zip(other_boxes).all(|(a, b)| a.approx_eq(b))
            }
            _ => false,
        }
    }
}

/// Position of an annotation in one of the two representations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "representation", rename_all = "lowercase")]
pub enum Position {
    Logical(LogicalPosition),
    Boxes(BoxPosition),
}

impl Position {
    pub fn representation(&self) -> Representation {
        match self {
            Position::Logical(_) => Representation::Logical,
            Position::Boxes(_) => Representation::Boxes,
        }
    }

    pub fn page(&self) -> u32 {
        match self {
            Position::Logical(p) => p.page(),
            Position::Boxes(p) => p.page(),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Position::Logical(LogicalPosition::Range { .. })
                | Position::Boxes(BoxPosition::Range { .. })
        )
    }

    /// Same location in the same representation.
    ///
    /// Positions in different representations never compare equal; convert
    /// first.
    pub fn same_as(&self, other: &Position) -> bool {
        match (self, other) {
            (Position::Logical(a), Position::Logical(b)) => a == b,
            (Position::Boxes(a), Position::Boxes(b)) => a.approx_eq(b),
            _ => false,
        }
    }

    pub fn as_logical(&self) -> Option<&LogicalPosition> {
        match self {
            Position::Logical(p) => Some(p),
            Position::Boxes(_) => None,
        }
    }

    pub fn as_boxes(&self) -> Option<&BoxPosition> {
        match self {
            Position::Boxes(p) => Some(p),
            Position::Logical(_) => None,
        }
    }
}

/// A single annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    /// Free-text payload (note body or comment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub position: Position,
}

impl Annotation {
    /// Create a highlight over a range
    pub fn highlight(position: Position, created: Timestamp) -> Self {
        Self {
            kind: AnnotationKind::Highlight,
            text: None,
            created,
            modified: created,
            position,
        }
    }

    /// Create a note carrying text
    pub fn note(position: Position, text: &str, created: Timestamp) -> Self {
        Self {
            kind: AnnotationKind::Note,
            text: Some(text.to_string()),
            created,
            modified: created,
            position,
        }
    }

    /// Create a bookmark
    pub fn bookmark(position: Position, created: Timestamp) -> Self {
        Self {
            kind: AnnotationKind::Bookmark,
            text: None,
            created,
            modified: created,
            position,
        }
    }

    /// Set the text payload
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    /// Set the modification time
    pub fn with_modified(mut self, modified: Timestamp) -> Self {
        self.modified = modified;
        self
    }

    pub fn page(&self) -> u32 {
        self.position.page()
    }

    pub fn representation(&self) -> Representation {
        self.position.representation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        Timestamp::exact(Utc::now())
    }

    #[test]
    fn test_pdfloc_parse_and_display() {
        let loc: PdfLoc = "#pdfloc(a1b2,3,14,2,0)".parse().unwrap();
        assert_eq!(loc.hash, "a1b2");
        assert_eq!(loc.page, 3);
        assert_eq!(loc.steps, vec![14, 2, 0]);
        assert_eq!(loc.to_string(), "#pdfloc(a1b2,3,14,2,0)");
    }

    #[test]
    fn test_pdfloc_rejects_garbage() {
        assert!("pdfloc(a,1)".parse::<PdfLoc>().is_err());
        assert!("#pdfloc(a,x)".parse::<PdfLoc>().is_err());
        assert!("#pdfloc(,1)".parse::<PdfLoc>().is_err());
        assert!("#pdfloc(a,1,z)".parse::<PdfLoc>().is_err());
    }

    #[test]
    fn test_box_tolerance() {
        let a = BoxPosition::Range {
            boxes: vec![PageBox::new(2, 10.0, 20.0, 110.0, 32.0)],
        };
        let b = BoxPosition::Range {
            boxes: vec![PageBox::new(2, 10.004, 20.0, 110.0, 31.998)],
        };
        let c = BoxPosition::Range {
            boxes: vec![PageBox::new(2, 10.5, 20.0, 110.0, 32.0)],
        };
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&c));
    }

    #[test]
    fn test_positions_in_different_representations_differ() {
        let logical = Position::Logical(LogicalPosition::Point {
            at: "#pdfloc(ff,1,0)".parse().unwrap(),
        });
        let boxes = Position::Boxes(BoxPosition::Point {
            page: 1,
            x: 0.0,
            y: 0.0,
        });
        assert!(!logical.same_as(&boxes));
        assert!(logical.same_as(&logical.clone()));
    }

    #[test]
    fn test_page_of_range() {
        let position = Position::Logical(LogicalPosition::Range {
            start: "#pdfloc(ff,4,1)".parse().unwrap(),
            end: "#pdfloc(ff,5,9)".parse().unwrap(),
        });
        assert_eq!(position.page(), 4);
        assert!(position.is_range());
    }

    #[test]
    fn test_box_range_needs_boxes() {
        assert!(BoxPosition::range(Vec::new()).is_none());

        let range = BoxPosition::range(vec![PageBox::new(6, 1.0, 1.0, 9.0, 3.0)]).unwrap();
        assert_eq!(range.page(), 6);
    }

    #[test]
    fn test_create_note() {
        let position = Position::Boxes(BoxPosition::Point {
            page: 7,
            x: 1.0,
            y: 2.0,
        });
        let note = Annotation::note(position, "check this", now());
        assert_eq!(note.kind, AnnotationKind::Note);
        assert_eq!(note.text.as_deref(), Some("check this"));
        assert_eq!(note.page(), 7);
        assert_eq!(note.representation(), Representation::Boxes);
    }

    #[test]
    fn test_representation_from_str() {
        assert_eq!("boxes".parse::<Representation>().unwrap(), Representation::Boxes);
        assert_eq!("PDFLOC".parse::<Representation>().unwrap(), Representation::Logical);
        assert!("pixels".parse::<Representation>().is_err());
    }

    #[test]
    fn test_serialization() {
        let position = Position::Logical(LogicalPosition::Range {
            start: "#pdfloc(ff,1,2)".parse().unwrap(),
            end: "#pdfloc(ff,1,9)".parse().unwrap(),
        });
        let highlight = Annotation::highlight(position, now()).with_text("quote");

        let json = serde_json::to_string(&highlight).unwrap();
        assert!(json.contains("\"kind\":\"highlight\""));
        assert!(json.contains("\"representation\":\"logical\""));
    }
}
