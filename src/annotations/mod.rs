//! Annotation module
//!
//! Provides the annotation record, its two position representations and the
//! per-document annotation set that matches against another set.
//!
//! # Features
//!
//! - Annotation kinds:
//!   - Highlights
//!   - Notes
//!   - Bookmarks
//!
//! - Position representations:
//!   - Logical (`#pdfloc`) locations, as written by e-readers
//!   - Page bounding boxes, as stored by reference managers
//!
//! - Lazy, cached conversion between representations

mod set;
mod types;

pub use set::{AnnotationMatch, AnnotationSet};
pub use types::{
    Annotation, AnnotationKind, BoxPosition, LogicalPosition, PageBox, PdfLoc, Position,
    Representation, Timestamp, BOX_TOLERANCE,
};
