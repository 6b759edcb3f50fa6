//! Coordinate conversion contract
//!
//! Maps positions between logical document locations and page bounding
//! boxes. The real mapping needs a PDF text layout engine and lives outside
//! this crate; the sync engine only depends on this trait.

use std::path::Path;

use crate::annotations::{BoxPosition, LogicalPosition};
use crate::error::ConversionError;

/// Converts positions between the two representations for one document.
///
/// Both methods return one entry per input position, in input order. `None`
/// marks a single position that could not be mapped; an `Err` means nothing
/// in the batch could be mapped (e.g. the document cannot be opened).
pub trait CoordinateConverter: Send + Sync {
    fn to_bounding_boxes(
        &self,
        document: &Path,
        locations: &[LogicalPosition],
    ) -> Result<Vec<Option<BoxPosition>>, ConversionError>;

    fn to_logical_locations(
        &self,
        document: &Path,
        boxes: &[BoxPosition],
    ) -> Result<Vec<Option<LogicalPosition>>, ConversionError>;
}

/// Converter used when no layout engine is configured.
///
/// Every batch fails, so annotations that would need conversion stay
/// unmatched instead of aborting the sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConverter;

impl CoordinateConverter for UnavailableConverter {
    fn to_bounding_boxes(
        &self,
        document: &Path,
        _locations: &[LogicalPosition],
    ) -> Result<Vec<Option<BoxPosition>>, ConversionError> {
        Err(ConversionError::Unavailable(format!(
            "no layout engine to map pdfloc to boxes for {}",
            document.display()
        )))
    }

    fn to_logical_locations(
        &self,
        document: &Path,
        _boxes: &[BoxPosition],
    ) -> Result<Vec<Option<LogicalPosition>>, ConversionError> {
        Err(ConversionError::Unavailable(format!(
            "no layout engine to map boxes to pdfloc for {}",
            document.display()
        )))
    }
}
