//! Annotation sets and positional correspondence
//!
//! An [`AnnotationSet`] holds every annotation of one document in the
//! representation its store produced. The alternate representation is
//! computed through a [`CoordinateConverter`] on first demand and cached on
//! the set, so a set never asks the converter twice for the same direction.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::Serialize;

use super::types::{Annotation, BoxPosition, Position, Representation};
use crate::coordinates::CoordinateConverter;
use crate::reconcile::reconcile;

/// Annotations of one document
#[derive(Debug)]
pub struct AnnotationSet {
    document: PathBuf,
    annotations: Vec<Annotation>,
    /// Converted positions, aligned with `annotations`; `None` for entries
    /// already native in that representation or that failed to convert
    boxes: OnceCell<Vec<Option<Position>>>,
    logical: OnceCell<Vec<Option<Position>>>,
}

/// Outcome of matching two annotation sets, as indices into each set
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationMatch {
    /// Representation the comparison was made in
    pub representation: Option<Representation>,
    pub pairs: Vec<(usize, usize)>,
    pub only_self: Vec<usize>,
    pub only_other: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Entry<'a> {
    index: usize,
    position: &'a Position,
    text: Option<&'a str>,
}

impl AnnotationSet {
    /// Create a set for the document at `document`
    pub fn new(document: impl Into<PathBuf>, annotations: Vec<Annotation>) -> Self {
        Self {
            document: document.into(),
            annotations,
            boxes: OnceCell::new(),
            logical: OnceCell::new(),
        }
    }

    /// Create a set with no annotations
    pub fn empty(document: impl Into<PathBuf>) -> Self {
        Self::new(document, Vec::new())
    }

    /// A new set with `added` appended to this set's annotations. Cached
    /// conversions are not carried over.
    pub fn extended(&self, added: Vec<Annotation>) -> Self {
        let mut annotations = self.annotations.clone();
        annotations.extend(added);
        Self::new(self.document.clone(), annotations)
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    fn cache(&self, repr: Representation) -> &OnceCell<Vec<Option<Position>>> {
        match repr {
            Representation::Boxes => &self.boxes,
            Representation::Logical => &self.logical,
        }
    }

    /// True when every annotation is available in `repr`, or conversion to
    /// `repr` has already been attempted
    pub fn is_materialized(&self, repr: Representation) -> bool {
        self.cache(repr).get().is_some()
            || self.annotations.iter().all(|a| a.representation() == repr)
    }

    /// Convert annotations into `repr` unless already done.
    ///
    /// Runs the converter at most once per direction for the lifetime of the
    /// set; concurrent callers wait for the first one.
    pub fn materialize(&self, repr: Representation, converter: &dyn CoordinateConverter) {
        self.cache(repr).get_or_init(|| self.convert(repr, converter));
    }

    /// Materialize both representations
    pub fn materialize_all(&self, converter: &dyn CoordinateConverter) {
        self.materialize(Representation::Boxes, converter);
        self.materialize(Representation::Logical, converter);
    }

    fn convert(&self, repr: Representation, converter: &dyn CoordinateConverter) -> Vec<Option<Position>> {
        let mut converted = vec![None; self.annotations.len()];

        let pending: Vec<usize> = self
            .annotations
            .iter()
            .enumerate()
            .filter(|(_, a)| a.representation() != repr)
            .map(|(i, _)| i)
            .collect();

        if pending.is_empty() {
            return converted;
        }

        let result: Result<Vec<Option<Position>>, _> = match repr {
            Representation::Boxes => {
                let locations: Vec<_> = pending
                    .iter()
                    .filter_map(|&i| self.annotations[i].position.as_logical().cloned())
                    .collect();
                converter.to_bounding_boxes(&self.document, &locations).map(|out| {
                    out.into_iter()
                        .map(|p| p.and_then(non_empty).map(Position::Boxes))
                        .collect()
                })
            }
            Representation::Logical => {
                let boxes: Vec<_> = pending
                    .iter()
                    .filter_map(|&i| self.annotations[i].position.as_boxes().cloned())
                    .collect();
                converter
                    .to_logical_locations(&self.document, &boxes)
                    .map(|out| out.into_iter().map(|p| p.map(Position::Logical)).collect())
            }
        };

        match result {
            Ok(positions) if positions.len() == pending.len() => {
                let mut failed = 0;
                for (index, position) in pending.into_iter().zip(positions) {
                    if position.is_none() {
                        failed += 1;
                    }
                    converted[index] = position;
                }
                if failed > 0 {
                    tracing::debug!(
                        document = %self.document.display(),
                        target = %repr,
                        failed,
                        "Some annotations could not be converted"
                    );
                }
            }
            Ok(positions) => {
                tracing::warn!(
                    document = %self.document.display(),
                    target = %repr,
                    expected = pending.len(),
                    got = positions.len(),
                    "Converter returned a mismatched batch, discarding it"
                );
            }
            Err(e) => {
                tracing::warn!(
                    document = %self.document.display(),
                    target = %repr,
                    error = %e,
                    "Coordinate conversion failed"
                );
            }
        }

        converted
    }

    /// Position of annotation `index` in `repr`, if known
    pub fn position_in(&self, index: usize, repr: Representation) -> Option<&Position> {
        let annotation = self.annotations.get(index)?;
        if annotation.representation() == repr {
            return Some(&annotation.position);
        }
        self.cache(repr).get()?.get(index)?.as_ref()
    }

    /// Copy of annotation `index` with its position expressed in `repr`
    pub fn annotation_in(&self, index: usize, repr: Representation) -> Option<Annotation> {
        let position = self.position_in(index, repr)?.clone();
        let mut annotation = self.annotations.get(index)?.clone();
        annotation.position = position;
        Some(annotation)
    }

    /// Pick the representation to compare `self` and `other` in, converting
    /// both sides fully when they share no complete representation
    fn comparison_representation(
        &self,
        other: &AnnotationSet,
        converter: &dyn CoordinateConverter,
        preferred: Representation,
    ) -> Representation {
        let alternate = preferred.alternate();
        if self.is_materialized(preferred) && other.is_materialized(preferred) {
            return preferred;
        }
        if self.is_materialized(alternate) && other.is_materialized(alternate) {
            return alternate;
        }

        self.materialize_all(converter);
        other.materialize_all(converter);
        preferred
    }

    fn entries(&self, repr: Representation) -> (Vec<Entry<'_>>, Vec<usize>) {
        let mut entries = Vec::with_capacity(self.annotations.len());
        let mut unconvertible = Vec::new();

        for (index, annotation) in self.annotations.iter().enumerate() {
            match self.position_in(index, repr) {
                Some(position) => entries.push(Entry {
                    index,
                    position,
                    text: annotation.text.as_deref(),
                }),
                None => unconvertible.push(index),
            }
        }

        (entries, unconvertible)
    }

    /// Match the annotations of `self` against `other`.
    ///
    /// Annotations are bucketed by page and equal when their positions
    /// coincide in a common representation and their texts are equal. An
    /// annotation whose position could not be converted is never compared
    /// and ends up on its own side.
    pub fn find_common_annotations(
        &self,
        other: &AnnotationSet,
        converter: &dyn CoordinateConverter,
        preferred: Representation,
    ) -> AnnotationMatch {
        if self.is_empty() && other.is_empty() {
            return AnnotationMatch::default();
        }

        let repr = self.comparison_representation(other, converter, preferred);
        let (left, left_unconvertible) = self.entries(repr);
        let (right, right_unconvertible) = other.entries(repr);

        let result = reconcile(
            left,
            right,
            |entry| entry.position.page(),
            |a, b| a.text == b.text && a.position.same_as(b.position),
        );

        let mut only_self: Vec<usize> = result.only_left.iter().map(|e| e.index).collect();
        only_self.extend(left_unconvertible);
        only_self.sort_unstable();

        let mut only_other: Vec<usize> = result.only_right.iter().map(|e| e.index).collect();
        only_other.extend(right_unconvertible);
        only_other.sort_unstable();

        AnnotationMatch {
            representation: Some(repr),
            pairs: result.pairs.iter().map(|(a, b)| (a.index, b.index)).collect(),
            only_self,
            only_other,
        }
    }
}

/// A range with no boxes has no page to compare on
fn non_empty(position: BoxPosition) -> Option<BoxPosition> {
    match position {
        BoxPosition::Range { boxes } => BoxPosition::range(boxes),
        point => Some(point),
    }
}
