//! Ordered collection of the spectral objects of one exposure.
//!
//! One collection spans every slit and detector of a single exposure.
//! Records are shared, not copied: filtering clones reference-counted
//! handles, so a filtered view of a large collection costs nothing per
//! array. Insertion order is preserved by every operation; identifier
//! uniqueness is enforced on insertion.

use std::sync::Arc;

use thiserror::Error;

use crate::frame::{ExposureMeta, ObjectType};
use crate::identifier::SpecObjId;
use crate::specobj::SpecObj;

/// Errors from collection operations.
#[derive(Error, Debug)]
pub enum CollectionError {
    /// A record with this identifier is already present.
    #[error("duplicate identifier {token} in collection for exposure {exposure}")]
    DuplicateIdentifier {
        /// The colliding token.
        token: String,
        /// Exposure tag of the collection.
        exposure: String,
    },

    /// No record with this identifier is present.
    #[error("identifier {token} not found in collection for exposure {exposure}")]
    NotFound {
        /// The requested token.
        token: String,
        /// Exposure tag of the collection.
        exposure: String,
    },
}

/// Ordered, uniqueness-enforcing container of [`SpecObj`] records.
#[derive(Debug, Clone)]
pub struct SpecObjs {
    meta: ExposureMeta,
    records: Vec<Arc<SpecObj>>,
}

impl SpecObjs {
    /// Empty collection for one exposure.
    pub fn new(meta: ExposureMeta) -> Self {
        Self {
            meta,
            records: Vec::new(),
        }
    }

    /// Exposure-level metadata.
    pub fn meta(&self) -> &ExposureMeta {
        &self.meta
    }

    /// Append a record, rejecting identifier collisions.
    ///
    /// Two distinct traces that quantize to the same spatial pixel collide
    /// here, not in the identifier scheme, which is a pure function.
    pub fn add(&mut self, obj: SpecObj) -> Result<(), CollectionError> {
        self.add_shared(Arc::new(obj))
    }

    /// Append an already-shared record, rejecting identifier collisions.
    pub fn add_shared(&mut self, obj: Arc<SpecObj>) -> Result<(), CollectionError> {
        if self.records.iter().any(|r| r.id() == obj.id()) {
            return Err(CollectionError::DuplicateIdentifier {
                token: obj.name(),
                exposure: self.meta.exposure.clone(),
            });
        }
        self.records.push(obj);
        Ok(())
    }

    /// Look up a record by identifier.
    pub fn get(&self, id: &SpecObjId) -> Result<&SpecObj, CollectionError> {
        self.records
            .iter()
            .find(|r| r.id() == *id)
            .map(|r| r.as_ref())
            .ok_or_else(|| CollectionError::NotFound {
                token: id.name(),
                exposure: self.meta.exposure.clone(),
            })
    }

    /// Select records satisfying `predicate` into a new collection.
    ///
    /// Shares the underlying records and preserves relative order.
    pub fn filter<P>(&self, predicate: P) -> SpecObjs
    where
        P: Fn(&SpecObj) -> bool,
    {
        SpecObjs {
            meta: self.meta.clone(),
            records: self
                .records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        }
    }

    /// Records detected in one slit.
    pub fn by_slit(&self, slit_index: u32) -> SpecObjs {
        self.filter(|r| r.id().slit_index() == slit_index)
    }

    /// Records detected on one detector.
    pub fn by_detector(&self, detector_index: u32) -> SpecObjs {
        self.filter(|r| r.id().detector_index() == detector_index)
    }

    /// Records of one object classification.
    pub fn of_type(&self, object_type: ObjectType) -> SpecObjs {
        self.filter(|r| r.object_type() == object_type)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no record has been added.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SpecObj> {
        self.records.iter().map(|r| r.as_ref())
    }

    /// Shared handles in insertion order.
    pub fn records(&self) -> &[Arc<SpecObj>] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ExposureLayout;
    use crate::specobj::{ExtractionMethod, Spectrum1d, SpectrumSummary};
    use ndarray::Array1;

    fn meta() -> ExposureMeta {
        ExposureMeta {
            instrument: "test_spec".to_string(),
            exposure: "frame0001".to_string(),
            layout: ExposureLayout {
                nspat: 1024,
                nslits: 8,
                ndetectors: 2,
            },
        }
    }

    fn record(spat: u32, slit: u32, det: u32) -> SpecObj {
        let id = SpecObjId::new(spat, slit, det, &meta().layout).unwrap();
        let n = 4;
        SpecObj::new(
            id,
            ObjectType::Science,
            ExtractionMethod::Boxcar,
            Spectrum1d {
                wave: Array1::linspace(4000.0, 4003.0, n),
                flux: Array1::from_elem(n, spat as f64),
                ivar: Array1::ones(n),
                mask: Array1::from_elem(n, true),
            },
            SpectrumSummary::empty(),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_add_then_get() {
        let mut s = SpecObjs::new(meta());
        let obj = record(100, 0, 1);
        let id = obj.id();
        s.add(obj).unwrap();

        let back = s.get(&id).unwrap();
        assert_eq!(back.id(), id);
        assert_eq!(back.spectrum().flux[0], 100.0);
    }

    #[test]
    fn test_duplicate_add_fails() {
        let mut s = SpecObjs::new(meta());
        s.add(record(100, 0, 1)).unwrap();
        let result = s.add(record(100, 0, 1));
        assert!(matches!(
            result,
            Err(CollectionError::DuplicateIdentifier { .. })
        ));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_same_spat_different_slit_is_not_a_collision() {
        let mut s = SpecObjs::new(meta());
        s.add(record(100, 0, 1)).unwrap();
        s.add(record(100, 1, 1)).unwrap();
        s.add(record(100, 0, 2)).unwrap();
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_get_missing() {
        let s = SpecObjs::new(meta());
        let id = SpecObjId::new(5, 0, 1, &meta().layout).unwrap();
        assert!(matches!(s.get(&id), Err(CollectionError::NotFound { .. })));
    }

    #[test]
    fn test_filters_preserve_order_and_share_records() {
        let mut s = SpecObjs::new(meta());
        s.add(record(10, 0, 1)).unwrap();
        s.add(record(20, 1, 1)).unwrap();
        s.add(record(30, 0, 2)).unwrap();
        s.add(record(40, 0, 1)).unwrap();

        let slit0 = s.by_slit(0);
        let spats: Vec<u32> = slit0.iter().map(|r| r.id().spatial_pixel()).collect();
        assert_eq!(spats, vec![10, 30, 40]);

        // Same allocation, not a copy.
        assert!(Arc::ptr_eq(&s.records()[0], &slit0.records()[0]));

        let det1 = s.by_detector(1);
        let spats: Vec<u32> = det1.iter().map(|r| r.id().spatial_pixel()).collect();
        assert_eq!(spats, vec![10, 20, 40]);
    }

    #[test]
    fn test_of_type_filter() {
        let mut s = SpecObjs::new(meta());
        s.add(record(10, 0, 1)).unwrap();
        let std_id = SpecObjId::new(20, 1, 1, &meta().layout).unwrap();
        s.add(SpecObj::undetected(std_id, ObjectType::Standard, 0.0))
            .unwrap();

        assert_eq!(s.of_type(ObjectType::Science).len(), 1);
        assert_eq!(s.of_type(ObjectType::Standard).len(), 1);
        assert_eq!(s.of_type(ObjectType::Calibration).len(), 0);
    }
}
