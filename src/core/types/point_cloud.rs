//! Semantic point-cloud container.

use nalgebra::{DMatrix, DVector};

use crate::error::{MapperError, Result};

/// Descriptor name carrying per-point surface normals.
pub const NORMALS: &str = "normals";

/// Descriptor name carrying the per-point dynamic probability.
pub const PROBABILITY_DYNAMIC: &str = "probabilityDynamic";

/// A named per-point data block attached to a cloud.
///
/// `values` has one column per point; the row count is descriptor-specific
/// (3 for `normals` in 3-D, 1 for `probabilityDynamic`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub values: DMatrix<f32>,
}

/// Point cloud in homogeneous coordinates with named descriptors.
///
/// `features` has shape `(D+1) × n` with D ∈ {2, 3}; the last row is
/// identically 1. Every descriptor carries exactly `n` columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    features: DMatrix<f32>,
    descriptors: Vec<Descriptor>,
}

impl PointCloud {
    /// Empty cloud of the given Euclidean dimension, no descriptors.
    pub fn empty(euclidean_dim: usize) -> Self {
        Self {
            features: DMatrix::zeros(euclidean_dim + 1, 0),
            descriptors: Vec::new(),
        }
    }

    /// Build a cloud from a raw feature matrix.
    ///
    /// The homogeneous row is overwritten with 1 so the invariant holds no
    /// matter what the caller filled it with.
    pub fn from_features(mut features: DMatrix<f32>) -> Self {
        let last = features.nrows() - 1;
        features.row_mut(last).fill(1.0);
        Self {
            features,
            descriptors: Vec::new(),
        }
    }

    /// 2-D cloud from (x, y) pairs.
    pub fn from_xy(points: &[[f32; 2]]) -> Self {
        let mut features = DMatrix::zeros(3, points.len());
        for (i, p) in points.iter().enumerate() {
            features[(0, i)] = p[0];
            features[(1, i)] = p[1];
            features[(2, i)] = 1.0;
        }
        Self {
            features,
            descriptors: Vec::new(),
        }
    }

    /// 3-D cloud from (x, y, z) triples.
    pub fn from_xyz(points: &[[f32; 3]]) -> Self {
        let mut features = DMatrix::zeros(4, points.len());
        for (i, p) in points.iter().enumerate() {
            features[(0, i)] = p[0];
            features[(1, i)] = p[1];
            features[(2, i)] = p[2];
            features[(3, i)] = 1.0;
        }
        Self {
            features,
            descriptors: Vec::new(),
        }
    }

    /// Build a cloud from parts, validating the descriptor widths.
    pub fn new(features: DMatrix<f32>, descriptors: Vec<Descriptor>) -> Result<Self> {
        let n = features.ncols();
        for d in &descriptors {
            if d.values.ncols() != n {
                return Err(MapperError::Map(format!(
                    "descriptor '{}' has {} columns for {} points",
                    d.name,
                    d.values.ncols(),
                    n
                )));
            }
        }
        let mut cloud = Self::from_features(features);
        cloud.descriptors = descriptors;
        Ok(cloud)
    }

    #[inline]
    pub fn nb_points(&self) -> usize {
        self.features.ncols()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.ncols() == 0
    }

    #[inline]
    pub fn euclidean_dim(&self) -> usize {
        self.features.nrows() - 1
    }

    #[inline]
    pub fn homogeneous_dim(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn features(&self) -> &DMatrix<f32> {
        &self.features
    }

    pub(crate) fn set_features(&mut self, features: DMatrix<f32>) {
        debug_assert_eq!(features.shape(), self.features.shape());
        self.features = features;
    }

    /// Euclidean coordinates of point `i`.
    pub fn point(&self, i: usize) -> DVector<f32> {
        let dim = self.euclidean_dim();
        self.features.column(i).rows(0, dim).into_owned()
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, name: &str) -> Option<&DMatrix<f32>> {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .map(|d| &d.values)
    }

    pub fn descriptor_mut(&mut self, name: &str) -> Option<&mut DMatrix<f32>> {
        self.descriptors
            .iter_mut()
            .find(|d| d.name == name)
            .map(|d| &mut d.values)
    }

    pub fn has_descriptor(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| d.name == name)
    }

    /// Attach a descriptor, replacing any existing block of the same name.
    pub fn add_descriptor(&mut self, name: &str, values: DMatrix<f32>) -> Result<()> {
        if values.ncols() != self.nb_points() {
            return Err(MapperError::Map(format!(
                "descriptor '{}' has {} columns for {} points",
                name,
                values.ncols(),
                self.nb_points()
            )));
        }
        if let Some(existing) = self.descriptor_mut(name) {
            *existing = values;
        } else {
            self.descriptors.push(Descriptor {
                name: name.to_string(),
                values,
            });
        }
        Ok(())
    }

    /// Cloud with the same feature/descriptor schema and `n` zeroed points.
    pub fn create_similar_empty(&self, n: usize) -> PointCloud {
        let mut features = DMatrix::zeros(self.homogeneous_dim(), n);
        let last = features.nrows() - 1;
        features.row_mut(last).fill(1.0);
        let descriptors = self
            .descriptors
            .iter()
            .map(|d| Descriptor {
                name: d.name.clone(),
                values: DMatrix::zeros(d.values.nrows(), n),
            })
            .collect();
        PointCloud {
            features,
            descriptors,
        }
    }

    /// Copy point `src_col` of `src` (features and all descriptors) into
    /// column `dst` of this cloud. Both clouds must share the same schema,
    /// as produced by [`PointCloud::create_similar_empty`].
    pub fn set_col_from(&mut self, dst: usize, src: &PointCloud, src_col: usize) {
        debug_assert_eq!(self.homogeneous_dim(), src.homogeneous_dim());
        debug_assert_eq!(self.descriptors.len(), src.descriptors.len());
        self.features
            .set_column(dst, &src.features.column(src_col));
        for (d, s) in self.descriptors.iter_mut().zip(src.descriptors.iter()) {
            d.values.set_column(dst, &s.values.column(src_col));
        }
    }

    /// Truncate to the first `n` points.
    pub fn conservative_resize(&mut self, n: usize) {
        debug_assert!(n <= self.nb_points());
        self.features = self.features.columns(0, n).into_owned();
        for d in &mut self.descriptors {
            d.values = d.values.columns(0, n).into_owned();
        }
    }

    /// Keep only the listed columns, in order.
    pub fn keep_columns(&mut self, indices: &[usize]) {
        let mut features = DMatrix::zeros(self.homogeneous_dim(), indices.len());
        for (dst, &src) in indices.iter().enumerate() {
            features.set_column(dst, &self.features.column(src));
        }
        self.features = features;
        for d in &mut self.descriptors {
            let mut values = DMatrix::zeros(d.values.nrows(), indices.len());
            for (dst, &src) in indices.iter().enumerate() {
                values.set_column(dst, &d.values.column(src));
            }
            d.values = values;
        }
    }

    /// Append the points of `other`, keeping this cloud's descriptor schema.
    ///
    /// A descriptor missing from `other` is zero-filled for the appended
    /// points; descriptors only present on `other` are dropped.
    pub fn concatenate(&mut self, other: &PointCloud) {
        if other.is_empty() {
            return;
        }
        if self.homogeneous_dim() != other.homogeneous_dim() {
            log::warn!(
                "Refusing to concatenate clouds of dimension {} and {}",
                self.euclidean_dim(),
                other.euclidean_dim()
            );
            return;
        }
        if self.is_empty() && self.descriptors.is_empty() {
            *self = other.clone();
            return;
        }

        let n = self.nb_points();
        let m = other.nb_points();
        let h = self.homogeneous_dim();

        let mut features = DMatrix::zeros(h, n + m);
        features.view_mut((0, 0), (h, n)).copy_from(&self.features);
        features.view_mut((0, n), (h, m)).copy_from(&other.features);
        self.features = features;

        for d in &mut self.descriptors {
            let rows = d.values.nrows();
            let mut values = DMatrix::zeros(rows, n + m);
            values.view_mut((0, 0), (rows, n)).copy_from(&d.values);
            match other.descriptor(&d.name) {
                Some(o) if o.nrows() == rows => {
                    values.view_mut((0, n), (rows, m)).copy_from(o);
                }
                _ => {
                    log::warn!(
                        "Concatenated points carry no '{}' descriptor; zero-filling",
                        d.name
                    );
                }
            }
            d.values = values;
        }
    }
}
