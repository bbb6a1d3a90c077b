//! Homogeneous rigid transforms for 2-D and 3-D clouds.

use nalgebra::{DMatrix, DVector};

use super::point_cloud::{PointCloud, NORMALS};
use crate::error::{MapperError, Result};

/// Rigid transform as a square homogeneous matrix of side D+1, D ∈ {2, 3}.
///
/// The last row is (0, …, 0, 1) for every transform produced by this type;
/// [`RigidTransform::corrected`] restores it exactly after drift.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidTransform {
    matrix: DMatrix<f32>,
}

impl RigidTransform {
    /// Identity transform for the given Euclidean dimension.
    pub fn identity(euclidean_dim: usize) -> Self {
        Self {
            matrix: DMatrix::identity(euclidean_dim + 1, euclidean_dim + 1),
        }
    }

    /// Wrap a homogeneous matrix, checking its shape.
    pub fn from_matrix(matrix: DMatrix<f32>) -> Result<Self> {
        let n = matrix.nrows();
        if matrix.ncols() != n || !(3..=4).contains(&n) {
            return Err(MapperError::Map(format!(
                "invalid homogeneous transform shape: {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Ok(Self { matrix })
    }

    /// Pure translation, mostly useful in tests and bridge adapters.
    pub fn from_translation(translation: &[f32]) -> Self {
        let dim = translation.len();
        let mut matrix = DMatrix::identity(dim + 1, dim + 1);
        for (i, &t) in translation.iter().enumerate() {
            matrix[(i, dim)] = t;
        }
        Self { matrix }
    }

    #[inline]
    pub fn matrix(&self) -> &DMatrix<f32> {
        &self.matrix
    }

    #[inline]
    pub fn euclidean_dim(&self) -> usize {
        self.matrix.nrows() - 1
    }

    #[inline]
    pub fn homogeneous_dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Rotation block (top-left D×D), owned.
    pub fn rotation(&self) -> DMatrix<f32> {
        let d = self.euclidean_dim();
        self.matrix.view((0, 0), (d, d)).into_owned()
    }

    /// Translation column (top-right D×1), owned.
    pub fn translation(&self) -> DVector<f32> {
        let d = self.euclidean_dim();
        self.matrix.view((0, d), (d, 1)).column(0).into_owned()
    }

    /// `self · other`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            matrix: &self.matrix * &other.matrix,
        }
    }

    /// Rigid inverse (Rᵀ, −Rᵀt); exact last row.
    pub fn inverse(&self) -> RigidTransform {
        let d = self.euclidean_dim();
        let r_t = self.matrix.view((0, 0), (d, d)).transpose();
        let t = self.translation();
        let neg_t = -(&r_t * t);
        let mut matrix = DMatrix::identity(d + 1, d + 1);
        matrix.view_mut((0, 0), (d, d)).copy_from(&r_t);
        matrix.view_mut((0, d), (d, 1)).copy_from(&neg_t);
        RigidTransform { matrix }
    }

    /// Re-project to the nearest proper rigid transform: the rotation block
    /// is replaced by its closest orthonormal matrix (via SVD), the
    /// translation is unchanged and the last row is exactly (0, …, 0, 1).
    pub fn corrected(&self) -> RigidTransform {
        let d = self.euclidean_dim();
        let block = self.matrix.view((0, 0), (d, d)).into_owned();
        let svd = block.svd(true, true);
        let mut u = svd.u.expect("SVD of rotation block");
        let v_t = svd.v_t.expect("SVD of rotation block");
        let mut rotation = &u * &v_t;
        if rotation.determinant() < 0.0 {
            let last = d - 1;
            for i in 0..d {
                u[(i, last)] = -u[(i, last)];
            }
            rotation = &u * &v_t;
        }
        let mut matrix = DMatrix::identity(d + 1, d + 1);
        matrix.view_mut((0, 0), (d, d)).copy_from(&rotation);
        matrix
            .view_mut((0, d), (d, 1))
            .copy_from(&self.translation());
        RigidTransform { matrix }
    }

    /// Whether the rotation block is orthonormal within `tol` and the last
    /// row is exactly homogeneous.
    pub fn is_rigid(&self, tol: f32) -> bool {
        let d = self.euclidean_dim();
        for j in 0..d {
            if self.matrix[(d, j)] != 0.0 {
                return false;
            }
        }
        if self.matrix[(d, d)] != 1.0 {
            return false;
        }
        (self.rotation().determinant().abs() - 1.0).abs() <= tol
    }

    /// Transform a single Euclidean point.
    pub fn transform_point(&self, point: &DVector<f32>) -> DVector<f32> {
        let d = self.euclidean_dim();
        let r = self.matrix.view((0, 0), (d, d));
        &r * point + self.translation()
    }

    /// Transform a cloud, rotating its `normals` descriptor along.
    pub fn apply(&self, cloud: &PointCloud) -> PointCloud {
        let mut out = cloud.clone();
        self.apply_in_place(&mut out);
        out
    }

    /// In-place variant of [`RigidTransform::apply`].
    pub fn apply_in_place(&self, cloud: &mut PointCloud) {
        debug_assert_eq!(self.homogeneous_dim(), cloud.homogeneous_dim());
        let transformed = &self.matrix * cloud.features();
        cloud.set_features(transformed);
        let d = self.euclidean_dim();
        let rotation = self.matrix.view((0, 0), (d, d)).into_owned();
        if let Some(normals) = cloud.descriptor_mut(NORMALS) {
            if normals.nrows() == d {
                let rotated = &rotation * &*normals;
                normals.copy_from(&rotated);
            }
        }
    }
}

impl std::ops::Mul for &RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: &RigidTransform) -> RigidTransform {
        self.compose(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use std::f32::consts::FRAC_PI_2;

    fn rotation_2d(theta: f32) -> RigidTransform {
        let (s, c) = theta.sin_cos();
        RigidTransform::from_matrix(DMatrix::from_row_slice(
            3,
            3,
            &[c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0],
        ))
        .unwrap()
    }

    #[test]
    fn test_identity_dims() {
        assert_eq!(RigidTransform::identity(2).homogeneous_dim(), 3);
        assert_eq!(RigidTransform::identity(3).homogeneous_dim(), 4);
    }

    #[test]
    fn test_from_matrix_rejects_bad_shapes() {
        assert!(RigidTransform::from_matrix(DMatrix::zeros(3, 4)).is_err());
        assert!(RigidTransform::from_matrix(DMatrix::zeros(5, 5)).is_err());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let mut t = rotation_2d(0.7);
        t = RigidTransform::from_translation(&[1.0, -2.0]).compose(&t);
        let round = t.compose(&t.inverse());
        let identity = RigidTransform::identity(2);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(
                    round.matrix()[(i, j)],
                    identity.matrix()[(i, j)],
                    epsilon = 1e-5
                );
            }
        }
    }

    #[test]
    fn test_transform_point_rotation() {
        let t = rotation_2d(FRAC_PI_2);
        let p = t.transform_point(&DVector::from_vec(vec![1.0, 0.0]));
        assert_relative_eq!(p[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_corrected_restores_rigidity() {
        let mut matrix = rotation_2d(0.3).matrix().clone();
        // Perturb the rotation block and the homogeneous row.
        matrix[(0, 0)] += 0.05;
        matrix[(1, 0)] -= 0.02;
        matrix[(2, 0)] = 1e-6;
        let skewed = RigidTransform { matrix };
        assert!(!skewed.is_rigid(1e-4));

        let fixed = skewed.corrected();
        assert!(fixed.is_rigid(1e-4));
        assert_relative_eq!(
            fixed.rotation().determinant(),
            1.0,
            epsilon = 1e-4
        );
        // Translation untouched.
        assert_eq!(fixed.translation(), skewed.translation());
    }

    #[test]
    fn test_apply_rotates_normals() {
        let mut cloud = PointCloud::from_xy(&[[1.0, 0.0]]);
        cloud
            .add_descriptor(NORMALS, DMatrix::from_column_slice(2, 1, &[1.0, 0.0]))
            .unwrap();

        let t = rotation_2d(FRAC_PI_2);
        let out = t.apply(&cloud);
        let normals = out.descriptor(NORMALS).unwrap();
        assert_relative_eq!(normals[(0, 0)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(normals[(1, 0)], 1.0, epsilon = 1e-6);
        // Homogeneous row untouched by the transform.
        assert_relative_eq!(out.features()[(2, 0)], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_compose_translation() {
        let a = RigidTransform::from_translation(&[1.0, 2.0, 3.0]);
        let b = RigidTransform::from_translation(&[-1.0, 0.5, 0.0]);
        let c = &a * &b;
        assert_eq!(
            c.translation(),
            DVector::from_vec(vec![0.0, 2.5, 3.0])
        );
    }
}
