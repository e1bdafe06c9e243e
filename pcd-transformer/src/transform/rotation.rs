use nalgebra::{Matrix3, Rotation3, Vector3};
use pcd_core::pointcloud::{
    block::PointBlock,
    point::{is_valid_cartesian, Point},
};

use super::Transform;
use crate::error::TransformError;

/// Rotation matrix for the angles (degrees) `phi`, `omega` and `kappa` about
/// the axes named by `order`, e.g. "xyz" or "zxz".
pub fn euler_to_rotation_matrix(phi: f64, omega: f64, kappa: f64, order: &str) -> Result<Matrix3<f64>, TransformError> {
    let axes: Vec<char> = order.to_ascii_lowercase().chars().collect();
    if axes.len() != 3 || axes.iter().any(|a| !matches!(a, 'x' | 'y' | 'z')) {
        return Err(TransformError::InvalidRotationOrder(order.to_string()));
    }

    let mut matrix = Matrix3::identity();
    for (axis, angle) in axes.into_iter().zip([phi, omega, kappa]) {
        let axis = match axis {
            'x' => Vector3::x_axis(),
            'y' => Vector3::y_axis(),
            _ => Vector3::z_axis(),
        };
        matrix *= Rotation3::from_axis_angle(&axis, angle.to_radians()).into_inner();
    }
    Ok(matrix)
}

/// Rotates the valid points of a cartesian cloud.
pub struct RotationTransform {
    matrix: Matrix3<f64>,
}

impl RotationTransform {
    pub fn new(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    pub fn from_euler(phi: f64, omega: f64, kappa: f64, order: &str) -> Result<Self, TransformError> {
        Ok(Self::new(euler_to_rotation_matrix(phi, omega, kappa, order)?))
    }
}

impl Transform for RotationTransform {
    fn transform(&self, mut block: PointBlock) -> Result<PointBlock, TransformError> {
        for pixel in block.pixels_mut() {
            let point = Point::new(pixel[0], pixel[1], pixel[2]);
            if is_valid_cartesian(&point) {
                pixel[..3].copy_from_slice((self.matrix * point).as_slice());
            }
        }
        Ok(block)
    }
}
