//! Box list → rapier collision shape

use crate::error::{Result, TerrainError};
use crate::mesher::ShapeBox;
use rapier3d::prelude::*;

/// Build one native shape from chunk-local boxes.
///
/// Every box becomes a cuboid part of one compound, translated to its center.
/// Empty input and malformed boxes are rejected.
pub fn build_collision_shape(boxes: &[ShapeBox]) -> Result<SharedShape> {
    if boxes.is_empty() {
        return Err(TerrainError::Geometry("empty box list".into()));
    }
    if let Some((i, bad)) = boxes.iter().enumerate().find(|(_, b)| !b.is_well_formed()) {
        return Err(TerrainError::Geometry(format!(
            "box {i} malformed: center {} half extents {}",
            bad.center, bad.half_extents
        )));
    }

    let parts: Vec<(Isometry<Real>, SharedShape)> = boxes
        .iter()
        .map(|b| {
            let shape = SharedShape::cuboid(b.half_extents.x, b.half_extents.y, b.half_extents.z);
            let isometry = Isometry::translation(b.center.x, b.center.y, b.center.z);
            (isometry, shape)
        })
        .collect();

    Ok(SharedShape::compound(parts))
}

/// Number of primitive parts in a built shape
pub fn part_count(shape: &SharedShape) -> usize {
    shape.as_compound().map_or(1, |compound| compound.shapes().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_compound_has_one_part_per_box() {
        let boxes = vec![
            ShapeBox::from_voxel_run([0, 0, 0], [16, 1, 16]),
            ShapeBox::from_voxel_run([0, 1, 0], [1, 1, 1]),
            ShapeBox::from_voxel_run([4, 1, 4], [2, 3, 2]),
        ];
        let shape = build_collision_shape(&boxes).unwrap();
        assert_eq!(part_count(&shape), 3);
    }

    #[test]
    fn test_bounds_match_boxes() {
        let boxes = vec![ShapeBox::from_voxel_run([0, 0, 0], [16, 16, 16])];
        let shape = build_collision_shape(&boxes).unwrap();
        let aabb = shape.compute_local_aabb();

        assert!((aabb.mins.x - 0.0).abs() < 1e-4);
        assert!((aabb.maxs.y - 16.0).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_empty_and_degenerate() {
        assert!(matches!(
            build_collision_shape(&[]),
            Err(TerrainError::Geometry(_))
        ));

        let flat = ShapeBox {
            center: Vec3::splat(1.0),
            half_extents: Vec3::new(1.0, 0.0, 1.0),
        };
        assert!(build_collision_shape(&[flat]).is_err());

        let nan = ShapeBox {
            center: Vec3::new(f32::NAN, 0.0, 0.0),
            half_extents: Vec3::ONE,
        };
        assert!(build_collision_shape(&[nan]).is_err());
    }
}
