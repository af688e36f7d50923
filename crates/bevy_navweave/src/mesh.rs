use bevy_app::prelude::*;
use bevy_asset::prelude::*;
use bevy_ecs::prelude::*;
use bevy_mesh::{Mesh, PrimitiveTopology};
use bevy_reflect::prelude::*;
use bevy_render::prelude::*;
use bevy_transform::components::GlobalTransform;
use glam::{Affine3A, UVec3, Vec3A};
use navweave_scene::{MaterialFlags, MeshInstance, SubMesh};

use crate::NavmeshApp as _;

/// A backend for [`crate::NavweavePlugin`].
/// Uses all entities with a [`Mesh3d`] component to generate navmeshes.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct Mesh3dNavmeshPlugin;

impl Plugin for Mesh3dNavmeshPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<NavmeshMaterial>()
            .set_navmesh_geometry_backend(mesh3d_backend);
    }
}

/// How the triangles of a [`Mesh3d`] take part in navmesh generation.
/// Meshes without this component are walkable where they are flat enough.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Reflect)]
#[reflect(Component, Default)]
pub struct NavmeshMaterial {
    /// The mesh is ignored entirely.
    pub no_navigation: bool,
    /// The mesh blocks agents but is never walkable.
    pub non_walkable: bool,
}

impl NavmeshMaterial {
    /// The corresponding [`MaterialFlags`].
    pub fn flags(&self) -> MaterialFlags {
        let mut flags = MaterialFlags::empty();
        flags.set(MaterialFlags::NO_NAVIGATION, self.no_navigation);
        flags.set(MaterialFlags::NON_WALKABLE, self.non_walkable);
        flags
    }
}

fn mesh3d_backend(
    meshes: Res<Assets<Mesh>>,
    affectors: Query<(&GlobalTransform, &Mesh3d, Option<&NavmeshMaterial>)>,
) -> Vec<MeshInstance> {
    affectors
        .iter()
        .filter_map(|(transform, mesh, material)| {
            let mesh = meshes.get(mesh)?;
            let material = material.map(NavmeshMaterial::flags).unwrap_or_default();
            MeshInstance::from_mesh(mesh, transform.affine(), material)
        })
        .collect::<Vec<_>>()
}

/// Used to add [`MeshInstanceFromBevyMesh::from_mesh`] to [`MeshInstance`].
pub trait MeshInstanceFromBevyMesh {
    /// Converts a [`Mesh`] placed at `transform` into a [`MeshInstance`] with a single submesh.
    fn from_mesh(mesh: &Mesh, transform: Affine3A, material: MaterialFlags) -> Option<MeshInstance>;
}

impl MeshInstanceFromBevyMesh for MeshInstance {
    fn from_mesh(mesh: &Mesh, transform: Affine3A, material: MaterialFlags) -> Option<MeshInstance> {
        if mesh.primitive_topology() != PrimitiveTopology::TriangleList {
            return None;
        }

        let position = mesh.attribute(Mesh::ATTRIBUTE_POSITION)?;
        let float = position.as_float3()?;
        let vertices = float.iter().map(|v| Vec3A::from(*v)).collect();

        let indices: Vec<_> = mesh.indices()?.iter().collect();
        if !indices.len().is_multiple_of(3) {
            return None;
        }
        let indices = indices
            .chunks(3)
            .map(|indices| {
                UVec3::from_array([indices[0] as u32, indices[1] as u32, indices[2] as u32])
            })
            .collect();
        Some(MeshInstance {
            transform,
            vertices,
            submeshes: vec![SubMesh { indices, material }],
        })
    }
}

#[cfg(test)]
mod tests {
    use bevy_asset::RenderAssetUsages;
    use bevy_mesh::Indices;

    use super::*;

    fn triangle() -> Mesh {
        Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
            .with_inserted_attribute(
                Mesh::ATTRIBUTE_POSITION,
                vec![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]],
            )
            .with_inserted_indices(Indices::U32(vec![0, 1, 2]))
    }

    #[test]
    fn triangle_lists_convert() {
        let transform = Affine3A::from_translation(glam::Vec3::new(2.0, 0.0, 0.0));
        let instance =
            MeshInstance::from_mesh(&triangle(), transform, MaterialFlags::NON_WALKABLE).unwrap();
        assert_eq!(instance.vertices.len(), 3);
        assert_eq!(instance.submeshes.len(), 1);
        assert_eq!(instance.submeshes[0].indices, vec![UVec3::new(0, 1, 2)]);
        assert_eq!(instance.submeshes[0].material, MaterialFlags::NON_WALKABLE);
        assert_eq!(instance.world_bounds().unwrap().min.x, 2.0);
    }

    #[test]
    fn other_topologies_are_skipped() {
        let mesh = Mesh::new(PrimitiveTopology::LineList, RenderAssetUsages::default())
            .with_inserted_attribute(
                Mesh::ATTRIBUTE_POSITION,
                vec![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            );
        assert!(MeshInstance::from_mesh(&mesh, Affine3A::IDENTITY, MaterialFlags::empty()).is_none());
    }

    #[test]
    fn material_flags_follow_the_component() {
        let material = NavmeshMaterial {
            no_navigation: true,
            non_walkable: false,
        };
        assert_eq!(material.flags(), MaterialFlags::NO_NAVIGATION);
        assert_eq!(NavmeshMaterial::default().flags(), MaterialFlags::empty());
    }
}
