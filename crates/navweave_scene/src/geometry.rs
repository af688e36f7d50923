//! Collects the triangles that navmeshes are baked from.
//!
//! Geometry comes from two kinds of providers: a [`RenderableProvider`] listing mesh instances
//! and a [`TerrainProvider`] listing heightmap terrains. Both are optional. Triangles are
//! classified as walkable or not by their slope and by the flags of their material.

use bitflags::bitflags;
use glam::{Affine3A, UVec2, UVec3, Vec3A};
use navweave::{Aabb3d, AreaType, TriMesh};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

bitflags! {
    /// Navigation related flags of a material.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
    pub struct MaterialFlags: u8 {
        /// Triangles with this material are ignored by the navmesh entirely.
        const NO_NAVIGATION = 0x01;
        /// Triangles with this material block agents but cannot be walked on.
        const NON_WALKABLE = 0x02;
    }
}

/// Steepest walkable slope of mesh triangles.
pub const MESH_WALKABLE_SLOPE_DEGREES: f32 = 45.0;
/// Steepest walkable slope of terrain triangles.
pub const TERRAIN_WALKABLE_SLOPE_DEGREES: f32 = 60.0;

/// A range of triangles of a mesh sharing one material.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubMesh {
    /// Vertex indices of the triangles.
    pub indices: Vec<UVec3>,
    /// Flags of the material the triangles are rendered with.
    pub material: MaterialFlags,
}

/// A mesh placed in the scene.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshInstance {
    /// Local to world transform.
    pub transform: Affine3A,
    /// Vertices in local space.
    pub vertices: Vec<Vec3A>,
    /// The parts of the mesh.
    pub submeshes: Vec<SubMesh>,
}

impl MeshInstance {
    /// The world space bounds of the instance, or `None` if it has no vertices.
    pub fn world_bounds(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices).map(|bounds| bounds.transformed_by(&self.transform))
    }
}

/// A regular grid of height samples.
///
/// Sample `(x, z)` lies at `(x * xz_scale, height, z * xz_scale)` in terrain space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Heightmap {
    /// Terrain to world transform. Usually a rotation and a translation.
    pub transform: Affine3A,
    /// Number of samples along x and z.
    pub resolution: UVec2,
    /// Distance between two samples.
    pub xz_scale: f32,
    /// The heights, row by row along z.
    pub heights: Vec<f32>,
}

impl Heightmap {
    /// The height of sample `(x, z)`, clamped to the grid.
    pub fn height(&self, x: u32, z: u32) -> f32 {
        if self.resolution.x == 0 || self.resolution.y == 0 {
            return 0.0;
        }
        let x = x.min(self.resolution.x - 1);
        let z = z.min(self.resolution.y - 1);
        self.heights
            .get((z * self.resolution.x + x) as usize)
            .copied()
            .unwrap_or_default()
    }

    /// The bounds of the terrain in terrain space.
    pub fn local_bounds(&self) -> Option<Aabb3d> {
        if self.resolution.x == 0 || self.resolution.y == 0 {
            return None;
        }
        let (min_height, max_height) = self
            .heights
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), h| (lo.min(*h), hi.max(*h)));
        if min_height > max_height {
            return None;
        }
        Some(Aabb3d {
            min: Vec3A::new(0.0, min_height, 0.0),
            max: Vec3A::new(
                (self.resolution.x - 1) as f32 * self.xz_scale,
                max_height,
                (self.resolution.y - 1) as f32 * self.xz_scale,
            ),
        })
    }

    /// The world space bounds of the terrain.
    pub fn world_bounds(&self) -> Option<Aabb3d> {
        self.local_bounds()
            .map(|bounds| bounds.transformed_by(&self.transform))
    }

    fn sample(&self, x: u32, z: u32) -> Vec3A {
        let local = Vec3A::new(
            x as f32 * self.xz_scale,
            self.height(x, z),
            z as f32 * self.xz_scale,
        );
        self.transform.transform_point3a(local)
    }
}

/// Supplies the mesh instances of a scene.
pub trait RenderableProvider {
    /// Every mesh instance that may affect the navmesh.
    fn mesh_instances(&self) -> &[MeshInstance];
}

/// Supplies the terrains of a scene.
pub trait TerrainProvider {
    /// Every terrain that may affect the navmesh.
    fn terrains(&self) -> &[Heightmap];
}

impl RenderableProvider for Vec<MeshInstance> {
    fn mesh_instances(&self) -> &[MeshInstance] {
        self
    }
}

impl TerrainProvider for Vec<Heightmap> {
    fn terrains(&self) -> &[Heightmap] {
        self
    }
}

/// The geometry providers of a scene. Either may be absent.
#[derive(Clone, Copy, Default)]
pub struct SceneGeometry<'a> {
    /// Provider of mesh instances.
    pub renderables: Option<&'a dyn RenderableProvider>,
    /// Provider of terrains.
    pub terrains: Option<&'a dyn TerrainProvider>,
}

impl<'a> SceneGeometry<'a> {
    /// Geometry consisting of mesh instances only.
    pub fn from_renderables(renderables: &'a dyn RenderableProvider) -> Self {
        Self {
            renderables: Some(renderables),
            terrains: None,
        }
    }

    /// Adds a terrain provider.
    pub fn with_terrains(mut self, terrains: &'a dyn TerrainProvider) -> Self {
        self.terrains = Some(terrains);
        self
    }
}

impl std::fmt::Debug for SceneGeometry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneGeometry")
            .field(
                "renderables",
                &self.renderables.map(|r| r.mesh_instances().len()),
            )
            .field("terrains", &self.terrains.map(|t| t.terrains().len()))
            .finish()
    }
}

/// Turns scene geometry into classified triangles.
#[derive(Debug, Clone, Copy)]
pub struct GeometryCollector<'a> {
    geometry: &'a SceneGeometry<'a>,
}

impl<'a> GeometryCollector<'a> {
    /// Creates a collector reading from `geometry`.
    pub fn new(geometry: &'a SceneGeometry<'a>) -> Self {
        Self { geometry }
    }

    /// The union of the world space bounds of all meshes and terrains.
    pub fn world_bounds(&self) -> Option<Aabb3d> {
        let meshes = self
            .geometry
            .renderables
            .into_iter()
            .flat_map(|provider| provider.mesh_instances())
            .filter_map(MeshInstance::world_bounds);
        let terrains = self
            .geometry
            .terrains
            .into_iter()
            .flat_map(|provider| provider.terrains())
            .filter_map(Heightmap::world_bounds);
        meshes.chain(terrains).reduce(|a, b| a.union(&b))
    }

    /// Collects every triangle that may overlap `query`.
    pub fn collect(&self, query: Aabb3d) -> TriMesh {
        let mut trimesh = TriMesh::default();
        if let Some(renderables) = self.geometry.renderables {
            for instance in renderables.mesh_instances() {
                collect_mesh(instance, &query, &mut trimesh);
            }
        }
        if let Some(terrains) = self.geometry.terrains {
            for terrain in terrains.terrains() {
                collect_terrain(terrain, &query, &mut trimesh);
            }
        }
        trimesh
    }
}

fn walkable_area(triangle: &[Vec3A; 3], threshold_cos: f32) -> AreaType {
    let [a, b, c] = *triangle;
    let normal = (b - a).cross(c - a).normalize_or_zero();
    if normal.y > threshold_cos {
        AreaType::DEFAULT_WALKABLE
    } else {
        AreaType::NOT_WALKABLE
    }
}

fn collect_mesh(instance: &MeshInstance, query: &Aabb3d, trimesh: &mut TriMesh) {
    let Some(bounds) = instance.world_bounds() else {
        return;
    };
    if !bounds.intersects(query) {
        return;
    }
    let threshold_cos = MESH_WALKABLE_SLOPE_DEGREES.to_radians().cos();
    let vertices: Vec<Vec3A> = instance
        .vertices
        .iter()
        .map(|v| instance.transform.transform_point3a(*v))
        .collect();

    for submesh in &instance.submeshes {
        if submesh.material.contains(MaterialFlags::NO_NAVIGATION) {
            continue;
        }
        let walkable = !submesh.material.contains(MaterialFlags::NON_WALKABLE);
        for indices in &submesh.indices {
            let [Some(a), Some(b), Some(c)] = indices
                .to_array()
                .map(|i| vertices.get(i as usize).copied())
            else {
                tracing::warn!("Skipping a triangle with out of range vertex indices {indices}");
                continue;
            };
            let triangle = [a, b, c];
            let Some(triangle_bounds) = Aabb3d::from_verts(&triangle) else {
                continue;
            };
            if !triangle_bounds.intersects(query) {
                continue;
            }
            let area = if walkable {
                walkable_area(&triangle, threshold_cos)
            } else {
                AreaType::NOT_WALKABLE
            };
            trimesh.push_triangle(triangle, area);
        }
    }
}

fn collect_terrain(terrain: &Heightmap, query: &Aabb3d, trimesh: &mut TriMesh) {
    if terrain.resolution.x < 2 || terrain.resolution.y < 2 || terrain.xz_scale <= 0.0 {
        return;
    }
    let local_query = query.transformed_by(&terrain.transform.inverse());
    let scale = terrain.xz_scale;
    let cell_range = |min: f32, max: f32, resolution: u32| {
        let last = (resolution - 1) as f32;
        let from = (min / scale - 1.0).clamp(0.0, last) as u32;
        let to = (max / scale + 1.0).clamp(0.0, last) as u32;
        from..to
    };
    let xs = cell_range(local_query.min.x, local_query.max.x, terrain.resolution.x);
    let zs = cell_range(local_query.min.z, local_query.max.z, terrain.resolution.y);

    let threshold_cos = TERRAIN_WALKABLE_SLOPE_DEGREES.to_radians().cos();
    for z in zs {
        for x in xs.clone() {
            let p0 = terrain.sample(x, z);
            let p1 = terrain.sample(x + 1, z);
            let p2 = terrain.sample(x + 1, z + 1);
            let p3 = terrain.sample(x, z + 1);
            for triangle in [[p0, p2, p1], [p0, p3, p2]] {
                let area = walkable_area(&triangle, threshold_cos);
                trimesh.push_triangle(triangle, area);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(material: MaterialFlags, rise: f32) -> MeshInstance {
        MeshInstance {
            transform: Affine3A::IDENTITY,
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, rise, 1.0),
                Vec3A::new(1.0, rise, 0.0),
            ],
            submeshes: vec![SubMesh {
                indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
                material,
            }],
        }
    }

    fn everything() -> Aabb3d {
        Aabb3d::new(Vec3A::ZERO, Vec3A::splat(100.0))
    }

    #[test]
    fn no_providers_collect_nothing() {
        let geometry = SceneGeometry::default();
        let collector = GeometryCollector::new(&geometry);
        assert!(collector.collect(everything()).is_empty());
        assert!(collector.world_bounds().is_none());
    }

    #[test]
    fn materials_classify_triangles() {
        let meshes = vec![
            quad(MaterialFlags::empty(), 0.0),
            quad(MaterialFlags::NON_WALKABLE, 0.0),
            quad(MaterialFlags::NO_NAVIGATION, 0.0),
        ];
        let geometry = SceneGeometry::from_renderables(&meshes);
        let trimesh = GeometryCollector::new(&geometry).collect(everything());
        assert_eq!(
            trimesh.area_types,
            vec![
                AreaType::DEFAULT_WALKABLE,
                AreaType::DEFAULT_WALKABLE,
                AreaType::NOT_WALKABLE,
                AreaType::NOT_WALKABLE,
            ]
        );
    }

    #[test]
    fn steep_mesh_triangles_are_not_walkable() {
        // 50 degrees is walkable on terrain but not on meshes.
        let rise = 50.0_f32.to_radians().tan();
        let meshes = vec![quad(MaterialFlags::empty(), rise)];
        let geometry = SceneGeometry::from_renderables(&meshes);
        let trimesh = GeometryCollector::new(&geometry).collect(everything());
        assert!(trimesh.area_types.iter().all(|&a| a == AreaType::NOT_WALKABLE));
    }

    #[test]
    fn instances_outside_the_query_are_skipped() {
        let mut far = quad(MaterialFlags::empty(), 0.0);
        far.transform = Affine3A::from_translation(glam::Vec3::new(500.0, 0.0, 0.0));
        let meshes = vec![far];
        let geometry = SceneGeometry::from_renderables(&meshes);
        let collector = GeometryCollector::new(&geometry);
        assert!(collector.collect(everything()).is_empty());
        let bounds = collector.world_bounds().unwrap();
        assert_eq!(bounds.min.x, 500.0);
    }

    #[test]
    fn terrain_cells_become_two_triangles() {
        let terrains = vec![Heightmap {
            transform: Affine3A::IDENTITY,
            resolution: UVec2::new(5, 5),
            xz_scale: 1.0,
            heights: vec![0.0; 25],
        }];
        let geometry = SceneGeometry::default().with_terrains(&terrains);
        let collector = GeometryCollector::new(&geometry);
        let trimesh = collector.collect(everything());
        assert_eq!(trimesh.triangle_count(), 4 * 4 * 2);
        assert!(trimesh.area_types.iter().all(|&a| a == AreaType::DEFAULT_WALKABLE));

        let bounds = collector.world_bounds().unwrap();
        assert_eq!(bounds.max.x, 4.0);
        assert_eq!(bounds.max.z, 4.0);
    }

    #[test]
    fn terrain_query_is_clamped_to_a_cell_range() {
        let terrains = vec![Heightmap {
            transform: Affine3A::IDENTITY,
            resolution: UVec2::new(11, 11),
            xz_scale: 1.0,
            heights: vec![0.0; 121],
        }];
        let geometry = SceneGeometry::default().with_terrains(&terrains);
        let query = Aabb3d {
            min: Vec3A::new(2.0, -1.0, 2.0),
            max: Vec3A::new(4.0, 1.0, 4.0),
        };
        let trimesh = GeometryCollector::new(&geometry).collect(query);
        // Cells 1..5 along both axes.
        assert_eq!(trimesh.triangle_count(), 4 * 4 * 2);
    }
}
