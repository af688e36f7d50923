use glam::Vec3A;

use crate::{Aabb3d, BuildContoursFlags};
#[cfg(feature = "bevy_reflect")]
use bevy_reflect::prelude::*;

/// Specifies a configuration to use when baking navmesh tiles. Usually built using [`NavmeshConfigBuilder`].
///
/// This is an aggregation of parameters used at the different stages of the bake. All grid
/// quantities are derived from the designer-facing values of the builder.
///
/// Units are usually in voxels (vx) or world units (wu). The units for voxels, grid size,
/// and cell size are all based on the values of cs and ch.
///
/// > Note:
/// >
/// > First you should decide the size of your agent's logical cylinder.
/// > If your game world uses meters as units, a reasonable starting point for a human-sized agent
/// > might be a radius of 0.5 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis, including the border on both sides. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis, including the border on both sides. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The width/height size of tiles on the xz-plane, without border. `[Limit: >= 0] [Units: vx]`
    pub tile_size: u16,

    /// The size of the non-navigable border around each tile. `[Limit: >=0] [Units: vx]`
    ///
    /// Geometry within the border is rasterized so that tiles see their neighbors' obstacles,
    /// but no polygons are generated for it.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// A recommended starting value is either r/2 or r/3 of the agent radius r.
    /// Smaller values increase rasterization resolution and navmesh detail, at the cost of
    /// generation time.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// A good starting point is half the cell size. Lower values let the navmesh connect areas
    /// separated by small curbs or ditches.
    pub cell_height: f32,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area to
    /// be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// Calculated as `(agent_height / cell_height).ceil()`.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// Calculated as `(max_climb / cell_height).floor()`.
    pub walkable_climb: u16,

    /// The distance to erode/shrink the walkable area of the heightfield away from
    /// obstructions. `[Limit: >=0] [Units: vx]`
    ///
    /// Calculated as `(agent_radius / cell_size).ceil()`.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Extra vertices will be inserted as needed to keep contour edges below this length.
    /// A value of zero disables this feature.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should deviate
    /// the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values are in the range `[1.1, 1.5]`.
    pub max_simplification_error: f32,

    /// The minimum number of cells allowed to form isolated island areas. `[Limit: >=0] [Units: vx]`
    pub min_region_area: u16,

    /// Any regions with a span count smaller than this value will, if possible,
    /// be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices allowed for polygons generated during the
    /// contour to polygon conversion process. `[Limit: >= 3]`
    pub max_vertices_per_polygon: u16,

    /// Sets the sampling distance to use when generating the detail mesh.
    /// (For height detail only.) `[Limits: 0 or >= 0.9] [Units: wu]`
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface should deviate from heightfield
    /// data. (For height detail only.) `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,
}

impl NavmeshConfig {
    /// The world-space extent of one tile along x and z, including its border on both sides.
    #[inline]
    pub fn tile_world_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size + 2.0 * self.border_size as f32 * self.cell_size
    }

    /// The world-space distance between the origins of two adjacent tiles.
    #[inline]
    pub fn tile_stride(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// Number of tiles along x and z needed to cover `world_bounds`.
    pub fn tile_count(&self, world_bounds: &Aabb3d) -> (i32, i32) {
        let size = world_bounds.size();
        let stride = self.tile_stride();
        (
            (size.x / stride).ceil().max(1.0) as i32,
            (size.z / stride).ceil().max(1.0) as i32,
        )
    }

    /// The footprint of tile `(x, z)` without its border. The y-range is taken from `world_bounds`.
    pub fn tile_bounds(&self, world_bounds: &Aabb3d, x: i32, z: i32) -> Aabb3d {
        let stride = self.tile_stride();
        let min = Vec3A::new(
            world_bounds.min.x + x as f32 * stride,
            world_bounds.min.y,
            world_bounds.min.z + z as f32 * stride,
        );
        Aabb3d {
            min,
            max: Vec3A::new(min.x + stride, world_bounds.max.y, min.z + stride),
        }
    }

    /// The coordinates of the tile containing `position`.
    pub fn tile_at(&self, world_bounds: &Aabb3d, position: Vec3A) -> (i32, i32) {
        let stride = self.tile_stride();
        (
            ((position.x - world_bounds.min.x) / stride).floor() as i32,
            ((position.z - world_bounds.min.z) / stride).floor() as i32,
        )
    }
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent values,
/// so this builder derives them from a handful of designer-facing parameters.
/// The default values are chosen to be reasonable for an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
#[cfg_attr(
    all(feature = "serialize", feature = "bevy_reflect"),
    reflect(Serialize, Deserialize)
)]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding to the height. For example,
    /// an agent that is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest walkable slope. `[Limits: 0 <= value < 90] [Units: Degrees]`
    pub agent_max_slope_degrees: f32,
    /// Side length of the smallest island region that is kept. `[Units: vx]`
    pub region_min_size: f32,
    /// Side length below which regions are merged into neighbors. `[Units: vx]`
    pub region_merge_size: f32,
    /// Longest allowed contour edge. `[Units: wu]`
    pub edge_max_len: f32,
    /// Contour simplification tolerance. `[Units: vx]`
    pub edge_max_error: f32,
    /// Maximum vertices per polygon. `[Limit: >= 3]`
    pub verts_per_poly: u16,
    /// Detail sampling distance as a multiple of the cell size. Values below 0.9 disable sampling.
    pub detail_sample_dist: f32,
    /// Detail sampling error as a multiple of the cell height.
    pub detail_sample_max_error: f32,
    /// Tile side length without border. `[Units: vx]`
    pub tile_size: u16,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.1,
            agent_height: 2.0,
            agent_radius: 0.5,
            agent_max_climb: 1.5,
            agent_max_slope_degrees: 60.0,
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 256,
        }
    }
}

impl NavmeshConfigBuilder {
    /// Sets the six designer inputs at once, keeping everything else.
    pub fn with_generator_params(
        mut self,
        cell_size: f32,
        cell_height: f32,
        agent_radius: f32,
        agent_height: f32,
        max_slope_degrees: f32,
        max_climb: f32,
    ) -> Self {
        self.cell_size = cell_size;
        self.cell_height = cell_height;
        self.agent_radius = agent_radius;
        self.agent_height = agent_height;
        self.agent_max_slope_degrees = max_slope_degrees;
        self.agent_max_climb = max_climb;
        self
    }

    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(&self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        // Reserve enough padding.
        let border_size = walkable_radius + 3;
        NavmeshConfig {
            width: self.tile_size + border_size * 2,
            height: self.tile_size + border_size * 2,
            tile_size: self.tile_size,
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            walkable_slope_angle: self.agent_max_slope_degrees.to_radians(),
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: BuildContoursFlags::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn defaults_derive_grid_quantities() {
        let config = NavmeshConfigBuilder::default().build();
        assert_eq!(config.walkable_height, 20);
        assert_eq!(config.walkable_climb, 15);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.border_size, 5);
        assert_eq!(config.width, 266);
        assert_eq!(config.height, 266);
        assert!((39..=40).contains(&config.max_edge_len));
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_relative_eq!(config.detail_sample_dist, 1.8, epsilon = 1e-5);
        assert_relative_eq!(config.detail_sample_max_error, 0.1);
        assert_relative_eq!(config.walkable_slope_angle, 60.0_f32.to_radians());
    }

    #[test]
    fn tile_world_size_includes_border() {
        let config = NavmeshConfigBuilder::default().build();
        assert_relative_eq!(config.tile_world_size(), 256.0 * 0.3 + 2.0 * 5.0 * 0.3, epsilon = 1e-4);
        assert_relative_eq!(config.tile_stride(), 76.8, epsilon = 1e-4);
    }

    #[test]
    fn tiles_cover_world_bounds() {
        let config = NavmeshConfigBuilder {
            tile_size: 10,
            cell_size: 1.0,
            ..Default::default()
        }
        .build();
        let world = Aabb3d {
            min: Vec3A::new(-5.0, 0.0, 0.0),
            max: Vec3A::new(20.0, 4.0, 10.0),
        };
        assert_eq!(config.tile_count(&world), (3, 1));
        let bounds = config.tile_bounds(&world, 1, 0);
        assert_eq!(bounds.min, Vec3A::new(5.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3A::new(15.0, 4.0, 10.0));
        assert_eq!(config.tile_at(&world, Vec3A::new(5.5, 1.0, 9.9)), (1, 0));
        assert_eq!(config.tile_at(&world, Vec3A::new(-6.0, 1.0, 0.0)), (-1, 0));
    }

    #[test]
    fn border_follows_agent_radius() {
        let config = NavmeshConfigBuilder::default()
            .with_generator_params(0.25, 0.1, 1.0, 2.0, 45.0, 0.5)
            .build();
        assert_eq!(config.walkable_radius, 4);
        assert_eq!(config.border_size, 7);
        assert_eq!(config.walkable_climb, 5);
    }

    #[test]
    fn small_sample_distance_disables_detail_sampling() {
        let config = NavmeshConfigBuilder {
            detail_sample_dist: 0.5,
            ..Default::default()
        }
        .build();
        assert_eq!(config.detail_sample_dist, 0.0);
    }
}
