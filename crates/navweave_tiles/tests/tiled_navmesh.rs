use approx::assert_relative_eq;
use glam::Vec3A;
use navweave::{Aabb3d, AreaType, NavmeshConfig, NavmeshConfigBuilder, TriMesh, build_tile};
use navweave_tiles::{
    NavmeshParams, NavmeshQuery, NavmeshStore, QueryFilter, StraightPathFlags, TileAssembler,
    TileBlob, TileCoord, load_navmesh, save_navmesh,
};

const EXTENTS: Vec3A = Vec3A::new(1.0, 2.0, 1.0);

fn plane(size: f32, area: AreaType) -> TriMesh {
    let mut trimesh = TriMesh::default();
    let a = Vec3A::new(0.0, 0.0, 0.0);
    let b = Vec3A::new(0.0, 0.0, size);
    let c = Vec3A::new(size, 0.0, size);
    let d = Vec3A::new(size, 0.0, 0.0);
    trimesh.push_triangle([a, b, c], area);
    trimesh.push_triangle([a, c, d], area);
    trimesh
}

fn world_bounds(trimesh: &TriMesh) -> Aabb3d {
    let mut bounds = trimesh.compute_aabb().unwrap();
    bounds.min.y -= 1.0;
    bounds.max.y += 1.0;
    bounds
}

fn bake_blob(trimesh: &TriMesh, config: &NavmeshConfig, coord: TileCoord) -> Option<TileBlob> {
    let world = world_bounds(trimesh);
    let output = build_tile(trimesh, config, config.tile_bounds(&world, coord.x, coord.z), false)
        .unwrap();
    TileAssembler::from_config(config)
        .assemble(&output, coord)
        .unwrap()
}

struct Baked {
    store: NavmeshStore,
    world: Aabb3d,
    tiles: (i32, i32),
}

fn bake(trimesh: &TriMesh, config: &NavmeshConfig) -> Baked {
    let world = world_bounds(trimesh);
    let (tiles_x, tiles_z) = config.tile_count(&world);
    let params = NavmeshParams::for_tile_grid(
        world.min,
        config.tile_stride(),
        tiles_x as u32,
        tiles_z as u32,
    );
    let mut store = NavmeshStore::new(params).unwrap();
    for z in 0..tiles_z {
        for x in 0..tiles_x {
            if let Some(blob) = bake_blob(trimesh, config, TileCoord::new(x, z)) {
                store.add_tile(blob).unwrap();
            }
        }
    }
    Baked {
        store,
        world,
        tiles: (tiles_x, tiles_z),
    }
}

/// A 16 x 16 plane split into 2 x 2 tiles.
fn tiled_plane() -> Baked {
    let config = NavmeshConfigBuilder {
        tile_size: 32,
        ..Default::default()
    }
    .build();
    let baked = bake(&plane(16.0, AreaType::DEFAULT_WALKABLE), &config);
    assert_eq!(baked.tiles, (2, 2));
    assert_eq!(baked.store.tile_count(), 4);
    baked
}

#[test]
fn single_tile_plane_is_queryable() {
    let config = NavmeshConfigBuilder::default().build();
    let baked = bake(&plane(10.0, AreaType::DEFAULT_WALKABLE), &config);
    assert_eq!(baked.store.tile_count(), 1);
    assert!(baked.store.polygon_count() > 0);

    let query = NavmeshQuery::new(&baked.store);
    let (poly, point) = query
        .find_nearest_poly(Vec3A::new(5.0, 0.5, 5.0), EXTENTS, &QueryFilter::default())
        .unwrap();
    assert!(baked.store.is_valid_poly_ref(poly));
    assert_relative_eq!(point.x, 5.0);
    assert_relative_eq!(point.z, 5.0);
    assert!(point.y.abs() < 0.3, "point {point} is off the plane");

    let height = query.poly_height(poly, Vec3A::new(5.0, 3.0, 5.0)).unwrap();
    assert!(height.is_some_and(|h| h.abs() < 0.3));
}

#[test]
fn nothing_to_walk_on_assembles_no_tile() {
    let config = NavmeshConfigBuilder::default().build();
    let trimesh = plane(10.0, AreaType::NOT_WALKABLE);
    assert!(bake_blob(&trimesh, &config, TileCoord::new(0, 0)).is_none());
}

#[test]
fn blobs_are_byte_identical_across_bakes() {
    let config = NavmeshConfigBuilder::default().build();
    let trimesh = plane(10.0, AreaType::DEFAULT_WALKABLE);
    let first = bake_blob(&trimesh, &config, TileCoord::new(0, 0)).unwrap();
    let second = bake_blob(&trimesh, &config, TileCoord::new(0, 0)).unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[test]
fn path_crosses_tile_borders() {
    let baked = tiled_plane();
    let query = NavmeshQuery::new(&baked.store);
    let filter = QueryFilter::default();
    let start_pos = Vec3A::new(1.5, 0.0, 1.5);
    let end_pos = Vec3A::new(14.5, 0.0, 14.5);
    let (start, _) = query.find_nearest_poly(start_pos, EXTENTS, &filter).unwrap();
    let (end, _) = query.find_nearest_poly(end_pos, EXTENTS, &filter).unwrap();
    assert_ne!(start, end);

    let path = query
        .find_path(start, end, start_pos, end_pos, &filter, 256)
        .unwrap();
    assert!(!path.partial);
    assert_eq!(path.polygons.first(), Some(&start));
    assert_eq!(path.polygons.last(), Some(&end));

    let corners = query
        .find_straight_path(start_pos, end_pos, &path.polygons, 32)
        .unwrap();
    let first = corners.first().unwrap();
    let last = corners.last().unwrap();
    assert!(first.flags.contains(StraightPathFlags::START));
    assert!(last.flags.contains(StraightPathFlags::END));
    assert_relative_eq!(last.position.x, end_pos.x, epsilon = 1e-4);
    assert_relative_eq!(last.position.z, end_pos.z, epsilon = 1e-4);
    // The plane is open, so the straight path is a straight line. The diagonal runs through the
    // corner shared by all four tiles, which may show up as an extra corner on that line.
    assert!(corners.len() <= 3);
    let direction = (end_pos - start_pos).normalize();
    for corner in &corners[1..corners.len() - 1] {
        let offset = corner.position - start_pos;
        let off_line = offset.x * direction.z - offset.z * direction.x;
        assert!(off_line.abs() < 1e-3, "corner {} is off the line", corner.position);
    }
}

#[test]
fn raycast_stops_at_the_plane_edge() {
    let baked = tiled_plane();
    let query = NavmeshQuery::new(&baked.store);
    let filter = QueryFilter::default();
    let start_pos = Vec3A::new(3.0, 0.0, 8.0);
    let (start, _) = query.find_nearest_poly(start_pos, EXTENTS, &filter).unwrap();

    let hit = query
        .raycast(start, start_pos, Vec3A::new(30.0, 0.0, 8.0), &filter)
        .unwrap();
    assert!(hit.hit_wall());
    let hit_x = 3.0 + 27.0 * hit.t;
    assert!((14.5..16.0).contains(&hit_x), "hit at x = {hit_x}");
    assert!(hit.normal.x.abs() > 0.9);
    assert!(hit.path.len() >= 2);

    let free = query
        .raycast(start, start_pos, Vec3A::new(13.0, 0.0, 9.0), &filter)
        .unwrap();
    assert!(!free.hit_wall());
}

#[test]
fn surface_moves_are_clamped_to_the_mesh() {
    let baked = tiled_plane();
    let query = NavmeshQuery::new(&baked.store);
    let filter = QueryFilter::default();
    let start_pos = Vec3A::new(8.0, 0.0, 8.0);
    let (start, _) = query.find_nearest_poly(start_pos, EXTENTS, &filter).unwrap();

    let inside = query
        .move_along_surface(start, start_pos, Vec3A::new(10.0, 0.0, 9.0), &filter, 16)
        .unwrap();
    assert_eq!(inside.position, Vec3A::new(10.0, 0.0, 9.0));

    let outside = query
        .move_along_surface(start, start_pos, Vec3A::new(18.0, 0.0, 8.0), &filter, 16)
        .unwrap();
    assert!((14.5..16.0).contains(&outside.position.x));
    let last = *outside.visited.last().unwrap();
    assert!(baked.store.is_valid_poly_ref(last));
}

#[test]
fn local_neighbourhood_and_walls() {
    let baked = tiled_plane();
    let query = NavmeshQuery::new(&baked.store);
    let filter = QueryFilter::default();
    let center = Vec3A::new(1.5, 0.0, 1.5);
    let (start, _) = query.find_nearest_poly(center, EXTENTS, &filter).unwrap();

    let neighbourhood = query
        .find_local_neighbourhood(start, center, 3.0, &filter, 16)
        .unwrap();
    assert_eq!(neighbourhood[0], (start, None));
    let walls: Vec<_> = neighbourhood
        .iter()
        .flat_map(|(poly, _)| query.poly_wall_segments(*poly, &filter).unwrap())
        .collect();
    // The corner of the plane is walled off on two sides.
    assert!(walls.iter().any(|[a, b]| a.x < 1.0 && b.x < 1.0));
    assert!(walls.iter().any(|[a, b]| a.z < 1.0 && b.z < 1.0));
}

#[test]
fn readding_a_tile_keeps_one_resident() {
    let mut baked = tiled_plane();
    let coord = TileCoord::new(1, 0);
    let polygons = baked.store.polygon_count();
    let blob = baked.store.remove_tile(coord).unwrap();
    assert_eq!(baked.store.tile_count(), 3);
    baked.store.add_tile(blob).unwrap();
    assert_eq!(baked.store.tile_count(), 4);
    assert_eq!(baked.store.polygon_count(), polygons);
    assert_eq!(baked.store.tiles().filter(|t| t.coord() == coord).count(), 1);
}

#[test]
fn save_and_load_preserve_tiles() {
    let baked = tiled_plane();
    let bytes = save_navmesh(&baked.store, &baked.world, baked.tiles.0, baked.tiles.1).unwrap();
    let loaded = load_navmesh(&bytes).unwrap();
    assert_eq!(loaded.world_bounds, baked.world);
    assert_eq!((loaded.tiles_x, loaded.tiles_z), baked.tiles);
    assert_eq!(loaded.store.polygon_count(), baked.store.polygon_count());
    for tile in baked.store.tiles() {
        let reloaded = loaded.store.tile_at(tile.coord()).unwrap();
        assert_eq!(reloaded.polygon_count(), tile.polygon_count());
        assert_eq!(reloaded.data().vertices, tile.data().vertices);
    }

    assert!(load_navmesh(&bytes[..bytes.len() - 1]).is_err());
}
