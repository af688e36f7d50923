use std::collections::HashMap;

use approx::assert_relative_eq;
use glam::{Affine3A, Quat, UVec2, UVec3, Vec3A};
use navweave_crowd::MoveRequestState;
use navweave_scene::{
    AgentRecord, CROWD_MAX_AGENTS, EntityId, Heightmap, MaterialFlags, MeshInstance,
    MoveRequestError, NavigationScene, SceneGeometry, SceneHost, SubMesh,
};
use navweave_tiles::{NavmeshQuery, QueryFilter};

const DT: f32 = 1.0 / 30.0;

#[derive(Default)]
struct TestHost {
    positions: HashMap<EntityId, Vec3A>,
    rotations: HashMap<EntityId, Quat>,
    finished: Vec<EntityId>,
}

impl TestHost {
    fn spawn(&mut self, entity: EntityId, position: Vec3A) {
        self.positions.insert(entity, position);
    }
}

impl SceneHost for TestHost {
    fn position(&self, entity: EntityId) -> Vec3A {
        self.positions.get(&entity).copied().unwrap_or_default()
    }

    fn set_position(&mut self, entity: EntityId, position: Vec3A) {
        self.positions.insert(entity, position);
    }

    fn set_rotation(&mut self, entity: EntityId, rotation: Quat) {
        self.rotations.insert(entity, rotation);
    }

    fn path_finished(&mut self, entity: EntityId) {
        self.finished.push(entity);
    }
}

fn plane(size: f32, material: MaterialFlags) -> Vec<MeshInstance> {
    vec![MeshInstance {
        transform: Affine3A::IDENTITY,
        vertices: vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, size),
            Vec3A::new(size, 0.0, size),
            Vec3A::new(size, 0.0, 0.0),
        ],
        submeshes: vec![SubMesh {
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            material,
        }],
    }]
}

fn distance_2d(a: Vec3A, b: Vec3A) -> f32 {
    let d = a - b;
    (d.x * d.x + d.z * d.z).sqrt()
}

/// A running simulation on a 20 x 20 plane with one agent at (3, 0, 3).
fn simulated_plane() -> (NavigationScene, TestHost, EntityId) {
    let meshes = plane(20.0, MaterialFlags::empty());
    let geometry = SceneGeometry::from_renderables(&meshes);
    let mut host = TestHost::default();
    let entity = EntityId::new(1, 0);
    host.spawn(entity, Vec3A::new(3.0, 0.0, 3.0));

    let mut scene = NavigationScene::new();
    scene.generate_full_navmesh(&geometry, &host).unwrap();
    scene.add_agent(entity, &host);
    scene.start_simulation(&host).unwrap();
    (scene, host, entity)
}

#[test]
fn flat_plane_bakes_connected_polygons() {
    let meshes = plane(10.0, MaterialFlags::empty());
    let geometry = SceneGeometry::from_renderables(&meshes);
    let mut scene = NavigationScene::new();
    assert!(!scene.is_navmesh_ready());
    assert_eq!(scene.polygon_count(), 0);

    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();
    assert!(scene.is_navmesh_ready());
    assert!(scene.polygon_count() > 0);
    assert_eq!(scene.tile_grid(), Some((1, 1)));

    let store = scene.navmesh().unwrap();
    let query = NavmeshQuery::new(store);
    let filter = QueryFilter::default();
    let tile = store.tiles().next().unwrap();
    let centroid = |i: usize| {
        let vertices = tile.poly_vertices(i);
        vertices.iter().copied().sum::<Vec3A>() / vertices.len() as f32
    };
    let start = store.poly_ref(tile, 0);
    for i in 0..tile.polygon_count() {
        let end = store.poly_ref(tile, i);
        let path = query
            .find_path(start, end, centroid(0), centroid(i), &filter, 256)
            .unwrap();
        assert!(!path.partial, "polygon {i} is not connected");
        assert_eq!(path.polygons.last(), Some(&end));
    }
}

#[test]
fn no_navigation_geometry_bakes_no_polygons() {
    let meshes = plane(10.0, MaterialFlags::NO_NAVIGATION);
    let geometry = SceneGeometry::from_renderables(&meshes);
    let mut scene = NavigationScene::new();
    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();
    assert!(scene.is_navmesh_ready());
    assert_eq!(scene.polygon_count(), 0);
}

#[test]
fn flat_terrain_is_walkable() {
    let terrains = vec![Heightmap {
        transform: Affine3A::IDENTITY,
        resolution: UVec2::new(11, 11),
        xz_scale: 1.0,
        heights: vec![0.0; 121],
    }];
    let geometry = SceneGeometry::default().with_terrains(&terrains);
    let mut scene = NavigationScene::new();
    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();
    assert!(scene.polygon_count() > 0);
}

#[test]
fn arriving_agents_finish_exactly_once() {
    let (mut scene, mut host, entity) = simulated_plane();
    assert!(scene.agents().get(entity).unwrap().binding.is_some());

    // Idle agents never report.
    scene.update(DT, &mut host);
    assert!(host.finished.is_empty());

    scene
        .request_move(entity, Vec3A::new(15.0, 0.0, 12.0), 3.0)
        .unwrap();
    scene.update(DT, &mut host);
    assert!(!scene.agents().get(entity).unwrap().is_finished);
    assert!(scene.agent_path(entity).is_some_and(|path| !path.is_empty()));
    assert!(host.rotations.contains_key(&entity));

    let mut frames = 0;
    while host.finished.is_empty() {
        scene.update(DT, &mut host);
        frames += 1;
        assert!(frames < 1200, "agent did not arrive");
    }
    assert_eq!(host.finished, vec![entity]);
    assert!(scene.agents().get(entity).unwrap().is_finished);
    assert!(distance_2d(host.position(entity), Vec3A::new(15.0, 0.0, 12.0)) < 0.1);

    for _ in 0..30 {
        scene.update(DT, &mut host);
    }
    assert_eq!(host.finished.len(), 1);
}

#[test]
fn rejected_move_requests_keep_the_current_target() {
    let (mut scene, mut host, entity) = simulated_plane();
    let destination = Vec3A::new(15.0, 0.0, 12.0);
    scene.request_move(entity, destination, 3.0).unwrap();
    scene.update(DT, &mut host);

    let outside = Vec3A::new(100.0, 0.0, 100.0);
    assert_eq!(
        scene.request_move(entity, outside, 3.0),
        Err(MoveRequestError::NoPolygonNear(outside))
    );
    assert_eq!(
        scene.request_move(EntityId::new(9, 0), destination, 3.0),
        Err(MoveRequestError::UnknownEntity(EntityId::new(9, 0)))
    );

    let id = scene.agents().get(entity).unwrap().binding.unwrap();
    let agent = scene.crowd().unwrap().agent(id).unwrap();
    assert_eq!(agent.target_state(), MoveRequestState::Valid);
    assert!(distance_2d(agent.target_position(), destination) < 1e-3);
    assert_eq!(agent.params().max_speed, 3.0);
}

#[test]
fn move_requests_need_a_navmesh_and_a_crowd() {
    let mut scene = NavigationScene::new();
    let entity = EntityId::new(1, 0);
    scene.add_agent(entity, &TestHost::default());
    assert_eq!(
        scene.request_move(entity, Vec3A::ZERO, 1.0),
        Err(MoveRequestError::NoNavmesh)
    );

    let meshes = plane(10.0, MaterialFlags::empty());
    let geometry = SceneGeometry::from_renderables(&meshes);
    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();
    assert_eq!(
        scene.request_move(entity, Vec3A::ZERO, 1.0),
        Err(MoveRequestError::NoCrowd)
    );
}

#[test]
fn teleported_agents_are_placed_again_once() {
    let (mut scene, mut host, entity) = simulated_plane();
    scene.update(DT, &mut host);
    let before = scene.agents().get(entity).unwrap().binding.unwrap();

    // Small drift is ignored.
    assert!(!scene.on_entity_moved(entity, Vec3A::new(3.1, 0.0, 3.0)));

    let teleport = Vec3A::new(12.0, 0.0, 8.0);
    host.spawn(entity, teleport);
    assert!(scene.on_entity_moved(entity, teleport));
    assert!(!scene.on_entity_moved(entity, teleport));

    let after = scene.agents().get(entity).unwrap().binding.unwrap();
    assert_ne!(before, after);
    let crowd = scene.crowd().unwrap();
    assert_eq!(crowd.agent_count(), 1);
    assert!(crowd.agent(before).is_none());
    assert!(distance_2d(crowd.agent(after).unwrap().position(), teleport) < 1e-3);

    scene.update(DT, &mut host);
    assert!(distance_2d(host.position(entity), teleport) < 0.1);
}

#[test]
fn navmesh_survives_a_save_and_load() {
    let (scene, host, _) = simulated_plane();
    let path = std::env::temp_dir().join(format!("navweave_scene_{}.nav", std::process::id()));
    scene.save(&path).unwrap();

    let mut loaded = NavigationScene::new();
    loaded.load(&path, &host).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert!(loaded.is_navmesh_ready());
    assert_eq!(loaded.polygon_count(), scene.polygon_count());
    assert_eq!(loaded.world_bounds(), scene.world_bounds());
    assert_eq!(loaded.save_to_bytes().unwrap(), scene.save_to_bytes().unwrap());
}

#[test]
fn truncated_files_leave_no_navmesh() {
    let (mut scene, host, entity) = simulated_plane();
    let bytes = scene.save_to_bytes().unwrap();

    assert!(scene.load_from_bytes(&bytes[..bytes.len() / 2], &host).is_err());
    assert!(!scene.is_navmesh_ready());
    assert!(scene.crowd().is_none());
    assert!(scene.agents().get(entity).unwrap().binding.is_none());
    assert!(scene.save_to_bytes().is_err());

    scene.load_from_bytes(&bytes, &host).unwrap();
    assert!(scene.is_navmesh_ready());
    assert!(scene.agents().get(entity).unwrap().binding.is_some());
}

#[test]
fn single_tiles_keep_debug_data_on_request() {
    let meshes = plane(10.0, MaterialFlags::empty());
    let geometry = SceneGeometry::from_renderables(&meshes);
    let mut scene = NavigationScene::new();
    assert!(scene.generate_tile(0, 0, false, &geometry).is_err());

    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();
    let polygons = scene.polygon_count();
    assert!(scene.debug_tile().is_none());

    scene
        .generate_tile_at(Vec3A::new(5.0, 0.0, 5.0), true, &geometry)
        .unwrap();
    assert_eq!(scene.polygon_count(), polygons);
    assert_eq!(scene.navmesh().unwrap().tile_count(), 1);
    assert!(scene.debug_heightfield().is_some());
    assert!(scene.debug_compact_heightfield().is_some());
    assert!(scene.debug_contours().is_some());

    scene.generate_tile(0, 0, false, &geometry).unwrap();
    assert!(scene.debug_tile().is_none());
    assert!(scene.generate_tile(3, 0, false, &geometry).is_err());
}

#[test]
fn changed_generator_settings_need_a_full_bake() {
    let meshes = plane(10.0, MaterialFlags::empty());
    let geometry = SceneGeometry::from_renderables(&meshes);
    let mut scene = NavigationScene::new();
    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();

    scene.set_generator_params(0.2, 0.1, 0.5, 2.0, 60.0, 1.5);
    assert!(scene.generate_tile(0, 0, false, &geometry).is_err());
    scene
        .generate_full_navmesh(&geometry, &TestHost::default())
        .unwrap();
    assert!(scene.generate_tile(0, 0, false, &geometry).is_ok());
}

#[test]
fn stopping_the_simulation_unbinds_agents() {
    let (mut scene, mut host, entity) = simulated_plane();
    scene.stop_simulation();
    assert!(!scene.is_simulating());
    assert!(scene.crowd().is_none());
    assert!(scene.agents().get(entity).unwrap().binding.is_none());

    // Without a crowd nothing moves.
    host.spawn(entity, Vec3A::new(7.0, 0.0, 7.0));
    scene.update(DT, &mut host);
    assert_eq!(host.position(entity), Vec3A::new(7.0, 0.0, 7.0));

    scene.start_simulation(&host).unwrap();
    let id = scene.agents().get(entity).unwrap().binding.unwrap();
    let agent = scene.crowd().unwrap().agent(id).unwrap();
    assert!(distance_2d(agent.position(), Vec3A::new(7.0, 0.0, 7.0)) < 1e-3);

    scene.clear();
    assert!(!scene.is_navmesh_ready());
    assert_eq!(scene.agents().len(), 1);
    assert!(scene.agents().get(entity).unwrap().binding.is_none());
}

#[test]
fn overfull_crowds_keep_the_navmesh_and_unbind_everyone() {
    let meshes = plane(20.0, MaterialFlags::empty());
    let geometry = SceneGeometry::from_renderables(&meshes);
    let mut host = TestHost::default();
    let mut scene = NavigationScene::new();
    scene.start_simulation(&host).unwrap();
    for index in 0..=CROWD_MAX_AGENTS as u32 {
        let entity = EntityId::new(index, 0);
        host.spawn(entity, Vec3A::new(5.0, 0.0, 5.0));
        scene.add_agent(entity, &host);
    }

    assert!(scene.generate_full_navmesh(&geometry, &host).is_err());
    assert!(scene.is_navmesh_ready());
    assert!(scene.crowd().is_none());
    assert!(scene.agents().iter().all(|(_, agent)| agent.binding.is_none()));

    scene.remove_agent(EntityId::new(0, 0));
    scene.start_simulation(&host).unwrap();
    assert_eq!(scene.crowd().unwrap().agent_count(), CROWD_MAX_AGENTS);
    assert!(scene.agents().iter().all(|(_, agent)| agent.binding.is_some()));
}

#[test]
fn agent_dimensions_reach_the_crowd() {
    let (mut scene, _, entity) = simulated_plane();
    scene
        .request_move(entity, Vec3A::new(10.0, 0.0, 10.0), 2.5)
        .unwrap();
    scene.set_agent_radius(entity, 0.75).unwrap();
    scene.set_agent_height(entity, 1.5).unwrap();
    assert_eq!(scene.agent_radius(entity), Some(0.75));
    assert_eq!(scene.agent_height(entity), Some(1.5));

    let id = scene.agents().get(entity).unwrap().binding.unwrap();
    let params = *scene.crowd().unwrap().agent(id).unwrap().params();
    assert_eq!(params.radius, 0.75);
    assert_eq!(params.height, 1.5);
    assert_eq!(params.max_speed, 2.5);
    assert_relative_eq!(params.collision_query_range, 9.0);
    assert_relative_eq!(params.path_optimization_range, 22.5);

    assert!(scene.set_agent_radius(EntityId::new(5, 0), 1.0).is_err());
}

#[test]
fn snapshots_restore_agents() {
    let (mut scene, host, entity) = simulated_plane();
    scene.set_agent_radius(entity, 0.6).unwrap();
    let records = scene.snapshot();
    let json = serde_json::to_string(&records).unwrap();

    let other = EntityId::new(2, 0);
    scene.add_agent(other, &host);
    assert_eq!(scene.crowd().unwrap().agent_count(), 2);

    scene.restore(&serde_json::from_str::<Vec<AgentRecord>>(&json).unwrap(), &host);
    assert_eq!(scene.agents().len(), 1);
    assert_eq!(scene.agent_radius(entity), Some(0.6));
    assert_eq!(scene.crowd().unwrap().agent_count(), 1);
    assert!(scene.agents().get(entity).unwrap().binding.is_some());

    let removed = scene.remove_agent(entity).unwrap();
    assert_eq!(removed.radius, 0.6);
    assert_eq!(scene.crowd().unwrap().agent_count(), 0);
}
