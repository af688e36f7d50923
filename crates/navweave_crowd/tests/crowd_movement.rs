use glam::Vec3A;
use navweave::{AreaType, NavmeshConfigBuilder, TriMesh, build_tile};
use navweave_crowd::{AgentState, Crowd, CrowdAgentParams, CrowdError, MoveRequestState};
use navweave_tiles::{
    NavmeshParams, NavmeshQuery, NavmeshStore, QueryFilter, TileAssembler, TileCoord,
};

const DT: f32 = 1.0 / 30.0;

/// A single tile navmesh over a `size` x `size` plane.
fn plane_store(size: f32) -> NavmeshStore {
    let mut trimesh = TriMesh::default();
    let a = Vec3A::new(0.0, 0.0, 0.0);
    let b = Vec3A::new(0.0, 0.0, size);
    let c = Vec3A::new(size, 0.0, size);
    let d = Vec3A::new(size, 0.0, 0.0);
    trimesh.push_triangle([a, b, c], AreaType::DEFAULT_WALKABLE);
    trimesh.push_triangle([a, c, d], AreaType::DEFAULT_WALKABLE);

    let config = NavmeshConfigBuilder::default().build();
    let mut world = trimesh.compute_aabb().unwrap();
    world.min.y -= 1.0;
    world.max.y += 1.0;
    assert_eq!(config.tile_count(&world), (1, 1));

    let params = NavmeshParams::for_tile_grid(world.min, config.tile_stride(), 1, 1);
    let mut store = NavmeshStore::new(params).unwrap();
    let output = build_tile(&trimesh, &config, config.tile_bounds(&world, 0, 0), false).unwrap();
    let blob = TileAssembler::from_config(&config)
        .assemble(&output, TileCoord::new(0, 0))
        .unwrap()
        .unwrap();
    store.add_tile(blob).unwrap();
    store
}

fn distance_2d(a: Vec3A, b: Vec3A) -> f32 {
    let d = a - b;
    (d.x * d.x + d.z * d.z).sqrt()
}

#[test]
fn agent_walks_to_its_target() {
    let store = plane_store(20.0);
    let mut crowd = Crowd::new(8, 2.0);
    let params = CrowdAgentParams {
        max_speed: 3.0,
        ..CrowdAgentParams::for_agent(0.5, 2.0)
    };
    let id = crowd
        .add_agent(Vec3A::new(3.0, 0.0, 3.0), params, &store)
        .unwrap();
    assert_eq!(crowd.agent(id).unwrap().state(), AgentState::Walking);

    let query = NavmeshQuery::new(&store);
    let (poly, target) = query
        .find_nearest_poly(
            Vec3A::new(15.0, 0.0, 12.0),
            Vec3A::new(1.0, 2.0, 1.0),
            &QueryFilter::default(),
        )
        .unwrap();
    crowd.request_move_target(id, poly, target).unwrap();

    crowd.update(DT, &store);
    let agent = crowd.agent(id).unwrap();
    assert_eq!(agent.target_state(), MoveRequestState::Valid);
    assert!(!agent.corners().is_empty());
    assert!(agent.velocity().length() > 0.0);

    let mut frames = 0;
    while !crowd.agent(id).unwrap().corners().is_empty() {
        crowd.update(DT, &store);
        frames += 1;
        assert!(frames < 1200, "agent did not arrive");
    }
    let agent = crowd.agent(id).unwrap();
    assert!(distance_2d(agent.position(), target) < 0.05);
    assert!(!agent.is_partial());
}

#[test]
fn overlapping_agents_are_pushed_apart() {
    let store = plane_store(20.0);
    let mut crowd = Crowd::new(8, 2.0);
    let params = CrowdAgentParams::for_agent(0.5, 2.0);
    let a = crowd
        .add_agent(Vec3A::new(10.0, 0.0, 10.0), params, &store)
        .unwrap();
    let b = crowd
        .add_agent(Vec3A::new(10.2, 0.0, 10.0), params, &store)
        .unwrap();

    crowd.update(DT, &store);

    let a = crowd.agent(a).unwrap();
    let b = crowd.agent(b).unwrap();
    assert_eq!(a.neighbours().len(), 1);
    assert!(distance_2d(a.position(), b.position()) > 0.9);
    assert!(a.position().x < 10.0);
    assert!(b.position().x > 10.2);
}

#[test]
fn removed_tiles_invalidate_agents_until_they_return() {
    let mut store = plane_store(20.0);
    let mut crowd = Crowd::new(8, 2.0);
    let id = crowd
        .add_agent(
            Vec3A::new(5.0, 0.0, 5.0),
            CrowdAgentParams::default(),
            &store,
        )
        .unwrap();

    let blob = store.remove_tile(TileCoord::new(0, 0)).unwrap();
    crowd.update(DT, &store);
    assert_eq!(crowd.agent(id).unwrap().state(), AgentState::Invalid);

    store.add_tile(blob).unwrap();
    crowd.update(DT, &store);
    let agent = crowd.agent(id).unwrap();
    assert_eq!(agent.state(), AgentState::Walking);
    assert!(agent.corridor().first_poly().is_some());
}

#[test]
fn full_crowd_rejects_agents() {
    let store = plane_store(10.0);
    let mut crowd = Crowd::new(2, 2.0);
    let params = CrowdAgentParams::default();
    crowd
        .add_agent(Vec3A::new(2.0, 0.0, 2.0), params, &store)
        .unwrap();
    crowd
        .add_agent(Vec3A::new(5.0, 0.0, 5.0), params, &store)
        .unwrap();
    assert_eq!(
        crowd.add_agent(Vec3A::new(8.0, 0.0, 8.0), params, &store),
        Err(CrowdError::Full { capacity: 2 })
    );
    assert_eq!(crowd.agent_count(), 2);
}
