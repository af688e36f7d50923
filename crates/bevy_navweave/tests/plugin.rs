use std::time::Duration;

use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use bevy_time::prelude::*;
use bevy_transform::prelude::*;
use bevy_navweave::{NavmeshApp as _, entity_id, prelude::*};
use glam::{Affine3A, UVec3, Vec3, Vec3A};
use navweave_scene::{MaterialFlags, MeshInstance, SubMesh};

#[derive(Resource, Default)]
struct Arrivals(Vec<Entity>);

fn plane() -> Vec<MeshInstance> {
    vec![MeshInstance {
        transform: Affine3A::IDENTITY,
        vertices: vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 20.0),
            Vec3A::new(20.0, 0.0, 20.0),
            Vec3A::new(20.0, 0.0, 0.0),
        ],
        submeshes: vec![SubMesh {
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            material: MaterialFlags::empty(),
        }],
    }]
}

fn record_arrivals(mut events: EventReader<PathFinished>, mut arrivals: ResMut<Arrivals>) {
    arrivals.0.extend(events.read().map(|event| event.entity));
}

fn generate(mut generator: NavmeshGenerator) {
    generator.generate();
}

fn app() -> App {
    let mut app = App::new();
    app.add_plugins(NavweavePlugin::default())
        .init_resource::<Time>()
        .init_resource::<Arrivals>()
        .set_navmesh_geometry_backend(plane)
        .add_systems(Update, record_arrivals);
    app.update();
    app.world_mut().run_system_cached(generate).unwrap();
    app.update();
    app
}

fn step(app: &mut App) {
    app.world_mut()
        .resource_mut::<Time>()
        .advance_by(Duration::from_secs_f32(1.0 / 30.0));
    app.update();
}

#[test]
fn queued_bakes_build_a_navmesh() {
    let app = app();
    let state = app.world().resource::<NavigationState>();
    assert!(state.is_navmesh_ready());
    assert!(state.polygon_count() > 0);
    assert!(state.is_simulating());
    assert!(state.crowd().is_some());
}

#[test]
fn agents_walk_to_their_target_and_report() {
    let mut app = app();
    let entity = app
        .world_mut()
        .spawn((Transform::from_xyz(3.0, 0.0, 3.0), NavmeshAgent::default()))
        .id();
    app.update();
    {
        let mut state = app.world_mut().resource_mut::<NavigationState>();
        let agent = state.agents().get(entity_id(entity)).unwrap();
        assert!(agent.binding.is_some());
        state
            .request_move(entity_id(entity), Vec3A::new(15.0, 0.0, 12.0), 3.0)
            .unwrap();
    }

    let mut frames = 0;
    while app.world().resource::<Arrivals>().0.is_empty() {
        step(&mut app);
        frames += 1;
        assert!(frames < 1200, "agent did not arrive");
    }
    assert_eq!(app.world().resource::<Arrivals>().0, vec![entity]);
    let translation = app.world().get::<Transform>(entity).unwrap().translation;
    assert!(translation.distance(Vec3::new(15.0, translation.y, 12.0)) < 0.1);
}

#[test]
fn despawned_agents_leave_the_crowd() {
    let mut app = app();
    let entity = app
        .world_mut()
        .spawn((Transform::from_xyz(5.0, 0.0, 5.0), NavmeshAgent::default()))
        .id();
    app.update();
    let state = app.world().resource::<NavigationState>();
    assert_eq!(state.crowd().unwrap().agent_count(), 1);

    app.world_mut().despawn(entity);
    app.update();
    let state = app.world().resource::<NavigationState>();
    assert_eq!(state.crowd().unwrap().agent_count(), 0);
    assert!(state.agents().is_empty());
}

#[test]
fn teleports_and_dimensions_reach_the_crowd() {
    let mut app = app();
    let entity = app
        .world_mut()
        .spawn((
            Transform::from_xyz(5.0, 0.0, 5.0),
            NavmeshAgent {
                radius: 0.6,
                height: 1.8,
            },
        ))
        .id();
    step(&mut app);

    let id = entity_id(entity);
    let state = app.world().resource::<NavigationState>();
    assert_eq!(state.agent_radius(id), Some(0.6));
    assert_eq!(state.agent_height(id), Some(1.8));

    app.world_mut()
        .get_mut::<Transform>(entity)
        .unwrap()
        .translation = Vec3::new(14.0, 0.0, 9.0);
    app.world_mut().get_mut::<NavmeshAgent>(entity).unwrap().radius = 0.7;
    step(&mut app);

    let state = app.world().resource::<NavigationState>();
    let binding = state.agents().get(id).unwrap().binding.unwrap();
    let agent = state.crowd().unwrap().agent(binding).unwrap();
    assert_eq!(agent.params().radius, 0.7);
    let position = agent.position();
    assert!((position.x - 14.0).abs() < 0.1 && (position.z - 9.0).abs() < 0.1);
}
