use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use bevy_reflect::prelude::*;
use bevy_time::prelude::*;
use bevy_transform::prelude::*;
use glam::{Quat, Vec3A};
use navweave_scene::{
    EntityId, SceneHost,
    registry::{DEFAULT_AGENT_HEIGHT, DEFAULT_AGENT_RADIUS},
};
use tracing::warn;

use crate::{NavigationState, NavweaveSystems};

pub(super) fn plugin(app: &mut App) {
    app.register_type::<NavmeshAgent>()
        .add_event::<PathFinished>()
        .add_observer(register_agent)
        .add_observer(unregister_agent)
        .add_systems(Startup, start_simulation)
        .add_systems(
            Update,
            (
                (sync_dimensions, sync_teleports).in_set(NavweaveSystems::Sync),
                update_crowd.in_set(NavweaveSystems::Simulate),
            ),
        );
}

/// An entity moved across the navmesh by the crowd.
///
/// Send it somewhere with [`NavigationScene::request_move`](navweave_scene::NavigationScene::request_move).
/// The crowd writes the [`Transform`] of the entity every frame, so the entity should not have a
/// parent.
#[derive(Component, Debug, Clone, Copy, PartialEq, Reflect)]
#[reflect(Component, Default)]
#[require(Transform)]
pub struct NavmeshAgent {
    /// The radius used for steering and collision.
    pub radius: f32,
    /// The height used for steering.
    pub height: f32,
}

impl Default for NavmeshAgent {
    fn default() -> Self {
        Self {
            radius: DEFAULT_AGENT_RADIUS,
            height: DEFAULT_AGENT_HEIGHT,
        }
    }
}

/// Sent when an agent reached the end of its path.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathFinished {
    /// The agent that arrived.
    pub entity: Entity,
}

/// The navigation id of `entity`.
pub fn entity_id(entity: Entity) -> EntityId {
    EntityId::from_bits(entity.to_bits())
}

/// The entity a navigation id was created from.
pub fn entity_from_id(id: EntityId) -> Option<Entity> {
    Entity::try_from_bits(id.to_bits()).ok()
}

/// Gives the navigation scene access to the transforms of the world.
pub(crate) struct WorldHost<'w>(pub(crate) &'w mut World);

impl SceneHost for WorldHost<'_> {
    fn position(&self, entity: EntityId) -> Vec3A {
        entity_from_id(entity)
            .and_then(|entity| self.0.get::<Transform>(entity))
            .map(|transform| Vec3A::from(transform.translation))
            .unwrap_or_default()
    }

    fn set_position(&mut self, entity: EntityId, position: Vec3A) {
        if let Some(mut transform) =
            entity_from_id(entity).and_then(|entity| self.0.get_mut::<Transform>(entity))
        {
            transform.translation = position.into();
        }
    }

    fn set_rotation(&mut self, entity: EntityId, rotation: Quat) {
        if let Some(mut transform) =
            entity_from_id(entity).and_then(|entity| self.0.get_mut::<Transform>(entity))
        {
            transform.rotation = rotation;
        }
    }

    fn path_finished(&mut self, entity: EntityId) {
        if let Some(entity) = entity_from_id(entity) {
            self.0.send_event(PathFinished { entity });
        }
    }
}

fn register_agent(trigger: Trigger<OnAdd, NavmeshAgent>, mut commands: Commands) {
    let entity = trigger.target();
    commands.queue(move |world: &mut World| {
        let Some(agent) = world.get::<NavmeshAgent>(entity).copied() else {
            return;
        };
        world.resource_scope(|world, mut state: Mut<NavigationState>| {
            let id = entity_id(entity);
            state.add_agent(id, &WorldHost(world));
            if let Err(e) = state
                .set_agent_radius(id, agent.radius)
                .and_then(|()| state.set_agent_height(id, agent.height))
            {
                warn!("Failed to size navmesh agent: {e}");
            }
        });
    });
}

fn unregister_agent(trigger: Trigger<OnRemove, NavmeshAgent>, mut state: ResMut<NavigationState>) {
    state.remove_agent(entity_id(trigger.target()));
}

fn start_simulation(world: &mut World) {
    world.resource_scope(|world, mut state: Mut<NavigationState>| {
        if let Err(e) = state.start_simulation(&WorldHost(world)) {
            warn!("Navigation simulation started without a crowd: {e:#}");
        }
    });
}

fn sync_dimensions(
    mut state: ResMut<NavigationState>,
    agents: Query<(Entity, &NavmeshAgent), Changed<NavmeshAgent>>,
) {
    for (entity, agent) in &agents {
        let id = entity_id(entity);
        // Agents added this frame are sized once their registration is applied.
        if !state.agents().contains(id) {
            continue;
        }
        if let Err(e) = state
            .set_agent_radius(id, agent.radius)
            .and_then(|()| state.set_agent_height(id, agent.height))
        {
            warn!("Failed to size navmesh agent: {e}");
        }
    }
}

fn sync_teleports(
    mut state: ResMut<NavigationState>,
    moved: Query<(Entity, &Transform), (With<NavmeshAgent>, Changed<Transform>)>,
) {
    for (entity, transform) in &moved {
        state.on_entity_moved(entity_id(entity), transform.translation.into());
    }
}

fn update_crowd(world: &mut World) {
    let Some(dt) = world
        .get_resource::<Time>()
        .map(|time| time.delta_secs())
    else {
        return;
    };
    world.resource_scope(|world, mut state: Mut<NavigationState>| {
        state.update(dt, &mut WorldHost(world));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_round_trip() {
        let mut world = World::new();
        let entity = world.spawn_empty().id();
        assert_eq!(entity_from_id(entity_id(entity)), Some(entity));
    }
}
