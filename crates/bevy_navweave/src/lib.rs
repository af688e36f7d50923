//! Navmesh agents for Bevy.
//!
//! Add [`NavweavePlugin`] and a geometry backend such as [`Mesh3dNavmeshPlugin`], queue a bake
//! through [`NavmeshGenerator`] and give entities a [`NavmeshAgent`]. Agents are moved by the crowd
//! every frame and send [`PathFinished`] when they arrive.

use bevy_app::prelude::*;
use bevy_derive::{Deref, DerefMut};
use bevy_ecs::prelude::*;
use bevy_reflect::prelude::*;
use navweave::NavmeshConfigBuilder;
use navweave_scene::NavigationScene;

mod agent;
mod backend;
pub mod generator;
#[cfg(feature = "bevy_mesh")]
mod mesh;

pub use agent::{NavmeshAgent, PathFinished, entity_from_id, entity_id};
pub use backend::*;
pub use generator::NavmeshGenerator;
#[cfg(feature = "bevy_mesh")]
pub use mesh::{Mesh3dNavmeshPlugin, MeshInstanceFromBevyMesh, NavmeshMaterial};

pub use navweave;
pub use navweave_scene;

/// Everything you need to get started with navweave.
pub mod prelude {
    #[cfg(feature = "bevy_mesh")]
    pub use crate::{Mesh3dNavmeshPlugin, NavmeshMaterial};
    pub use crate::{
        NavigationState, NavmeshAgent, NavmeshGenerator, NavmeshSettings, NavweavePlugin,
        PathFinished,
    };
}

/// The main plugin of the crate. Simulates [`NavmeshAgent`]s on the navmesh of the
/// [`NavigationState`].
#[non_exhaustive]
#[derive(Default)]
pub struct NavweavePlugin;

impl Plugin for NavweavePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<NavigationState>()
            .init_resource::<NavmeshSettings>()
            .register_type::<NavmeshSettings>()
            .configure_sets(
                Update,
                (
                    NavweaveSystems::Generate,
                    NavweaveSystems::Sync,
                    NavweaveSystems::Simulate,
                )
                    .chain(),
            )
            .add_plugins((generator::plugin, agent::plugin));
    }
}

/// The system sets of [`NavweavePlugin`], run in this order in [`Update`].
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavweaveSystems {
    /// Queued navmesh bakes.
    Generate,
    /// Agents pick up teleports and changed dimensions.
    Sync,
    /// The crowd moves the agents.
    Simulate,
}

/// The navmesh, agents and crowd of the world.
#[derive(Resource, Debug, Default, Deref, DerefMut)]
pub struct NavigationState(pub NavigationScene);

/// The settings used for the next navmesh bake.
#[derive(Resource, Debug, Clone, Default, PartialEq, Deref, DerefMut, Reflect)]
#[reflect(Resource)]
pub struct NavmeshSettings(pub NavmeshConfigBuilder);
