//! Utilities for generating navmeshes at runtime.

use std::collections::VecDeque;

use bevy_app::prelude::*;
use bevy_derive::{Deref, DerefMut};
use bevy_ecs::{prelude::*, system::SystemParam};
use glam::Vec3A;
use navweave_scene::SceneGeometry;
use tracing::{debug, error};

use crate::{
    NavigationState, NavmeshGeometryBackend, NavmeshSettings, NavweaveSystems, agent::WorldHost,
};

pub(super) fn plugin(app: &mut App) {
    app.init_resource::<NavmeshQueue>().add_systems(
        Update,
        process_navmesh_queue.in_set(NavweaveSystems::Generate),
    );
}

/// System parameter for generating navmeshes.
#[derive(SystemParam)]
pub struct NavmeshGenerator<'w> {
    #[system_param(
        validation_message = "Failed to find the navmesh queue. Did you forget to add `NavweavePlugin` to your app?"
    )]
    queue: ResMut<'w, NavmeshQueue>,
}

impl NavmeshGenerator<'_> {
    /// Queue a bake of the whole navmesh from the geometry of the registered
    /// [`NavmeshGeometryBackend`], using the current [`NavmeshSettings`].
    /// Queued requests are processed in FIFO order during the next update.
    pub fn generate(&mut self) {
        self.queue.push_back(NavmeshRequest::Full);
    }

    /// Queue a bake of the tile containing `position`. With `keep_debug_data` the intermediate
    /// results stay available through
    /// [`NavigationScene::debug_tile`](navweave_scene::NavigationScene::debug_tile).
    pub fn regenerate_tile_at(&mut self, position: Vec3A, keep_debug_data: bool) {
        self.queue.push_back(NavmeshRequest::TileAt {
            position,
            keep_debug_data,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NavmeshRequest {
    Full,
    TileAt {
        position: Vec3A,
        keep_debug_data: bool,
    },
}

#[derive(Resource, Default, Deref, DerefMut)]
struct NavmeshQueue(VecDeque<NavmeshRequest>);

fn process_navmesh_queue(world: &mut World) {
    if world.resource::<NavmeshQueue>().is_empty() {
        return;
    }
    let requests: Vec<_> = world.resource_mut::<NavmeshQueue>().drain(..).collect();
    let Some(backend) = world.get_resource::<NavmeshGeometryBackend>().copied() else {
        error!(
            "Cannot generate a navmesh without a geometry backend. Did you forget to add `Mesh3dNavmeshPlugin`?"
        );
        return;
    };
    let meshes = match world.run_system(*backend) {
        Ok(meshes) => meshes,
        Err(e) => {
            error!("Failed to collect navmesh geometry: {e}");
            return;
        }
    };
    let settings = world.resource::<NavmeshSettings>().0.clone();

    world.resource_scope(|world, mut state: Mut<NavigationState>| {
        state.set_generator(settings);
        let geometry = SceneGeometry::from_renderables(&meshes);
        let host = WorldHost(world);
        for request in requests {
            let result = match request {
                NavmeshRequest::Full => state.generate_full_navmesh(&geometry, &host),
                NavmeshRequest::TileAt {
                    position,
                    keep_debug_data,
                } => state.generate_tile_at(position, keep_debug_data, &geometry),
            };
            match result {
                Ok(()) => debug!(
                    ?request,
                    polygons = state.polygon_count(),
                    "processed navmesh request"
                ),
                Err(e) => debug!(?request, "navmesh request failed: {e:#}"),
            }
        }
    });
}
