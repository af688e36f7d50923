use bevy_app::prelude::*;
use bevy_derive::{Deref, DerefMut};
use bevy_ecs::{prelude::*, system::SystemId};
use navweave_scene::MeshInstance;

/// The current backend registered through [`NavmeshApp::set_navmesh_geometry_backend`]
#[derive(Resource, Clone, Copy, Deref, DerefMut)]
pub struct NavmeshGeometryBackend(pub SystemId<(), Vec<MeshInstance>>);

/// Extension used to implement [`NavmeshApp::set_navmesh_geometry_backend`] on [`App`]
pub trait NavmeshApp {
    /// Set the backend that collects the geometry navmeshes are baked from. Only one backend can
    /// be set at a time. Setting a backend will replace any existing backend. By default, no
    /// backend is set.
    fn set_navmesh_geometry_backend<M>(
        &mut self,
        system: impl IntoSystem<(), Vec<MeshInstance>, M> + 'static,
    ) -> &mut App;
}

impl NavmeshApp for App {
    fn set_navmesh_geometry_backend<M>(
        &mut self,
        system: impl IntoSystem<(), Vec<MeshInstance>, M> + 'static,
    ) -> &mut App {
        let id = self.register_system(system);
        self.world_mut().insert_resource(NavmeshGeometryBackend(id));
        self
    }
}
