//! Room tracking: which projects each room wants notifications for.

use std::sync::Arc;

use herald_common::error::AppError;
use herald_common::types::RoomId;

use crate::store::ProjectStore;

/// Result of adding a project to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Added,
    AlreadyTracked,
}

/// Result of removing a project from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveResult {
    Removed,
    NotTracked,
}

/// Per-room tracking lists, backed by the [`ProjectStore`].
#[derive(Debug, Clone)]
pub struct RoomTracker {
    store: Arc<ProjectStore>,
}

impl RoomTracker {
    pub fn new(store: Arc<ProjectStore>) -> Self {
        Self { store }
    }

    /// Projects tracked by `room`; empty if the room never tracked anything.
    pub fn tracking(&self, room: &RoomId) -> Vec<String> {
        self.store
            .snapshot()
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the tracking list of `room`. An empty list stops tracking.
    pub fn set_tracking(&self, room: &RoomId, projects: Vec<String>) -> Result<(), AppError> {
        let mut projects = projects;
        dedup_in_order(&mut projects);

        self.store.update(|data| {
            if projects.is_empty() {
                data.rooms.remove(room);
            } else {
                data.rooms.insert(room.clone(), projects);
            }
        })?;

        tracing::info!(room_id = %room, "Room tracking replaced");
        Ok(())
    }

    pub fn add(&self, room: &RoomId, project: &str) -> Result<AddResult, AppError> {
        let result = self.store.update(|data| {
            let tracked = data.rooms.entry(room.clone()).or_default();
            if tracked.iter().any(|p| p == project) {
                AddResult::AlreadyTracked
            } else {
                tracked.push(project.to_string());
                AddResult::Added
            }
        })?;

        if result == AddResult::Added {
            tracing::info!(room_id = %room, project, "Project added to room");
        }
        Ok(result)
    }

    pub fn remove(&self, room: &RoomId, project: &str) -> Result<RemoveResult, AppError> {
        let result = self.store.update(|data| {
            let Some(tracked) = data.rooms.get_mut(room) else {
                return RemoveResult::NotTracked;
            };
            let before = tracked.len();
            tracked.retain(|p| p != project);
            let removed = tracked.len() != before;
            if tracked.is_empty() {
                data.rooms.remove(room);
            }
            if removed {
                RemoveResult::Removed
            } else {
                RemoveResult::NotTracked
            }
        })?;

        if result == RemoveResult::Removed {
            tracing::info!(room_id = %room, project, "Project removed from room");
        }
        Ok(result)
    }

    /// Rooms that track at least one project, in room id order.
    pub fn rooms_with_tracking(&self) -> Vec<RoomId> {
        self.store
            .snapshot()
            .rooms
            .into_iter()
            .filter(|(_, projects)| !projects.is_empty())
            .map(|(room, _)| room)
            .collect()
    }
}

fn dedup_in_order(projects: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    projects.retain(|p| seen.insert(p.clone()));
}
