//! Next-skill resolution over the prerequisite graph.
//!
//! Starting from the goal, the resolver repeatedly descends into the first
//! unmastered prerequisite (in listing order) until it reaches a skill whose
//! prerequisites are all mastered. That skill is the next one to teach.

use std::collections::HashSet;

use tracing::debug;
use tutor_store::{SkillConnection, SkillId};

use crate::error::{Result, TutorError};

/// Finds the next skill to teach on the way to `goal`.
///
/// Returns `None` if the goal itself is mastered. Otherwise the returned
/// skill is unmastered and all of its prerequisites are mastered.
///
/// # Errors
///
/// - `TutorError::PrerequisiteCycle` if the walk reaches a skill already on
///   its path.
/// - `TutorError::PrerequisiteDepthExceeded` if the path grows past
///   `max_depth` prerequisites below the goal.
/// - Store errors from reading prerequisites.
pub async fn find_next_skill(
    conn: &mut dyn SkillConnection,
    mastered: &HashSet<SkillId>,
    goal: SkillId,
    max_depth: usize,
) -> Result<Option<SkillId>> {
    if mastered.contains(&goal) {
        return Ok(None);
    }

    let mut path = vec![goal];
    let mut current = goal;

    loop {
        let prerequisites = conn.prerequisite_ids(current).await?;
        let Some(next) = prerequisites
            .into_iter()
            .find(|skill_id| !mastered.contains(skill_id))
        else {
            debug!(goal, skill_id = current, depth = path.len() - 1, "resolved next skill");
            return Ok(Some(current));
        };

        if path.contains(&next) {
            return Err(TutorError::PrerequisiteCycle { skill_id: next });
        }
        if path.len() > max_depth {
            return Err(TutorError::PrerequisiteDepthExceeded {
                goal_skill_id: goal,
                max_depth,
            });
        }

        path.push(next);
        current = next;
    }
}
