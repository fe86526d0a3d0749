//! Chat commands that manage a room's tracked projects.
//!
//! ```text
//! show tracking            list the projects this room tracks
//! show projects            list the projects that can be tracked
//! track <p> ["q r"] ...    replace the tracked list            (admin)
//! add <p>                  track one more project              (admin)
//! remove <p>               stop tracking one project           (admin)
//! stop tracking            stop tracking everything            (admin)
//! ```
//!
//! A leading `prometheus` word is accepted and ignored, so the commands work
//! both addressed and bare.

use std::sync::Arc;

use herald_common::error::AppError;
use herald_common::types::RoomId;

use crate::rooms::{AddResult, RemoveResult, RoomTracker};
use crate::store::ProjectStore;

/// Optional prefix addressing this relay.
const COMMAND_PREFIX: &str = "prometheus";

pub const HELP: &str = "Commands:\n\
    show tracking - list the projects tracked in this room\n\
    show projects - list the projects that can be tracked\n\
    track <project> [<project> ...] - track exactly these projects (admin)\n\
    add <project> - track one more project (admin)\n\
    remove <project> - stop tracking a project (admin)\n\
    stop tracking - stop tracking all projects (admin)";

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowTracking,
    ShowProjects,
    Track(Vec<String>),
    Add(String),
    Remove(String),
    StopTracking,
    Help,
}

impl Command {
    /// Parse command text. Errors carry the reply to send back.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut words = split_args(text)?;
        if words
            .first()
            .is_some_and(|w| w.eq_ignore_ascii_case(COMMAND_PREFIX))
        {
            words.remove(0);
        }

        let Some((verb, args)) = words.split_first() else {
            return Ok(Command::Help);
        };

        match (verb.to_ascii_lowercase().as_str(), args) {
            ("show", [what]) if is_tracking_word(what) => Ok(Command::ShowTracking),
            ("show", [what]) if what == "projects" => Ok(Command::ShowProjects),
            ("show", _) => Err(format!(
                "Invalid arguments for 'show'. Use 'show tracking' or 'show projects'.\n{HELP}"
            )),
            ("track", projects) => Ok(Command::Track(projects.to_vec())),
            ("add", [project]) => Ok(Command::Add(project.clone())),
            ("add", _) => Err("Usage: add <project>".to_string()),
            ("remove", [project]) => Ok(Command::Remove(project.clone())),
            ("remove", _) => Err("Usage: remove <project>".to_string()),
            ("stop", [what]) if is_tracking_word(what) => Ok(Command::StopTracking),
            ("stop", _) => Err("Usage: stop tracking".to_string()),
            _ => Ok(Command::Help),
        }
    }

    /// Whether the command changes room state.
    pub fn requires_admin(&self) -> bool {
        match self {
            Command::Track(projects) => !projects.is_empty(),
            Command::Add(_) | Command::Remove(_) | Command::StopTracking => true,
            Command::ShowTracking | Command::ShowProjects | Command::Help => false,
        }
    }
}

fn is_tracking_word(word: &str) -> bool {
    matches!(word, "tracking" | "track")
}

/// Split on whitespace; single or double quotes group words.
fn split_args(text: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err("Unterminated quote in command.".to_string());
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// Executes commands on behalf of a room member.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<ProjectStore>,
    tracker: RoomTracker,
    admins: Arc<Vec<String>>,
}

impl CommandHandler {
    pub fn new(store: Arc<ProjectStore>, tracker: RoomTracker, admins: Vec<String>) -> Self {
        Self {
            store,
            tracker,
            admins: Arc::new(admins),
        }
    }

    /// Run `text` sent by `sender` in `room` and return the reply.
    ///
    /// Returns `AppError::Unauthorized` when a non-admin tries to change the
    /// room's tracking.
    pub fn handle(&self, room: &RoomId, sender: &str, text: &str) -> Result<String, AppError> {
        let command = match Command::parse(text) {
            // `track` without arguments only reports the current list
            Ok(Command::Track(projects)) if projects.is_empty() => Command::ShowTracking,
            Ok(command) => command,
            Err(reply) => return Ok(reply),
        };

        if command.requires_admin() && !self.admins.iter().any(|a| a == sender) {
            tracing::warn!(room_id = %room, sender, ?command, "Admin command refused");
            return Err(AppError::Unauthorized(format!(
                "Sorry, only admins can do that, {sender}."
            )));
        }

        tracing::debug!(room_id = %room, sender, ?command, "Running command");

        match command {
            Command::Help => Ok(HELP.to_string()),
            Command::ShowTracking => Ok(self.describe_tracking(room)),
            Command::ShowProjects => Ok(format!(
                "Available projects: {}",
                to_json_list(&self.store.known_projects())
            )),
            Command::Track(projects) => {
                if let Some(unknown) = projects.iter().find(|p| !self.store.is_known(p)) {
                    return Ok(format!("Unknown project name: {unknown}."));
                }
                self.tracker.set_tracking(room, projects)?;
                Ok(format!(
                    "Notifications for projects {} will be posted in this room.",
                    to_json_list(&self.tracker.tracking(room))
                ))
            }
            Command::Add(project) => {
                if !self.store.is_known(&project) {
                    return Ok(format!("Unknown project name: {project}."));
                }
                match self.tracker.add(room, &project)? {
                    AddResult::AlreadyTracked => Ok(format!("{project} is already being tracked.")),
                    AddResult::Added => Ok(format!(
                        "Added {project}. Now tracking {}.",
                        to_json_list(&self.tracker.tracking(room))
                    )),
                }
            }
            Command::Remove(project) => match self.tracker.remove(room, &project)? {
                RemoveResult::NotTracked => Ok(format!(
                    "Cannot remove {project}: it isn't being tracked."
                )),
                RemoveResult::Removed => Ok(format!(
                    "Removed {project}. Now tracking {}.",
                    to_json_list(&self.tracker.tracking(room))
                )),
            },
            Command::StopTracking => {
                self.tracker.set_tracking(room, Vec::new())?;
                Ok("Stopped tracking projects.".to_string())
            }
        }
    }

    fn describe_tracking(&self, room: &RoomId) -> String {
        let tracked = self.tracker.tracking(room);
        if tracked.is_empty() {
            "Not tracking any projects currently.".to_string()
        } else {
            format!("Currently tracking {}", to_json_list(&tracked))
        }
    }
}

fn to_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| items.join(", "))
}
