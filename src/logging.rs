use std::fmt::Display;

use colored::Colorize;
use log::{info, Level};
use meshcall_collab::CollabEvent;

/// External crates only need to log warnings and errors
const ALLOWED_EXTERNAL_LEVELS: [Level; 2] = [Level::Warn, Level::Error];
const ALLOWED_LEVELS: [Level; 3] = [Level::Info, Level::Warn, Level::Error];

/// Also let debug logs through, for diagnosing a negotiation
const VERBOSE_VAR: &str = "MESHCALL_VERBOSE";

pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let verbose = std::env::var_os(VERBOSE_VAR).is_some();

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let target = Target::from_str(record.target());
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{:^5} {} {:^8} {}",
                level_to_string(&record.level()),
                now.format("%H:%M:%S").to_string().bright_black(),
                target,
                message
            ))
        })
        .filter(move |meta| {
            let target = Target::from_str(meta.target());

            let is_allowed =
                ALLOWED_LEVELS.contains(&meta.level()) || verbose && meta.level() == Level::Debug;
            let is_severe = ALLOWED_EXTERNAL_LEVELS.contains(&meta.level());

            target.is_local() && is_allowed || is_severe
        })
        .chain(std::io::stdout())
        .apply()
}

/// Writes a line for every change in room membership
pub fn log_event(event: &CollabEvent) {
    match event {
        CollabEvent::RoomCreated { room_id, host } => {
            info!("Room {} was created by {}", room_id, host)
        }
        CollabEvent::MemberJoined { room_id, member_id } => {
            info!("{} joined room {}", member_id, room_id)
        }
        CollabEvent::MemberLeft { room_id, member_id } => {
            info!("{} left room {}", member_id, room_id)
        }
        CollabEvent::RoomClosed { room_id } => info!("Room {} is empty and was closed", room_id),
    }
}

enum Target {
    External(String),
    Main,
    Server,
    Collab,
    Peer,
    Core,
    Impls,
}

impl Target {
    fn from_str(str: &str) -> Self {
        let module = str.split("::").next().unwrap_or_default();

        match module {
            "meshcall" => Self::Main,
            "meshcall_core" => Self::Core,
            "meshcall_server" => Self::Server,
            "meshcall_collab" => Self::Collab,
            "meshcall_peer" => Self::Peer,
            "meshcall_impls" => Self::Impls,
            other => Target::External(other.to_string()),
        }
    }

    fn is_local(&self) -> bool {
        !matches!(self, Self::External(_))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Target::External(x) => x.as_str().clear(),
            Target::Main => "MAIN".bright_white(),
            Target::Server => "SERVER".bright_green(),
            Target::Collab => "COLLAB".bright_purple(),
            Target::Peer => "PEER".bright_cyan(),
            Target::Core => "CORE".blue(),
            Target::Impls => "IMPLS".yellow(),
        };

        Display::fmt(&result, f)
    }
}

fn level_to_string(level: &Level) -> String {
    match level {
        Level::Error => " ERR ".black().on_red().bold().to_string(),
        Level::Warn => " WRN ".black().on_yellow().bold().to_string(),
        Level::Info => " INF ".black().on_blue().bold().to_string(),
        Level::Debug => " DBG ".white().on_black().to_string(),
        Level::Trace => " TRC ".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_are_labelled_by_crate() {
        assert!(matches!(
            Target::from_str("meshcall_collab::router"),
            Target::Collab
        ));
        assert!(matches!(Target::from_str("meshcall"), Target::Main));
        assert!(matches!(
            Target::from_str("webrtc_ice::agent"),
            Target::External(name) if name == "webrtc_ice"
        ));
        assert!(!Target::from_str("axum::serve").is_local());
    }
}
