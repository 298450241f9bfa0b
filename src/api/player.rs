use http::StatusCode;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::config::PlayerConfig;
use crate::handler::{PlayerHandler, Reply, RouteSpec};
use crate::server::{ApiRequest, ApiResponse};
use crate::session::{PlayerRef, SessionRef, MAX_VOLUME};

/// Command names accepted on `/player/{cmd}`.
pub const COMMAND_NAMES: [&str; 11] = [
    "load",
    "play",
    "pause",
    "play-pause",
    "next",
    "prev",
    "seek",
    "set-volume",
    "volume-up",
    "volume-down",
    "current",
];

/// Metric label for any name outside [`COMMAND_NAMES`].
pub const OTHER_COMMAND: &str = "other";

/// A parsed `POST /player/{cmd}` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    Load { uri: String, play: bool },
    Play,
    Pause,
    PlayPause,
    Next,
    Previous,
    Seek(u64),
    SetVolume(u32),
    VolumeUp,
    VolumeDown,
    Current,
}

/// Why a command could not be built from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    Missing(&'static str),
    Invalid { name: &'static str, value: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(cmd) => write!(f, "Unknown command: {cmd}"),
            CommandError::Missing(name) => write!(f, "Missing parameter: {name}"),
            CommandError::Invalid { name, value } => {
                write!(f, "Invalid value for {name}: {value}")
            }
        }
    }
}

fn required(req: &ApiRequest, name: &'static str) -> Result<String, CommandError> {
    req.arg(name).ok_or(CommandError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, value: String) -> Result<T, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::Invalid { name, value })
}

impl PlayerCommand {
    /// Build the command named `cmd`, pulling arguments from the query string
    /// or a form body. `play` on `load` falls back to `autoplay`.
    ///
    /// # Errors
    ///
    /// Unknown command names and missing or malformed arguments.
    pub fn from_request(cmd: &str, req: &ApiRequest, autoplay: bool) -> Result<Self, CommandError> {
        Ok(match cmd {
            "load" => {
                let uri = required(req, "uri")?;
                if uri.trim().is_empty() {
                    return Err(CommandError::Invalid { name: "uri", value: uri });
                }
                let play = match req.arg("play") {
                    Some(v) => parsed("play", v)?,
                    None => autoplay,
                };
                PlayerCommand::Load { uri, play }
            }
            "play" => PlayerCommand::Play,
            "pause" => PlayerCommand::Pause,
            "play-pause" => PlayerCommand::PlayPause,
            "next" => PlayerCommand::Next,
            "prev" => PlayerCommand::Previous,
            "seek" => PlayerCommand::Seek(parsed("pos", required(req, "pos")?)?),
            "set-volume" => {
                let raw = required(req, "volume")?;
                let volume: u32 = parsed("volume", raw.clone())?;
                if volume > MAX_VOLUME {
                    return Err(CommandError::Invalid { name: "volume", value: raw });
                }
                PlayerCommand::SetVolume(volume)
            }
            "volume-up" => PlayerCommand::VolumeUp,
            "volume-down" => PlayerCommand::VolumeDown,
            "current" => PlayerCommand::Current,
            other => return Err(CommandError::Unknown(other.to_string())),
        })
    }

    /// Label to count a request for `cmd` under. The label set is fixed, so
    /// client-chosen names cannot grow the metrics output.
    #[must_use]
    pub fn metric_label(cmd: &str) -> &'static str {
        COMMAND_NAMES
            .iter()
            .copied()
            .find(|name| *name == cmd)
            .unwrap_or(OTHER_COMMAND)
    }

    pub fn apply(&self, player: &PlayerRef) {
        match self {
            PlayerCommand::Load { uri, play } => player.load(uri, *play),
            PlayerCommand::Play => player.play(),
            PlayerCommand::Pause => player.pause(),
            PlayerCommand::PlayPause => player.play_pause(),
            PlayerCommand::Next => player.next(),
            PlayerCommand::Previous => player.previous(),
            PlayerCommand::Seek(pos) => player.seek(*pos),
            PlayerCommand::SetVolume(v) => player.set_volume(*v),
            PlayerCommand::VolumeUp => player.volume_up(),
            PlayerCommand::VolumeDown => player.volume_down(),
            PlayerCommand::Current => {}
        }
    }
}

/// `POST /player/{cmd}`: run one command and answer with the resulting state.
pub struct PlayerCommands {
    config: PlayerConfig,
}

impl PlayerCommands {
    #[must_use]
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }
}

impl PlayerHandler for PlayerCommands {
    fn route(&self) -> RouteSpec {
        RouteSpec::post("/player/{cmd}")
    }

    fn handle(&self, req: &ApiRequest, session: &SessionRef, player: &PlayerRef) -> Reply {
        let cmd = req.param("cmd").unwrap_or_default();
        let command = match PlayerCommand::from_request(cmd, req, self.config.autoplay) {
            Ok(command) => command,
            Err(e) => {
                debug!(connection_id = %req.connection_id, error = %e, "Rejected player command");
                return ApiResponse::text(StatusCode::BAD_REQUEST, e.to_string()).into();
            }
        };
        debug!(
            connection_id = %req.connection_id,
            device_id = %session.device_id(),
            command = ?command,
            "Player command"
        );
        command.apply(player);
        ApiResponse::json(StatusCode::OK, &player.state()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn req(target: &str) -> ApiRequest {
        ApiRequest::new(Method::POST, target)
    }

    #[test]
    fn test_load_defaults_play_to_autoplay() {
        let cmd = PlayerCommand::from_request("load", &req("/player/load?uri=track:a"), true);
        assert_eq!(
            cmd,
            Ok(PlayerCommand::Load { uri: "track:a".into(), play: true })
        );
        let cmd = PlayerCommand::from_request(
            "load",
            &req("/player/load?uri=track:a&play=false"),
            true,
        );
        assert_eq!(
            cmd,
            Ok(PlayerCommand::Load { uri: "track:a".into(), play: false })
        );
    }

    #[test]
    fn test_bad_parameters() {
        assert_eq!(
            PlayerCommand::from_request("load", &req("/player/load"), true),
            Err(CommandError::Missing("uri"))
        );
        assert!(matches!(
            PlayerCommand::from_request("seek", &req("/player/seek?pos=-1"), true),
            Err(CommandError::Invalid { name: "pos", .. })
        ));
        assert!(matches!(
            PlayerCommand::from_request(
                "set-volume",
                &req("/player/set-volume?volume=70000"),
                true
            ),
            Err(CommandError::Invalid { name: "volume", .. })
        ));
        assert_eq!(
            PlayerCommand::from_request("rewind", &req("/player/rewind"), true),
            Err(CommandError::Unknown("rewind".into()))
        );
    }

    #[test]
    fn test_every_listed_name_is_a_command() {
        let r = req("/player/x?uri=track:a&pos=10&volume=5");
        for name in COMMAND_NAMES {
            assert!(PlayerCommand::from_request(name, &r, true).is_ok(), "{name}");
            assert_eq!(PlayerCommand::metric_label(name), name);
        }
        assert_eq!(PlayerCommand::metric_label("junk42"), OTHER_COMMAND);
        assert_eq!(PlayerCommand::metric_label(""), OTHER_COMMAND);
    }

    #[test]
    fn test_volume_bounds_are_inclusive() {
        assert_eq!(
            PlayerCommand::from_request(
                "set-volume",
                &req("/player/set-volume?volume=65536"),
                true
            ),
            Ok(PlayerCommand::SetVolume(MAX_VOLUME))
        );
    }
}
