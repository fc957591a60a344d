//! Text protocol of the control channel.
//!
//! A request is `<COMMAND> [key=value ...]` separated by whitespace. Every
//! request gets exactly one reply line.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::{Color, PlayerError, Result};

/// Commands understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    PlayVideo,
    StopVideo,
    PlayAudio,
    StopAudio,
    SetLed,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        Self::PlayVideo,
        Self::StopVideo,
        Self::PlayAudio,
        Self::StopAudio,
        Self::SetLed,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PlayVideo => "PLAY_VIDEO",
            Self::StopVideo => "STOP_VIDEO",
            Self::PlayAudio => "PLAY_AUDIO",
            Self::StopAudio => "STOP_AUDIO",
            Self::SetLed => "SET_LED",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request line split into its name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: HashMap<String, String>,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| PlayerError::config("empty command"))?
            .to_string();

        let mut args = HashMap::new();
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| PlayerError::config(format!("argument `{token}` is not key=value")))?;
            if key.is_empty() || value.is_empty() {
                return Err(PlayerError::config(format!(
                    "argument `{token}` is not key=value"
                )));
            }
            args.insert(key.to_string(), value.to_string());
        }

        Ok(Self { name, args })
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.arg(key).map(PathBuf::from)
    }
}

/// A validated command. Omitted arguments are `None` and get their defaults
/// from the server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    PlayVideo {
        image_dir: Option<PathBuf>,
        /// Name of a video in the library.
        video: Option<String>,
        fps: Option<u32>,
        audio: Option<PathBuf>,
        timeline: Option<PathBuf>,
    },
    StopVideo,
    PlayAudio {
        audio: Option<PathBuf>,
    },
    StopAudio,
    SetLed {
        color: Option<Color>,
    },
}

impl Request {
    pub fn from_command(kind: CommandKind, command: &Command) -> Result<Self> {
        let request = match kind {
            CommandKind::PlayVideo => Self::PlayVideo {
                image_dir: command.path("image_dir"),
                video: command.arg("video").map(str::to_string),
                fps: command.arg("fps").map(parse_fps).transpose()?,
                audio: command.path("audio"),
                timeline: command.path("timeline"),
            },
            CommandKind::StopVideo => Self::StopVideo,
            CommandKind::PlayAudio => Self::PlayAudio {
                audio: command.path("audio"),
            },
            CommandKind::StopAudio => Self::StopAudio,
            CommandKind::SetLed => Self::SetLed {
                color: command.arg("color").map(str::parse).transpose()?,
            },
        };

        for key in command.args.keys() {
            if !kind_accepts(kind, key) {
                debug!(command = kind.name(), key = key.as_str(), "ignoring unknown argument");
            }
        }
        Ok(request)
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::PlayVideo { .. } => CommandKind::PlayVideo,
            Self::StopVideo => CommandKind::StopVideo,
            Self::PlayAudio { .. } => CommandKind::PlayAudio,
            Self::StopAudio => CommandKind::StopAudio,
            Self::SetLed { .. } => CommandKind::SetLed,
        }
    }
}

fn kind_accepts(kind: CommandKind, key: &str) -> bool {
    match kind {
        CommandKind::PlayVideo => {
            matches!(key, "image_dir" | "video" | "fps" | "audio" | "timeline")
        }
        CommandKind::PlayAudio => key == "audio",
        CommandKind::SetLed => key == "color",
        CommandKind::StopVideo | CommandKind::StopAudio => false,
    }
}

fn parse_fps(value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(fps) if fps > 0 => Ok(fps),
        _ => Err(PlayerError::config(format!(
            "fps `{value}` is not a positive integer"
        ))),
    }
}

/// Reply line sent for each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The command was handed to its handler. Handler failures are only logged.
    Accepted(CommandKind),
    Unknown(String),
    Invalid { kind: CommandKind, reason: String },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted(kind) => writeln!(f, "{kind} OK"),
            Self::Unknown(name) => writeln!(f, "Failed to recognize command {name}!"),
            Self::Invalid { kind, reason } => {
                writeln!(f, "Failed to parse command {kind}: {reason}!")
            }
        }
    }
}

/// Decodes one non-empty request line, or returns the rejection to send back.
pub fn decode(line: &str) -> std::result::Result<Request, Reply> {
    let name = line.split_whitespace().next().unwrap_or_default();
    let kind = CommandKind::from_name(name).ok_or_else(|| Reply::Unknown(name.to_string()))?;

    Command::parse(line)
        .and_then(|command| Request::from_command(kind, &command))
        .map_err(|err| Reply::Invalid {
            kind,
            reason: match err {
                PlayerError::Config(reason) => reason,
                other => other.to_string(),
            },
        })
}
