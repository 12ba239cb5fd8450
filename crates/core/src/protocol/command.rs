/// What an inbound chunk on the control connection carries.
///
/// Classification only looks at a short prefix of the chunk. Anything that
/// does not start with a known keyword is [`Command::Raw`] binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Options,
    Announce,
    Setup,
    Record,
    Teardown,
    /// A bare session description (`v=` ...) sent after ANNOUNCE.
    Sdp,
    Describe,
    Play,
    Pause,
    GetParameter,
    SetParameter,
    Redirect,
    Preroll,
    Echo,
    Get,
    Post,
    Search,
    PlaylistStart,
    RecomputeInterval,
    Raw,
}

/// How many leading bytes are inspected.
const PREFIX_LEN: usize = 10;

/// Keywords in match order. Longer keywords sharing a prefix with a shorter
/// one must come first (`GET_PARAMETER` before `GET`).
const KEYWORDS: &[(&str, Command)] = &[
    ("OPTIONS", Command::Options),
    ("ANNOUNCE", Command::Announce),
    ("SETUP", Command::Setup),
    ("RECORD", Command::Record),
    ("TEARDOWN", Command::Teardown),
    ("v=", Command::Sdp),
    ("DESCRIBE", Command::Describe),
    ("PLAY", Command::Play),
    ("PAUSE", Command::Pause),
    ("GET_PARAMETER", Command::GetParameter),
    ("SET_PARAMETER", Command::SetParameter),
    ("REDIRECT", Command::Redirect),
    ("PREROLL", Command::Preroll),
    ("ECHO", Command::Echo),
    ("GET", Command::Get),
    ("POST", Command::Post),
    ("SEARCH", Command::Search),
    ("X-PLAYLIST-START", Command::PlaylistStart),
    ("X-RECOMPUTE-INTERVAL", Command::RecomputeInterval),
];

impl Command {
    /// Classify a chunk by its first bytes.
    ///
    /// Keywords longer than the inspected prefix (e.g. `GET_PARAMETER`)
    /// match on their truncated form, as long as the chunk is that long.
    pub fn classify(chunk: &[u8]) -> Command {
        let prefix = &chunk[..chunk.len().min(PREFIX_LEN)];
        for (keyword, command) in KEYWORDS {
            let keyword = keyword.as_bytes();
            let wanted = &keyword[..keyword.len().min(PREFIX_LEN)];
            if prefix.starts_with(wanted) {
                return *command;
            }
        }
        Command::Raw
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::Teardown => "TEARDOWN",
            Self::Sdp => "SDP",
            Self::Describe => "DESCRIBE",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
            Self::Redirect => "REDIRECT",
            Self::Preroll => "PREROLL",
            Self::Echo => "ECHO",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Search => "SEARCH",
            Self::PlaylistStart => "X-PLAYLIST-START",
            Self::RecomputeInterval => "X-RECOMPUTE-INTERVAL",
            Self::Raw => "RAW",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
