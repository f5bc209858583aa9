use sync_core::PersonaId;

pub const HELP: &str = "\
commands:
  <text>               send a message
  /clear               delete every message in this conversation
  /follow [persona]    request to follow a persona
  /status [persona]    refresh follow status
  /reconnect           reopen the push channel
  /help                show this help
  /quit                exit";

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Clear,
    Follow(Option<PersonaId>),
    Status(Option<PersonaId>),
    Reconnect,
    Help,
    Quit,
}

impl Command {
    /// Parse a line. Blank lines yield `Ok(None)`; `//` escapes a leading slash.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(escaped) = line.strip_prefix("//") {
            return Ok(Some(Self::Send(format!("/{escaped}"))));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_owned())));
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let argument = parts.next().map(PersonaId::new);
        if parts.next().is_some() {
            return Err(format!("too many arguments for /{name}"));
        }

        let parsed = match (name, argument) {
            ("clear", None) => Self::Clear,
            ("follow", subject) => Self::Follow(subject),
            ("status", subject) => Self::Status(subject),
            ("reconnect", None) => Self::Reconnect,
            ("help", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            ("clear" | "reconnect" | "help" | "quit" | "exit", Some(_)) => {
                return Err(format!("/{name} takes no arguments"));
            }
            _ => return Err(format!("unknown command /{name}; try /help")),
        };
        Ok(Some(parsed))
    }
}
