//! Line-oriented command parsing for the terminal front end.

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Login { username: String, password: String },
    Register {
        username: String,
        email: String,
        password: String,
    },
    Logout,
    /// Re-pull the roster and unread counts.
    Users,
    /// Open a conversation by numeric id or username.
    Open { target: String },
    Unread,
    Help,
    Quit,
    /// Plain text for the active conversation.
    Message(String),
    Empty,
}

/// Rejected slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub &'static str);

pub const HELP_TEXT: &str = "\
commands:
  /login <username> <password>
  /register <username> <email> <password>
  /logout
  /users                 refresh the contact list
  /open <id|username>    switch conversation
  /unread                show unread counts
  /help
  /quit
anything else is sent to the open conversation";

pub fn parse_line(line: &str) -> Result<InputLine, UsageError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(InputLine::Empty);
    }
    // `//text` sends a literal message starting with a slash.
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Ok(InputLine::Message(format!("/{rest}")));
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Ok(InputLine::Message(trimmed.to_owned()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("login", [username, password]) => Ok(InputLine::Login {
            username: (*username).to_owned(),
            password: (*password).to_owned(),
        }),
        ("login", _) => Err(UsageError("usage: /login <username> <password>")),
        ("register", [username, email, password]) => Ok(InputLine::Register {
            username: (*username).to_owned(),
            email: (*email).to_owned(),
            password: (*password).to_owned(),
        }),
        ("register", _) => Err(UsageError("usage: /register <username> <email> <password>")),
        ("logout", []) => Ok(InputLine::Logout),
        ("users", []) => Ok(InputLine::Users),
        ("open", [target]) => Ok(InputLine::Open {
            target: (*target).to_owned(),
        }),
        ("open", _) => Err(UsageError("usage: /open <id|username>")),
        ("unread", []) => Ok(InputLine::Unread),
        ("help", _) => Ok(InputLine::Help),
        ("quit" | "exit", []) => Ok(InputLine::Quit),
        _ => Err(UsageError("unknown command, try /help")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_line("  hello there \n").expect("parse"),
            InputLine::Message("hello there".to_owned())
        );
        assert_eq!(parse_line("   ").expect("parse"), InputLine::Empty);
        assert_eq!(
            parse_line("//shrug").expect("parse"),
            InputLine::Message("/shrug".to_owned())
        );
    }

    #[test]
    fn parses_auth_commands() {
        assert_eq!(
            parse_line("/login alice s3cret").expect("parse"),
            InputLine::Login {
                username: "alice".to_owned(),
                password: "s3cret".to_owned(),
            }
        );
        assert_eq!(
            parse_line("/register bob bob@example.org pw").expect("parse"),
            InputLine::Register {
                username: "bob".to_owned(),
                email: "bob@example.org".to_owned(),
                password: "pw".to_owned(),
            }
        );
        assert_eq!(parse_line("/logout").expect("parse"), InputLine::Logout);
        assert!(parse_line("/login alice").is_err());
        assert!(parse_line("/register bob pw").is_err());
    }

    #[test]
    fn parses_navigation_commands() {
        assert_eq!(
            parse_line("/open 42").expect("parse"),
            InputLine::Open {
                target: "42".to_owned()
            }
        );
        assert_eq!(parse_line("/users").expect("parse"), InputLine::Users);
        assert_eq!(parse_line("/unread").expect("parse"), InputLine::Unread);
        assert_eq!(parse_line("/exit").expect("parse"), InputLine::Quit);
        assert_eq!(parse_line("/help me").expect("parse"), InputLine::Help);
        assert!(parse_line("/open").is_err());
        assert!(parse_line("/dance").is_err());
        assert!(parse_line("/").is_err());
    }
}
