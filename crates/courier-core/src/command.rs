//! Splitting prefixed command lines.
//!
//! Platform adapters normally do this themselves; the helper exists so simple
//! event sources (consoles, tests) produce the same shape of
//! [`NormalizedEvent`](crate::NormalizedEvent).

/// A parsed command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Command name without the prefix, lower-cased.
    pub name: String,
    pub args: Vec<String>,
}

/// Parses `text` as a command if it starts with `prefix`.
///
/// Returns `None` when the prefix is missing or nothing follows it.
pub fn parse_command(prefix: &str, text: &str) -> Option<CommandLine> {
    if prefix.is_empty() {
        return None;
    }
    let rest = text.strip_prefix(prefix)?;
    let mut tokens = rest.split_whitespace();
    let name = tokens.next()?.to_lowercase();

    // A space right after the prefix ("/ ban") is not a command.
    if rest.starts_with(char::is_whitespace) {
        return None;
    }

    Some(CommandLine {
        name,
        args: tokens.map(str::to_string).collect(),
    })
}
