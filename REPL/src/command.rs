/// A tokenized command line: `/name arg1 arg2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub command: String,
    pub args: Vec<String>,
}

pub struct CommandParser;

impl CommandParser {
    /// Split on whitespace. The first token is the command and gets the
    /// prefix prepended when it is missing. Blank input yields `None`.
    pub fn parse(input: &str, prefix: char) -> Option<CommandLine> {
        let mut tokens = input.split_whitespace();
        let first = tokens.next()?;

        let command = if first.starts_with(prefix) {
            first.to_string()
        } else {
            format!("{}{}", prefix, first)
        };

        Some(CommandLine {
            command,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_and_args() {
        let line = CommandParser::parse("/ping a  b", '/').unwrap();
        assert_eq!(line.command, "/ping");
        assert_eq!(line.args, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_adds_missing_prefix() {
        let line = CommandParser::parse("  help topic\n", '/').unwrap();
        assert_eq!(line.command, "/help");
        assert_eq!(line.args, vec!["topic"]);
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(CommandParser::parse("   ", '/'), None);
        assert_eq!(CommandParser::parse("", '/'), None);
    }

    #[test]
    fn test_parse_custom_prefix() {
        let line = CommandParser::parse("!run", '!').unwrap();
        assert_eq!(line.command, "!run");
        assert!(line.args.is_empty());
    }
}
