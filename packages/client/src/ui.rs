//! UI utilities for the client.

use std::io::Write;

pub const PROMPT: &str = "hibiki> ";

pub const HELP: &str = "commands: /join <channel>, /leave <channel>, /quit";

/// Redisplay the prompt after printing a message
pub fn redisplay_prompt() {
    print!("{}", PROMPT);
    std::io::stdout().flush().ok();
}

/// 標準入力から受け付けるコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Join(String),
    Leave(String),
    Quit,
    Help,
}

/// 入力行をコマンドとして解釈する
///
/// # Returns
///
/// 空行なら `None`、解釈できない行は `Help`
pub fn parse_command(line: &str) -> Option<UserCommand> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let argument = parts.next();
    let command = match (command, argument) {
        ("/join", Some(channel)) => UserCommand::Join(channel.to_string()),
        ("/leave", Some(channel)) => UserCommand::Leave(channel.to_string()),
        ("/quit" | "/exit", None) => UserCommand::Quit,
        _ => UserCommand::Help,
    };
    Some(command)
}
