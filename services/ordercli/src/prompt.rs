//! Terminal input for OTP codes and passwords

use std::future::Future;
use std::io::{BufRead, IsTerminal};
use std::pin::Pin;

use foodora_session::OtpPrompt;

/// Reads OTP codes from the terminal with echo off. Only offered when stdin
/// is a terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl OtpPrompt for TerminalPrompt {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn read_code<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<String>> + Send + 'a>> {
        Box::pin(read_hidden(code_question(channel)))
    }
}

fn code_question(channel: &str) -> String {
    format!("Enter the code sent via {channel}: ")
}

/// Read a password: hidden from the terminal when stdin is one, otherwise
/// the first line of piped input.
pub async fn read_password() -> std::io::Result<String> {
    if std::io::stdin().is_terminal() {
        read_hidden("Password: ".to_string()).await
    } else {
        tokio::task::spawn_blocking(|| read_line(&mut std::io::stdin().lock()))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Prompt on the terminal and read one line with echo off, without blocking
/// the runtime. The blocking read itself cannot be interrupted; a cancelled
/// caller simply stops waiting.
async fn read_hidden(question: String) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || rpassword::prompt_password(question))
        .await
        .map_err(std::io::Error::other)?
}

fn read_line(input: &mut impl BufRead) -> std::io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stdin closed",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_line_strips_line_ending_only() {
        let mut input = std::io::Cursor::new(b" 123456 \r\nnext\n".to_vec());
        assert_eq!(read_line(&mut input).unwrap(), " 123456 ");
        assert_eq!(read_line(&mut input).unwrap(), "next");
    }

    #[test]
    fn code_question_names_the_channel() {
        assert_eq!(code_question("email"), "Enter the code sent via email: ");
    }

    #[test]
    fn closed_input_is_eof_error() {
        let mut input = std::io::Cursor::new(Vec::new());
        let err = read_line(&mut input).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
