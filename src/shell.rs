use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{error::ReadlineError, Config, Context, Editor, Helper};
use std::future::Future;

pub const COMMANDS: [&str; 6] = ["status", "reload", "write", "rotate", "close", "exit"];

/*
    @@@
    @CmdCompleter;
    . Drops CmdCompleter into 'rl.set_helper(Some(...))' for prefix-based command completion.
    . Completes the command word, and sink names after `write`/`rotate`/`close`.
*/
struct CmdCompleter {
    commands: Vec<String>,
    sinks: Vec<String>,
}
impl Helper for CmdCompleter {}
impl Hinter for CmdCompleter {
    type Hint = String;
}
impl Highlighter for CmdCompleter {}
impl Validator for CmdCompleter {}
impl Completer for CmdCompleter {
    type Candidate = Pair;
    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let line = &line[..pos];
        let (start, word, pool) = match line.split_once(' ') {
            Some((cmd, rest)) if ["write", "rotate", "close"].contains(&cmd) && !rest.contains(' ') => {
                (cmd.len() + 1, rest, &self.sinks)
            }
            Some(_) => return Ok((pos, Vec::new())),
            None => (0, line, &self.commands),
        };
        let matches = pool
            .iter()
            .filter(|c| c.starts_with(word))
            .map(|c| Pair { display: c.clone(), replacement: c.clone() })
            .collect();
        Ok((start, matches))
    }
}

/// A parsed shell line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Status,
    Reload,
    Write { sink: &'a str, text: &'a str },
    Rotate(&'a str),
    Close(&'a str),
    Exit,
    Unknown(&'a str),
}

pub fn parse_command(input: &str) -> Command<'_> {
    let input = input.trim();
    let (cmd, rest) = input.split_once(' ').map_or((input, ""), |(c, r)| (c, r.trim()));
    match (cmd, rest) {
        ("status", "") => Command::Status,
        ("reload", "") => Command::Reload,
        ("exit", "") | ("quit", "") => Command::Exit,
        ("rotate", sink) if !sink.is_empty() => Command::Rotate(sink),
        ("close", sink) if !sink.is_empty() => Command::Close(sink),
        ("write", rest) if !rest.is_empty() => {
            let (sink, text) = rest.split_once(' ').unwrap_or((rest, ""));
            Command::Write { sink, text }
        }
        _ => Command::Unknown(input),
    }
}

/*
    @@@
    @run_shell();
    . Offers tab-completion over the commands and the sink names given.
    . Loads/saves the line history under logs/.
    . Dispatches status, reload, write, rotate and close to the caller's closures until exit/EOF/Ctrl-C.
*/
pub async fn run_shell<SFut, RFut, WFut, RtFut, CFut, OnStatus, OnReload, OnWrite, OnRotate, OnClose>(
    sinks: Vec<String>,
    mut on_status: OnStatus,
    mut on_reload: OnReload,
    mut on_write: OnWrite,
    mut on_rotate: OnRotate,
    mut on_close: OnClose,
) -> rustyline::Result<()>
where
    OnStatus: FnMut() -> SFut,
    SFut: Future<Output = ()>,
    OnReload: FnMut() -> RFut,
    RFut: Future<Output = ()>,
    OnWrite: FnMut(&str, &str) -> WFut,
    WFut: Future<Output = ()>,
    OnRotate: FnMut(&str) -> RtFut,
    RtFut: Future<Output = ()>,
    OnClose: FnMut(&str) -> CFut,
    CFut: Future<Output = ()>,
{
    let config = Config::builder().auto_add_history(false).build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(CmdCompleter {
        commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
        sinks,
    }));
    let _ = rl.load_history("logs/history.txt");

    loop {
        match rl.readline("rollsmith> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.trim())?;
                match parse_command(&line) {
                    Command::Status => on_status().await,
                    Command::Reload => on_reload().await,
                    Command::Write { sink, text } => on_write(sink, text).await,
                    Command::Rotate(sink) => on_rotate(sink).await,
                    Command::Close(sink) => on_close(sink).await,
                    Command::Exit => break,
                    Command::Unknown(other) => println!("Unknown command: {}", other),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all("logs");
    rl.save_history("logs/history.txt")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("status"), Command::Status);
        assert_eq!(parse_command("  reload "), Command::Reload);
        assert_eq!(parse_command("rotate app"), Command::Rotate("app"));
        assert_eq!(parse_command("close  app"), Command::Close("app"));
        assert_eq!(
            parse_command("write app hello there"),
            Command::Write { sink: "app", text: "hello there" }
        );
        assert_eq!(parse_command("write app"), Command::Write { sink: "app", text: "" });
        assert_eq!(parse_command("rotate"), Command::Unknown("rotate"));
        assert_eq!(parse_command("exit"), Command::Exit);
        assert_eq!(parse_command("dance"), Command::Unknown("dance"));
    }
}
