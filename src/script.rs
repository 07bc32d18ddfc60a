//! A tiny line based command language for
//! poking at a [`Store`] interactively or
//! from a script file.
//!
//! ```text
//! open NAME [create]
//! write FD TEXT...
//! read FD LEN
//! stat FD
//! close FD
//! delete NAME
//! reset
//! errno
//! ```
//!
//! Lines starting with `#` and blank lines are skipped.

use eyre::{bail, eyre, Context, Result};
use tracing::trace;

use crate::{Fd, OpenFlags, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open { name: String, create: bool },
    Write { fd: Fd, text: String },
    Read { fd: Fd, len: usize },
    Stat { fd: Fd },
    Close { fd: Fd },
    Delete { name: String },
    Reset,
    Errno,
}

fn parse_fd(arg: Option<&str>) -> Result<Fd> {
    let arg = arg.ok_or_else(|| eyre!("missing descriptor"))?;
    let fd = arg
        .parse()
        .wrap_err_with(|| format!("invalid descriptor {arg:?}"))?;
    Ok(Fd(fd))
}

fn parse_name(arg: Option<&str>) -> Result<String> {
    arg.map(str::to_owned)
        .ok_or_else(|| eyre!("missing file name"))
}

impl Command {
    /// Parses one line, `Ok(None)` for blank and comment lines.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim_start();
        let mut args = rest.split_whitespace();
        let command = match word {
            "open" => {
                let name = parse_name(args.next())?;
                let create = match args.next() {
                    None => false,
                    Some("create") => true,
                    Some(other) => bail!("unknown open flag {other:?}"),
                };
                Command::Open { name, create }
            }
            "write" => {
                let (fd, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Command::Write {
                    fd: parse_fd(Some(fd).filter(|fd| !fd.is_empty()))?,
                    text: text.trim_start().to_owned(),
                }
            }
            "read" => {
                let fd = parse_fd(args.next())?;
                let len = args
                    .next()
                    .ok_or_else(|| eyre!("missing read length"))?;
                let len = len
                    .parse()
                    .wrap_err_with(|| format!("invalid read length {len:?}"))?;
                Command::Read { fd, len }
            }
            "stat" => Command::Stat {
                fd: parse_fd(args.next())?,
            },
            "close" => Command::Close {
                fd: parse_fd(args.next())?,
            },
            "delete" => Command::Delete {
                name: parse_name(args.next())?,
            },
            "reset" => Command::Reset,
            "errno" => Command::Errno,
            other => bail!("unknown command {other:?}"),
        };
        Ok(Some(command))
    }
}

/// Runs commands against an owned store,
/// one output line per command.
#[derive(Debug, Default)]
pub struct Session {
    store: Store,
}

impl Session {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn execute(&mut self, command: &Command) -> String {
        trace!(?command, "Executing");
        let store = &mut self.store;
        let outcome = match command {
            Command::Open { name, create } => {
                let flags = if *create {
                    OpenFlags::CREATE
                } else {
                    OpenFlags::NONE
                };
                store.open(name, flags).map(|fd| format!("fd {fd}"))
            }
            Command::Write { fd, text } => store
                .write(*fd, text.as_bytes())
                .map(|written| format!("wrote {written}")),
            Command::Read { fd, len } => store
                .read_to_vec(*fd, *len)
                .map(|data| format!("{:?}", String::from_utf8_lossy(&data))),
            Command::Stat { fd } => store.file_size(*fd).map(|size| format!("size {size}")),
            Command::Close { fd } => store.close(*fd).map(|()| "ok".to_owned()),
            Command::Delete { name } => store.delete(name).map(|()| "ok".to_owned()),
            Command::Reset => {
                store.reset();
                Ok("ok".to_owned())
            }
            Command::Errno => Ok(format!("{:?}", store.last_error())),
        };
        outcome.unwrap_or_else(|err| format!("error: {err}"))
    }

    /// Parses and executes every line of `script`.
    /// Stops at the first malformed line.
    pub fn run_script(&mut self, script: &str) -> Result<Vec<String>> {
        let mut output = Vec::new();
        for (number, line) in script.lines().enumerate() {
            let command =
                Command::parse(line).wrap_err_with(|| format!("line {}", number + 1))?;
            if let Some(command) = command {
                output.push(self.execute(&command));
            }
        }
        Ok(output)
    }
}

#[test]
fn test_parse() {
    assert_eq!(Command::parse("  # comment").unwrap(), None);
    assert_eq!(Command::parse("").unwrap(), None);
    assert_eq!(
        Command::parse("open a create").unwrap(),
        Some(Command::Open {
            name: "a".into(),
            create: true
        })
    );
    assert_eq!(
        Command::parse("write 3 hello  there").unwrap(),
        Some(Command::Write {
            fd: Fd(3),
            text: "hello  there".into()
        })
    );
    assert_eq!(
        Command::parse("read 1 10").unwrap(),
        Some(Command::Read { fd: Fd(1), len: 10 })
    );
    assert!(Command::parse("open a exclusive").is_err());
    assert!(Command::parse("read 1").is_err());
    assert!(Command::parse("close -1").is_err());
    assert!(Command::parse("write").is_err());
    assert!(Command::parse("seek 0 4").is_err());
}

#[test]
fn test_run_script() {
    let script = "
        # two descriptors sharing one file
        open a create
        write 0 hello
        open a
        read 1 5
        close 0
        write 1 world
        read 1 10
        stat 1
        open a create
        errno
        delete a
        open a
        close 1
        close 1
        errno
    ";
    let mut session = Session::default();
    let output = session.run_script(script).unwrap();
    assert_eq!(
        output,
        [
            "fd 0",
            "wrote 5",
            "fd 1",
            "\"hello\"",
            "ok",
            "wrote 5",
            "\"helloworld\"",
            "size 10",
            "error: The file already exists",
            "FileExists",
            "ok",
            "error: No such file or descriptor",
            "ok",
            "error: No such file or descriptor",
            "NoFile",
        ]
    );
    assert_eq!(session.store().file_count(), 0);
}

#[test]
fn test_run_script_reports_line() {
    let mut session = Session::default();
    let err = session.run_script("open a create\nbogus").unwrap_err();
    assert_eq!(err.to_string(), "line 2");
    assert_eq!(session.store().file_count(), 1);
}
