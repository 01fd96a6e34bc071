use std::io::{BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;

use crate::error::{Error, Result};

const MAX_PENDING_BYTES: usize = 16 * 1024;
const MAX_LINE_CHARS: usize = 4096;

/// Output of a running child, one cleaned line at a time. The iterator ends
/// once both stdout and stderr are closed; call [`LineStream::finish`] to
/// collect the exit status.
pub struct LineStream {
    program: String,
    child: Child,
    rx: mpsc::Receiver<String>,
}

impl Iterator for LineStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let raw = self.rx.recv().ok()?;
            let line = clean_line(&raw);
            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}

impl LineStream {
    pub fn finish(mut self) -> Result<()> {
        // Drain anything the caller did not consume so the readers can exit.
        while self.rx.recv().is_ok() {}
        let status = self
            .child
            .wait()
            .map_err(|e| Error::msg(format!("wait for {} failed: {e}", self.program)))?;
        if !status.success() {
            return Err(Error::msg(format!("{} failed: {status}", self.program)));
        }
        Ok(())
    }
}

pub fn spawn_lines(mut cmd: Command) -> Result<LineStream> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::msg(format!("failed to spawn {program}: {e}")))?;

    let (tx, rx) = mpsc::channel::<String>();
    if let Some(out) = child.stdout.take() {
        let tx = tx.clone();
        std::thread::spawn(move || pump_lines(out, tx));
    }
    if let Some(err) = child.stderr.take() {
        let tx = tx.clone();
        std::thread::spawn(move || pump_lines(err, tx));
    }
    drop(tx);

    Ok(LineStream { program, child, rx })
}

fn pump_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    let flush = |pending: &mut Vec<u8>| {
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(pending).into_owned());
            pending.clear();
        }
    };

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                flush(&mut pending);
            } else {
                pending.push(b);
                if pending.len() >= MAX_PENDING_BYTES {
                    flush(&mut pending);
                }
            }
        }
    }
    flush(&mut pending);
}

/// Strip terminal escape sequences and control characters from one line of
/// subprocess output, collapsing tabs to spaces.
pub fn clean_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut chars = input.chars().peekable();
    let mut count = 0usize;

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.next() {
                // CSI: parameters until a final byte in '@'..='~'.
                Some('[') => {
                    for n in chars.by_ref() {
                        if ('@'..='~').contains(&n) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ST (ESC \).
                Some(']') => {
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        if c == '\t' {
            out.push(' ');
        } else if c.is_control() {
            continue;
        } else {
            out.push(c);
        }
        count += 1;
        if count >= MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colour_and_title_sequences() {
        let input = "x \u{1b}[1;32mengine/\u{1b}[0m \u{1b}]0;title\u{7}done";
        assert_eq!(clean_line(input), "x engine/ done");
    }

    #[test]
    fn tabs_become_spaces_and_controls_vanish() {
        assert_eq!(clean_line("a\tb\u{8}c"), "a bc");
    }

    #[cfg(unix)]
    #[test]
    fn streams_lines_from_both_outputs_and_reports_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo one; echo two 1>&2; printf 'three'");
        let mut lines = spawn_lines(cmd).expect("spawn");
        let mut got: Vec<String> = lines.by_ref().collect();
        got.sort();
        assert_eq!(got, vec!["one", "three", "two"]);
        lines.finish().expect("exit ok");

        let mut failing = Command::new("sh");
        failing.arg("-c").arg("exit 3");
        let err = spawn_lines(failing).expect("spawn").finish().unwrap_err();
        assert!(err.to_string().contains("sh failed"), "unexpected err: {err}");
    }
}
