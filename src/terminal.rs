//! Interactive terminal front end.

use colored::*;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::controller::{ChatController, ChatUi, CycleOutcome, IndicatorHandle, Role, TurnHandle};
use crate::error::ChatError;
use crate::providers::Backend;
use crate::transport::StreamOpener;

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Message(String),
    Select(Backend),
    Reset,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(cmd) = line.strip_prefix('/') else {
        return Command::Message(line.to_string());
    };
    match cmd.to_lowercase().as_str() {
        "quit" | "exit" | "q" => Command::Quit,
        "reset" => Command::Reset,
        other => match other.parse::<Backend>() {
            Ok(b) => Command::Select(b),
            Err(_) => Command::Unknown(cmd.to_string()),
        },
    }
}

/// [`ChatUi`] that prints to any writer.
///
/// An assistant turn created empty prints its label lazily, so the waiting
/// indicator can be erased without taking the label with it.
pub struct TerminalUi<W: Write> {
    out: W,
    next_turn: usize,
    open_turn: Option<(TurnHandle, bool)>,
    input_enabled: bool,
}

impl TerminalUi<io::Stdout> {
    pub fn stdout() -> Self {
        TerminalUi::new(io::stdout())
    }
}

impl<W: Write> TerminalUi<W> {
    pub fn new(out: W) -> Self {
        TerminalUi { out, next_turn: 0, open_turn: None, input_enabled: true }
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn label(role: Role) -> ColoredString {
        match role {
            Role::User => "You:".bright_yellow().bold(),
            Role::Assistant => "LLM:".bright_cyan().bold(),
        }
    }

    fn close_open_turn(&mut self) {
        if self.open_turn.take().is_some_and(|(_, printed)| printed) {
            let _ = writeln!(self.out);
        }
    }

    fn ensure_label(&mut self, handle: TurnHandle) {
        if let Some((h, printed)) = self.open_turn.as_mut() {
            if *h == handle && !*printed {
                *printed = true;
                let _ = write!(self.out, "{} ", Self::label(Role::Assistant));
            }
        }
    }
}

impl<W: Write> ChatUi for TerminalUi<W> {
    fn append_turn(&mut self, role: Role, initial_text: &str) -> TurnHandle {
        self.close_open_turn();
        let handle = TurnHandle(self.next_turn);
        self.next_turn += 1;
        if role == Role::Assistant && initial_text.is_empty() {
            self.open_turn = Some((handle, false));
        } else {
            let _ = writeln!(self.out, "{} {}", Self::label(role), initial_text);
        }
        let _ = self.out.flush();
        handle
    }

    fn update_turn_text(&mut self, handle: TurnHandle, full_text: &str) {
        let replaced = self.open_turn.is_some_and(|(h, printed)| h == handle && printed);
        if replaced {
            let _ = write!(self.out, "\r\x1B[2K");
            if let Some((_, printed)) = self.open_turn.as_mut() {
                *printed = false;
            }
        }
        self.ensure_label(handle);
        let _ = write!(self.out, "{}", full_text.bright_red());
        let _ = self.out.flush();
    }

    fn append_token(&mut self, handle: TurnHandle, token: &str) {
        self.ensure_label(handle);
        let _ = write!(self.out, "{}", token);
        let _ = self.out.flush();
    }

    fn show_pending_indicator(&mut self) -> IndicatorHandle {
        let _ = write!(self.out, "{}", "...".dimmed());
        let _ = self.out.flush();
        IndicatorHandle(self.next_turn)
    }

    fn hide_pending_indicator(&mut self, _handle: IndicatorHandle) {
        let _ = write!(self.out, "\r\x1B[2K");
        let _ = self.out.flush();
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        if enabled {
            self.close_open_turn();
        }
        self.input_enabled = enabled;
    }

    fn clear_all_turns(&mut self) {
        self.close_open_turn();
        self.next_turn = 0;
        let _ = writeln!(self.out, "{}", "-- conversation cleared --".bright_blue());
    }
}

fn print_banner(backend: Backend) {
    println!("{}", "ETHICS CHAT".bright_cyan().bold());
    println!("{}: {}", "Backend".bright_yellow(), backend.to_string().bright_white());
    println!(
        "{}",
        "Commands: /local  /remote  /reset  /quit".bright_blue()
    );
    println!("{}", "=".repeat(50).bright_blue());
}

/// Read lines from stdin until `/quit` or end of input.
pub async fn run<O: StreamOpener>(
    mut controller: ChatController<TerminalUi<io::Stdout>, O>,
) -> Result<(), Box<dyn std::error::Error>> {
    print_banner(controller.session().backend());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if controller.ui().input_enabled() {
            print!("{} ", ">".bright_green());
        } else {
            print!("{} ", "(locked: /reset or pick a backend)".dimmed());
        }
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Command::Quit => break,
            Command::Reset => controller.reset_session(),
            Command::Select(b) => {
                controller.select_backend(b);
                println!("{}: {}", "Backend".bright_yellow(), b.to_string().bright_white());
            }
            Command::Unknown(cmd) => {
                eprintln!("{} /{}", "unknown command:".bright_red(), cmd);
            }
            Command::Message(text) => match controller.submit(&text).await {
                Ok(CycleOutcome::Completed { tokens: 0 }) => {
                    eprintln!("{}", "(no content received)".dimmed());
                }
                Ok(_) | Err(ChatError::EmptyInput) => {}
                Err(ChatError::SessionLocked) => {
                    eprintln!("{}", "session locked".bright_red());
                }
                Err(e) => eprintln!("{} {}", "error:".bright_red(), e),
            },
        }
    }
    Ok(())
}
