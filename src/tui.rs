#![cfg(feature = "tui")]

use crate::consumer::{ChatSession, EntryKind, SessionEvent, Transcript};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const HELP: &str = "Type a message and press Enter. Commands: /quit, /clear, /lang <name>";

pub async fn run_tui(session: Arc<ChatSession>) -> anyhow::Result<()> {
    let mut events = session.subscribe();

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut input = String::new();
    let mut status = HELP.to_string();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let transcript = session.transcript();
                let title = format!("ai-assist, language: {}", session.language());
                let status_line = if session.is_in_flight() {
                    "(streaming reply...)"
                } else {
                    status.as_str()
                };
                if let Err(e) = draw(&mut terminal, &title, &transcript, status_line, &input) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut input, &mut status, &session) {
                        break Ok(());
                    }
                }
            }
            ev = events.recv() => {
                match ev {
                    Ok(SessionEvent::TurnFailed { title, description, .. }) => {
                        status = format!("{title}: {description}");
                    }
                    Ok(SessionEvent::TurnCompleted { .. }) => status = HELP.to_string(),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Returns true when the UI should exit.
fn handle_key(key: KeyEvent, input: &mut String, status: &mut String, session: &Arc<ChatSession>) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Enter => {
            let msg = input.trim().to_string();
            input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/clear" {
                session.clear();
                *status = HELP.to_string();
                return false;
            }
            if let Some(rest) = msg.strip_prefix("/lang ") {
                session.set_language(rest.trim());
                *status = format!("language set to: {}", rest.trim());
                return false;
            }

            if session.is_in_flight() {
                *status = "(reply in progress; wait for completion)".to_string();
                return false;
            }

            let session = Arc::clone(session);
            tokio::spawn(async move {
                session.send_turn(&msg).await;
            });
        }
        _ => {}
    }

    false
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    title: &str,
    transcript: &Transcript,
    status: &str,
    input: &str,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for entry in transcript.entries() {
            let (label, style) = match entry.kind {
                EntryKind::Prompt => ("user", Style::default().add_modifier(Modifier::BOLD)),
                EntryKind::Reply => ("assistant", Style::default()),
                EntryKind::Failure => ("error", Style::default().add_modifier(Modifier::BOLD)),
            };
            text.lines.push(Line::styled(format!("{label}: "), style));
            text.lines.extend(Text::from(entry.message.content.clone()).lines);
            text.lines.push(Line::from(""));
        }

        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title.to_string()))
            .wrap(Wrap { trim: false });

        let status_w = Paragraph::new(status.to_string());

        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(status_w, chunks[1]);
        f.render_widget(input_w, chunks[2]);

        let x = chunks[2].x + 1 + input.chars().count() as u16;
        let y = chunks[2].y + 1;
        f.set_cursor_position((x.min(chunks[2].x + chunks[2].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
