//! weekpoll — terminal front-end for the shared availability poll.
//!
//! The `session` subcommand is the live instance: it subscribes to the
//! store, renders the grid inside the page shell on every value push, and
//! maps line commands onto board operations. The remaining subcommands are
//! one-shot: connect, perform one operation, await the store's reply, exit.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use client::board::short_id;
use client::store::{participant_delete_frame, participant_put_frame, participants_clear_frame, weeks_set_frame};
use client::{Board, StoreClient, StoreError, StoreEvent};
use wire::model::{Participant, Week, default_weeks};

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// CLI SURFACE
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("timed out waiting for the store")]
    Timeout,
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),
    #[error("unknown week id: {0}")]
    UnknownWeek(u32),
    #[error("week column {0} is out of range")]
    WeekOutOfRange(usize),
    #[error("label must be non-empty")]
    EmptyLabel,
    #[error("aborted")]
    Aborted,
}

#[derive(Parser, Debug)]
#[command(name = "weekpoll", about = "Weekly availability poll over a shared store")]
struct Cli {
    /// Store websocket address.
    #[arg(long, env = "WEEKPOLL_URL", default_value = "ws://127.0.0.1:3000/api/ws")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live instance: renders the shared grid and reads line commands.
    Session,
    /// Print the current grid once.
    Show,
    /// Toggle one participant's flag for one week column (1-based).
    Toggle { participant: String, week: usize },
    /// Add a participant.
    Add { name: String },
    /// Remove a participant by short id or name.
    Remove { participant: String },
    /// Rewrite one week's label.
    EditWeek { week_id: u32, label: String },
    /// Reset the poll to its defaults. Asks for confirmation unless --yes.
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Session => run_session(&cli.url).await,
        Command::Show => run_show(&cli.url).await,
        Command::Toggle { participant, week } => run_toggle(&cli.url, &participant, week).await,
        Command::Add { name } => run_add(&cli.url, &name).await,
        Command::Remove { participant } => run_remove(&cli.url, &participant).await,
        Command::EditWeek { week_id, label } => run_edit_week(&cli.url, week_id, &label).await,
        Command::Clear { yes } => run_clear(&cli.url, yes).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

// =============================================================================
// SHELL
// =============================================================================

/// The page shell: renders a single child view between a title header and
/// a hint footer. Owns no poll state.
fn shell(banner: Option<&str>, view: &str, hints: &str) {
    println!();
    println!("== Weekly Availability Poll ==");
    if let Some(banner) = banner {
        println!("!! {banner}");
    }
    println!("{view}");
    println!("({hints})");
}

fn render_board(board: &Board) {
    shell(
        board.error.as_deref(),
        &board.render(),
        "toggle <row> <week> | add <name> | remove <row> | edit <week-id> | label <text> | save | clear | quit",
    );
}

// =============================================================================
// SESSION
// =============================================================================

/// What the command loop should do after a line was handled.
enum Action {
    Continue,
    ConfirmClear,
    Quit,
}

async fn run_session(url: &str) -> Result<(), CliError> {
    let client = StoreClient::connect(url).await?;
    let mut subscription = client.subscribe()?;
    let mut board = Board::new(Arc::new(client));

    // Blocking stdin reader feeding the async loop.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    render_board(&board);
    let mut awaiting_clear_confirm = false;

    loop {
        tokio::select! {
            event = subscription.next_event() => {
                let Some(event) = event else { break };
                let closed = event == StoreEvent::Closed;
                board.apply(event);
                render_board(&board);
                if closed {
                    break;
                }
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                let line = line.trim().to_owned();

                if awaiting_clear_confirm {
                    awaiting_clear_confirm = false;
                    board.clear_all_data(matches!(line.as_str(), "y" | "Y" | "yes"));
                    render_board(&board);
                    continue;
                }

                match handle_line(&mut board, &line) {
                    Action::Quit => break,
                    Action::ConfirmClear => {
                        awaiting_clear_confirm = true;
                        print!("Clear all data? This cannot be undone. [y/N] ");
                        let _ = io::stdout().flush();
                    }
                    Action::Continue => render_board(&board),
                }
            }
        }
    }

    Ok(())
}

fn handle_line(board: &mut Board, line: &str) -> Action {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "" => {}
        "quit" | "q" => return Action::Quit,
        "clear" => return Action::ConfirmClear,
        "add" => {
            board.new_participant_name = rest.to_owned();
            board.add_participant();
        }
        "toggle" => {
            let mut args = rest.split_whitespace();
            let row = args.next().and_then(|v| v.parse::<usize>().ok());
            let week = args.next().and_then(|v| v.parse::<usize>().ok());
            match (row, week) {
                (Some(row), Some(week)) if row >= 1 && week >= 1 => {
                    match participant_at_row(board, row) {
                        Some(id) => {
                            if let Err(e) = board.toggle_availability(id, week - 1) {
                                println!("{e}");
                            }
                        }
                        None => println!("no participant at row {row}"),
                    }
                }
                _ => println!("usage: toggle <row> <week>"),
            }
        }
        "remove" => match rest.parse::<usize>().ok().and_then(|row| participant_at_row(board, row)) {
            Some(id) => board.remove_participant(id),
            None => println!("usage: remove <row>"),
        },
        "edit" => match rest.parse::<u32>() {
            Ok(week_id) => board.start_editing_week(week_id),
            Err(_) => println!("usage: edit <week-id>"),
        },
        "label" => board.set_editing_label(rest),
        "save" => board.save_week_label(),
        other => println!("unknown command: {other}"),
    }

    Action::Continue
}

fn participant_at_row(board: &Board, row: usize) -> Option<uuid::Uuid> {
    board.participants.get(row.checked_sub(1)?).map(|p| p.id)
}

// =============================================================================
// ONE-SHOT COMMANDS
// =============================================================================

/// Read the current value of both paths through a scoped subscription.
async fn fetch_snapshot(client: &StoreClient) -> Result<(Vec<Week>, Vec<Participant>), CliError> {
    let mut subscription = client.subscribe()?;
    let mut weeks = None;
    let mut participants = None;

    while weeks.is_none() || participants.is_none() {
        let event = tokio::time::timeout(SNAPSHOT_TIMEOUT, subscription.next_event())
            .await
            .map_err(|_| CliError::Timeout)?
            .ok_or(CliError::Store(StoreError::Closed))?;
        match event {
            StoreEvent::Weeks(w) => weeks = Some(w),
            StoreEvent::Participants(p) => participants = Some(p),
            StoreEvent::Closed => return Err(CliError::Store(StoreError::Closed)),
        }
    }

    let (Some(weeks), Some(participants)) = (weeks, participants) else {
        return Err(CliError::Timeout);
    };
    Ok((weeks, participants))
}

fn resolve_participant<'a>(
    participants: &'a [Participant],
    needle: &str,
) -> Result<&'a Participant, CliError> {
    participants
        .iter()
        .find(|p| short_id(p.id) == needle || p.id.to_string() == needle)
        .or_else(|| participants.iter().find(|p| p.name == needle))
        .ok_or_else(|| CliError::UnknownParticipant(needle.to_owned()))
}

async fn run_show(url: &str) -> Result<(), CliError> {
    let client = StoreClient::connect(url).await?;
    let (weeks, participants) = fetch_snapshot(&client).await?;

    let mut board = Board::new(Arc::new(client));
    board.apply(StoreEvent::Weeks(weeks));
    board.apply(StoreEvent::Participants(participants));
    println!("{}", board.render());
    Ok(())
}

async fn run_toggle(url: &str, participant: &str, week: usize) -> Result<(), CliError> {
    let client = StoreClient::connect(url).await?;
    let (weeks, participants) = fetch_snapshot(&client).await?;

    if week < 1 || week > weeks.len() {
        return Err(CliError::WeekOutOfRange(week));
    }
    let mut record = resolve_participant(&participants, participant)?.clone();
    let index = week - 1;
    let Some(flag) = record.availability.get_mut(index) else {
        return Err(CliError::WeekOutOfRange(week));
    };
    *flag = !*flag;

    client.request(participant_put_frame(&record)).await?;
    println!(
        "{} is now {} for {}",
        record.name,
        if record.availability[index] { "available" } else { "unavailable" },
        weeks[index].label
    );
    Ok(())
}

async fn run_add(url: &str, name: &str) -> Result<(), CliError> {
    let client = StoreClient::connect(url).await?;
    let (weeks, _) = fetch_snapshot(&client).await?;

    let participant = Participant::new(name.trim(), weeks.len());
    client.request(participant_put_frame(&participant)).await?;
    println!("added {} ({})", participant.name, short_id(participant.id));
    Ok(())
}

async fn run_remove(url: &str, participant: &str) -> Result<(), CliError> {
    let client = StoreClient::connect(url).await?;
    let (_, participants) = fetch_snapshot(&client).await?;

    let record = resolve_participant(&participants, participant)?;
    let (id, name) = (record.id, record.name.clone());
    client.request(participant_delete_frame(id)).await?;
    println!("removed {name}");
    Ok(())
}

async fn run_edit_week(url: &str, week_id: u32, label: &str) -> Result<(), CliError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyLabel);
    }

    let client = StoreClient::connect(url).await?;
    let (mut weeks, _) = fetch_snapshot(&client).await?;

    let Some(week) = weeks.iter_mut().find(|w| w.id == week_id) else {
        return Err(CliError::UnknownWeek(week_id));
    };
    week.label = trimmed.to_owned();

    client.request(weeks_set_frame(&weeks)).await?;
    println!("week {week_id} is now \"{trimmed}\"");
    Ok(())
}

async fn run_clear(url: &str, yes: bool) -> Result<(), CliError> {
    if !yes && !confirm_on_stdin()? {
        return Err(CliError::Aborted);
    }

    let client = StoreClient::connect(url).await?;
    client.request(weeks_set_frame(&default_weeks())).await?;
    client.request(participants_clear_frame()).await?;
    println!("poll reset to defaults");
    Ok(())
}

fn confirm_on_stdin() -> Result<bool, CliError> {
    print!("Clear all data? This cannot be undone. [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return Ok(false);
    }
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
