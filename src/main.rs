mod board;
mod codec;
mod config;
mod engine;
mod snapshot;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre};

use board::{Board, BoardTheme, Card, RepoRef, StatusColumn, Workspace};
use board::grid::GridDrop;
use codec::{CodecFormat, SerializeOptions, StateCodec};
use config::AppConfig;
use engine::persist::EntityKey;
use engine::{Commit, Engine, Resolution};
use snapshot::{load_state, save_state, PersistedState};

#[derive(Parser)]
#[command(name = "repoban", about = "Kanban boards for the repositories you follow")]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a workspace with a first board and default columns
    Init {
        /// Board name (defaults to "Main")
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show the active board
    Show,
    /// List all boards
    Boards,
    /// Manage boards
    Board {
        #[command(subcommand)]
        action: BoardAction,
    },
    /// Add a repository card to the active board
    Add {
        /// Repository as owner/name, e.g. rust-lang/cargo
        repo: RepoRef,
        /// Free-form note on the card
        #[arg(short = 'm', long)]
        note: Option<String>,
        /// Target column (title or id; defaults to the first column)
        #[arg(short, long)]
        column: Option<String>,
        /// Star count snapshot
        #[arg(long)]
        stars: Option<u64>,
        /// Primary language snapshot
        #[arg(long)]
        language: Option<String>,
    },
    /// Move a card to a column, optionally at a position
    Move {
        /// Card ID
        card_id: String,
        /// Destination column (title or id)
        column: String,
        /// Position within the column (defaults to the end)
        #[arg(short, long)]
        index: Option<usize>,
        /// Preview the drop without committing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-place a column on the board grid
    MoveColumn {
        /// Column ID
        column_id: String,
        /// Drop onto a cell: --cell ROW COL (occupied cell swaps)
        #[arg(long, num_args = 2, value_names = ["ROW", "COL"])]
        cell: Option<Vec<u32>>,
        /// Drop between columns: --before ROW COL
        #[arg(long, num_args = 2, value_names = ["ROW", "COL"])]
        before: Option<Vec<u32>>,
        /// Drop onto the new-row zone below the last row
        #[arg(long)]
        new_row: bool,
        /// Preview the drop without committing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Revert the most recent move
    Undo,
    /// Show snapshot codec details and compression ratio
    Snapshot,
}

#[derive(Subcommand)]
enum BoardAction {
    /// Create a new board and make it active
    New {
        /// Board name
        name: String,
    },
    /// Switch the active board
    Use {
        /// Board ID
        board_id: String,
    },
    /// Set a board's theme (slate, ocean, forest, sunset, mono)
    Theme {
        theme: BoardTheme,
        /// Board ID (defaults to the active board)
        #[arg(short, long)]
        board: Option<String>,
    },
    /// Toggle a board's favorite flag
    Favorite {
        /// Board ID (defaults to the active board)
        #[arg(short, long)]
        board: Option<String>,
    },
    /// Add a status column at the end of the active board's grid
    AddColumn {
        /// Column title
        title: String,
        /// Header color as a hex string
        #[arg(long, default_value = "#8a8f98")]
        color: String,
        /// WIP limit (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        wip: u32,
    },
}

fn main() {
    // color_eyre for unexpected panics/errors (developer bugs).
    let _ = color_eyre::install();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = data_dir(cli.dir);

    let result = match cli.command {
        Command::Init { name } => cmd_init(&dir, name.as_deref()),
        Command::Show => cmd_show(&dir),
        Command::Boards => cmd_boards(&dir),
        Command::Board { action } => match action {
            BoardAction::New { name } => cmd_board_new(&dir, &name),
            BoardAction::Use { board_id } => cmd_board_use(&dir, &board_id),
            BoardAction::Theme { theme, board } => cmd_board_theme(&dir, theme, board.as_deref()),
            BoardAction::Favorite { board } => cmd_board_favorite(&dir, board.as_deref()),
            BoardAction::AddColumn { title, color, wip } => {
                cmd_add_column(&dir, &title, &color, wip)
            }
        },
        Command::Add {
            repo,
            note,
            column,
            stars,
            language,
        } => cmd_add(&dir, repo, note, column.as_deref(), stars, language),
        Command::Move {
            card_id,
            column,
            index,
            dry_run,
        } => cmd_move(&dir, &card_id, &column, index, dry_run),
        Command::MoveColumn {
            column_id,
            cell,
            before,
            new_row,
            dry_run,
        } => cmd_move_column(&dir, &column_id, cell, before, new_row, dry_run),
        Command::Undo => cmd_undo(&dir),
        Command::Snapshot => cmd_snapshot(&dir),
    };

    if let Err(e) = result {
        print_user_error(&e);
        std::process::exit(1);
    }
}

fn data_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("repoban")
    })
}

/// Print a user-friendly error message, with hints for known error types.
fn print_user_error(error: &color_eyre::Report) {
    if let Some(engine_err) = error.downcast_ref::<engine::EngineError>() {
        match engine_err {
            engine::EngineError::UnknownCard(id) => {
                eprintln!("error: no card with ID {id:?}.");
                eprintln!("  Run `repoban show` to list cards.");
            }
            engine::EngineError::UnknownColumn(id) => {
                eprintln!("error: no column {id:?} on this board.");
                eprintln!("  Run `repoban show` to list columns.");
            }
            engine::EngineError::UnknownBoard(id) => {
                eprintln!("error: no board with ID {id:?}.");
                eprintln!("  Run `repoban boards` to list boards.");
            }
            other => eprintln!("error: {other}"),
        }
        return;
    }

    if let Some(codec_err) = error.downcast_ref::<codec::CodecError>() {
        eprintln!("error: snapshot codec failure.");
        eprintln!("  {codec_err}");
        return;
    }

    if let Some(config_err) = error.downcast_ref::<config::ConfigError>() {
        eprintln!("error: could not read or write config.toml.");
        eprintln!("  {config_err}");
        return;
    }

    eprintln!("error: {e:#}", e = error);
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

fn open_codec(config: &AppConfig) -> color_eyre::Result<&'static StateCodec> {
    Ok(StateCodec::init_named(&config.compression_backend)?)
}

fn open_state(dir: &Path, config: &AppConfig) -> color_eyre::Result<PersistedState> {
    let codec = open_codec(config)?;
    load_state(dir, codec, config.snapshot_format)?
        .ok_or_else(|| eyre!("no usable workspace in {}. Run `repoban init`.", dir.display()))
}

fn write_state(dir: &Path, config: &AppConfig, state: &PersistedState) -> color_eyre::Result<()> {
    let codec = open_codec(config)?;
    save_state(dir, state, codec, config.snapshot_format)?;
    Ok(())
}

fn open_engine(dir: &Path) -> color_eyre::Result<(AppConfig, Engine)> {
    let config = AppConfig::load(dir)?;
    let state = open_state(dir, &config)?;
    let mut engine = Engine::new(state.workspace, config.undo_depth, config.persist_timeout_secs);
    engine.restore_history(state.undo);
    Ok((config, engine))
}

fn save_engine(dir: &Path, config: &AppConfig, engine: &Engine) -> color_eyre::Result<()> {
    let state = PersistedState {
        workspace: engine.workspace().clone(),
        undo: engine.history_snapshot(),
    };
    write_state(dir, config, &state)
}

fn active_board_id(workspace: &Workspace) -> color_eyre::Result<String> {
    workspace
        .active_board
        .clone()
        .or_else(|| workspace.boards.first().map(|b| b.id.clone()))
        .ok_or_else(|| eyre!("workspace has no boards. Run `repoban board new <name>`."))
}

/// Resolve a column by ID or case-insensitive title on one board.
fn resolve_column(board: &Board, needle: &str) -> color_eyre::Result<String> {
    if let Some(column) = board.column(needle) {
        return Ok(column.id.clone());
    }
    let lowered = needle.to_lowercase();
    if let Some(column) = board
        .columns
        .iter()
        .find(|c| c.title.to_lowercase() == lowered)
    {
        return Ok(column.id.clone());
    }
    let titles: Vec<&str> = board.columns.iter().map(|c| c.title.as_str()).collect();
    bail!("no column {needle:?} on board {:?}. Columns: {}", board.name, titles.join(", "))
}

/// Acknowledge the commit's persistence calls against the local store and
/// write the snapshot. The snapshot write is the authoritative store here,
/// so every call settles as a success once the file lands.
fn settle_commit(
    dir: &Path,
    config: &AppConfig,
    engine: &mut Engine,
    commit: Commit,
    now: DateTime<Utc>,
) -> color_eyre::Result<()> {
    let Commit { persist, wip } = commit;

    let mut queue: VecDeque<_> = persist.into();
    while let Some(request) = queue.pop_front() {
        match engine.resolve_persist(request.ticket, true, now)? {
            Resolution::Confirmed {
                follow_up: Some(next),
            } => queue.push_back(next),
            Resolution::Confirmed { follow_up: None } => {}
            Resolution::Superseded { follow_up } => queue.push_back(follow_up),
            Resolution::RolledBack { entity } => {
                eprintln!("warning: could not save {entity}; the change was reverted");
            }
            Resolution::NeedsResync { entity } => resync_entity(dir, config, engine, &entity)?,
        }
    }

    for violation in wip {
        let board = engine
            .workspace()
            .board_of_column(&violation.column_id);
        let title = board
            .and_then(|b| b.column(&violation.column_id))
            .map(|c| c.title.clone())
            .unwrap_or_else(|| violation.column_id.clone());
        println!(
            "warning: column '{title}' is over its WIP limit ({}/{})",
            violation.count, violation.limit
        );
    }

    save_engine(dir, config, engine)?;
    Ok(())
}

/// Discard an entity's optimistic state and restore it from the last
/// snapshot written to disk (the local authoritative store).
fn resync_entity(
    dir: &Path,
    config: &AppConfig,
    engine: &mut Engine,
    entity: &EntityKey,
) -> color_eyre::Result<()> {
    let codec = open_codec(config)?;
    let Some(state) = load_state(dir, codec, config.snapshot_format)? else {
        eprintln!("warning: no snapshot available to resync {entity}");
        return Ok(());
    };
    match entity {
        EntityKey::Card(id) => {
            if let Some(board) = state.workspace.board_of_card(id) {
                let board_id = board.id.clone();
                let cards = board.cards.clone();
                engine.set_cards(&board_id, cards)?;
            }
        }
        EntityKey::Column(id) => {
            if let Some(board) = state.workspace.board_of_column(id) {
                let board_id = board.id.clone();
                let columns = board.columns.clone();
                engine.set_columns(&board_id, columns)?;
            }
        }
    }
    eprintln!("warning: could not save {entity}; restored from the last snapshot");
    Ok(())
}

fn default_columns(workspace: &mut Workspace, board_id: &str, now: DateTime<Utc>) -> Vec<StatusColumn> {
    let specs = [
        ("Backlog", "#5b8dd9", 0u32, 0u32, 0u32),
        ("In Progress", "#d9a65b", 3, 0, 1),
        ("Done", "#6bbf59", 0, 0, 2),
    ];
    specs
        .iter()
        .map(|(title, color, wip, row, col)| {
            let mut column = StatusColumn::new(
                workspace.next_id(),
                board_id.to_string(),
                (*title).to_string(),
                (*color).to_string(),
                *row,
                *col,
                now,
            );
            column.wip_limit = *wip;
            column
        })
        .collect()
}

fn create_board(workspace: &mut Workspace, name: &str, owner: &str, now: DateTime<Utc>) -> String {
    let board_id = workspace.next_id();
    let mut board = Board::new(board_id.clone(), name.to_string(), owner.to_string(), now);
    board.columns = default_columns(workspace, &board_id, now);
    workspace.boards.push(board);
    workspace.active_board = Some(board_id.clone());
    board_id
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_init(dir: &Path, name: Option<&str>) -> color_eyre::Result<()> {
    if dir.join(snapshot::SNAPSHOT_FILE).exists() {
        bail!("workspace already exists in {}", dir.display());
    }
    let config = AppConfig::load(dir)?;
    let now = Utc::now();

    let mut workspace = Workspace::new();
    let board_id = create_board(&mut workspace, name.unwrap_or("Main"), &config.owner, now);

    config.save(dir)?;
    write_state(
        dir,
        &config,
        &PersistedState {
            workspace,
            undo: Vec::new(),
        },
    )?;
    println!("Created workspace in {} (board {board_id})", dir.display());
    Ok(())
}

fn cmd_show(dir: &Path) -> color_eyre::Result<()> {
    let (_, engine) = open_engine(dir)?;
    let workspace = engine.workspace();
    let board_id = active_board_id(workspace)?;
    let board = workspace
        .board(&board_id)
        .ok_or_else(|| eyre!("active board {board_id:?} not found"))?;

    let favorite = if board.favorite { " ★" } else { "" };
    println!("{} [{}]{favorite}", board.name, board.theme);

    let mut columns: Vec<&StatusColumn> = board.columns.iter().collect();
    columns.sort_by_key(|c| (c.grid_row, c.grid_col));

    let mut current_row = None;
    for column in columns {
        if current_row != Some(column.grid_row) {
            current_row = Some(column.grid_row);
            println!("— row {} —", column.grid_row);
        }
        let count = board.card_count(&column.id);
        let limit = if column.wip_limit > 0 {
            format!("{count}/{}", column.wip_limit)
        } else {
            count.to_string()
        };
        let flag = if engine.wip_flagged(&column.id) {
            "  [over WIP limit]"
        } else {
            ""
        };
        println!("  {} {} ({limit}){flag}", column.id, column.title);
        for card in board.cards_in_column(&column.id) {
            let stars = card
                .meta
                .stars
                .map(|n| format!(" ★{n}"))
                .unwrap_or_default();
            let note = if card.note.is_empty() {
                String::new()
            } else {
                format!("  — {}", card.note)
            };
            println!("    {} {}{stars}{note}", card.id, card.repo);
        }
    }
    Ok(())
}

fn cmd_boards(dir: &Path) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let workspace = open_state(dir, &config)?.workspace;
    for board in &workspace.boards {
        let active = if workspace.active_board.as_deref() == Some(&board.id) {
            "*"
        } else {
            " "
        };
        let favorite = if board.favorite { " ★" } else { "" };
        println!(
            "{active} {} {} [{}]{favorite} — {} columns, {} cards",
            board.id,
            board.name,
            board.theme,
            board.columns.len(),
            board.cards.len()
        );
    }
    Ok(())
}

fn cmd_board_new(dir: &Path, name: &str) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let mut state = open_state(dir, &config)?;
    let now = Utc::now();
    let board_id = create_board(&mut state.workspace, name, &config.owner, now);
    write_state(dir, &config, &state)?;
    println!("Created board {board_id}: {name}");
    Ok(())
}

fn cmd_board_use(dir: &Path, board_id: &str) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let mut state = open_state(dir, &config)?;
    if state.workspace.board(board_id).is_none() {
        bail!("no board with ID {board_id:?}");
    }
    state.workspace.active_board = Some(board_id.to_string());
    write_state(dir, &config, &state)?;
    println!("Active board: {board_id}");
    Ok(())
}

fn cmd_board_theme(dir: &Path, theme: BoardTheme, board: Option<&str>) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let mut state = open_state(dir, &config)?;
    let board_id = match board {
        Some(id) => id.to_string(),
        None => active_board_id(&state.workspace)?,
    };
    let board = state
        .workspace
        .board_mut(&board_id)
        .ok_or_else(|| eyre!("no board with ID {board_id:?}"))?;
    board.theme = theme;
    board.updated = Utc::now();
    write_state(dir, &config, &state)?;
    println!("Board {board_id} theme: {theme}");
    Ok(())
}

fn cmd_board_favorite(dir: &Path, board: Option<&str>) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let mut state = open_state(dir, &config)?;
    let board_id = match board {
        Some(id) => id.to_string(),
        None => active_board_id(&state.workspace)?,
    };
    let board = state
        .workspace
        .board_mut(&board_id)
        .ok_or_else(|| eyre!("no board with ID {board_id:?}"))?;
    board.favorite = !board.favorite;
    board.updated = Utc::now();
    let favorite = board.favorite;
    write_state(dir, &config, &state)?;
    println!(
        "Board {board_id} {}",
        if favorite { "marked favorite" } else { "unmarked" }
    );
    Ok(())
}

fn cmd_add_column(dir: &Path, title: &str, color: &str, wip: u32) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let mut state = open_state(dir, &config)?;
    let board_id = active_board_id(&state.workspace)?;
    let now = Utc::now();

    let (row, col) = state
        .workspace
        .board(&board_id)
        .ok_or_else(|| eyre!("active board {board_id:?} not found"))?
        .next_free_cell();
    let column_id = state.workspace.next_id();
    let mut column = StatusColumn::new(
        column_id.clone(),
        board_id.clone(),
        title.to_string(),
        color.to_string(),
        row,
        col,
        now,
    );
    column.wip_limit = wip;

    let board = state
        .workspace
        .board_mut(&board_id)
        .ok_or_else(|| eyre!("active board {board_id:?} not found"))?;
    board.columns.push(column);
    board.updated = now;

    write_state(dir, &config, &state)?;
    println!("Added column {column_id}: {title} at ({row}, {col})");
    Ok(())
}

fn cmd_add(
    dir: &Path,
    repo: RepoRef,
    note: Option<String>,
    column: Option<&str>,
    stars: Option<u64>,
    language: Option<String>,
) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let mut state = open_state(dir, &config)?;
    let board_id = active_board_id(&state.workspace)?;
    let now = Utc::now();

    let board = state
        .workspace
        .board(&board_id)
        .ok_or_else(|| eyre!("active board {board_id:?} not found"))?;
    let status_id = match column {
        Some(needle) => resolve_column(board, needle)?,
        None => {
            let mut columns: Vec<&StatusColumn> = board.columns.iter().collect();
            columns.sort_by_key(|c| (c.grid_row, c.grid_col));
            columns
                .first()
                .map(|c| c.id.clone())
                .ok_or_else(|| eyre!("board {:?} has no columns", board.name))?
        }
    };
    let order = board
        .cards_in_column(&status_id)
        .last()
        .map(|c| c.order + 1.0)
        .unwrap_or(0.0);

    let card_id = state.workspace.next_id();
    let mut card = Card::new(
        card_id.clone(),
        board_id.clone(),
        status_id,
        repo.clone(),
        order,
        now,
    );
    card.note = note.unwrap_or_default();
    card.meta.stars = stars;
    card.meta.language = language;

    let board = state
        .workspace
        .board_mut(&board_id)
        .ok_or_else(|| eyre!("active board {board_id:?} not found"))?;
    board.cards.push(card);
    board.updated = now;

    write_state(dir, &config, &state)?;
    println!("Added {repo} as card {card_id}");
    Ok(())
}

fn cmd_move(
    dir: &Path,
    card_id: &str,
    column: &str,
    index: Option<usize>,
    dry_run: bool,
) -> color_eyre::Result<()> {
    let (config, mut engine) = open_engine(dir)?;
    let now = Utc::now();

    let board = engine
        .workspace()
        .board_of_card(card_id)
        .ok_or_else(|| eyre!("no card with ID {card_id:?}"))?;
    let status_id = resolve_column(board, column)?;
    let title = board
        .column(&status_id)
        .map(|c| c.title.clone())
        .unwrap_or_else(|| status_id.clone());

    if dry_run {
        let preview = engine.preview_card_drop(card_id, &status_id, index.unwrap_or(usize::MAX))?;
        println!(
            "Would place card {card_id} at position {} in {title}",
            preview.index
        );
        if preview.would_violate_wip {
            println!("warning: this would put '{title}' over its WIP limit");
        }
        return Ok(());
    }

    match engine.move_card(card_id, &status_id, index.unwrap_or(usize::MAX), now)? {
        Some(commit) => {
            settle_commit(dir, &config, &mut engine, commit, now)?;
            println!("Moved card {card_id} to {title}");
        }
        None => println!("Card {card_id} is already there; nothing to do."),
    }
    Ok(())
}

fn cmd_move_column(
    dir: &Path,
    column_id: &str,
    cell: Option<Vec<u32>>,
    before: Option<Vec<u32>>,
    new_row: bool,
    dry_run: bool,
) -> color_eyre::Result<()> {
    let drop = parse_grid_drop(cell, before, new_row)?;
    let (config, mut engine) = open_engine(dir)?;
    let now = Utc::now();

    if dry_run {
        match engine.preview_column_drop(column_id, drop)? {
            Some(placement) => {
                println!(
                    "Would place column {column_id} at ({}, {}), moving {} other column(s)",
                    placement.grid_row,
                    placement.grid_col,
                    placement.displaced.len()
                );
            }
            None => println!("Nothing would change."),
        }
        return Ok(());
    }

    match engine.reorder_column(column_id, drop, now)? {
        Some(commit) => {
            settle_commit(dir, &config, &mut engine, commit, now)?;
            println!("Moved column {column_id}");
        }
        None => println!("Column {column_id} is already there; nothing to do."),
    }
    Ok(())
}

fn parse_grid_drop(
    cell: Option<Vec<u32>>,
    before: Option<Vec<u32>>,
    new_row: bool,
) -> color_eyre::Result<GridDrop> {
    match (cell, before, new_row) {
        (Some(cell), None, false) => Ok(GridDrop::Cell {
            row: cell[0],
            col: cell[1],
        }),
        (None, Some(before), false) => Ok(GridDrop::Before {
            row: before[0],
            col: before[1],
        }),
        (None, None, true) => Ok(GridDrop::NewRow),
        _ => bail!("pass exactly one of --cell, --before, --new-row"),
    }
}

fn cmd_undo(dir: &Path) -> color_eyre::Result<()> {
    let (config, mut engine) = open_engine(dir)?;
    let now = Utc::now();

    match engine.undo(now)? {
        Some(commit) => {
            settle_commit(dir, &config, &mut engine, commit, now)?;
            println!("Reverted the last move.");
        }
        None => println!("Nothing to undo."),
    }
    Ok(())
}

fn cmd_snapshot(dir: &Path) -> color_eyre::Result<()> {
    let config = AppConfig::load(dir)?;
    let codec = open_codec(&config)?;
    let state = open_state(dir, &config)?;

    let json = serde_json::to_string(&state)?;
    let blob = codec.serialize(&state, &SerializeOptions::format(config.snapshot_format))?;
    let ratio = codec::compression_ratio(&json, &blob);

    println!("backend:  {}", codec.backend_name());
    println!("format:   {}", config.snapshot_format);
    if let Some(size) = snapshot::snapshot_size(dir) {
        println!("on disk:  {size} bytes");
    }
    println!("raw json: {} bytes", json.len());
    println!("ratio:    {ratio:.2}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_workspace(dir: &Path) {
        cmd_init(dir, Some("Test")).unwrap();
    }

    fn board_snapshot(dir: &Path) -> Workspace {
        let config = AppConfig::load(dir).unwrap();
        open_state(dir, &config).unwrap().workspace
    }

    #[test]
    fn init_then_add_then_move_then_undo() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        init_workspace(dir);

        cmd_add(
            dir,
            "rust-lang/cargo".parse().unwrap(),
            Some("build tool".into()),
            None,
            Some(12000),
            Some("Rust".into()),
        )
        .unwrap();

        let workspace = board_snapshot(dir);
        let board = &workspace.boards[0];
        let card = &board.cards[0];
        let backlog = board.cards_in_column(&card.status_id);
        assert_eq!(backlog.len(), 1);

        cmd_move(dir, &card.id.clone(), "In Progress", None, false).unwrap();
        let workspace = board_snapshot(dir);
        let board = &workspace.boards[0];
        let moved = board.card(&board.cards[0].id).unwrap();
        let in_progress = board
            .columns
            .iter()
            .find(|c| c.title == "In Progress")
            .unwrap();
        assert_eq!(moved.status_id, in_progress.id);

        cmd_undo(dir).unwrap();
        let workspace = board_snapshot(dir);
        let board = &workspace.boards[0];
        let reverted = board.card(&board.cards[0].id).unwrap();
        let backlog_col = board.columns.iter().find(|c| c.title == "Backlog").unwrap();
        assert_eq!(reverted.status_id, backlog_col.id);
    }

    #[test]
    fn init_twice_fails() {
        let tmp = tempfile::tempdir().unwrap();
        init_workspace(tmp.path());
        assert!(cmd_init(tmp.path(), None).is_err());
    }

    #[test]
    fn move_unknown_card_fails() {
        let tmp = tempfile::tempdir().unwrap();
        init_workspace(tmp.path());
        assert!(cmd_move(tmp.path(), "999", "Done", None, false).is_err());
    }

    #[test]
    fn move_column_to_new_row_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        init_workspace(dir);

        let workspace = board_snapshot(dir);
        let column_id = workspace.boards[0]
            .columns
            .iter()
            .find(|c| c.title == "Backlog")
            .unwrap()
            .id
            .clone();

        cmd_move_column(dir, &column_id, None, None, true, false).unwrap();
        let workspace = board_snapshot(dir);
        let column = workspace.boards[0].column(&column_id).unwrap();
        assert_eq!((column.grid_row, column.grid_col), (1, 0));
    }

    #[test]
    fn grid_drop_args_are_mutually_exclusive() {
        assert!(parse_grid_drop(Some(vec![0, 1]), None, true).is_err());
        assert!(parse_grid_drop(None, None, false).is_err());
        assert_eq!(
            parse_grid_drop(None, Some(vec![1, 2]), false).unwrap(),
            GridDrop::Before { row: 1, col: 2 }
        );
    }
}
