pub mod grid;
pub mod order;
pub mod wip;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visual theme attached to a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoardTheme {
    #[default]
    Slate,
    Ocean,
    Forest,
    Sunset,
    Mono,
}

impl BoardTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slate => "slate",
            Self::Ocean => "ocean",
            Self::Forest => "forest",
            Self::Sunset => "sunset",
            Self::Mono => "mono",
        }
    }
}

impl std::str::FromStr for BoardTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slate" => Ok(Self::Slate),
            "ocean" => Ok(Self::Ocean),
            "forest" => Ok(Self::Forest),
            "sunset" => Ok(Self::Sunset),
            "mono" => Ok(Self::Mono),
            other => Err(format!(
                "unknown theme '{other}': use slate, ocean, forest, sunset, mono"
            )),
        }
    }
}

impl std::fmt::Display for BoardTheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an external repository, e.g. `rust-lang/cargo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl std::str::FromStr for RepoRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(format!("invalid repository '{s}': expected owner/name")),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Metadata snapshot taken from the repository host at card creation.
///
/// The shape is open-ended upstream; unknown keys land in `extra` and
/// survive round-trips. Validation happens at the persistence boundary,
/// not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A single kanban card referencing an external repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub board_id: String,
    pub status_id: String,
    pub repo: RepoRef,
    #[serde(default)]
    pub note: String,
    /// Rank within the status column. Orders are pairwise distinct per
    /// column and compared with `f64::total_cmp`.
    pub order: f64,
    #[serde(default)]
    pub meta: RepoMeta,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Card {
    pub fn new(
        id: String,
        board_id: String,
        status_id: String,
        repo: RepoRef,
        order: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            board_id,
            status_id,
            repo,
            note: String::new(),
            order,
            meta: RepoMeta::default(),
            created: now,
            updated: now,
        }
    }

    /// Touch the card, updating its `updated` timestamp.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated = now;
    }
}

/// A status column positioned on the board's 2D grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusColumn {
    pub id: String,
    pub board_id: String,
    pub title: String,
    /// Hex color used for the column header, e.g. `#5b8dd9`.
    pub color: String,
    /// Soft cap on cards in this column. 0 = unlimited.
    #[serde(default)]
    pub wip_limit: u32,
    pub grid_row: u32,
    pub grid_col: u32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl StatusColumn {
    pub fn new(
        id: String,
        board_id: String,
        title: String,
        color: String,
        grid_row: u32,
        grid_col: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            board_id,
            title,
            color,
            wip_limit: 0,
            grid_row,
            grid_col,
            created: now,
            updated: now,
        }
    }
}

/// The top-level board: a named, themed set of status columns and cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub theme: BoardTheme,
    #[serde(default)]
    pub favorite: bool,
    pub owner: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub columns: Vec<StatusColumn>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl Board {
    pub fn new(id: String, name: String, owner: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            theme: BoardTheme::default(),
            favorite: false,
            owner,
            created: now,
            updated: now,
            columns: Vec::new(),
            cards: Vec::new(),
        }
    }

    pub fn column(&self, column_id: &str) -> Option<&StatusColumn> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_mut(&mut self, column_id: &str) -> Option<&mut StatusColumn> {
        self.columns.iter_mut().find(|c| c.id == column_id)
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == card_id)
    }

    pub fn card_mut(&mut self, card_id: &str) -> Option<&mut Card> {
        self.cards.iter_mut().find(|c| c.id == card_id)
    }

    /// The column occupying a grid cell, if any.
    pub fn column_at_cell(&self, row: u32, col: u32) -> Option<&StatusColumn> {
        self.columns
            .iter()
            .find(|c| c.grid_row == row && c.grid_col == col)
    }

    /// Highest occupied grid row, or `None` on a board with no columns.
    pub fn max_grid_row(&self) -> Option<u32> {
        self.columns.iter().map(|c| c.grid_row).max()
    }

    /// Number of columns in a grid row.
    pub fn row_len(&self, row: u32) -> usize {
        self.columns.iter().filter(|c| c.grid_row == row).count()
    }

    /// Cards in a status column in visual order (ascending rank).
    pub fn cards_in_column(&self, status_id: &str) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self
            .cards
            .iter()
            .filter(|c| c.status_id == status_id)
            .collect();
        cards.sort_by(|a, b| a.order.total_cmp(&b.order));
        cards
    }

    /// Number of cards in a status column.
    pub fn card_count(&self, status_id: &str) -> usize {
        self.cards.iter().filter(|c| c.status_id == status_id).count()
    }

    /// First free cell at the end of the last row, for newly created columns.
    pub fn next_free_cell(&self) -> (u32, u32) {
        match self.max_grid_row() {
            Some(row) => (row, self.row_len(row) as u32),
            None => (0, 0),
        }
    }
}

/// The whole persisted state tree: every board the user owns.
///
/// Owned by the mutation engine's coordinating context; all positional
/// mutation goes through the engine, never through direct field writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub boards: Vec<Board>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_board: Option<String>,
    #[serde(default = "default_next_id")]
    pub next_id: u32,
}

fn default_next_id() -> u32 {
    1
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            boards: Vec::new(),
            active_board: None,
            next_id: default_next_id(),
        }
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next entity ID and increment the counter.
    pub fn next_id(&mut self) -> String {
        let n = self.next_id;
        self.next_id += 1;
        n.to_string()
    }

    pub fn board(&self, board_id: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == board_id)
    }

    pub fn board_mut(&mut self, board_id: &str) -> Option<&mut Board> {
        self.boards.iter_mut().find(|b| b.id == board_id)
    }

    /// Find the board holding a card.
    pub fn board_of_card(&self, card_id: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.card(card_id).is_some())
    }

    /// Find the board holding a column.
    pub fn board_of_column(&self, column_id: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.column(column_id).is_some())
    }
}
