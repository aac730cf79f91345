use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{ballot_card::BallotSide, types::idtype};

idtype!(ContestId);
idtype!(OptionId);
idtype!(BallotStyleId);
idtype!(PrecinctId);

impl BallotStyleId {
    /// Ballot styles are keyed by the card number printed in the front
    /// timing marks.
    pub fn for_card_number(card_number: u16) -> Self {
        Self(format!("card-number-{}", card_number))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub title: String,
    pub grid_layouts: Vec<GridLayout>,
}

impl Election {
    pub fn grid_layout_for_ballot_style(
        &self,
        ballot_style_id: &BallotStyleId,
    ) -> Option<&GridLayout> {
        self.grid_layouts
            .iter()
            .find(|layout| layout.ballot_style_id == *ballot_style_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLayout {
    pub precinct_id: PrecinctId,
    pub ballot_style_id: BallotStyleId,
    pub columns: u32,
    pub rows: u32,
    pub grid_positions: Vec<GridPosition>,
}

/// A position on the ballot grid defined by timing marks and the contest/option
/// for which a mark at this position is a vote for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum GridPosition {
    /// A pre-defined labeled option on the ballot.
    #[serde(rename_all = "camelCase", rename = "option")]
    Option {
        side: BallotSide,
        column: u32,
        row: u32,
        contest_id: ContestId,
        option_id: OptionId,
    },

    /// A write-in option on the ballot.
    #[serde(rename_all = "camelCase", rename = "write-in")]
    WriteIn {
        side: BallotSide,
        column: u32,
        row: u32,
        contest_id: ContestId,
        write_in_index: u32,
    },
}

impl Display for GridPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridPosition::Option {
                contest_id,
                option_id,
                ..
            } => write!(f, "{}/{}", contest_id, option_id),
            GridPosition::WriteIn {
                contest_id,
                write_in_index,
                ..
            } => write!(f, "{}/write-in-{}", contest_id, write_in_index),
        }
    }
}

impl GridPosition {
    /// Where on the card this position is, without the contest details.
    pub fn location(&self) -> GridLocation {
        match self {
            GridPosition::Option {
                side, column, row, ..
            }
            | GridPosition::WriteIn {
                side, column, row, ..
            } => GridLocation::new(*side, *column, *row),
        }
    }

    pub fn contest_id(&self) -> &ContestId {
        match self {
            GridPosition::Option { contest_id, .. } | GridPosition::WriteIn { contest_id, .. } => {
                contest_id
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLocation {
    pub side: BallotSide,
    pub column: u32,
    pub row: u32,
}

impl GridLocation {
    pub fn new(side: BallotSide, column: u32, row: u32) -> Self {
        Self { side, column, row }
    }
}
