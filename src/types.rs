use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::assembler::derive_size_label;
use crate::error::{DanError, ErrorKind, Result};

pub const PENDING_NOTE: &str = "...";
pub const MISS_NOTE: &str = "Trượt";
pub const HIT_PREFIX: &str = "Trúng: ";

/// Number of digits in every member of a universe. Only 2, 3 and 4 exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Width(u8);

impl Width {
    pub const TWO: Width = Width(2);
    pub const THREE: Width = Width(3);
    pub const FOUR: Width = Width(4);

    pub fn new(digits: u8) -> Result<Self> {
        match digits {
            2..=4 => Ok(Width(digits)),
            other => Err(DanError::InvalidRequest(format!(
                "width must be 2, 3 or 4, got {}",
                other
            ))),
        }
    }

    pub fn digits(self) -> usize {
        self.0 as usize
    }

    /// 10^width.
    pub fn universe_size(self) -> u32 {
        10u32.pow(self.0 as u32)
    }
}

impl TryFrom<u8> for Width {
    type Error = DanError;

    fn try_from(value: u8) -> Result<Self> {
        Width::new(value)
    }
}

impl From<Width> for u8 {
    fn from(width: Width) -> Self {
        width.0
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Head,
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn of(value: u32) -> Self {
        if value % 2 == 0 { Parity::Even } else { Parity::Odd }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Small,
    Big,
}

/// Pair-digit families ("bộ").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    KepBang,
    KepLech,
    KepAm,
    SatKep,
}

impl PairKind {
    pub const ALL: [PairKind; 4] = [
        PairKind::KepBang,
        PairKind::KepLech,
        PairKind::KepAm,
        PairKind::SatKep,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            PairKind::KepBang => "kep-bang",
            PairKind::KepLech => "kep-lech",
            PairKind::KepAm => "kep-am",
            PairKind::SatKep => "sat-kep",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PairKind::KepBang => "KépBằng",
            PairKind::KepLech => "KépLệch",
            PairKind::KepAm => "KépÂm",
            PairKind::SatKep => "SátKép",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupKind {
    DauDuoi { position: Position, parity: Parity },
    Cham { digits: BTreeSet<u8> },
    Bo { kind: PairKind },
    Tong { modulo: u8 },
    Custom { raw_label: String },
}

impl GroupKind {
    /// Label used when the group was not given an explicit display label.
    pub fn canonical_label(&self) -> String {
        match self {
            GroupKind::DauDuoi { position, parity } => {
                let head = match position {
                    Position::Head => "Đầu",
                    Position::Tail => "Đuôi",
                };
                let par = match parity {
                    Parity::Even => "Chẵn",
                    Parity::Odd => "Lẻ",
                };
                format!("{}{}", head, par)
            }
            GroupKind::Cham { digits } => {
                let digits: String = digits.iter().map(|d| char::from(b'0' + d)).collect();
                format!("Chạm{}", digits)
            }
            GroupKind::Bo { kind } => kind.display_name().to_string(),
            GroupKind::Tong { modulo } => format!("Tổng{}", modulo),
            GroupKind::Custom { raw_label } => raw_label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub kind: GroupKind,
    pub numbers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_label: Option<String>,
}

impl Group {
    pub fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            numbers: BTreeSet::new(),
            display_label: None,
        }
    }

    /// The implicit group collecting numbers typed before any label.
    pub fn unlabeled() -> Self {
        Self::new(GroupKind::Custom {
            raw_label: String::new(),
        })
    }

    pub fn label(&self) -> String {
        match &self.display_label {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => self.kind.canonical_label(),
        }
    }

    pub fn has_label(&self) -> bool {
        !self.label().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Hit,
    Miss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
        }
    }

    pub fn is_resolved(self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

impl FromStr for Outcome {
    type Err = DanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Outcome::Pending),
            "hit" => Ok(Outcome::Hit),
            "miss" => Ok(Outcome::Miss),
            other => Err(DanError::Validation(format!("unknown outcome '{}'", other))),
        }
    }
}

/// Lifecycle position of an entry, derived from its content and outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Draft,
    Open,
    Resolved(Outcome),
}

/// A dàn: the numbers one owner submitted for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Option<i64>,
    pub owner_name: String,
    pub day: NaiveDate,
    pub width: Width,
    pub raw_text: String,
    pub groups: Vec<Group>,
    pub resolved_numbers: BTreeSet<String>,
    pub label: String,
    pub outcome: Outcome,
    pub matched_numbers: BTreeSet<String>,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(
        owner_name: &str,
        day: NaiveDate,
        width: Width,
        raw_text: &str,
        groups: Vec<Group>,
    ) -> Self {
        let now = crate::utils::now_micros();
        let mut entry = Self {
            id: None,
            owner_name: owner_name.trim().to_string(),
            day,
            width,
            raw_text: raw_text.to_string(),
            groups,
            resolved_numbers: BTreeSet::new(),
            label: String::new(),
            outcome: Outcome::Pending,
            matched_numbers: BTreeSet::new(),
            note: PENDING_NOTE.to_string(),
            created_at: now,
            updated_at: now,
        };
        entry.refresh();
        entry
    }

    /// Recompute `resolved_numbers` and `label` from the groups.
    pub fn refresh(&mut self) {
        self.resolved_numbers = self
            .groups
            .iter()
            .flat_map(|g| g.numbers.iter().cloned())
            .collect();

        let labels: Vec<String> = self
            .groups
            .iter()
            .map(Group::label)
            .filter(|l| !l.is_empty())
            .collect();

        self.label = if labels.is_empty() {
            self.size_label()
        } else {
            labels.join(", ")
        };
    }

    pub fn size_label(&self) -> String {
        derive_size_label(self.resolved_numbers.len())
    }

    pub fn state(&self) -> EntryState {
        if self.resolved_numbers.is_empty() {
            EntryState::Draft
        } else if self.outcome.is_resolved() {
            EntryState::Resolved(self.outcome)
        } else {
            EntryState::Open
        }
    }

    pub fn has_content(&self) -> bool {
        !self.raw_text.trim().is_empty()
    }

    /// Checks the width invariant across every group.
    pub fn validate(&self) -> Result<()> {
        if self.owner_name.is_empty() {
            return Err(DanError::InvalidRequest("owner name is empty".to_string()));
        }
        for group in &self.groups {
            if let Some(bad) = group
                .numbers
                .iter()
                .find(|n| !crate::universe::is_member(n, self.width))
            {
                return Err(DanError::Validation(format!(
                    "number '{}' in group '{}' is not a {}-digit number",
                    bad,
                    group.label(),
                    self.width
                )));
            }
        }
        Ok(())
    }

    /// Drops any reconciliation result, returning the entry to Pending.
    pub fn reset_outcome(&mut self) {
        self.outcome = Outcome::Pending;
        self.matched_numbers.clear();
        self.note = PENDING_NOTE.to_string();
    }
}

/// Prize tiers of a draw, special prize first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Special,
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Special => "special",
            Tier::First => "first",
            Tier::Second => "second",
            Tier::Third => "third",
            Tier::Fourth => "fourth",
            Tier::Fifth => "fifth",
            Tier::Sixth => "sixth",
            Tier::Seventh => "seventh",
        }
    }
}

impl FromStr for Tier {
    type Err = DanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "special" | "db" | "đb" | "g0" => Ok(Tier::Special),
            "first" | "g1" => Ok(Tier::First),
            "second" | "g2" => Ok(Tier::Second),
            "third" | "g3" => Ok(Tier::Third),
            "fourth" | "g4" => Ok(Tier::Fourth),
            "fifth" | "g5" => Ok(Tier::Fifth),
            "sixth" | "g6" => Ok(Tier::Sixth),
            "seventh" | "g7" => Ok(Tier::Seventh),
            other => Err(DanError::InvalidRequest(format!("unknown tier '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawResult {
    pub day: NaiveDate,
    pub winning_numbers_by_tier: BTreeMap<Tier, BTreeSet<String>>,
}

impl DrawResult {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            winning_numbers_by_tier: BTreeMap::new(),
        }
    }

    pub fn with_tier<I, S>(mut self, tier: Tier, numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.winning_numbers_by_tier
            .entry(tier)
            .or_default()
            .extend(numbers.into_iter().map(Into::into));
        self
    }

    /// Winning numbers of the given tiers seen through a `width`-digit
    /// universe: longer numbers contribute their trailing digits, shorter
    /// ones cannot match and are skipped.
    pub fn winning_numbers(&self, tiers: &[Tier], width: Width) -> BTreeSet<String> {
        let digits = width.digits();
        tiers
            .iter()
            .filter_map(|tier| self.winning_numbers_by_tier.get(tier))
            .flatten()
            .filter(|n| n.len() >= digits && n.bytes().all(|b| b.is_ascii_digit()))
            .map(|n| n[n.len() - digits..].to_string())
            .collect()
    }
}

// Wire shapes of the draw-result provider. Stored JSON imports use the same
// envelope.

#[derive(Serialize)]
pub struct DrawRequest {
    pub date: String,
    pub month: String,
    pub year: String,
}

#[derive(Deserialize, Debug)]
pub struct DrawResponse {
    #[serde(rename = "statusMessage", default)]
    pub status_message: String,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    pub status: bool,
    pub response: Option<ResponseData>,
}

#[derive(Deserialize, Debug)]
pub struct ResponseData {
    pub result: Option<RawDrawResult>,
}

#[derive(Deserialize, Debug, Serialize)]
pub struct RawDrawResult {
    pub date: String,
    pub data: BTreeMap<String, PrizeCategory>,
}

#[derive(Deserialize, Debug, Serialize)]
pub struct PrizeCategory {
    #[serde(default)]
    pub price: String,
    pub number: Vec<PrizeNumber>,
}

#[derive(Deserialize, Debug, Serialize)]
pub struct PrizeNumber {
    #[serde(default)]
    pub round: i32,
    pub value: String,
}

impl RawDrawResult {
    /// Unknown categories are skipped; malformed numbers reject the document.
    pub fn into_draw_result(self) -> Result<DrawResult> {
        let day = crate::utils::parse_day(&self.date)?;
        let mut draw = DrawResult::new(day);

        for (category, prize) in self.data {
            let Ok(tier) = category.parse::<Tier>() else {
                tracing::debug!("skipping unknown prize category '{}'", category);
                continue;
            };
            let mut numbers = BTreeSet::new();
            for number in prize.number {
                let value = number.value.trim();
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(DanError::Validation(format!(
                        "prize '{}' has non-numeric value '{}'",
                        category, number.value
                    )));
                }
                numbers.insert(value.to_string());
            }
            draw.winning_numbers_by_tier
                .entry(tier)
                .or_default()
                .extend(numbers);
        }

        Ok(draw)
    }
}

/// Outcome of one entry in a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub entry_id: Option<i64>,
    pub owner_name: String,
    pub day: NaiveDate,
    pub outcome: Outcome,
    pub matched_numbers: BTreeSet<String>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayError {
    pub day: NaiveDate,
    pub kind: ErrorKind,
    pub message: String,
}

impl DayError {
    pub fn new(day: NaiveDate, err: &DanError) -> Self {
        Self {
            day,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub processed: usize,
    pub results: Vec<EntryOutcome>,
    pub errors: Vec<DayError>,
}

impl ReconcileReport {
    pub fn merge(&mut self, other: ReconcileReport) {
        self.processed += other.processed;
        self.results.extend(other.results);
        self.errors.extend(other.errors);
    }

    /// Orders results and errors by day, then owner, independent of the
    /// order in which concurrent days finished.
    pub fn sort(&mut self) {
        self.results
            .sort_by(|a, b| (a.day, &a.owner_name).cmp(&(b.day, &b.owner_name)));
        self.errors.sort_by(|a, b| a.day.cmp(&b.day));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}
