use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{DanError, Result};
use crate::types::{GroupKind, Magnitude, PairKind, Parity, Position, Width};
use crate::universe::{NumberUniverse, is_member};

/// Bóng dương: each digit and its +5 partner. A pair of partners is kép lệch.
const POSITIVE_SHADOW: [u8; 10] = [5, 6, 7, 8, 9, 0, 1, 2, 3, 4];

/// Bóng âm: 0-7, 1-4, 2-9, 3-6, 5-8. A pair of partners is kép âm.
const NEGATIVE_SHADOW: [u8; 10] = [7, 4, 9, 6, 1, 8, 3, 0, 5, 2];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tag {
    /// Every digit but the last, e.g. "12" for "123".
    Head(String),
    HeadParity(Parity),
    HeadMagnitude(Magnitude),
    Tail(u8),
    TailParity(Parity),
    TailMagnitude(Magnitude),
    Touch(u8),
    Pair(PairKind),
    /// Digit sum modulo 10.
    Sum(u8),
}

/// Alternatives of which at least one must hold.
pub type CriteriaGroup = Vec<Tag>;

pub fn classify(number: &str, width: Width) -> Result<BTreeSet<Tag>> {
    if !is_member(number, width) {
        return Err(DanError::Validation(format!(
            "'{}' is not a {}-digit number",
            number, width
        )));
    }

    let digits: Vec<u8> = number.bytes().map(|b| b - b'0').collect();
    let (head_digits, tail) = digits.split_at(digits.len() - 1);
    let tail = tail[0];

    let head_value = head_digits
        .iter()
        .fold(0u32, |acc, &d| acc * 10 + d as u32);
    let head_half = 10u32.pow(head_digits.len() as u32) / 2;

    let mut tags = BTreeSet::new();
    tags.insert(Tag::Head(number[..number.len() - 1].to_string()));
    tags.insert(Tag::HeadParity(Parity::of(head_value)));
    tags.insert(Tag::HeadMagnitude(magnitude(head_value, head_half)));
    tags.insert(Tag::Tail(tail));
    tags.insert(Tag::TailParity(Parity::of(tail as u32)));
    tags.insert(Tag::TailMagnitude(magnitude(tail as u32, 5)));

    for &d in &digits {
        tags.insert(Tag::Touch(d));
    }
    for kind in pair_kinds(&digits) {
        tags.insert(Tag::Pair(kind));
    }

    let sum: u32 = digits.iter().map(|&d| d as u32).sum();
    tags.insert(Tag::Sum((sum % 10) as u8));

    Ok(tags)
}

fn magnitude(value: u32, half: u32) -> Magnitude {
    if value < half { Magnitude::Small } else { Magnitude::Big }
}

/// Kép bằng looks at every digit; the other families look at the trailing
/// two-digit pair.
fn pair_kinds(digits: &[u8]) -> Vec<PairKind> {
    let mut kinds = Vec::new();
    if digits.windows(2).all(|w| w[0] == w[1]) {
        kinds.push(PairKind::KepBang);
    }

    let a = digits[digits.len() - 2];
    let b = digits[digits.len() - 1];
    if POSITIVE_SHADOW[a as usize] == b {
        kinds.push(PairKind::KepLech);
    }
    if NEGATIVE_SHADOW[a as usize] == b {
        kinds.push(PairKind::KepAm);
    }
    if a.abs_diff(b) == 1 {
        kinds.push(PairKind::SatKep);
    }
    kinds
}

/// AND across groups, OR within a group. No groups selects everything; an
/// empty group selects nothing.
pub fn matches_criteria(tags: &BTreeSet<Tag>, criteria: &[CriteriaGroup]) -> bool {
    criteria
        .iter()
        .all(|alternatives| alternatives.iter().any(|tag| tags.contains(tag)))
}

pub fn filter_by_criteria(universe: &NumberUniverse, criteria: &[CriteriaGroup]) -> Vec<String> {
    universe
        .iter()
        .filter(|number| {
            classify(number, universe.width())
                .map(|tags| matches_criteria(&tags, criteria))
                .unwrap_or(false)
        })
        .collect()
}

/// The criterion a typed group stands for. Custom groups have none.
pub fn group_criterion(kind: &GroupKind) -> Option<CriteriaGroup> {
    match kind {
        GroupKind::DauDuoi { position, parity } => Some(vec![match position {
            Position::Head => Tag::HeadParity(*parity),
            Position::Tail => Tag::TailParity(*parity),
        }]),
        GroupKind::Cham { digits } => Some(digits.iter().map(|&d| Tag::Touch(d)).collect()),
        GroupKind::Bo { kind } => Some(vec![Tag::Pair(*kind)]),
        GroupKind::Tong { modulo } => Some(vec![Tag::Sum(*modulo)]),
        GroupKind::Custom { .. } => None,
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Head(head) => write!(f, "head:{}", head),
            Tag::HeadParity(p) => write!(f, "head:{}", parity_slug(*p)),
            Tag::HeadMagnitude(m) => write!(f, "head:{}", magnitude_slug(*m)),
            Tag::Tail(d) => write!(f, "tail:{}", d),
            Tag::TailParity(p) => write!(f, "tail:{}", parity_slug(*p)),
            Tag::TailMagnitude(m) => write!(f, "tail:{}", magnitude_slug(*m)),
            Tag::Touch(d) => write!(f, "touch:{}", d),
            Tag::Pair(kind) => write!(f, "pair:{}", kind.slug()),
            Tag::Sum(d) => write!(f, "sum:{}", d),
        }
    }
}

fn parity_slug(parity: Parity) -> &'static str {
    match parity {
        Parity::Even => "even",
        Parity::Odd => "odd",
    }
}

fn magnitude_slug(magnitude: Magnitude) -> &'static str {
    match magnitude {
        Magnitude::Small => "small",
        Magnitude::Big => "big",
    }
}

fn single_digit(value: &str, tag: &str) -> Result<u8> {
    match value.as_bytes() {
        [b] if b.is_ascii_digit() => Ok(b - b'0'),
        _ => Err(DanError::InvalidRequest(format!(
            "'{}' expects a single digit, got '{}'",
            tag, value
        ))),
    }
}

impl FromStr for Tag {
    type Err = DanError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let (family, value) = normalized
            .split_once(':')
            .ok_or_else(|| DanError::InvalidRequest(format!("tag '{}' has no ':'", s)))?;

        let tag = match (family, value) {
            ("head" | "tail", "even") | ("head" | "tail", "odd") => {
                let parity = if value == "even" { Parity::Even } else { Parity::Odd };
                if family == "head" { Tag::HeadParity(parity) } else { Tag::TailParity(parity) }
            }
            ("head" | "tail", "small") | ("head" | "tail", "big") => {
                let m = if value == "small" { Magnitude::Small } else { Magnitude::Big };
                if family == "head" { Tag::HeadMagnitude(m) } else { Tag::TailMagnitude(m) }
            }
            ("head", digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                Tag::Head(digits.to_string())
            }
            ("tail", digit) => Tag::Tail(single_digit(digit, family)?),
            ("touch", digit) => Tag::Touch(single_digit(digit, family)?),
            ("sum", digit) => Tag::Sum(single_digit(digit, family)?),
            ("pair", slug) => Tag::Pair(
                PairKind::ALL
                    .into_iter()
                    .find(|k| k.slug() == slug)
                    .ok_or_else(|| DanError::InvalidRequest(format!("unknown pair kind '{}'", slug)))?,
            ),
            _ => return Err(DanError::InvalidRequest(format!("unknown tag '{}'", s))),
        };
        Ok(tag)
    }
}

impl TryFrom<String> for Tag {
    type Error = DanError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(number: &str, width: Width) -> BTreeSet<Tag> {
        classify(number, width).unwrap()
    }

    #[test]
    fn two_digit_head_and_tail() {
        let t = tags("47", Width::TWO);
        assert!(t.contains(&Tag::Head("4".to_string())));
        assert!(t.contains(&Tag::HeadParity(Parity::Even)));
        assert!(t.contains(&Tag::HeadMagnitude(Magnitude::Small)));
        assert!(t.contains(&Tag::Tail(7)));
        assert!(t.contains(&Tag::TailParity(Parity::Odd)));
        assert!(t.contains(&Tag::TailMagnitude(Magnitude::Big)));
        assert!(t.contains(&Tag::Sum(1)));
    }

    #[test]
    fn head_meaning_changes_with_width() {
        let three = tags("123", Width::THREE);
        assert!(three.contains(&Tag::Head("12".to_string())));
        assert!(three.contains(&Tag::HeadParity(Parity::Even)));
        assert!(three.contains(&Tag::HeadMagnitude(Magnitude::Small)));

        let four = tags("9871", Width::FOUR);
        assert!(four.contains(&Tag::Head("987".to_string())));
        assert!(four.contains(&Tag::HeadParity(Parity::Odd)));
        assert!(four.contains(&Tag::HeadMagnitude(Magnitude::Big)));
        assert!(four.contains(&Tag::Tail(1)));
    }

    #[test]
    fn touch_lists_each_distinct_digit() {
        let touches: Vec<u8> = tags("1213", Width::FOUR)
            .into_iter()
            .filter_map(|t| match t {
                Tag::Touch(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(touches, vec![1, 2, 3]);
    }

    #[test]
    fn pair_families_follow_lookup_tables() {
        assert!(tags("33", Width::TWO).contains(&Tag::Pair(PairKind::KepBang)));
        assert!(tags("333", Width::THREE).contains(&Tag::Pair(PairKind::KepBang)));
        assert!(!tags("133", Width::THREE).contains(&Tag::Pair(PairKind::KepBang)));

        assert!(tags("05", Width::TWO).contains(&Tag::Pair(PairKind::KepLech)));
        assert!(tags("94", Width::TWO).contains(&Tag::Pair(PairKind::KepLech)));
        assert!(tags("07", Width::TWO).contains(&Tag::Pair(PairKind::KepAm)));
        assert!(tags("85", Width::TWO).contains(&Tag::Pair(PairKind::KepAm)));
        assert!(tags("12", Width::TWO).contains(&Tag::Pair(PairKind::SatKep)));
        assert!(tags("98", Width::TWO).contains(&Tag::Pair(PairKind::SatKep)));
        assert!(tags("512", Width::THREE).contains(&Tag::Pair(PairKind::SatKep)));

        let plain = tags("26", Width::TWO);
        assert!(!plain.iter().any(|t| matches!(t, Tag::Pair(_))));
    }

    #[test]
    fn each_pair_family_has_ten_two_digit_members() {
        let universe = NumberUniverse::new(Width::TWO);
        for kind in [PairKind::KepBang, PairKind::KepLech, PairKind::KepAm] {
            let found = filter_by_criteria(&universe, &[vec![Tag::Pair(kind)]]);
            assert_eq!(found.len(), 10, "{:?}", kind);
        }
        // 01,10,12,21,...,89,98
        let sat = filter_by_criteria(&universe, &[vec![Tag::Pair(PairKind::SatKep)]]);
        assert_eq!(sat.len(), 18);
    }

    #[test]
    fn criteria_are_or_within_and_across() {
        let universe = NumberUniverse::new(Width::TWO);
        let criteria = vec![
            vec![Tag::Touch(1), Tag::Touch(2)],
            vec![Tag::TailParity(Parity::Even)],
        ];
        let found = filter_by_criteria(&universe, &criteria);

        assert!(found.contains(&"12".to_string()));
        assert!(found.contains(&"10".to_string()));
        assert!(found.contains(&"20".to_string()));
        assert!(!found.contains(&"11".to_string()));
        assert!(!found.contains(&"34".to_string()));
        assert!(found.iter().all(|n| {
            let t = tags(n, Width::TWO);
            (t.contains(&Tag::Touch(1)) || t.contains(&Tag::Touch(2)))
                && t.contains(&Tag::TailParity(Parity::Even))
        }));
    }

    #[test]
    fn empty_criteria_select_everything_and_empty_group_nothing() {
        let universe = NumberUniverse::new(Width::TWO);
        assert_eq!(filter_by_criteria(&universe, &[]).len(), 100);
        assert!(filter_by_criteria(&universe, &[vec![]]).is_empty());
    }

    #[test]
    fn sum_modulo_ten() {
        let universe = NumberUniverse::new(Width::TWO);
        let found = filter_by_criteria(&universe, &[vec![Tag::Sum(0)]]);
        assert_eq!(found, vec!["00", "19", "28", "37", "46", "55", "64", "73", "82", "91"]);
    }

    #[test]
    fn tag_text_form_parses_back() {
        for text in ["head:even", "head:12", "tail:big", "tail:7", "touch:0", "pair:sat-kep", "sum:9"] {
            let tag: Tag = text.parse().unwrap();
            assert_eq!(tag.to_string(), text);
        }
        assert!("touch:12".parse::<Tag>().is_err());
        assert!("colour:red".parse::<Tag>().is_err());
    }

    #[test]
    fn rejects_numbers_outside_universe() {
        assert!(classify("345", Width::TWO).is_err());
    }
}
