use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::classifier::{filter_by_criteria, group_criterion};
use crate::error::{DanError, Result};
use crate::types::{Entry, Group, GroupKind, PairKind, Parity, Position, Width};
use crate::universe::NumberUniverse;

static SIZE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:([0-9])x|(btđ|btd)|(stđ|std)|(ttđ|ttd))$").unwrap());
static TOUCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:chạm|cham)[-_]?([0-9]+)$").unwrap());
static HEAD_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(đầu|dau|đuôi|duoi)[-_]?(chẵn|chan|lẻ|le)$").unwrap()
});
static PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:kép|kep)[-_]?(bằng|bang|lệch|lech|âm|am)$").unwrap());
static SAT_KEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:sát|sat)[-_]?(?:kép|kep)$").unwrap());
static SUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(?:tổng|tong)[-_]?([0-9])$").unwrap());
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^\[\]]+)\]$").unwrap());

/// Canonical size label for an entry holding `count` numbers.
pub fn derive_size_label(count: usize) -> String {
    match count {
        1 => "BTĐ".to_string(),
        2 => "STĐ".to_string(),
        4 => "TTĐ".to_string(),
        n => format!("{}X", n / 10),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum WarningReason {
    WrongWidth { expected: Width, found: usize },
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// Zero-based position of the token in the input.
    pub index: usize,
    pub token: String,
    #[serde(flatten)]
    pub reason: WarningReason,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            WarningReason::WrongWidth { expected, found } => write!(
                f,
                "token {} '{}': {} digits, expected {}",
                self.index, self.token, found, expected
            ),
            WarningReason::Unrecognized => {
                write!(f, "token {} '{}': not a label or number", self.index, self.token)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDan {
    pub groups: Vec<Group>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedDan {
    pub fn number_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.numbers.iter())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

enum Token {
    Label(Group),
    Number(String),
    Skip(WarningReason),
}

/// Split owner input into groups.
///
/// A label token opens a group; numbers of the declared width join the open
/// group; anything else becomes a warning. Numbers before the first label
/// land in an unlabeled group. Typed groups left without numbers are filled
/// from the universe by their criterion.
pub fn parse(raw_text: &str, width: Width) -> ParsedDan {
    let universe = NumberUniverse::new(width);
    let mut parsed = ParsedDan::default();
    let mut open: Option<Group> = None;

    for (index, token) in raw_text.split_whitespace().enumerate() {
        match read_token(token, width) {
            Token::Label(group) => {
                if let Some(done) = open.replace(group) {
                    parsed.groups.push(close_group(done, &universe));
                }
            }
            Token::Number(number) => {
                open.get_or_insert_with(Group::unlabeled).numbers.insert(number);
            }
            Token::Skip(reason) => {
                tracing::debug!("skipping token {} '{}'", index, token);
                parsed.warnings.push(ParseWarning {
                    index,
                    token: token.to_string(),
                    reason,
                });
            }
        }
    }

    if let Some(done) = open {
        parsed.groups.push(close_group(done, &universe));
    }

    parsed
}

fn close_group(mut group: Group, universe: &NumberUniverse) -> Group {
    if group.numbers.is_empty() {
        if let Some(criterion) = group_criterion(&group.kind) {
            group.numbers = filter_by_criteria(universe, &[criterion]).into_iter().collect();
        }
    }
    group
}

fn read_token(token: &str, width: Width) -> Token {
    let (bare, had_colon) = match token.strip_suffix(':') {
        Some(stripped) => (stripped, true),
        None => (token, false),
    };

    if let Some(group) = read_label(bare) {
        return Token::Label(group);
    }

    if !bare.is_empty() && bare.bytes().all(|b| b.is_ascii_digit()) {
        return if had_colon {
            Token::Skip(WarningReason::Unrecognized)
        } else if bare.len() == width.digits() {
            Token::Number(bare.to_string())
        } else {
            Token::Skip(WarningReason::WrongWidth {
                expected: width,
                found: bare.len(),
            })
        };
    }

    if had_colon && !bare.is_empty() && !bare.contains(['[', ']']) {
        return Token::Label(Group::new(GroupKind::Custom {
            raw_label: bare.to_string(),
        }));
    }

    Token::Skip(WarningReason::Unrecognized)
}

fn read_label(token: &str) -> Option<Group> {
    if let Some(caps) = SIZE_TAG.captures(token) {
        let label = if let Some(tens) = caps.get(1) {
            format!("{}X", tens.as_str())
        } else if caps.get(2).is_some() {
            "BTĐ".to_string()
        } else if caps.get(3).is_some() {
            "STĐ".to_string()
        } else {
            "TTĐ".to_string()
        };
        return Some(Group::new(GroupKind::Custom { raw_label: label }));
    }

    if let Some(caps) = BRACKETED.captures(token) {
        return Some(Group::new(GroupKind::Custom {
            raw_label: caps[1].to_string(),
        }));
    }

    let kind = if let Some(caps) = TOUCH.captures(token) {
        GroupKind::Cham {
            digits: caps[1].bytes().map(|b| b - b'0').collect(),
        }
    } else if let Some(caps) = HEAD_TAIL.captures(token) {
        let position = match caps[1].to_lowercase().as_str() {
            "đầu" | "dau" => Position::Head,
            _ => Position::Tail,
        };
        let parity = match caps[2].to_lowercase().as_str() {
            "chẵn" | "chan" => Parity::Even,
            _ => Parity::Odd,
        };
        GroupKind::DauDuoi { position, parity }
    } else if let Some(caps) = PAIR.captures(token) {
        let kind = match caps[1].to_lowercase().as_str() {
            "bằng" | "bang" => PairKind::KepBang,
            "lệch" | "lech" => PairKind::KepLech,
            _ => PairKind::KepAm,
        };
        GroupKind::Bo { kind }
    } else if SAT_KEP.is_match(token) {
        GroupKind::Bo {
            kind: PairKind::SatKep,
        }
    } else if let Some(caps) = SUM.captures(token) {
        GroupKind::Tong {
            modulo: caps[1].as_bytes()[0] - b'0',
        }
    } else {
        return None;
    };

    let mut group = Group::new(kind);
    group.display_label = Some(token.to_string());
    Some(group)
}

fn is_size_tag(label: &str) -> bool {
    SIZE_TAG.is_match(label)
}

/// Rebuild input text from groups. Parsing the result yields the same
/// labels and number sets.
pub fn render(groups: &[Group]) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for group in groups {
        let label = group.label();
        if !label.is_empty() {
            let token = match &group.kind {
                GroupKind::Custom { .. } if !is_size_tag(&label) => format!("[{}]", label),
                _ => label,
            };
            tokens.push(token);
        }
        tokens.extend(group.numbers.iter().cloned());
    }
    tokens.join(" ")
}

/// Parse `raw_text` into a new Pending entry for `(owner_name, day)`.
///
/// Fails when the text is blank or when not a single token could be used;
/// otherwise unusable tokens come back as warnings.
pub fn assemble_entry(
    owner_name: &str,
    day: NaiveDate,
    raw_text: &str,
    width: Width,
) -> Result<(Entry, Vec<ParseWarning>)> {
    if owner_name.trim().is_empty() {
        return Err(DanError::InvalidRequest("owner name is empty".to_string()));
    }
    if raw_text.trim().is_empty() {
        return Err(DanError::Validation("dàn text is empty".to_string()));
    }

    let parsed = parse(raw_text, width);
    if parsed.groups.is_empty() {
        let reasons: Vec<String> = parsed.warnings.iter().map(ToString::to_string).collect();
        return Err(DanError::Validation(format!(
            "no labels or {}-digit numbers found: {}",
            width,
            reasons.join("; ")
        )));
    }

    let entry = Entry::new(owner_name, day, width, raw_text.trim(), parsed.groups);
    Ok((entry, parsed.warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn label_sets(groups: &[Group]) -> BTreeMap<String, BTreeSet<String>> {
        groups
            .iter()
            .map(|g| (g.label(), g.numbers.clone()))
            .collect()
    }

    #[test]
    fn size_label_boundaries() {
        assert_eq!(derive_size_label(0), "0X");
        assert_eq!(derive_size_label(1), "BTĐ");
        assert_eq!(derive_size_label(2), "STĐ");
        assert_eq!(derive_size_label(3), "0X");
        assert_eq!(derive_size_label(4), "TTĐ");
        assert_eq!(derive_size_label(9), "0X");
        assert_eq!(derive_size_label(10), "1X");
        assert_eq!(derive_size_label(19), "1X");
        assert_eq!(derive_size_label(20), "2X");
        assert_eq!(derive_size_label(99), "9X");
        assert_eq!(derive_size_label(100), "10X");
    }

    #[test]
    fn label_opens_group_for_following_numbers() {
        let parsed = parse("3X 101 202 303", Width::THREE);

        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.groups[0].label(), "3X");
        assert_eq!(parsed.groups[0].numbers.len(), 3);
    }

    #[test]
    fn wrong_width_is_a_warning_not_a_failure() {
        let parsed = parse("12 345", Width::TWO);

        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.groups[0].kind, GroupKind::Custom { raw_label: String::new() });
        assert_eq!(parsed.groups[0].numbers, BTreeSet::from(["12".to_string()]));
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning {
                index: 1,
                token: "345".to_string(),
                reason: WarningReason::WrongWidth {
                    expected: Width::TWO,
                    found: 3
                },
            }]
        );
    }

    #[test]
    fn recognizes_typed_labels() {
        let parsed = parse(
            "Chạm5 15 ĐầuChẵn 02 KépBằng 11 sat_kep 12 Tổng3 21 duoi-le 01",
            Width::TWO,
        );
        let kinds: Vec<GroupKind> = parsed.groups.iter().map(|g| g.kind.clone()).collect();

        assert!(parsed.warnings.is_empty());
        assert_eq!(
            kinds,
            vec![
                GroupKind::Cham { digits: BTreeSet::from([5]) },
                GroupKind::DauDuoi { position: Position::Head, parity: Parity::Even },
                GroupKind::Bo { kind: PairKind::KepBang },
                GroupKind::Bo { kind: PairKind::SatKep },
                GroupKind::Tong { modulo: 3 },
                GroupKind::DauDuoi { position: Position::Tail, parity: Parity::Odd },
            ]
        );
    }

    #[test]
    fn typed_label_without_numbers_expands_from_universe() {
        let parsed = parse("KepAm", Width::TWO);
        let expected: BTreeSet<String> = ["07", "70", "14", "41", "29", "92", "36", "63", "58", "85"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(parsed.groups[0].numbers, expected);

        // Custom labels stay empty.
        let parsed = parse("[VIP]", Width::TWO);
        assert!(parsed.groups[0].numbers.is_empty());
    }

    #[test]
    fn custom_labels_and_garbage() {
        let parsed = parse("VIP: 01 02 abc [Nhóm-B] 03 07:", Width::TWO);

        assert_eq!(parsed.groups.len(), 2);
        assert_eq!(parsed.groups[0].label(), "VIP");
        assert_eq!(parsed.groups[1].label(), "Nhóm-B");
        assert_eq!(parsed.warnings.len(), 2);
        assert_eq!(parsed.warnings[0].token, "abc");
        assert_eq!(parsed.warnings[1].token, "07:");
    }

    #[test]
    fn size_tags_are_canonicalized() {
        let parsed = parse("3x 01 btd 02 STĐ: 03 04", Width::TWO);
        let labels: Vec<String> = parsed.groups.iter().map(Group::label).collect();
        assert_eq!(labels, vec!["3X", "BTĐ", "STĐ"]);
    }

    #[test]
    fn render_round_trips() {
        for (text, width) in [
            ("01 02 3X 10 11 12 [VIP] 99 Chạm7 17 70", Width::TWO),
            ("Đầu-Lẻ 123 Tổng0 550 ToNg1 BTĐ 001", Width::THREE),
            ("KepLech DAU_CHAN 1234 VIP:", Width::FOUR),
        ] {
            let first = parse(text, width);
            let second = parse(&render(&first.groups), width);
            assert!(second.warnings.is_empty(), "{:?}", second.warnings);
            assert_eq!(label_sets(&first.groups), label_sets(&second.groups), "{}", text);
        }
    }

    #[test]
    fn assemble_rejects_unusable_text() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();

        assert!(matches!(
            assemble_entry("A", day, "   ", Width::TWO),
            Err(DanError::Validation(_))
        ));
        assert!(matches!(
            assemble_entry("A", day, "abc 345", Width::TWO),
            Err(DanError::Validation(_))
        ));
        assert!(matches!(
            assemble_entry(" ", day, "12", Width::TWO),
            Err(DanError::InvalidRequest(_))
        ));
    }

    #[test]
    fn assembled_entry_unions_groups() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let (entry, warnings) = assemble_entry("A", day, "01 02 [X] 02 03", Width::TWO).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(entry.resolved_numbers.len(), 3);
        assert_eq!(entry.label, "X");
        assert_eq!(entry.size_label(), "0X");
    }

    #[test]
    fn unlabeled_entry_uses_size_label() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let (entry, _) = assemble_entry("A", day, "01 02 03 04", Width::TWO).unwrap();
        assert_eq!(entry.label, "TTĐ");
    }
}
