use crate::types::Width;

/// All zero-padded `width`-digit strings, `00..99`, `000..999` or `0000..9999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberUniverse {
    width: Width,
}

impl NumberUniverse {
    pub fn new(width: Width) -> Self {
        Self { width }
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn size(&self) -> u32 {
        self.width.universe_size()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.size()).map(move |value| self.format(value))
    }

    pub fn format(&self, value: u32) -> String {
        format!("{:0width$}", value, width = self.width.digits())
    }

    pub fn contains(&self, candidate: &str) -> bool {
        is_member(candidate, self.width)
    }
}

pub fn is_member(candidate: &str, width: Width) -> bool {
    candidate.len() == width.digits() && candidate.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_in_ascending_order() {
        let universe = NumberUniverse::new(Width::TWO);
        let members: Vec<String> = universe.iter().collect();

        assert_eq!(members.len(), 100);
        assert_eq!(members.first().map(String::as_str), Some("00"));
        assert_eq!(members.last().map(String::as_str), Some("99"));
        assert!(members.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn four_digit_universe_is_padded() {
        let universe = NumberUniverse::new(Width::FOUR);
        assert_eq!(universe.size(), 10_000);
        assert_eq!(universe.format(7), "0007");
    }

    #[test]
    fn membership_checks_length_and_digits() {
        assert!(is_member("07", Width::TWO));
        assert!(!is_member("7", Width::TWO));
        assert!(!is_member("345", Width::TWO));
        assert!(!is_member("1a", Width::TWO));
        assert!(!is_member("+12", Width::THREE));
        assert!(is_member("000", Width::THREE));
    }

    #[test]
    fn width_outside_two_to_four_is_rejected() {
        assert!(Width::new(1).is_err());
        assert!(Width::new(5).is_err());
        assert_eq!(Width::new(3).unwrap(), Width::THREE);
    }
}
