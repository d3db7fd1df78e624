/// ICAO 9303 check-digit arithmetic.
pub struct MrzChecksum;

const WEIGHTS: [u32; 3] = [7, 3, 1];

impl MrzChecksum {
    /// Numeric value of an MRZ character. Anything outside `[0-9A-Z<]` counts as 0.
    pub fn char_value(c: char) -> u32 {
        match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            _ => 0,
        }
    }

    pub fn compute(data: &str) -> u32 {
        let sum: u32 = data
            .chars()
            .enumerate()
            .map(|(i, c)| Self::char_value(c) * WEIGHTS[i % 3])
            .sum();
        sum % 10
    }

    pub fn check_char(data: &str) -> char {
        char::from_digit(Self::compute(data), 10).unwrap_or('0')
    }

    pub fn verify(data: &str, check: char) -> bool {
        match check.to_digit(10) {
            Some(d) => d == Self::compute(data),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_values() {
        assert_eq!(MrzChecksum::char_value('7'), 7);
        assert_eq!(MrzChecksum::char_value('A'), 10);
        assert_eq!(MrzChecksum::char_value('Z'), 35);
        assert_eq!(MrzChecksum::char_value('<'), 0);
    }

    #[test]
    fn test_known_check_digits() {
        assert_eq!(MrzChecksum::compute("L898902C3"), 6);
        assert_eq!(MrzChecksum::compute("740812"), 2);
        assert_eq!(MrzChecksum::compute("120415"), 9);
        assert!(MrzChecksum::verify("ZE184226B<<<<<", '1'));
        assert!(!MrzChecksum::verify("740812", '<'));
    }

    #[test]
    fn test_composite() {
        let line2 = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";
        let composite = format!("{}{}{}", &line2[0..10], &line2[13..20], &line2[21..43]);
        assert_eq!(MrzChecksum::check_char(&composite), '0');
    }

    #[test]
    fn test_td1_sample_lines() {
        let line1 = "I<UTOD231458907<<<<<<<<<<<<<<<";
        let line2 = "7408122F1204159UTO<<<<<<<<<<<6";
        assert!(MrzChecksum::verify(&line1[5..14], '7'));
        assert!(MrzChecksum::verify(&line2[0..6], '2'));
        assert!(MrzChecksum::verify(&line2[8..14], '9'));

        // composite spans the filler-padded optional data
        let composite = format!("{}{}{}{}", &line1[5..30], &line2[0..7], &line2[8..15], &line2[18..29]);
        assert_eq!(MrzChecksum::check_char(&composite), '6');
        assert_eq!(
            MrzChecksum::compute(&composite),
            MrzChecksum::compute(&composite.replace('<', "0"))
        );
    }

    #[test]
    fn test_td2_sample_lines() {
        let line2 = "D231458907UTO7408122F1204159<<<<<<<6";
        assert!(MrzChecksum::verify(&line2[0..9], '7'));
        assert!(MrzChecksum::verify(&line2[13..19], '2'));
        assert!(MrzChecksum::verify(&line2[21..27], '9'));
        let composite = format!("{}{}{}", &line2[0..10], &line2[13..20], &line2[21..35]);
        assert_eq!(MrzChecksum::check_char(&composite), '6');
    }

    #[test]
    fn test_fillers_only() {
        assert_eq!(MrzChecksum::compute("<<<<<<<<<"), 0);
        assert_eq!(MrzChecksum::check_char("<<<<<<<<<"), '0');
    }
}
