use crate::models::{DocumentFormat, MrzCandidate};
use crate::validation::checksum::MrzChecksum;
use crate::validation::mrz::{MrzLayout, MrzValidator, Span};
use lazy_static::lazy_static;
use log::debug;
use std::collections::HashMap;

/// Candidates below this many passing check digits are dropped.
pub const MIN_PROMOTION_SCORE: u8 = 3;

lazy_static! {
    // Letters OCR engines commonly read in place of digits
    static ref DIGIT_LOOKALIKES: HashMap<char, char> = {
        let mut m = HashMap::new();
        m.insert('O', '0');
        m.insert('Q', '0');
        m.insert('D', '0');
        m.insert('I', '1');
        m.insert('L', '1');
        m.insert('Z', '2');
        m.insert('S', '5');
        m.insert('G', '6');
        m.insert('T', '7');
        m.insert('B', '8');
        m
    };
}

/// Checksum-guided repair of numeric MRZ zones.
pub struct MrzRepair;

impl MrzRepair {
    pub fn to_digits(text: &str) -> String {
        text.chars()
            .map(|c| *DIGIT_LOOKALIKES.get(&c).unwrap_or(&c))
            .collect()
    }

    /// Replaces look-alike letters inside the numeric zones.
    ///
    /// Dates and check digits are always numeric. The document number is
    /// alphanumeric, so it is only rewritten when that makes its checksum pass.
    pub fn substitute(format: DocumentFormat, lines: &[String]) -> Vec<String> {
        let layout = MrzLayout::for_format(format);
        let mut grid: Vec<Vec<char>> = lines.iter().map(|l| l.chars().collect()).collect();

        for s in [
            layout.birth_date,
            layout.expiry_date,
            layout.document_number_check,
            layout.birth_date_check,
            layout.expiry_date_check,
            layout.composite_check,
        ] {
            map_span(&mut grid, s, |c| *DIGIT_LOOKALIKES.get(&c).unwrap_or(&c));
        }

        let doc: String = read_span(&grid, layout.document_number);
        let doc_check = read_span(&grid, layout.document_number_check)
            .chars()
            .next()
            .unwrap_or('<');
        if !MrzChecksum::verify(&doc, doc_check) {
            let digits = Self::to_digits(&doc);
            if digits != doc && MrzChecksum::verify(&digits, doc_check) {
                debug!("document number repaired {} -> {}", doc, digits);
                map_span(&mut grid, layout.document_number, |c| {
                    *DIGIT_LOOKALIKES.get(&c).unwrap_or(&c)
                });
            }
        }

        grid.into_iter().map(|l| l.into_iter().collect()).collect()
    }

    /// Passing check digits after substitution, 0..=4.
    pub fn score(format: DocumentFormat, lines: &[String]) -> u8 {
        let substituted = Self::substitute(format, lines);
        MrzValidator::checksums(format, &substituted).passed_count
    }

    /// Rewrites every check digit from its data so the lines are self-consistent.
    pub fn recompute_check_digits(format: DocumentFormat, lines: &[String]) -> Vec<String> {
        let layout = MrzLayout::for_format(format);
        let mut grid: Vec<Vec<char>> = lines.iter().map(|l| l.chars().collect()).collect();

        for (data, check) in [
            (layout.document_number, layout.document_number_check),
            (layout.birth_date, layout.birth_date_check),
            (layout.expiry_date, layout.expiry_date_check),
        ] {
            let digit = MrzChecksum::check_char(&read_span(&grid, data));
            map_span(&mut grid, check, |_| digit);
        }
        // composite covers the check digits written above
        let composite: String = layout
            .composite
            .iter()
            .map(|s| read_span(&grid, *s))
            .collect();
        let digit = MrzChecksum::check_char(&composite);
        map_span(&mut grid, layout.composite_check, |_| digit);

        grid.into_iter().map(|l| l.into_iter().collect()).collect()
    }

    /// Substitutes, scores, and promotes lines scoring at least 3 of 4.
    pub fn repair(format: DocumentFormat, lines: &[String]) -> Option<MrzCandidate> {
        if MrzValidator::detect_format(lines) != Some(format) {
            return None;
        }
        let substituted = Self::substitute(format, lines);
        let confidence = MrzValidator::checksums(format, &substituted).passed_count;
        if confidence < MIN_PROMOTION_SCORE {
            debug!("{:?} candidate dropped with checksum score {}", format, confidence);
            return None;
        }
        let mut repaired = Self::recompute_check_digits(format, &substituted).into_iter();
        let line1 = repaired.next()?;
        let line2 = repaired.next()?;
        let line3 = repaired.next();
        Some(MrzCandidate {
            line1,
            line2,
            line3,
            format,
            confidence,
        })
    }
}

fn read_span(grid: &[Vec<char>], s: Span) -> String {
    grid.get(s.line)
        .map(|l| l.iter().skip(s.start).take(s.end - s.start).collect())
        .unwrap_or_default()
}

fn map_span(grid: &mut [Vec<char>], s: Span, f: impl Fn(char) -> char) {
    if let Some(line) = grid.get_mut(s.line) {
        let end = s.end.min(line.len());
        for c in line.iter_mut().take(end).skip(s.start) {
            *c = f(*c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn td3(l2: &str) -> Vec<String> {
        vec![
            "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<".to_string(),
            l2.to_string(),
        ]
    }

    #[test]
    fn test_recompute_is_idempotent_on_valid_line() {
        let lines = td3("L898902C36UTO7408122F1204159ZE184226B<<<<<10");
        let again = MrzRepair::recompute_check_digits(DocumentFormat::TD3, &lines);
        assert_eq!(again, lines);
    }

    #[test]
    fn test_repairs_letters_in_dates() {
        let lines = td3("L898902C36UTO74O8I22F12O4I59ZE184226B<<<<<1O");
        let candidate = MrzRepair::repair(DocumentFormat::TD3, &lines).unwrap();
        assert_eq!(candidate.line2, "L898902C36UTO7408122F1204159ZE184226B<<<<<10");
        assert_eq!(candidate.confidence, 4);
    }

    #[test]
    fn test_document_number_letters_kept_when_valid() {
        // 'C' must not become a digit since the checksum already passes
        let lines = td3("L898902C36UTO7408122F1204159ZE184226B<<<<<10");
        let candidate = MrzRepair::repair(DocumentFormat::TD3, &lines).unwrap();
        assert!(candidate.line2.starts_with("L898902C3"));
    }

    #[test]
    fn test_document_number_digit_repair() {
        // numeric passport number read with O/I for 0/1
        let number = "123401234";
        let check = MrzChecksum::check_char(number);
        let ocr = format!("I234OI234{}", check);
        let composite = format!("{}{}74081221204159ZE184226B<<<<<1", number, check);
        let l2 = format!(
            "{}UTO7408122F1204159ZE184226B<<<<<1{}",
            ocr,
            MrzChecksum::check_char(&composite)
        );
        let candidate = MrzRepair::repair(DocumentFormat::TD3, &td3(&l2)).unwrap();
        assert!(candidate.line2.starts_with(number));
        assert_eq!(candidate.confidence, 4);
    }

    #[test]
    fn test_low_score_dropped_and_partial_promoted() {
        let garbage = td3("XXXXXXXXX1UTO1111111F1111111XXXXXXXXX<<<<<55");
        assert!(MrzRepair::repair(DocumentFormat::TD3, &garbage).is_none());

        // one failing check digit still promotes, and gets rewritten
        let one_bad = td3("L898902C36UTO7408122F1204159ZE184226B<<<<<15");
        let candidate = MrzRepair::repair(DocumentFormat::TD3, &one_bad).unwrap();
        assert_eq!(candidate.confidence, 3);
        assert_eq!(
            MrzValidator::checksums(DocumentFormat::TD3, &candidate.lines()).passed_count,
            4
        );
    }

    #[test]
    fn test_wrong_shape_rejected() {
        assert!(MrzRepair::repair(DocumentFormat::TD3, &td3("L898902C3")).is_none());
    }
}
