use crate::models::{
    DocumentFormat, MrzCandidate, MrzChecksums, MrzFailReason, MrzFields, MrzParseResult,
    MrzScore, MRZ_ALPHABET,
};
use crate::validation::checksum::MrzChecksum;
use chrono::{Datelike, Local, NaiveDate};

/// Character range `[start, end)` on one MRZ line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

const fn span(line: usize, start: usize, end: usize) -> Span {
    Span { line, start, end }
}

/// Check-digit positions of one document format.
#[derive(Debug)]
pub struct MrzLayout {
    pub document_number: Span,
    pub document_number_check: Span,
    pub birth_date: Span,
    pub birth_date_check: Span,
    pub expiry_date: Span,
    pub expiry_date_check: Span,
    pub composite: &'static [Span],
    pub composite_check: Span,
}

static TD3_LAYOUT: MrzLayout = MrzLayout {
    document_number: span(1, 0, 9),
    document_number_check: span(1, 9, 10),
    birth_date: span(1, 13, 19),
    birth_date_check: span(1, 19, 20),
    expiry_date: span(1, 21, 27),
    expiry_date_check: span(1, 27, 28),
    composite: &[span(1, 0, 10), span(1, 13, 20), span(1, 21, 43)],
    composite_check: span(1, 43, 44),
};

static TD2_LAYOUT: MrzLayout = MrzLayout {
    document_number: span(1, 0, 9),
    document_number_check: span(1, 9, 10),
    birth_date: span(1, 13, 19),
    birth_date_check: span(1, 19, 20),
    expiry_date: span(1, 21, 27),
    expiry_date_check: span(1, 27, 28),
    composite: &[span(1, 0, 10), span(1, 13, 20), span(1, 21, 35)],
    composite_check: span(1, 35, 36),
};

static TD1_LAYOUT: MrzLayout = MrzLayout {
    document_number: span(0, 5, 14),
    document_number_check: span(0, 14, 15),
    birth_date: span(1, 0, 6),
    birth_date_check: span(1, 6, 7),
    expiry_date: span(1, 8, 14),
    expiry_date_check: span(1, 14, 15),
    composite: &[span(0, 5, 30), span(1, 0, 7), span(1, 8, 15), span(1, 18, 29)],
    composite_check: span(1, 29, 30),
};

impl MrzLayout {
    pub fn for_format(format: DocumentFormat) -> &'static MrzLayout {
        match format {
            DocumentFormat::TD1 => &TD1_LAYOUT,
            DocumentFormat::TD2 => &TD2_LAYOUT,
            DocumentFormat::TD3 => &TD3_LAYOUT,
        }
    }

    /// The four `(data, check)` pairs in the order doc, birth, expiry, composite.
    pub fn check_pairs<S: AsRef<str>>(&self, lines: &[S]) -> [(String, char); 4] {
        let composite: String = self
            .composite
            .iter()
            .map(|s| field(lines, *s))
            .collect::<Vec<_>>()
            .concat();
        [
            (field(lines, self.document_number).to_string(), check(lines, self.document_number_check)),
            (field(lines, self.birth_date).to_string(), check(lines, self.birth_date_check)),
            (field(lines, self.expiry_date).to_string(), check(lines, self.expiry_date_check)),
            (composite, check(lines, self.composite_check)),
        ]
    }
}

pub(crate) fn field<S: AsRef<str>>(lines: &[S], s: Span) -> &str {
    lines
        .get(s.line)
        .and_then(|l| l.as_ref().get(s.start..s.end))
        .unwrap_or("")
}

fn check<S: AsRef<str>>(lines: &[S], s: Span) -> char {
    field(lines, s).chars().next().unwrap_or('<')
}

/// Structural parser and checksum validator for TD1, TD2 and TD3 zones.
pub struct MrzValidator;

impl MrzValidator {
    pub fn detect_format<S: AsRef<str>>(lines: &[S]) -> Option<DocumentFormat> {
        let lens: Vec<usize> = lines.iter().map(|l| l.as_ref().chars().count()).collect();
        match lens.as_slice() {
            [44, 44] => Some(DocumentFormat::TD3),
            [36, 36] => Some(DocumentFormat::TD2),
            [30, 30, 30] => Some(DocumentFormat::TD1),
            _ => None,
        }
    }

    pub fn checksums<S: AsRef<str>>(format: DocumentFormat, lines: &[S]) -> MrzChecksums {
        let [doc, birth, expiry, composite] = MrzLayout::for_format(format).check_pairs(lines);
        MrzChecksums::new(
            MrzChecksum::verify(&doc.0, doc.1),
            MrzChecksum::verify(&birth.0, birth.1),
            MrzChecksum::verify(&expiry.0, expiry.1),
            MrzChecksum::verify(&composite.0, composite.1),
        )
    }

    /// Parses newline-separated MRZ text; blank lines and surrounding spaces are ignored.
    pub fn parse_text(text: &str) -> MrzParseResult {
        let lines: Vec<&str> = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        Self::parse_lines(&lines)
    }

    pub fn parse_candidate(candidate: &MrzCandidate) -> MrzParseResult {
        Self::parse_lines(&candidate.lines())
    }

    pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> MrzParseResult {
        let owned: Vec<String> = lines.iter().map(|l| l.as_ref().to_string()).collect();

        let charset_ok = owned
            .iter()
            .all(|l| !l.is_empty() && l.chars().all(|c| MRZ_ALPHABET.contains(c)));
        if !charset_ok {
            return Self::rejected(owned, MrzFailReason::BadCharset, false);
        }

        let format = match Self::detect_format(&owned) {
            Some(f) => f,
            None => {
                let reason = if owned.len() == 2 || owned.len() == 3 {
                    MrzFailReason::BadLength
                } else {
                    MrzFailReason::UnknownFormat
                };
                return Self::rejected(owned, reason, true);
            }
        };

        let checksums = Self::checksums(format, &owned);
        let fields = Self::decode(format, &owned);
        let structure_ok = Self::structure_ok(format, &owned, &fields);
        let score = MrzScore::new(checksums.passed_count, true, true, structure_ok);
        let valid = checksums.all_passed();

        MrzParseResult {
            format: Some(format),
            lines: owned,
            fields: Some(fields),
            checksums,
            score,
            valid,
            fail_reason: if valid { None } else { Some(MrzFailReason::ChecksumFail) },
        }
    }

    fn rejected(lines: Vec<String>, reason: MrzFailReason, charset_ok: bool) -> MrzParseResult {
        MrzParseResult {
            format: None,
            lines,
            fields: None,
            checksums: MrzChecksums::none(),
            score: MrzScore::new(0, false, charset_ok, false),
            valid: false,
            fail_reason: Some(reason),
        }
    }

    fn structure_ok(format: DocumentFormat, lines: &[String], fields: &MrzFields) -> bool {
        let first = lines[0].chars().next().unwrap_or('<');
        let type_ok = match format {
            DocumentFormat::TD3 => first == 'P',
            DocumentFormat::TD1 | DocumentFormat::TD2 => matches!(first, 'A' | 'C' | 'I'),
        };
        let sex_ok = matches!(fields.sex.as_str(), "M" | "F" | "<" | "X");
        type_ok && sex_ok && MrzDates::birth_date(&fields.birth_date_yymmdd).is_some()
    }

    fn decode(format: DocumentFormat, lines: &[String]) -> MrzFields {
        let layout = MrzLayout::for_format(format);
        let l1 = lines[0].as_str();
        let l2 = lines[1].as_str();

        let (nationality, sex, personal, names) = match format {
            DocumentFormat::TD3 => (&l2[10..13], &l2[20..21], &l2[28..42], &l1[5..44]),
            DocumentFormat::TD2 => (&l2[10..13], &l2[20..21], &l2[28..35], &l1[5..36]),
            DocumentFormat::TD1 => (&l2[15..18], &l2[7..8], &l1[15..30], lines[2].as_str()),
        };
        let (surname, given_names) = Self::split_names(names);
        let personal = personal.trim_matches('<').replace('<', " ");

        MrzFields {
            document_type: l1[0..2].trim_end_matches('<').to_string(),
            issuing_country: l1[2..5].to_string(),
            document_number: field(lines, layout.document_number).replace('<', ""),
            nationality: nationality.to_string(),
            birth_date_yymmdd: field(lines, layout.birth_date).to_string(),
            sex: sex.to_string(),
            expiry_date_yymmdd: field(lines, layout.expiry_date).to_string(),
            personal_number: if personal.is_empty() { None } else { Some(personal) },
            surname,
            given_names,
        }
    }

    /// Splits a name block on the first `<<` into surname and given names.
    pub fn split_names(block: &str) -> (String, String) {
        let (surname, given) = match block.find("<<") {
            Some(idx) => (&block[..idx], &block[idx + 2..]),
            None => (block, ""),
        };
        (Self::clean_name(surname), Self::clean_name(given))
    }

    fn clean_name(raw: &str) -> String {
        raw.replace('<', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// YYMMDD conversion into calendar dates.
pub struct MrzDates;

impl MrzDates {
    /// Birth years above the current two-digit year are taken as 19YY.
    pub fn birth_date(yymmdd: &str) -> Option<NaiveDate> {
        let (yy, mm, dd) = Self::split(yymmdd)?;
        let current = Local::now().year() % 100;
        let century = if yy > current { 1900 } else { 2000 };
        NaiveDate::from_ymd_opt(century + yy, mm, dd)
    }

    pub fn expiry_date(yymmdd: &str) -> Option<NaiveDate> {
        let (yy, mm, dd) = Self::split(yymmdd)?;
        NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
    }

    fn split(yymmdd: &str) -> Option<(i32, u32, u32)> {
        if yymmdd.len() != 6 || !yymmdd.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let yy = yymmdd[0..2].parse().ok()?;
        let mm = yymmdd[2..4].parse().ok()?;
        let dd = yymmdd[4..6].parse().ok()?;
        Some((yy, mm, dd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TD3_L1: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
    const TD3_L2: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    const TD1_L1: &str = "I<UTOD231458907<<<<<<<<<<<<<<<";
    const TD1_L2: &str = "7408122F1204159UTO<<<<<<<<<<<6";
    const TD1_L3: &str = "ERIKSSON<<ANNA<MARIA<<<<<<<<<<";

    const TD2_L1: &str = "I<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<";
    const TD2_L2: &str = "D231458907UTO7408122F1204159<<<<<<<6";

    #[test]
    fn test_parse_td3() {
        let result = MrzValidator::parse_lines(&[TD3_L1, TD3_L2]);
        assert!(result.valid);
        assert_eq!(result.format, Some(DocumentFormat::TD3));
        let fields = result.fields.unwrap();
        assert_eq!(fields.document_type, "P");
        assert_eq!(fields.issuing_country, "UTO");
        assert_eq!(fields.document_number, "L898902C3");
        assert_eq!(fields.nationality, "UTO");
        assert_eq!(fields.birth_date_yymmdd, "740812");
        assert_eq!(fields.sex, "F");
        assert_eq!(fields.expiry_date_yymmdd, "120415");
        assert_eq!(fields.personal_number.as_deref(), Some("ZE184226B"));
        assert_eq!(fields.surname, "ERIKSSON");
        assert_eq!(fields.given_names, "ANNA MARIA");
        assert_eq!(result.checksums.passed_count, 4);
        assert_eq!(result.score.total, 47.0);
    }

    #[test]
    fn test_parse_td1() {
        let result = MrzValidator::parse_lines(&[TD1_L1, TD1_L2, TD1_L3]);
        assert_eq!(result.format, Some(DocumentFormat::TD1));
        assert!(result.valid, "{:?}", result.checksums);
        let fields = result.fields.unwrap();
        assert_eq!(fields.document_number, "D23145890");
        assert_eq!(fields.surname, "ERIKSSON");
        assert_eq!(fields.sex, "F");
    }

    #[test]
    fn test_parse_td2() {
        let result = MrzValidator::parse_lines(&[TD2_L1, TD2_L2]);
        assert_eq!(result.format, Some(DocumentFormat::TD2));
        assert!(result.valid, "{:?}", result.checksums);
        assert_eq!(result.fields.unwrap().given_names, "ANNA MARIA");
    }

    #[test]
    fn test_checksum_failure_is_reported() {
        let broken = TD3_L2.replacen("740812", "740813", 1);
        let result = MrzValidator::parse_lines(&[TD3_L1, broken.as_str()]);
        assert!(!result.valid);
        assert!(!result.checksums.birth_date_ok);
        assert!(!result.checksums.final_composite_ok);
        assert_eq!(result.fail_reason, Some(MrzFailReason::ChecksumFail));
    }

    #[test]
    fn test_bad_input_never_panics() {
        let short = MrzValidator::parse_lines(&["P<UTO", "L898"]);
        assert_eq!(short.format, None);
        assert_eq!(short.fail_reason, Some(MrzFailReason::BadLength));

        let charset = MrzValidator::parse_text("p<uto\nhello world");
        assert_eq!(charset.fail_reason, Some(MrzFailReason::BadCharset));
        assert!(!charset.valid);

        let single = MrzValidator::parse_lines(&[TD3_L1]);
        assert_eq!(single.fail_reason, Some(MrzFailReason::UnknownFormat));
    }

    #[test]
    fn test_split_names() {
        let (s, g) = MrzValidator::split_names("VAN<DER<BERG<<JAN<<<<");
        assert_eq!(s, "VAN DER BERG");
        assert_eq!(g, "JAN");
        let (s, g) = MrzValidator::split_names("MONONYM<<<");
        assert_eq!(s, "MONONYM");
        assert_eq!(g, "");
    }

    #[test]
    fn test_dates() {
        assert_eq!(MrzDates::birth_date("740812"), NaiveDate::from_ymd_opt(1974, 8, 12));
        assert_eq!(MrzDates::expiry_date("120415"), NaiveDate::from_ymd_opt(2012, 4, 15));
        assert_eq!(MrzDates::birth_date("741312"), None);
        assert_eq!(MrzDates::expiry_date("12O415"), None);
    }
}
