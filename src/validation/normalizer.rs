use crate::models::{DocumentFormat, MrzCandidate};
use crate::validation::repair::MrzRepair;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

/// Shortest OCR line considered for the line-based fallback.
const MIN_LINE_LEN: usize = 30;

lazy_static! {
    static ref NON_MRZ: Regex = Regex::new(r"[^A-Z0-9<]").unwrap();
}

/// Maps raw OCR text onto MRZ lines and picks the best repaired candidate.
pub struct MrzTextNormalizer;

impl MrzTextNormalizer {
    /// Uppercases, maps separators to `<` and drops anything outside `[A-Z0-9<]`.
    pub fn normalize_line(raw: &str) -> String {
        let mapped: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '«' | '»' | '‹' | '›' | '"' | '“' | '”' | '‘' | '’' => '<',
                _ => c.to_ascii_uppercase(),
            })
            .collect();
        let cleaned = NON_MRZ.replace_all(&mapped, "");
        Self::fix_k_fillers(&cleaned)
    }

    pub fn normalize_lines(raw: &str) -> Vec<String> {
        raw.lines()
            .map(Self::normalize_line)
            .filter(|l| !l.is_empty())
            .collect()
    }

    /// Whole text as one stream with line breaks removed.
    pub fn normalize(raw: &str) -> String {
        Self::normalize_lines(raw).concat()
    }

    /// A `K` sitting between fillers is almost always a misread `<`.
    pub fn fix_k_fillers(line: &str) -> String {
        let chars: Vec<char> = line.chars().collect();
        let filler_or_edge = |idx: Option<usize>| match idx {
            Some(i) => chars.get(i).map_or(true, |c| *c == '<'),
            None => true,
        };
        let filler_at = |idx: Option<usize>| idx.and_then(|i| chars.get(i)) == Some(&'<');

        chars
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                if c != 'K' {
                    return c;
                }
                let left = i.checked_sub(1);
                let right = Some(i + 1);
                let flanked = filler_or_edge(left)
                    && filler_or_edge(right)
                    && (filler_at(left) || filler_at(right));
                if !flanked {
                    return c;
                }
                let lo = i.saturating_sub(4);
                let hi = (i + 4).min(chars.len() - 1);
                let nearby = (lo..=hi)
                    .filter(|&j| j != i && chars[j] == '<')
                    .count();
                if nearby >= 2 {
                    '<'
                } else {
                    c
                }
            })
            .collect()
    }

    pub fn pad_or_trim(line: &str, len: usize) -> String {
        let mut out: String = line.chars().take(len).collect();
        while out.len() < len {
            out.push('<');
        }
        out
    }

    /// Best repaired candidate over all formats, or `None` when nothing scores 3+.
    ///
    /// Ties on confidence go to TD3, then TD1, then TD2.
    pub fn find_candidate(raw: &str) -> Option<MrzCandidate> {
        let lines = Self::normalize_lines(raw);
        let stream = lines.concat();

        let mut best: Option<MrzCandidate> = None;
        for format in [DocumentFormat::TD3, DocumentFormat::TD1, DocumentFormat::TD2] {
            let Some(candidate) = Self::best_for_format(format, &stream, &lines) else {
                continue;
            };
            let better = match &best {
                Some(current) => candidate.confidence > current.confidence,
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }
        if let Some(c) = &best {
            debug!("normalizer picked {:?} with confidence {}", c.format, c.confidence);
        }
        best
    }

    fn best_for_format(
        format: DocumentFormat,
        stream: &str,
        lines: &[String],
    ) -> Option<MrzCandidate> {
        let mut best: Option<(u8, bool, Vec<String>)> = None;
        for option in Self::options(format, stream, lines) {
            let score = MrzRepair::score(format, &option);
            let structured = Self::leading_type_ok(format, &option[0]);
            let better = match &best {
                Some((s, st, _)) => (score, structured) > (*s, *st),
                None => true,
            };
            if better {
                best = Some((score, structured, option));
            }
        }
        let (_, _, lines) = best?;
        MrzRepair::repair(format, &lines)
    }

    /// Sliding windows over the stream plus padded/trimmed runs of real lines.
    fn options(format: DocumentFormat, stream: &str, lines: &[String]) -> Vec<Vec<String>> {
        let width = format.mrz_chars_per_line();
        let count = format.mrz_lines();
        let total = format.mrz_len();
        let mut out = Vec::new();

        // normalised text is ASCII
        if stream.len() >= total {
            for start in 0..=(stream.len() - total) {
                let window = &stream[start..start + total];
                out.push(
                    (0..count)
                        .map(|i| window[i * width..(i + 1) * width].to_string())
                        .collect(),
                );
            }
        }

        let long: Vec<String> = lines
            .iter()
            .filter(|l| l.len() >= MIN_LINE_LEN)
            .map(|l| Self::pad_or_trim(l, width))
            .collect();
        if long.len() >= count {
            for group in long.windows(count) {
                out.push(group.to_vec());
            }
        }
        out
    }

    fn leading_type_ok(format: DocumentFormat, line1: &str) -> bool {
        let first = line1.chars().next().unwrap_or('<');
        match format {
            DocumentFormat::TD3 => first == 'P',
            DocumentFormat::TD1 | DocumentFormat::TD2 => matches!(first, 'A' | 'C' | 'I'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::MrzValidator;

    const ERIKSSON: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\nL898902C36UTO7408122F1204159ZE184226B<<<<<10";

    #[test]
    fn test_eriksson_end_to_end() {
        let candidate = MrzTextNormalizer::find_candidate(ERIKSSON).unwrap();
        assert_eq!(candidate.format, DocumentFormat::TD3);
        assert_eq!(candidate.confidence, 4);
        let parsed = MrzValidator::parse_candidate(&candidate);
        assert!(parsed.valid);
        let fields = parsed.fields.unwrap();
        assert_eq!(fields.document_number, "L898902C3");
        assert_eq!(fields.birth_date_yymmdd, "740812");
        assert_eq!(fields.expiry_date_yymmdd, "120415");
    }

    #[test]
    fn test_normalize_line_maps_separators() {
        assert_eq!(MrzTextNormalizer::normalize_line(" p«uto eriksson.\t"), "P<UTO<ERIKSSON");
        assert_eq!(MrzTextNormalizer::normalize_line("A“B”C"), "A<B<C");
    }

    #[test]
    fn test_k_filler_fix() {
        assert_eq!(MrzTextNormalizer::fix_k_fillers("ANNA<<<K<<<<"), "ANNA<<<<<<<<");
        assert_eq!(MrzTextNormalizer::fix_k_fillers("K<<<"), "<<<<");
        // part of a name, not a filler
        assert_eq!(MrzTextNormalizer::fix_k_fillers("ERIK<<ANNA"), "ERIK<<ANNA");
        assert_eq!(MrzTextNormalizer::fix_k_fillers("K<AB"), "K<AB");
    }

    #[test]
    fn test_noise_lines_and_spaces() {
        let raw = "UTOPIA PASSPORT\nP<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<K<<<<<<<<<\n  L898902C36UTO74O8122F1204159ZE184226B<<<<<10  \n";
        let candidate = MrzTextNormalizer::find_candidate(raw).unwrap();
        assert_eq!(candidate.line1, "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<");
        assert_eq!(candidate.line2, "L898902C36UTO7408122F1204159ZE184226B<<<<<10");
    }

    #[test]
    fn test_short_first_line_uses_line_fallback() {
        // three fillers dropped by OCR on line one
        let raw = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<\nL898902C36UTO7408122F1204159ZE184226B<<<<<10";
        let candidate = MrzTextNormalizer::find_candidate(raw).unwrap();
        assert_eq!(candidate.line1.len(), 44);
        assert_eq!(candidate.confidence, 4);
    }

    #[test]
    fn test_td1_detected() {
        let raw = "I<UTOD231458907<<<<<<<<<<<<<<<\n7408122F1204159UTO<<<<<<<<<<<6\nERIKSSON<<ANNA<MARIA<<<<<<<<<<";
        let candidate = MrzTextNormalizer::find_candidate(raw).unwrap();
        assert_eq!(candidate.format, DocumentFormat::TD1);
        assert_eq!(candidate.line3.as_deref(), Some("ERIKSSON<<ANNA<MARIA<<<<<<<<<<"));
    }

    #[test]
    fn test_garbage_yields_none() {
        assert!(MrzTextNormalizer::find_candidate("").is_none());
        assert!(MrzTextNormalizer::find_candidate("hello world\nnothing to see").is_none());
    }
}
