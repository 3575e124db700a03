//! Field normalization for government CSV values.
//!
//! Facility files are only trimmed while department files also collapse
//! interior whitespace runs. Both variants are kept and selected per entity.

const BOM: char = '\u{feff}';

/// Distance between a fullwidth ASCII form (U+FF01..U+FF5E) and its ASCII twin.
const FULLWIDTH_OFFSET: u32 = 0xFEE0;

/// Purely numeric department codes are left-padded with zeros to this width.
pub const DEPARTMENT_CODE_WIDTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringNormalization {
    /// BOM, one layer of surrounding quotes, outer whitespace.
    Trim,
    /// Same as `Trim`, plus every whitespace run becomes a single space.
    CollapseWhitespace,
}

impl StringNormalization {
    /// Returns `None` when nothing meaningful is left.
    pub fn apply(self, raw: &str) -> Option<String> {
        let s = raw.trim();
        let s = s.strip_prefix(BOM).unwrap_or(s).trim();
        let s = s.strip_prefix('"').unwrap_or(s);
        let s = s.strip_suffix('"').unwrap_or(s);

        let out = match self {
            StringNormalization::Trim => s.trim().to_string(),
            StringNormalization::CollapseWhitespace => {
                s.split_whitespace().collect::<Vec<_>>().join(" ")
            }
        };

        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    pub fn apply_opt(self, raw: Option<&str>) -> Option<String> {
        raw.and_then(|s| self.apply(s))
    }

    /// Header names never become absent: an empty header stays addressable as "".
    pub fn header(self, raw: &str) -> String {
        self.apply(raw).unwrap_or_default()
    }
}

fn to_halfwidth(c: char) -> char {
    char::from_u32(c as u32 - FULLWIDTH_OFFSET).unwrap_or(c)
}

pub fn fold_fullwidth_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' => to_halfwidth(c),
            _ => c,
        })
        .collect()
}

pub fn fold_fullwidth_alphanumeric(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' | 'Ａ'..='Ｚ' | 'ａ'..='ｚ' => to_halfwidth(c),
            _ => c,
        })
        .collect()
}

/// Canonical department code: normalized, fullwidth digits folded, and
/// zero-padded to [`DEPARTMENT_CODE_WIDTH`] when purely numeric.
///
/// `"1"` becomes `"00001"`, `"１００１"` becomes `"01001"`, `"A1"` stays `"A1"`.
pub fn department_code(raw: Option<&str>) -> Option<String> {
    let folded = fold_fullwidth_digits(&StringNormalization::CollapseWhitespace.apply_opt(raw)?);

    if folded.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{:0>width$}", folded, width = DEPARTMENT_CODE_WIDTH))
    } else {
        Some(folded)
    }
}

/// How a department name is turned into a code when the code column is blank.
///
/// The hospital and clinic department files have always used different
/// folding here, and the stored codes depend on it, so both stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFallback {
    /// Fold fullwidth digits and Latin letters (hospital departments).
    FoldAlphanumeric,
    /// Fold fullwidth digits only (clinic departments).
    FoldDigits,
}

impl NameFallback {
    pub fn code_from_name(self, name: &str) -> Option<String> {
        let normalized = StringNormalization::CollapseWhitespace.apply(name)?;
        Some(match self {
            NameFallback::FoldAlphanumeric => fold_fullwidth_alphanumeric(&normalized),
            NameFallback::FoldDigits => fold_fullwidth_digits(&normalized),
        })
    }
}
