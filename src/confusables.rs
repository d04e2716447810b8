//! Homograph detection: mixed scripts and confusable look-alike characters.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Cyrillic letters that render like Latin ones.
const DEFAULT_CONFUSABLES: &[(char, char)] = &[
    ('\u{0430}', 'a'), // а
    ('\u{0435}', 'e'), // е
    ('\u{043E}', 'o'), // о
    ('\u{0440}', 'p'), // р
    ('\u{0441}', 'c'), // с
    ('\u{0445}', 'x'), // х
];

const LATIN: &[RangeInclusive<char>] = &[
    'A'..='Z',
    'a'..='z',
    '\u{00AA}'..='\u{00AA}',
    '\u{00BA}'..='\u{00BA}',
    '\u{00C0}'..='\u{00D6}',
    '\u{00D8}'..='\u{00F6}',
    '\u{00F8}'..='\u{02B8}',
    '\u{02E0}'..='\u{02E4}',
    '\u{1D00}'..='\u{1D25}',
    '\u{1D2C}'..='\u{1D5C}',
    '\u{1D62}'..='\u{1D65}',
    '\u{1D6B}'..='\u{1D77}',
    '\u{1D79}'..='\u{1DBE}',
    '\u{1E00}'..='\u{1EFF}',
    '\u{2071}'..='\u{2071}',
    '\u{207F}'..='\u{207F}',
    '\u{2090}'..='\u{209C}',
    '\u{212A}'..='\u{212B}',
    '\u{2132}'..='\u{2132}',
    '\u{214E}'..='\u{214E}',
    '\u{2160}'..='\u{2188}',
    '\u{2C60}'..='\u{2C7F}',
    '\u{A722}'..='\u{A787}',
    '\u{A78B}'..='\u{A7FF}',
    '\u{AB30}'..='\u{AB5A}',
    '\u{AB5C}'..='\u{AB64}',
    '\u{FB00}'..='\u{FB06}',
    '\u{FF21}'..='\u{FF3A}',
    '\u{FF41}'..='\u{FF5A}',
];

const CYRILLIC: &[RangeInclusive<char>] = &[
    '\u{0400}'..='\u{0484}',
    '\u{0487}'..='\u{052F}',
    '\u{1C80}'..='\u{1C88}',
    '\u{1D2B}'..='\u{1D2B}',
    '\u{1D78}'..='\u{1D78}',
    '\u{2DE0}'..='\u{2DFF}',
    '\u{A640}'..='\u{A69F}',
    '\u{FE2E}'..='\u{FE2F}',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptClass {
    Latin,
    Cyrillic,
    OtherLetter,
}

fn script_class(c: char) -> Option<ScriptClass> {
    if LATIN.iter().any(|r| r.contains(&c)) {
        Some(ScriptClass::Latin)
    } else if CYRILLIC.iter().any(|r| r.contains(&c)) {
        Some(ScriptClass::Cyrillic)
    } else if c.is_alphabetic() {
        Some(ScriptClass::OtherLetter)
    } else {
        None
    }
}

/// Check whether a hostname mixes Latin, Cyrillic and other letters.
///
/// Digits and punctuation do not count toward any script.
pub fn has_mixed_scripts(hostname: &str) -> bool {
    let (mut latin, mut cyrillic, mut other) = (false, false, false);
    for c in hostname.chars() {
        match script_class(c) {
            Some(ScriptClass::Latin) => latin = true,
            Some(ScriptClass::Cyrillic) => cyrillic = true,
            Some(ScriptClass::OtherLetter) => other = true,
            None => {}
        }
    }
    [latin, cyrillic, other].iter().filter(|seen| **seen).count() > 1
}

/// Check a hostname against the default confusable table.
pub fn has_confusable_chars(hostname: &str) -> bool {
    ConfusableTable::default().contains_confusable(hostname)
}

/// Characters that impersonate ASCII letters, keyed by the impostor.
///
/// The default table covers the Cyrillic look-alikes of `a e o p c x`.
/// Larger tables can be loaded from the Unicode `confusables.txt` data file
/// with [`ConfusableTable::from_confusables_txt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfusableTable {
    entries: BTreeMap<char, char>,
}

impl Default for ConfusableTable {
    fn default() -> Self {
        Self::new(DEFAULT_CONFUSABLES.iter().copied())
    }
}

impl ConfusableTable {
    pub fn new(entries: impl IntoIterator<Item = (char, char)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Build a table from the Unicode `confusables.txt` format.
    ///
    /// Keeps single code point entries whose prototype is an ASCII letter,
    /// e.g. `0430 ;\t0061 ;\tMA\t# ( а → a )`. Comments, blank lines and
    /// multi-code-point mappings are skipped.
    pub fn from_confusables_txt(data: &str) -> Self {
        let entries = data.lines().filter_map(|line| {
            let line = line.split('#').next()?.trim();
            let mut fields = line.split(';').map(str::trim);
            let source = single_code_point(fields.next()?)?;
            let target = single_code_point(fields.next()?)?;
            (target.is_ascii_alphabetic() && source != target).then_some((source, target))
        });
        Self::new(entries)
    }

    /// Add entries to the table.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = (char, char)>) {
        self.entries.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ASCII letter `c` impersonates, if any.
    pub fn prototype(&self, c: char) -> Option<char> {
        self.entries.get(&c).copied()
    }

    /// Check whether the NFKC form of `hostname` contains any table entry.
    pub fn contains_confusable(&self, hostname: &str) -> bool {
        hostname.nfkc().any(|c| self.entries.contains_key(&c))
    }
}

fn single_code_point(field: &str) -> Option<char> {
    if field.contains(' ') {
        return None;
    }
    u32::from_str_radix(field, 16).ok().and_then(char::from_u32)
}
