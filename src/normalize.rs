//! String normalization shared by the index, the scorer and the matcher.
//!
//! Every comparison in the engine happens between normalized strings, so the
//! catalog side and the playlist side must go through exactly the same
//! pipeline. `NoisePolicy::normalize` is pure and idempotent.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::Result;
use crate::models::NormalizedFields;

// ============================================================================
// NOISE POLICY DEFAULTS
// ============================================================================

/// Qualifier words that mark a trailing "(...)", "[...]" or " - ..." suffix as
/// irrelevant to track identity.
pub const DEFAULT_NOISE_PHRASES: &[&str] = &[
    "remastered",
    "remaster",
    "live",
    "acoustic",
    "unplugged",
    "demo",
    "deluxe",
    "edition",
    "bonus track",
    "bonus",
    "radio edit",
    "edit",
    "single version",
    "album version",
    "version",
    "mono",
    "stereo",
    "explicit",
    "clean",
    "instrumental",
    "extended",
    "remix",
    "mix",
    "feat",
    "ft",
    "featuring",
    "prod",
    "anniversary",
    "expanded",
    "anniversary edition",
    "visualizer",
    "lyric video",
    "official video",
    "audio",
];

/// Unbracketed credit markers: the marker and everything after it is dropped.
pub const DEFAULT_CREDIT_MARKERS: &[&str] = &["feat", "ft", "featuring"];

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Trailing year qualifier: "(1997)", "[2015]"
static YEAR_QUALIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[]\s*\d{4}\s*[\)\]]\s*$").unwrap());

/// Runs of anything that is not a lowercase ASCII letter or digit
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Multi-artist separator pattern for extracting the primary artist.
/// Matches: &, /, ,, •, +, ;, x, vs, and, with, feat, ft
pub static ARTIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:[&/,•+×;]|(?:\s+(?:x|vs\.?|and|with|feat\.?|ft\.?)\s+))\s*").unwrap()
});

static DEFAULT_POLICY: Lazy<NoisePolicy> = Lazy::new(|| {
    NoisePolicy::new(DEFAULT_NOISE_PHRASES, DEFAULT_CREDIT_MARKERS).unwrap()
});

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII: NFKD, drop combining marks, then
/// transliterate whatever is left (Cyrillic, Greek, CJK...).
/// e.g., "Beyoncé" → "beyonce", "Кино" → "kino"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Control characters become spaces, curly quotes fold to straight ones and
/// ampersands are spelled out.
pub fn normalize_punctuation(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('&', " and ")
}

/// Build an alternation from a phrase list. Multi-word phrases match any run
/// of whitespace between words.
fn phrase_alternation<S: AsRef<str>>(phrases: &[S]) -> Option<String> {
    let mut alternatives: Vec<String> = phrases
        .iter()
        .map(|p| {
            p.as_ref()
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .filter(|p| !p.is_empty())
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    // Longest first so "bonus track" wins over "bonus"
    alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    alternatives.dedup();
    Some(alternatives.join("|"))
}

// ============================================================================
// NoisePolicy
// ============================================================================

/// Compiled noise-phrase and credit-marker rules.
#[derive(Debug, Clone)]
pub struct NoisePolicy {
    /// Trailing-qualifier rules, tried in order
    rules: Vec<Regex>,
    fingerprint: String,
}

impl Default for NoisePolicy {
    fn default() -> Self {
        DEFAULT_POLICY.clone()
    }
}

impl NoisePolicy {
    pub fn new<S: AsRef<str>, T: AsRef<str>>(noise_phrases: &[S], credit_markers: &[T]) -> Result<Self> {
        let mut rules = Vec::new();

        if let Some(alt) = phrase_alternation(noise_phrases) {
            // "(Remastered 2015)", "[Live at Wembley]", "(2011 Remaster)";
            // the phrase must open the qualifier, so "(Sean Paul Remix)" stays
            rules.push(Regex::new(&format!(
                r"(?i)\s*[\(\[]\s*(?:\d{{4}}\s+)?(?:{alt})\b[^\(\)\[\]]*[\)\]]\s*$"
            ))?);
            // "- Remastered 2009", "— 2003 Radio Edit"
            rules.push(Regex::new(&format!(
                r"(?i)\s+[-–—]\s+(?:\d{{4}}\s+)?(?:{alt})\b[^-–—]*$"
            ))?);
        }
        if let Some(alt) = phrase_alternation(credit_markers) {
            // "Song feat. Someone"; a bare trailing "Feat" (Little Feat) is a name
            rules.push(Regex::new(&format!(r"(?i)\s+(?:{alt})\b\.?\s+\S.*$"))?);
        }
        rules.push(YEAR_QUALIFIER.clone());

        let fingerprint = format!(
            "noise={}|credit={}",
            noise_phrases.iter().map(|p| p.as_ref().to_lowercase()).collect::<Vec<_>>().join(","),
            credit_markers.iter().map(|p| p.as_ref().to_lowercase()).collect::<Vec<_>>().join(",")
        );

        Ok(Self { rules, fingerprint })
    }

    /// Policy that strips nothing but bracketed years.
    pub fn empty() -> Self {
        Self {
            rules: vec![YEAR_QUALIFIER.clone()],
            fingerprint: "noise=|credit=".to_string(),
        }
    }

    /// Identifies the rule set; persisted caches built under another policy
    /// are discarded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Strip trailing qualifiers one at a time until none applies.
    /// A qualifier that makes up the whole string is kept.
    pub fn strip_qualifiers(&self, s: &str) -> String {
        let mut current = s.trim().to_string();
        'outer: loop {
            for rule in &self.rules {
                if let Some(m) = rule.find(&current) {
                    let rest = current[..m.start()].trim_end();
                    if rest.is_empty() {
                        continue;
                    }
                    current = rest.to_string();
                    continue 'outer;
                }
            }
            return current;
        }
    }

    fn normalize_pass(&self, s: &str) -> String {
        let punctuated = normalize_punctuation(s);
        let stripped = self.strip_qualifiers(&punctuated);
        let folded = fold_to_ascii(&stripped).replace('\'', "");
        NON_ALNUM.replace_all(&folded, " ").trim().to_string()
    }

    /// Canonical comparable form of a free-text field.
    ///
    /// Applied until a fixed point, so `normalize(normalize(s)) == normalize(s)`.
    /// After the first pass the text is `[a-z0-9 ]` only and later passes can
    /// only drop a trailing credit, so the loop ends.
    pub fn normalize(&self, s: &str) -> String {
        let mut current = self.normalize_pass(s);
        loop {
            let next = self.normalize_pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    pub fn build_search_string(
        &self,
        artist: &str,
        album: &str,
        title: &str,
        track_number: Option<&str>,
        isrc: Option<&str>,
    ) -> String {
        build_search_string_with(
            |s| self.normalize(s),
            artist,
            album,
            title,
            track_number,
            isrc,
        )
    }
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Normalize with the default noise policy.
pub fn normalize(s: &str) -> String {
    DEFAULT_POLICY.normalize(s)
}

/// Space-joined normalized fields in fixed order: artist, album, title,
/// track number, ISRC. Empty fields are omitted.
pub fn build_search_string(
    artist: &str,
    album: &str,
    title: &str,
    track_number: Option<&str>,
    isrc: Option<&str>,
) -> String {
    DEFAULT_POLICY.build_search_string(artist, album, title, track_number, isrc)
}

fn build_search_string_with<F: Fn(&str) -> String>(
    normalize: F,
    artist: &str,
    album: &str,
    title: &str,
    track_number: Option<&str>,
    isrc: Option<&str>,
) -> String {
    [Some(artist), Some(album), Some(title), track_number, isrc]
        .into_iter()
        .flatten()
        .map(|field| normalize(field))
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Artist bucket key: drop a leading "the " ("the beatles" → "beatles").
pub fn artist_key(normalized_artist: &str) -> String {
    match normalized_artist.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => normalized_artist.to_string(),
    }
}

/// Raw text of the first credited artist of a multi-artist string.
/// Returns None if no separator found or the result would be too short.
/// e.g., "Mustard, Migos" → Some("Mustard"), "Beatles" → None
pub fn primary_artist(raw_artist: &str) -> Option<&str> {
    let m = ARTIST_SEPARATOR.find(raw_artist)?;
    let primary = raw_artist[..m.start()].trim();
    if primary.chars().count() >= 2 {
        Some(primary)
    } else {
        None
    }
}

/// Canonical ISRC: uppercase, separators removed, exactly 12 alphanumerics.
pub fn canonical_isrc(raw: &str) -> Option<String> {
    let canonical: String = raw
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '\t'))
        .collect::<String>()
        .to_uppercase();
    if canonical.len() == 12 && canonical.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(canonical)
    } else {
        None
    }
}

/// Compute every normalized field of a record through `normalize`, which is
/// either a policy directly or a cache in front of it.
pub fn normalized_fields<F: Fn(&str) -> String>(
    normalize: F,
    artist: &str,
    album: &str,
    title: &str,
    track_number: Option<&str>,
    isrc: Option<&str>,
) -> NormalizedFields {
    let norm_artist = normalize(artist);
    let key = artist_key(&norm_artist);
    let primary_key = primary_artist(artist)
        .map(|p| artist_key(&normalize(p)))
        .filter(|p| !p.is_empty() && *p != key);

    NormalizedFields {
        title: normalize(title),
        search_string: build_search_string_with(&normalize, artist, album, title, track_number, isrc),
        artist: norm_artist,
        artist_key: key,
        primary_artist_key: primary_key,
        isrc: isrc.and_then(canonical_isrc),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("Hey Jude"), "hey jude");
        assert_eq!(normalize("  Hey   Jude  "), "hey jude");
        assert_eq!(normalize("Rock & Roll"), "rock and roll");
        assert_eq!(normalize("Don't Stop Me Now"), "dont stop me now");
        assert_eq!(normalize("Don\u{2019}t Stop Me Now"), "dont stop me now");
        assert_eq!(normalize("Hi-Fi"), "hi fi");
    }

    #[test]
    fn test_normalize_strips_qualifiers() {
        assert_eq!(normalize("Hey Jude (Remastered 2015)"), "hey jude");
        assert_eq!(normalize("Hey Jude - Remastered 2009"), "hey jude");
        assert_eq!(normalize("Song [Live at Wembley]"), "song");
        assert_eq!(normalize("Song (feat. Someone)"), "song");
        assert_eq!(normalize("Song feat. Someone"), "song");
        assert_eq!(normalize("Song (Radio Edit) [Explicit]"), "song");
        assert_eq!(normalize("Song (1997)"), "song");
    }

    #[test]
    fn test_normalize_keeps_identity_brackets() {
        // No noise phrase inside: part of the title
        assert_eq!(normalize("(I Can't Get No) Satisfaction"), "i cant get no satisfaction");
        assert_eq!(normalize("Song (Part 2)"), "song part 2");
        // Whole string is a qualifier
        assert_eq!(normalize("(Live)"), "live");
        assert_eq!(normalize("Little Feat"), "little feat");
    }

    #[test]
    fn test_normalize_keeps_title_words_in_brackets() {
        assert_ne!(normalize("Stay (With Me)"), normalize("Stay"));
        assert_eq!(normalize("Stay (With Me)"), "stay with me");
        assert_eq!(normalize("Song (Take Me Home)"), "song take me home");
        assert_eq!(normalize("Song (Sean Paul Remix)"), "song sean paul remix");
        assert_eq!(normalize("Song - Back From The Dead"), "song back from the dead");
        // A leading year does not hide the qualifier
        assert_eq!(normalize("Hey Jude (2015 Remaster)"), "hey jude");
        assert_eq!(normalize("Hey Jude - 2009 Remastered Version"), "hey jude");
    }

    #[test]
    fn test_normalize_edge_inputs() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!! ... ???"), "");
        assert_eq!(normalize("a\u{0007}b\tc\n"), "a b c");
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
        assert_eq!(normalize("Кино"), "kino");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "",
            "   ",
            "!?!",
            "Sigur Rós - Hoppípolla",
            "Hey Jude (Remastered 2015)",
            "Song feat. Artist feat. Other",
            "Ärzte & Söhne [Deluxe Edition] (1999)",
            "Ｆｕｌｌｗｉｄｔｈ Ｔｅｘｔ",
            "Beyoncé ft. JAY-Z",
            "東京",
            "Track\u{0000}With\u{001F}Controls",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_custom_policy() {
        let policy = NoisePolicy::new(&["bootleg"][..], &[] as &[&str]).unwrap();
        assert_eq!(policy.normalize("Song (Bootleg)"), "song");
        assert_eq!(policy.normalize("Song (Remastered)"), "song remastered");
        assert_eq!(policy.normalize("Song feat. X"), "song feat x");
        assert_ne!(policy.fingerprint(), NoisePolicy::default().fingerprint());
    }

    #[test]
    fn test_build_search_string() {
        assert_eq!(
            build_search_string("The Beatles", "", "Hey Jude", Some("07"), None),
            "the beatles hey jude 07"
        );
        assert_eq!(
            build_search_string("A", "B", "C", None, Some("US-RC1-76-07839")),
            "a b c us rc1 76 07839"
        );
        assert_eq!(build_search_string("", "", "", None, None), "");
    }

    #[test]
    fn test_artist_keys() {
        assert_eq!(artist_key("the beatles"), "beatles");
        assert_eq!(artist_key("the"), "the");
        assert_eq!(artist_key("them crooked vultures"), "them crooked vultures");
        assert_eq!(primary_artist("Mustard, Migos"), Some("Mustard"));
        assert_eq!(primary_artist("Simon & Garfunkel"), Some("Simon"));
        assert_eq!(primary_artist("DJ Snake x Lil Jon"), Some("DJ Snake"));
        assert_eq!(primary_artist("Beatles"), None);
    }

    #[test]
    fn test_canonical_isrc() {
        assert_eq!(canonical_isrc("us-rc1-76-07839"), Some("USRC17607839".to_string()));
        assert_eq!(canonical_isrc("USRC17607839"), Some("USRC17607839".to_string()));
        assert_eq!(canonical_isrc("USRC1760783"), None);
        assert_eq!(canonical_isrc(""), None);
    }

    #[test]
    fn test_normalized_fields() {
        let fields = normalized_fields(
            normalize,
            "The Beatles & Billy Preston",
            "Let It Be",
            "Get Back",
            None,
            Some("GBAYE6900521"),
        );
        assert_eq!(fields.artist, "the beatles and billy preston");
        assert_eq!(fields.artist_key, "beatles and billy preston");
        assert_eq!(fields.primary_artist_key.as_deref(), Some("beatles"));
        assert_eq!(fields.title, "get back");
        assert_eq!(fields.isrc.as_deref(), Some("GBAYE6900521"));
        assert!(fields.search_string.starts_with("the beatles and billy preston let it be get back"));
    }
}
