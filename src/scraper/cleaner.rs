use crate::config::ExtractionConfig;
use crate::models::{BirthplaceComponents, HeroRecord, RawHeroCard};
use tracing::debug;
use url::Url;

// ── Birthplace validation ─────────────────────────────────────────────────────

/// Rejects rank prefixes, document-type suffixes, source-document phrases and
/// formatting artifacts. Anything else is presumed to be a place.
pub fn is_valid_birthplace(text: &str, rules: &ExtractionConfig) -> bool {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return false;
    }

    // "— Москва", "1234, Клин"
    if text.starts_with(|c: char| c.is_ascii_punctuation() || c == '—' || c.is_ascii_digit()) {
        return false;
    }

    let starts = |patterns: &[String]| patterns.iter().any(|p| text.starts_with(&p.to_lowercase()));
    let contains = |patterns: &[String]| patterns.iter().any(|p| text.contains(&p.to_lowercase()));

    !(starts(&rules.rank_prefixes)
        || contains(&rules.document_suffixes)
        || contains(&rules.garbage_phrases))
}

/// Classify comma-separated segments into region / district / settlement.
/// First matching category wins per segment; a later segment overwrites an
/// earlier one of the same category.
pub fn parse_birthplace(text: &str, rules: &ExtractionConfig) -> BirthplaceComponents {
    let mut parts = BirthplaceComponents::default();

    for segment in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let lower = segment.to_lowercase();
        let hit = |keywords: &[String]| keywords.iter().any(|k| lower.contains(&k.to_lowercase()));

        let slot = if hit(&rules.region_keywords) {
            &mut parts.region
        } else if hit(&rules.district_keywords) {
            &mut parts.district
        } else if hit(&rules.settlement_keywords) {
            &mut parts.settlement
        } else {
            continue;
        };
        *slot = Some(segment.to_string());
    }

    parts
}

// ── Field helpers ─────────────────────────────────────────────────────────────

/// First standalone run of exactly four ASCII digits.
/// "__.__.1921" → 1921 | "12345" → None
pub fn find_year(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                return Some(&text[start..i]);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Case-insensitive byte offset of a lower-case `needle`.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        let mut tail = haystack[i..].chars().flat_map(char::to_lowercase);
        needle.chars().all(|n| tail.next() == Some(n))
    })
}

/// Byte range of the date token holding `year`, e.g. "12.03.1918" or
/// "__.__.1918": the year plus the digits, underscores and dots glued to its left.
fn date_token(text: &str, year: &str) -> Option<std::ops::Range<usize>> {
    let at = text.find(year)?;
    let start = text[..at]
        .char_indices()
        .rev()
        .take_while(|&(_, c)| c.is_ascii_digit() || c == '_' || c == '.')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(at);
    Some(start..at + year.len())
}

/// Birthplace derived from a free-form info block: drop everything from the
/// place-of-service marker on, then the birth date and field labels.
pub fn birthplace_from_info(info: &str, year: Option<&str>, rules: &ExtractionConfig) -> String {
    let cut = rules
        .service_markers
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| find_ci(info, &m.to_lowercase()))
        .min()
        .unwrap_or(info.len());
    let mut text = info[..cut].to_string();

    if let Some(year) = year {
        if let Some(range) = date_token(&text, year) {
            text.replace_range(range, " ");
        }
    }
    for label in rules.info_labels.iter().filter(|l| !l.is_empty()) {
        while let Some(at) = find_ci(&text, &label.to_lowercase()) {
            let end = text[at..]
                .char_indices()
                .nth(label.chars().count())
                .map(|(i, _)| at + i)
                .unwrap_or(text.len());
            text.replace_range(at..end, " ");
        }
    }

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    text.trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_digit() || "_.,:;-".contains(c))
        .trim_end_matches(|c: char| c.is_whitespace() || ",:;-_".contains(c))
        .to_string()
}

fn absolutize(href: &str, site: &Url) -> String {
    site.join(href).map(|u| u.to_string()).unwrap_or_default()
}

// ── Raw card → HeroRecord ─────────────────────────────────────────────────────

/// Validate one raw card. `None` means the card is not a matched record.
pub fn card_to_record(
    card: &RawHeroCard,
    rules: &ExtractionConfig,
    site: &Url,
    birthplace_filter: Option<&str>,
) -> Option<HeroRecord> {
    let name = card.name.as_deref().unwrap_or_default();
    let mut tokens = name.split_whitespace();
    let Some(surname) = tokens.next() else {
        debug!("Skipping card without a name");
        return None;
    };
    let given_name = tokens.next().unwrap_or_default();
    let patronymic = tokens.next().unwrap_or_default();

    let birth_year = card
        .year
        .as_deref()
        .and_then(find_year)
        .or_else(|| card.info.as_deref().and_then(find_year));

    let birthplace = match (&card.birthplace, &card.info) {
        (Some(place), _) => place.trim().to_string(),
        (None, Some(info)) => birthplace_from_info(info, birth_year, rules),
        (None, None) => String::new(),
    };

    if birthplace.chars().count() < rules.min_birthplace_len {
        debug!("{}: birthplace {:?} too short", surname, birthplace);
        return None;
    }
    if !is_valid_birthplace(&birthplace, rules) {
        debug!("{}: birthplace {:?} rejected as noise", surname, birthplace);
        return None;
    }
    if let Some(term) = birthplace_filter {
        if !birthplace.to_lowercase().contains(&term.to_lowercase()) {
            debug!("{}: birthplace {:?} does not match {:?}", surname, birthplace, term);
            return None;
        }
    }

    Some(HeroRecord {
        surname: surname.to_string(),
        given_name: given_name.to_string(),
        patronymic: patronymic.to_string(),
        birth_year: birth_year.unwrap_or_default().to_string(),
        birthplace,
        profile_url: card.href.as_deref().map(|h| absolutize(h, site)).unwrap_or_default(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
