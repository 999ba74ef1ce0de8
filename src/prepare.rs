//! Dataset preparation: merge the TMDB and Letterboxd dumps into the
//! catalog CSV consumed by `filmrag build`.
//!
//! # Pipeline
//!
//! 1. Read the TMDB CSV and the Letterboxd JSONL; drop Letterboxd rows
//!    whose title was already seen.
//! 2. Key both sides on `(normalized title, release year)` and
//!    full-outer-join them. Rows are ordered by key, and only the first
//!    row per normalized title survives.
//! 3. Coalesce title, release info, overview, and genres (TMDB first).
//! 4. Filter: unreleased statuses, blank titles, missing or short
//!    overviews, adult titles. Long overviews are truncated.
//! 5. Assemble the `title_plot` and `title_meta` texts, filling gaps
//!    with `"Unknown"`, and write the catalog.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use crate::config::{Config, PreprocessingConfig};

const UNKNOWN: &str = "Unknown";
const UNRELEASED: [&str; 3] = ["Canceled", "Rumored", "Planned"];

/// One row of the TMDB CSV export. Numeric columns are kept verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub vote_average: Option<String>,
    #[serde(default)]
    pub vote_count: Option<String>,
    #[serde(default)]
    pub popularity: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub adult: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Option<String>,
    #[serde(default)]
    pub production_companies: Option<String>,
    #[serde(default)]
    pub production_countries: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
}

/// One line of the Letterboxd JSONL scrape. List-valued fields may be
/// JSON arrays or plain strings depending on the scraper version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LetterboxdRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<serde_json::Value>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub genres: Option<serde_json::Value>,
    #[serde(default)]
    pub directors: Option<serde_json::Value>,
    #[serde(default)]
    pub cast: Option<serde_json::Value>,
}

/// Catalog header, in [`FilmRecord`] field order.
pub const CATALOG_COLUMNS: [&str; 15] = [
    "title",
    "release_info",
    "overview",
    "vote_average",
    "vote_count",
    "popularity",
    "runtime",
    "genres",
    "directors",
    "cast",
    "production_countries",
    "production_companies",
    "keywords",
    "title_plot",
    "title_meta",
];

/// A film as written to the catalog CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilmRecord {
    pub title: String,
    pub release_info: String,
    pub overview: String,
    pub vote_average: String,
    pub vote_count: String,
    pub popularity: String,
    pub runtime: String,
    pub genres: String,
    pub directors: String,
    pub cast: String,
    pub production_countries: String,
    pub production_companies: String,
    pub keywords: String,
    pub title_plot: String,
    pub title_meta: String,
}

/// Counts reported by `filmrag prepare`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrepareSummary {
    pub tmdb_rows: usize,
    pub letterboxd_rows: usize,
    pub merged_rows: usize,
    pub dropped_unreleased: usize,
    pub dropped_untitled: usize,
    pub dropped_no_overview: usize,
    pub dropped_short_overview: usize,
    pub dropped_adult: usize,
    pub kept: usize,
}

/// Lowercase, drop the articles "the", "a" and "an", keep only
/// alphanumerics and spaces, and collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .filter(|w| !matches!(*w, "the" | "a" | "an"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep the first `max_words` words and mark the cut with `"..."`.
pub fn truncate_overview(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}...", words[..max_words].join(" "))
    } else {
        text.to_string()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn value_text(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => non_blank(Some(s)).map(str::to_string),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|v| value_text(Some(v)))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        other => Some(other.to_string()),
    }
}

fn tmdb_year(release_date: Option<&str>) -> Option<i32> {
    use chrono::Datelike;
    let raw = non_blank(release_date)?;
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.year())
        .ok()
        .or_else(|| raw.get(..4).and_then(|y| y.parse().ok()))
}

fn letterboxd_year(year: Option<&serde_json::Value>) -> Option<i32> {
    match year? {
        serde_json::Value::Number(n) => n.as_i64().map(|y| y as i32),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_adult(flag: Option<&str>) -> bool {
    matches!(
        non_blank(flag).map(str::to_ascii_lowercase).as_deref(),
        Some("true" | "1")
    )
}

/// One row of the outer join; either side may be absent.
#[derive(Debug, Clone)]
struct JoinedRow<'a> {
    tmdb: Option<&'a TmdbRecord>,
    letterboxd: Option<&'a LetterboxdRecord>,
    year: Option<i32>,
}

type JoinKey = (String, Option<i32>);

fn outer_join<'a>(
    tmdb: &'a [TmdbRecord],
    letterboxd: &'a [LetterboxdRecord],
) -> Vec<(JoinKey, JoinedRow<'a>)> {
    let mut left: BTreeMap<JoinKey, Vec<&TmdbRecord>> = BTreeMap::new();
    for r in tmdb {
        let key = (
            normalize_title(r.title.as_deref().unwrap_or_default()),
            tmdb_year(r.release_date.as_deref()),
        );
        left.entry(key).or_default().push(r);
    }
    let mut right: BTreeMap<JoinKey, Vec<&LetterboxdRecord>> = BTreeMap::new();
    for r in letterboxd {
        let key = (
            normalize_title(r.title.as_deref().unwrap_or_default()),
            letterboxd_year(r.year.as_ref()),
        );
        right.entry(key).or_default().push(r);
    }

    let keys: std::collections::BTreeSet<JoinKey> =
        left.keys().chain(right.keys()).cloned().collect();

    let mut out = Vec::new();
    for key in keys {
        let year = key.1;
        let ls = left.get(&key).map(Vec::as_slice).unwrap_or_default();
        let rs = right.get(&key).map(Vec::as_slice).unwrap_or_default();
        match (ls.is_empty(), rs.is_empty()) {
            (false, false) => {
                for l in ls {
                    for r in rs {
                        out.push((
                            key.clone(),
                            JoinedRow {
                                tmdb: Some(*l),
                                letterboxd: Some(*r),
                                year,
                            },
                        ));
                    }
                }
            }
            (false, true) => out.extend(ls.iter().map(|l| {
                (
                    key.clone(),
                    JoinedRow {
                        tmdb: Some(*l),
                        letterboxd: None,
                        year,
                    },
                )
            })),
            (true, false) => out.extend(rs.iter().map(|r| {
                (
                    key.clone(),
                    JoinedRow {
                        tmdb: None,
                        letterboxd: Some(*r),
                        year,
                    },
                )
            })),
            (true, true) => {}
        }
    }
    out
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        UNKNOWN
    } else {
        value
    }
}

/// Plot text: `"<title>: <overview>"`.
pub fn plot_text(film: &FilmRecord) -> String {
    format!("{}: {}", film.title, or_unknown(&film.overview))
}

/// Metadata text summarizing everything except the overview.
pub fn meta_text(film: &FilmRecord) -> String {
    format!(
        "{} ({}). Genres: {}. Directed by: {}. Cast: {}. Countries: {}. \
         Companies: {}. Keywords: {}. Rating: {}/10 from {} votes. Runtime: {} minutes.",
        film.title,
        or_unknown(&film.release_info),
        or_unknown(&film.genres),
        or_unknown(&film.directors),
        or_unknown(&film.cast),
        or_unknown(&film.production_countries),
        or_unknown(&film.production_companies),
        or_unknown(&film.keywords),
        or_unknown(&film.vote_average),
        or_unknown(&film.vote_count),
        or_unknown(&film.runtime),
    )
}

/// Merge and filter the two sources into catalog records.
pub fn merge_sources(
    tmdb: &[TmdbRecord],
    letterboxd: &[LetterboxdRecord],
    prefs: &PreprocessingConfig,
) -> (Vec<FilmRecord>, PrepareSummary) {
    let mut summary = PrepareSummary {
        tmdb_rows: tmdb.len(),
        ..Default::default()
    };

    let mut seen_titles = HashSet::new();
    let letterboxd: Vec<LetterboxdRecord> = letterboxd
        .iter()
        .filter(|r| seen_titles.insert(r.title.clone()))
        .cloned()
        .collect();
    summary.letterboxd_rows = letterboxd.len();

    let mut seen_norm = HashSet::new();
    let joined: Vec<JoinedRow> = outer_join(tmdb, &letterboxd)
        .into_iter()
        .filter(|(key, _)| seen_norm.insert(key.0.clone()))
        .map(|(_, row)| row)
        .collect();
    summary.merged_rows = joined.len();

    let mut films = Vec::new();
    for row in joined {
        let t = row.tmdb.cloned().unwrap_or_default();
        let lb = row.letterboxd.cloned().unwrap_or_default();

        if let Some(status) = non_blank(t.status.as_deref()) {
            if UNRELEASED.contains(&status) {
                summary.dropped_unreleased += 1;
                continue;
            }
        }

        let Some(title) = non_blank(t.title.as_deref()).or(non_blank(lb.title.as_deref())) else {
            summary.dropped_untitled += 1;
            continue;
        };

        let Some(overview) = non_blank(t.overview.as_deref()).or(non_blank(lb.synopsis.as_deref()))
        else {
            summary.dropped_no_overview += 1;
            continue;
        };
        if overview.split_whitespace().count() < prefs.min_overview_words {
            summary.dropped_short_overview += 1;
            continue;
        }

        if is_adult(t.adult.as_deref()) {
            summary.dropped_adult += 1;
            continue;
        }

        let release_info = non_blank(t.release_date.as_deref())
            .map(str::to_string)
            .or_else(|| row.year.map(|y| y.to_string()))
            .or_else(|| non_blank(t.status.as_deref()).map(str::to_string))
            .unwrap_or_default();
        let genres = non_blank(t.genres.as_deref())
            .map(str::to_string)
            .or_else(|| value_text(lb.genres.as_ref()))
            .unwrap_or_default();
        let text = |v: &Option<String>| non_blank(v.as_deref()).unwrap_or_default().to_string();

        let mut film = FilmRecord {
            title: title.to_string(),
            release_info,
            overview: truncate_overview(overview, prefs.max_overview_words),
            vote_average: text(&t.vote_average),
            vote_count: text(&t.vote_count),
            popularity: text(&t.popularity),
            runtime: text(&t.runtime),
            genres,
            directors: value_text(lb.directors.as_ref()).unwrap_or_default(),
            cast: value_text(lb.cast.as_ref()).unwrap_or_default(),
            production_countries: text(&t.production_countries),
            production_companies: text(&t.production_companies),
            keywords: text(&t.keywords),
            title_plot: String::new(),
            title_meta: String::new(),
        };
        film.title_plot = plot_text(&film);
        film.title_meta = meta_text(&film);
        films.push(film);
    }

    summary.kept = films.len();
    (films, summary)
}

pub fn read_tmdb(path: &Path) -> Result<Vec<TmdbRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open TMDB dump: {}", path.display()))?;
    let records = reader
        .deserialize()
        .enumerate()
        .map(|(i, r)| r.with_context(|| format!("{} row {}", path.display(), i + 2)))
        .collect::<Result<Vec<TmdbRecord>>>()?;
    Ok(records)
}

pub fn read_letterboxd(path: &Path) -> Result<Vec<LetterboxdRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open Letterboxd dump: {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{} line {}", path.display(), i + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Write the catalog. The header row is written even when `films` is
/// empty.
pub fn write_catalog(path: &Path, films: &[FilmRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create catalog: {}", path.display()))?;
    writer.write_record(CATALOG_COLUMNS)?;
    for film in films {
        writer.serialize(film)?;
    }
    writer.flush()?;
    Ok(())
}

/// Run `filmrag prepare`.
pub fn run_prepare(config: &Config) -> Result<PrepareSummary> {
    let tmdb_path = config
        .paths
        .tmdb_raw
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("paths.tmdb_raw must be set for `filmrag prepare`"))?;
    let lb_path = config
        .paths
        .letterboxd_raw
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("paths.letterboxd_raw must be set for `filmrag prepare`"))?;

    tracing::info!(
        tmdb = %tmdb_path.display(),
        letterboxd = %lb_path.display(),
        "reading datasets"
    );
    let tmdb = read_tmdb(tmdb_path)?;
    let letterboxd = read_letterboxd(lb_path)?;

    tracing::info!("merging datasets");
    let (films, summary) = merge_sources(&tmdb, &letterboxd, &config.preprocessing);

    write_catalog(&config.paths.catalog, &films)?;
    tracing::info!(
        kept = summary.kept,
        path = %config.paths.catalog.display(),
        "catalog written"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> PreprocessingConfig {
        PreprocessingConfig {
            min_overview_words: 3,
            max_overview_words: 6,
        }
    }

    fn tmdb(title: &str, date: &str, overview: &str) -> TmdbRecord {
        TmdbRecord {
            title: Some(title.to_string()),
            release_date: Some(date.to_string()),
            status: Some("Released".to_string()),
            overview: Some(overview.to_string()),
            adult: Some("False".to_string()),
            genres: Some("Crime, Drama".to_string()),
            vote_average: Some("7.9".to_string()),
            ..Default::default()
        }
    }

    fn lb(title: &str, year: i64, synopsis: &str) -> LetterboxdRecord {
        LetterboxdRecord {
            title: Some(title.to_string()),
            year: Some(serde_json::json!(year)),
            synopsis: Some(synopsis.to_string()),
            directors: Some(serde_json::json!(["Michael Mann"])),
            cast: Some(serde_json::json!(["Al Pacino", "Robert De Niro"])),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("The Dark Knight"), "dark knight");
        assert_eq!(normalize_title("  Alien:  Resurrection "), "alien resurrection");
        assert_eq!(normalize_title("A Quiet Place"), "quiet place");
        assert_eq!(normalize_title("An American Werewolf"), "american werewolf");
        assert_eq!(normalize_title("Theater Camp"), "theater camp");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn test_truncate_overview() {
        assert_eq!(truncate_overview("one two three", 5), "one two three");
        assert_eq!(truncate_overview("a b c d e f g", 3), "a b c...");
    }

    #[test]
    fn test_join_enriches_tmdb_with_letterboxd() {
        let t = vec![tmdb("Heat", "1995-12-15", "A crew of thieves plans one last job")];
        let l = vec![lb("Heat", 1995, "ignored synopsis with many words")];
        let (films, summary) = merge_sources(&t, &l, &prefs());
        assert_eq!(summary.merged_rows, 1);
        assert_eq!(films.len(), 1);
        let heat = &films[0];
        assert_eq!(heat.overview, "A crew of thieves plans one...");
        assert_eq!(heat.directors, "Michael Mann");
        assert_eq!(heat.cast, "Al Pacino, Robert De Niro");
        assert!(heat.title_plot.starts_with("Heat: A crew"));
        assert!(heat.title_meta.contains("Directed by: Michael Mann"));
        assert!(heat.title_meta.contains("Keywords: Unknown"));
    }

    #[test]
    fn test_letterboxd_only_film_uses_synopsis_and_year() {
        let l = vec![lb("Stalker", 1979, "A guide leads two men into the Zone")];
        let (films, _) = merge_sources(&[], &l, &prefs());
        assert_eq!(films.len(), 1);
        assert_eq!(films[0].title, "Stalker");
        assert_eq!(films[0].release_info, "1979");
        assert!(films[0].overview.starts_with("A guide leads"));
    }

    #[test]
    fn test_filters() {
        let mut canceled = tmdb("Gone", "2020-01-01", "a b c d e");
        canceled.status = Some("Canceled".to_string());
        let mut adult = tmdb("Blue", "2001-01-01", "a b c d e");
        adult.adult = Some("True".to_string());
        let short = tmdb("Short", "2002-01-01", "too short");
        let mut no_overview = tmdb("Empty", "2003-01-01", "");
        no_overview.overview = None;
        let untitled = tmdb("  ", "2004-01-01", "a b c d e");

        let t = vec![canceled, adult, short, no_overview, untitled];
        let (films, summary) = merge_sources(&t, &[], &prefs());
        assert!(films.is_empty());
        assert_eq!(summary.dropped_unreleased, 1);
        assert_eq!(summary.dropped_adult, 1);
        assert_eq!(summary.dropped_short_overview, 1);
        assert_eq!(summary.dropped_no_overview, 1);
        assert_eq!(summary.dropped_untitled, 1);
    }

    #[test]
    fn test_duplicate_normalized_titles_keep_first_key() {
        let t = vec![
            tmdb("The Thing", "1982-06-25", "Researchers in Antarctica meet a shapeshifter"),
            tmdb("Thing", "2011-10-14", "A prequel set at the Norwegian camp"),
        ];
        let (films, summary) = merge_sources(&t, &[], &prefs());
        assert_eq!(summary.merged_rows, 1);
        assert_eq!(films[0].release_info, "1982-06-25");
    }

    #[test]
    fn test_letterboxd_duplicates_dropped_by_title() {
        let l = vec![
            lb("Solaris", 1972, "A psychologist visits a space station"),
            lb("Solaris", 2002, "A remake set on a space station"),
        ];
        let (films, summary) = merge_sources(&[], &l, &prefs());
        assert_eq!(summary.letterboxd_rows, 1);
        assert_eq!(films.len(), 1);
        assert_eq!(films[0].release_info, "1972");
    }

    #[test]
    fn test_written_catalog_loads_as_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("out/films.csv");
        let t = vec![tmdb("Heat", "1995-12-15", "A crew of thieves plans one last job")];
        let (films, _) = merge_sources(&t, &[], &prefs());
        write_catalog(&path, &films).unwrap();

        let rows = crate::catalog::load_catalog(&path, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plot_text, films[0].title_plot);
        assert_eq!(rows[0].meta_text, films[0].title_meta);
    }

    #[test]
    fn test_empty_catalog_keeps_header() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("films.csv");
        write_catalog(&path, &[]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), CATALOG_COLUMNS.join(","));
        assert!(crate::catalog::load_catalog(&path, None).unwrap().is_empty());
    }

    #[test]
    fn test_header_matches_serialized_fields() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("films.csv");
        let t = vec![tmdb("Heat", "1995-12-15", "A crew of thieves plans one last job")];
        let (films, _) = merge_sources(&t, &[], &prefs());
        write_catalog(&path, &films).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CATALOG_COLUMNS);
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "Heat");
        assert_eq!(&record[14], films[0].title_meta.as_str());
    }
}
