use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn filmrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("filmrag");
    path
}

const CATALOG: &str = "\
title,title_plot,title_meta
Heat,\"Heat: a crew of professional thieves plans one last bank heist in Los Angeles\",\"Heat (1995-12-15). Genres: Crime, Thriller. Directed by: Michael Mann.\"
Alien,\"Alien: the crew of a space freighter is hunted by a deadly creature\",\"Alien (1979-05-25). Genres: Horror, Science Fiction. Directed by: Ridley Scott.\"
Amelie,\"Amelie: a shy waitress in Paris quietly changes the lives of those around her\",\"Amelie (2001-04-25). Genres: Comedy, Romance. Directed by: Jean-Pierre Jeunet.\"
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let config_content = format!(
        r#"[paths]
catalog = "{root}/data/films.csv"
tmdb_raw = "{root}/data/raw/tmdb.csv"
letterboxd_raw = "{root}/data/raw/letterboxd.jsonl"
index = "{root}/data/index/films.ivf"
metadata = "{root}/data/index/films.meta.json"

[embedding]
provider = "hash"
dims = 128

[index]
probe_width = 10

[retrieval]
top_k = 5

[generation]
provider = "disabled"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("filmrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn write_catalog(tmp: &TempDir, content: &str) {
    fs::write(tmp.path().join("data/films.csv"), content).unwrap();
}

fn run_filmrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = filmrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run filmrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn search_json(config_path: &Path, query: &str, top_k: usize) -> Vec<serde_json::Value> {
    let k = top_k.to_string();
    let (stdout, stderr, success) =
        run_filmrag(config_path, &["search", query, "--top-k", &k, "--json"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    parsed.as_array().unwrap().clone()
}

#[test]
fn test_search_before_build_reports_absent_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_filmrag(&config_path, &["search", "heist"]);
    assert!(!success, "search without index should fail: {}", stdout);
    assert!(stderr.contains("no index found"), "stderr={}", stderr);
    assert!(!stdout.contains("No results"));
}

#[test]
fn test_status_before_and_after_build() {
    let (tmp, config_path) = setup_test_env();
    write_catalog(&tmp, CATALOG);

    let (stdout, _, success) = run_filmrag(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("No index built."));

    let (_, stderr, success) = run_filmrag(&config_path, &["build"]);
    assert!(success, "build failed: {}", stderr);

    let (stdout, _, success) = run_filmrag(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Index ready."));
    assert!(stdout.contains("chunks:     6"));
}

#[test]
fn test_build_summary_counts() {
    let (tmp, config_path) = setup_test_env();
    write_catalog(&tmp, CATALOG);

    let (stdout, stderr, success) = run_filmrag(&config_path, &["build", "--json"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["total_chunks"], 6);
    assert_eq!(summary["plot_chunks"], 3);
    assert_eq!(summary["meta_chunks"], 3);
    assert_eq!(summary["nlist"], 2);
    assert_eq!(summary["model"], "fnv1a-128");
}

#[test]
fn test_three_rows_search_returns_all_six_chunks() {
    let (tmp, config_path) = setup_test_env();
    write_catalog(&tmp, CATALOG);
    let (_, stderr, success) = run_filmrag(&config_path, &["build"]);
    assert!(success, "build failed: {}", stderr);

    let results = search_json(&config_path, "a film about a heist", 6);
    assert_eq!(results.len(), 6);
    let mut rows: Vec<u64> = results
        .iter()
        .map(|r| r["row_index"].as_u64().unwrap())
        .collect();
    rows.sort();
    assert_eq!(rows, vec![0, 0, 1, 1, 2, 2]);

    let distances: Vec<f64> = results
        .iter()
        .map(|r| r["similarity"].as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_exact_chunk_text_round_trip() {
    let (tmp, config_path) = setup_test_env();
    write_catalog(&tmp, CATALOG);
    run_filmrag(&config_path, &["build"]);

    let query = "Alien: the crew of a space freighter is hunted by a deadly creature";
    let results = search_json(&config_path, query, 3);
    assert_eq!(results[0]["chunk_text"], query);
    assert_eq!(results[0]["chunk_type"], "plot");
    assert!(results[0]["similarity"].as_f64().unwrap() < 1e-4);
}

#[test]
fn test_fewer_chunks_than_top_k() {
    let (tmp, config_path) = setup_test_env();
    let one_row: String = CATALOG.lines().take(2).collect::<Vec<_>>().join("\n");
    write_catalog(&tmp, &one_row);
    run_filmrag(&config_path, &["build"]);

    let results = search_json(&config_path, "thieves", 5);
    assert_eq!(results.len(), 2);
}

#[test]
fn test_build_without_catalog_writes_nothing() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_filmrag(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("catalog not found"), "stderr={}", stderr);
    assert!(!tmp.path().join("data/index/films.ivf").exists());
    assert!(!tmp.path().join("data/index/films.meta.json").exists());
}

#[test]
fn test_portable_and_accelerated_builds_answer_identically() {
    let (tmp, config_path) = setup_test_env();
    let mut catalog = String::from("title,title_plot,title_meta\n");
    for i in 0..40 {
        catalog.push_str(&format!(
            "Film {i},\"Film {i}: story {i} about topic {t}\",\"Film {i} ({y}). Genres: G{g}.\"\n",
            i = i,
            t = i % 7,
            y = 1960 + i,
            g = i % 5
        ));
    }
    write_catalog(&tmp, &catalog);

    run_filmrag(&config_path, &["build"]);
    let accelerated = search_json(&config_path, "story about topic 3", 10);

    let (stdout, _, success) = run_filmrag(&config_path, &["build", "--no-accel", "--json"]);
    assert!(success);
    assert!(stdout.contains("\"execution\": \"portable\""));
    let portable = search_json(&config_path, "story about topic 3", 10);

    assert_eq!(accelerated, portable);
}

#[test]
fn test_ask_with_generation_disabled_returns_context() {
    let (tmp, config_path) = setup_test_env();
    write_catalog(&tmp, CATALOG);
    run_filmrag(&config_path, &["build"]);

    let (stdout, stderr, success) =
        run_filmrag(&config_path, &["ask", "space creature", "--top-k", "2"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Alien"));
}

#[test]
fn test_chat_loop_until_quit() {
    let (tmp, config_path) = setup_test_env();
    write_catalog(&tmp, CATALOG);
    run_filmrag(&config_path, &["build"]);

    let mut child = Command::new(filmrag_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("chat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"paris waitress\nn\nbank heist\ny\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("Search query: ").count(), 2);
    assert_eq!(stdout.matches("Response: ").count(), 2);
}

#[test]
fn test_prepare_then_build_and_search() {
    let (tmp, config_path) = setup_test_env();
    let raw = tmp.path().join("data/raw");
    fs::create_dir_all(&raw).unwrap();
    fs::write(
        raw.join("tmdb.csv"),
        "title,vote_average,vote_count,popularity,release_date,status,runtime,adult,overview,genres,production_companies,production_countries,keywords\n\
         Heat,7.9,7000,40.1,1995-12-15,Released,170,False,A crew of professional thieves plans one last heist,\"Crime, Thriller\",Warner Bros,United States,heist\n\
         Untitled Sequel,0,0,1.0,,Rumored,0,False,Nothing is known about this project yet at all,Drama,,,\n\
         Blue Room,5.0,10,2.0,2001-01-01,Released,90,True,An adult film that must never reach the catalog,Drama,,,\n",
    )
    .unwrap();
    fs::write(
        raw.join("letterboxd.jsonl"),
        "{\"title\": \"Heat\", \"year\": 1995, \"synopsis\": \"LA crime saga\", \"directors\": [\"Michael Mann\"], \"cast\": [\"Al Pacino\"], \"url\": \"x\", \"rating\": 4.1}\n\
         {\"title\": \"Stalker\", \"year\": 1979, \"synopsis\": \"A guide leads two men through the forbidden Zone\", \"genres\": [\"Science Fiction\", \"Drama\"], \"directors\": [\"Andrei Tarkovsky\"]}\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_filmrag(&config_path, &["prepare"]);
    assert!(success, "prepare failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Prepared 2 films"), "stdout={}", stdout);

    let catalog = fs::read_to_string(tmp.path().join("data/films.csv")).unwrap();
    assert!(catalog.contains("Directed by: Michael Mann"));
    assert!(!catalog.contains("Blue Room"));

    let (_, stderr, success) = run_filmrag(&config_path, &["build"]);
    assert!(success, "build failed: {}", stderr);
    let results = search_json(&config_path, "forbidden Zone", 1);
    assert_eq!(results[0]["title"], "Stalker");
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("probe_width = 10", "probe_width = 0")).unwrap();

    let (_, stderr, success) = run_filmrag(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("probe_width"));
}

#[test]
fn test_prepare_dropping_every_film_then_build_reports_no_chunks() {
    let (tmp, config_path) = setup_test_env();
    let raw = tmp.path().join("data/raw");
    fs::create_dir_all(&raw).unwrap();
    fs::write(
        raw.join("tmdb.csv"),
        "title,release_date,status,adult,overview\n\
         Untitled Sequel,,Rumored,False,Nothing is known about this project yet at all\n",
    )
    .unwrap();
    fs::write(raw.join("letterboxd.jsonl"), "").unwrap();

    let (stdout, stderr, success) = run_filmrag(&config_path, &["prepare"]);
    assert!(success, "prepare failed: stderr={}", stderr);
    assert!(stdout.contains("Prepared 0 films"), "stdout={}", stdout);

    let (_, stderr, success) = run_filmrag(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("no chunks to index"), "stderr={}", stderr);
    assert!(!stderr.contains("column"));
}
