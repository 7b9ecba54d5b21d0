use std::fs;

use predicates::prelude::*;

#[test]
fn dashboard_renders_interactive_pages_from_cache() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let data_dir = temp.path().join("data");
    let out_dir = temp.path().join("dashboard");
    fs::create_dir_all(&data_dir)?;
    fs::write(
        data_dir.join("release_cache.json"),
        r#"{
          "2024-02-01": [
            {
              "artist": "An Artist",
              "title": "One",
              "page_name": "Label A",
              "date": "2024-02-01",
              "url": "https://a.bandcamp.com/album/one"
            }
          ]
        }"#,
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bcfeed");
    cmd.args([
        "dashboard",
        "--after",
        "2024/02/01",
        "--before",
        "2024/02/01",
        "--data-dir",
        data_dir.to_str().unwrap(),
        "--out",
        out_dir.to_str().unwrap(),
        "--relay-url",
        "http://127.0.0.1:9999",
    ])
    .assert()
    .success();

    let page = fs::read_to_string(out_dir.join("page_1.html"))?;
    assert!(page.contains(r#"const RELAY_BASE = "http://127.0.0.1:9999";"#));
    assert!(page.contains("a.bandcamp.com/album/one"));
    assert!(page.contains("/embed-meta?url="));
    assert!(page.contains("/viewed-state"));
    Ok(())
}

#[test]
fn dashboard_rejects_inverted_ranges() {
    let temp = tempfile::TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bcfeed");
    cmd.args([
        "dashboard",
        "--after",
        "2024/02/05",
        "--before",
        "2024/02/01",
        "--data-dir",
        temp.path().to_str().unwrap(),
        "--out",
        temp.path().join("dashboard").to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--after must be on or before"));
}
