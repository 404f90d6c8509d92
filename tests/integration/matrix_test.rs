//! Dataset/database matrix discovery.

use pretty_assertions::assert_eq;
use serde_json::json;

use sqleval::eval::{CaseStore, MatrixEntry};

use super::common::Datasets;

fn entry(dataset: &str, database: &str) -> MatrixEntry {
    MatrixEntry {
        dataset: dataset.to_string(),
        database: database.to_string(),
    }
}

fn fixture() -> Datasets {
    let datasets = Datasets::new();
    datasets.add_dump("spider", "concert_singer.sql");
    datasets.add_dump("spider", "pets_1.sql");
    datasets.add_dump("bird", "retail.part000.sql");
    datasets.add_dump("bird", "retail.part001.sql");
    datasets.add_dump("bird", "notes.txt");

    let listed = datasets.root().join("synth");
    std::fs::create_dir_all(&listed).unwrap();
    std::fs::write(listed.join("databases.json"), r#"["ecommerce", "logistics"]"#).unwrap();
    datasets
}

#[test]
fn test_matrix_lists_every_pair() {
    let datasets = fixture();
    let entries = CaseStore::new(datasets.root()).matrix(None).unwrap();

    assert_eq!(
        entries,
        vec![
            entry("bird", "retail"),
            entry("spider", "concert_singer"),
            entry("spider", "pets_1"),
            entry("synth", "ecommerce"),
            entry("synth", "logistics"),
        ]
    );
}

#[test]
fn test_matrix_filter_prefixes() {
    let datasets = fixture();
    let entries = CaseStore::new(datasets.root())
        .matrix(Some("spider_pets, synth_log"))
        .unwrap();

    assert_eq!(
        json!({ "include": entries }),
        json!({"include": [
            {"dataset": "spider", "database": "pets_1"},
            {"dataset": "synth", "database": "logistics"},
        ]})
    );
}
