use std::{
    fs,
    path::Path,
    sync::atomic::AtomicBool,
};

use consensus_fuzz::{
    vector::digest, FlagSet, Generator, GeneratorConfig, Mode, TestVector, VectorFormat,
    STANDARD_VERIFY_FLAGS,
};
use tempfile::TempDir;

fn config(dir: &Path, mode: Mode, iterations: u64, seed: u64) -> GeneratorConfig {
    GeneratorConfig {
        mode,
        out_dir: dir.to_path_buf(),
        iterations: Some(iterations),
        seed: Some(seed),
        ..GeneratorConfig::default()
    }
}

fn corpus(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
        .expect("list")
        .map(|entry| {
            let entry = entry.expect("entry");
            let name = entry.file_name().into_string().expect("utf-8 name");
            (name, fs::read(entry.path()).expect("read"))
        })
        .collect();
    files.sort();
    files
}

#[test]
fn bounded_run_names_every_file_by_its_digest() {
    let dir = TempDir::new().expect("tempdir");
    let stats = Generator::new(config(dir.path(), Mode::Less, 40, 9))
        .run(&AtomicBool::new(false))
        .expect("run");
    assert_eq!(stats.iterations, 40);
    assert_eq!(stats.written + stats.duplicates, 40);

    let files = corpus(dir.path());
    assert_eq!(files.len() as u64, stats.written);
    for (name, content) in files {
        assert_eq!(name, digest(&content));
        let vector = TestVector::parse(&content).expect("parse");
        assert_eq!(vector.serialize().as_bytes(), &content[..]);
        assert_eq!(vector.format, VectorFormat::Witness);
    }
}

#[test]
fn rerunning_a_seed_writes_nothing_new() {
    let dir = TempDir::new().expect("tempdir");
    let first = Generator::new(config(dir.path(), Mode::Verify, 25, 3))
        .run(&AtomicBool::new(false))
        .expect("first run");
    let before = corpus(dir.path());

    let second = Generator::new(config(dir.path(), Mode::Verify, 25, 3))
        .run(&AtomicBool::new(false))
        .expect("second run");
    assert_eq!(second.written, 0);
    assert_eq!(second.duplicates, 25);
    assert_eq!(corpus(dir.path()), before);
    assert_eq!(before.len() as u64, first.written);
}

#[test]
fn raised_shutdown_flag_stops_before_the_first_vector() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(dir.path(), Mode::Less, 10, 1);
    config.iterations = None;
    let stats = Generator::new(config)
        .run(&AtomicBool::new(true))
        .expect("run");
    assert_eq!(stats.iterations, 0);
    assert!(corpus(dir.path()).is_empty());
}

#[test]
fn standard_legacy_run_writes_four_line_vectors() {
    let dir = TempDir::new().expect("tempdir");
    let config = GeneratorConfig {
        flags: FlagSet::Standard,
        format: VectorFormat::Legacy,
        ..config(dir.path(), Mode::Less, 10, 5)
    };
    Generator::new(config)
        .run(&AtomicBool::new(false))
        .expect("run");

    for (_, content) in corpus(dir.path()) {
        let vector = TestVector::parse(&content).expect("parse");
        assert_eq!(vector.format, VectorFormat::Legacy);
        assert_eq!(vector.flags, FlagSet::Standard.bits(VectorFormat::Legacy));
        assert_eq!(vector.flags & !STANDARD_VERIFY_FLAGS, 0);
    }
}

#[test]
fn output_directory_is_created() {
    let dir = TempDir::new().expect("tempdir");
    let nested = dir.path().join("a").join("b");
    Generator::new(config(&nested, Mode::Verify, 3, 2))
        .run(&AtomicBool::new(false))
        .expect("run");
    assert!(nested.is_dir());
}
