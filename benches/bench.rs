use criterion::{criterion_group, criterion_main, Criterion};
use fmtmux::config::{self, FmtConfig};
use fmtmux::formatter::{self, Formatter};
use fmtmux::walk::File;
use std::path::PathBuf;

pub fn bench_parse_config(c: &mut Criterion) {
    c.bench_function("parse config", |b| {
        b.iter(|| {
            let toml = r#"
            [global]
            excludes = ["*.lock"]

            [formatter.rust]
            command = "rustfmt"
            includes = ["*.rs"]
            priority = 1

            [formatter.nix]
            command = "nixpkgs-fmt"
            includes = ["*.nix"]
            "#;
            let root = config::from_string(toml);
            assert!(root.is_ok());
        })
    });
}

pub fn bench_batch_key_assignment(c: &mut Criterion) {
    let cfg = FmtConfig {
        command: "true".into(),
        options: vec![],
        includes: vec!["*.rs".into()],
        excludes: vec![],
        priority: 0,
    };
    let rust = Formatter::from_config("rust", &cfg, &[]).unwrap();
    let nix_cfg = FmtConfig {
        command: "true".into(),
        options: vec![],
        includes: vec!["*.nix".into()],
        excludes: vec![],
        priority: 1,
    };
    let nix = Formatter::from_config("nix", &nix_cfg, &[]).unwrap();
    let formatters = vec![&rust, &nix];

    let files: Vec<File> = (0..10_000)
        .map(|i| File {
            abs_path: PathBuf::from(format!("src/file_{}.rs", i)),
            rel_path: PathBuf::from(format!("src/file_{}.rs", i)),
            size: 128,
            mtime: 0,
        })
        .collect();

    c.bench_function("batch key assignment over 10k files", |b| {
        b.iter(|| {
            for file in &files {
                formatter::select(&formatters, file);
            }
        })
    });
}

criterion_group!(benches, bench_parse_config, bench_batch_key_assignment);
criterion_main!(benches);
