//! Config → registry → build → localize → index, against real temp trees.

use std::path::PathBuf;

use repair_core::registry::{resolve_ast_parser, resolve_builder};
use repair_core::{
    equivalent, format_many, implicated_files, BuildContext, Environment, RepairConfig,
    StructuralFingerprint, StructuralIndexer, VerifyPolicy,
};

fn config_for(root: &std::path::Path, builder: &str) -> String {
    format!(
        r#"
version = 1
root_dir = "{}"
ast_parser = "python"
agent = "openai"

{builder}

[budget]
max_build_attempts = 2
"#,
        root.display()
    )
}

#[tokio::test]
async fn test_failing_command_build_localizes_python_traceback() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(
        root.join("app.py"),
        "class App:\n    def run(self):\n        return 1 / 0\n",
    )
    .unwrap();
    let script = format!(
        "echo 'Traceback (most recent call last):'; \
         echo '  File \"{root}/app.py\", line 3, in run'; \
         echo '  File \"/usr/lib/python3/runpy.py\", line 86, in _run_code'; \
         echo 'ZeroDivisionError: division by zero'; exit 1",
        root = root.display()
    );
    let toml = config_for(
        root,
        &format!("[builder.command]\ncommand = {:?}\nrequire_installed = false", script),
    );

    let config = RepairConfig::from_toml_str(&toml)
        .unwrap()
        .resolve(&Environment::from_pairs([("PATH", "/bin:/usr/bin")]));
    assert_eq!(config.budget.max_build_attempts, 2);

    let ctx = BuildContext {
        root_dir: config.root_dir.clone(),
        toolchains: config.toolchains.clone(),
        split: config.split,
    };
    let builder = resolve_builder(&config.builder, &ctx, &Default::default()).unwrap();
    let result = builder.build().await;
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));

    let files = implicated_files(&result.raw_output, &config.root_dir);
    assert_eq!(
        files,
        vec![PathBuf::from(format!("{}/app.py", root.display()))]
    );

    let feedback = format_many(&result.error_entries).unwrap();
    assert!(feedback.starts_with("[Feedback Start]Traceback"));
    assert!(feedback.contains("ZeroDivisionError"));

    let indexer = StructuralIndexer::new(
        resolve_ast_parser(&config.ast_parser, &Default::default()).unwrap(),
    );
    let before = indexer.index_file(&files[0], None);
    assert_eq!(before.nodes().map(<[_]>::len), Some(2));

    let fixed = "class App:\n    def run(self):\n        return 0\n";
    let after = indexer.index_file(&files[0], Some(fixed));
    assert!(equivalent(&before, &after, VerifyPolicy::default()));

    let broken = "class App:\n    def run(self:\n";
    let after = indexer.index_file(&files[0], Some(broken));
    assert_eq!(after, StructuralFingerprint::Unknown);
    assert!(!equivalent(&before, &after, VerifyPolicy::default()));
}

#[tokio::test]
async fn test_passing_command_build() {
    let dir = tempfile::tempdir().unwrap();
    let toml = config_for(dir.path(), "[builder.command]\ncommand = \"true\"");
    let config = RepairConfig::from_toml_str(&toml)
        .unwrap()
        .resolve(&Environment::from_pairs([("PATH", "/bin:/usr/bin")]));
    let ctx = BuildContext {
        root_dir: config.root_dir.clone(),
        toolchains: config.toolchains.clone(),
        split: config.split,
    };

    let result = resolve_builder(&config.builder, &ctx, &Default::default())
        .unwrap()
        .build()
        .await;
    assert!(result.success);
    assert!(result.error_entries.is_empty());
}

#[test]
fn test_unsupported_version_rejected() {
    let toml = config_for(std::path::Path::new("/tmp/app"), "builder = \"cargo\"")
        .replace("version = 1", "version = 7");
    let err = RepairConfig::from_toml_str(&toml).err().unwrap();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("unsupported config version 7"));
}

#[test]
fn test_required_maven_missing_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let toml = config_for(dir.path(), "[builder.maven]\nrequire_installed = true");
    let config = RepairConfig::from_toml_str(&toml)
        .unwrap()
        .resolve(&Environment::from_pairs([(
            "PATH",
            dir.path().join("empty").to_string_lossy().to_string(),
        )]));
    let ctx = BuildContext {
        root_dir: config.root_dir.clone(),
        toolchains: config.toolchains.clone(),
        split: config.split,
    };
    let err = resolve_builder(&config.builder, &ctx, &Default::default())
        .err()
        .unwrap();
    assert!(err.is_configuration());
}
