//! End-to-end repair sessions over temporary project trees, with stub
//! build and agent backends behind the public traits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use repair_agents::{
    run_parallel, AgentError, LlmAgent, RepairPrompt, RepairSession, RepairState,
    SessionComponents, Verdict,
};
use repair_core::structure::{JavaParser, PythonParser};
use repair_core::{AstParser, BuildExecutor, BuildResult, ResolvedConfig, StructuralIndexer};

const SERVICE: &str = r#"package app;

public class Service {
    public void start() {
        log("start");
    }

    public void stop() {
        log("stop");
    }

    @Test
    public void checksStart() {}
}
"#;

/// Fails a fixed number of times, then passes.
struct FlakyBuilder {
    failures: u32,
    calls: Arc<AtomicU32>,
    root: PathBuf,
}

#[async_trait]
impl BuildExecutor for FlakyBuilder {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn command(&self) -> &str {
        "stub build"
    }

    async fn build(&self) -> BuildResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.failures {
            BuildResult::passed("BUILD SUCCESS")
        } else {
            BuildResult::failed(
                format!(
                    "{}/src/app/Service.java:5: error: cannot find symbol\n        log(\"start\");\n        ^",
                    self.root.display()
                ),
                Default::default(),
            )
        }
    }
}

/// Rewrites one file on every call, keeping or breaking its structure.
struct RewritingAgent {
    path: &'static str,
    rewrite: fn(u32) -> String,
    calls: AtomicU32,
}

#[async_trait]
impl LlmAgent for RewritingAgent {
    fn name(&self) -> &'static str {
        "rewriting"
    }

    fn model(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _prompt: &RepairPrompt) -> Result<String, AgentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!(
            "<file path=\"{}\">\n{}</file>",
            self.path,
            (self.rewrite)(n)
        ))
    }
}

fn preserving(n: u32) -> String {
    SERVICE.replace("log(\"start\");\n", &format!("log(\"start\"); // fix {n}\n"))
}

fn deleting_stop(_: u32) -> String {
    r#"package app;

public class Service {
    public void start() {
        log("start");
    }

    @Test
    public void checksStart() {}
}
"#
    .to_string()
}

fn java_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src/app")).unwrap();
    std::fs::write(dir.path().join("src/app/Service.java"), SERVICE).unwrap();
    std::fs::write(dir.path().join("README.md"), "legacy service\n").unwrap();
    dir
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.insert(path.clone(), std::fs::read_to_string(&path).unwrap());
            }
        }
    }
    files
}

fn session(
    root: &Path,
    builder: FlakyBuilder,
    agent: RewritingAgent,
    parser: Box<dyn AstParser>,
    configure: impl FnOnce(&mut ResolvedConfig),
) -> RepairSession {
    let mut config = ResolvedConfig::new(root);
    configure(&mut config);
    RepairSession::new(
        config,
        SessionComponents {
            builder: Box::new(builder),
            indexer: StructuralIndexer::new(parser),
            agent: Box::new(agent),
        },
    )
}

#[tokio::test]
async fn test_success_after_n_failures_with_preserving_agent() {
    let failures = 3;
    let dir = java_project();
    let calls = Arc::new(AtomicU32::new(0));
    let builder = FlakyBuilder {
        failures,
        calls: calls.clone(),
        root: dir.path().to_path_buf(),
    };
    let agent = RewritingAgent {
        path: "src/app/Service.java",
        rewrite: preserving,
        calls: AtomicU32::new(0),
    };

    let outcome = session(dir.path(), builder, agent, Box::new(JavaParser::default()), |c| {
        c.budget.max_build_attempts = failures + 1;
    })
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.state, RepairState::Success);
    assert_eq!(outcome.build_attempts, failures + 1);
    assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
    assert_eq!(outcome.rejection_count, 0);
    assert_eq!(outcome.attempts.len(), failures as usize);
    assert!(outcome.attempts.iter().all(|a| a.verdict == Verdict::Accepted));
    assert!(outcome.last_build.as_ref().unwrap().success);

    let content = std::fs::read_to_string(dir.path().join("src/app/Service.java")).unwrap();
    assert!(content.contains("// fix 3"));
}

#[tokio::test]
async fn test_method_deleting_agent_aborts_with_tree_unchanged() {
    let dir = java_project();
    let before = snapshot(dir.path());
    let builder = FlakyBuilder {
        failures: u32::MAX,
        calls: Arc::new(AtomicU32::new(0)),
        root: dir.path().to_path_buf(),
    };
    let agent = RewritingAgent {
        path: "src/app/Service.java",
        rewrite: deleting_stop,
        calls: AtomicU32::new(0),
    };

    let outcome = session(dir.path(), builder, agent, Box::new(JavaParser::default()), |c| {
        c.budget.max_rejections = 3;
        c.budget.max_build_attempts = 10;
    })
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.state, RepairState::Aborted);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("rejection budget exhausted")
    );
    assert_eq!(outcome.rejection_count, 3);
    assert_eq!(outcome.build_attempts, 1);
    assert!(outcome
        .rejections
        .iter()
        .all(|r| r.reason.contains("removed or renamed: Service::stop")));
    assert!(!outcome.last_build.unwrap().success);
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_build_budget_exhausted_after_accepted_patches() {
    let dir = java_project();
    let builder = FlakyBuilder {
        failures: u32::MAX,
        calls: Arc::new(AtomicU32::new(0)),
        root: dir.path().to_path_buf(),
    };
    let agent = RewritingAgent {
        path: "src/app/Service.java",
        rewrite: preserving,
        calls: AtomicU32::new(0),
    };

    let outcome = session(dir.path(), builder, agent, Box::new(JavaParser::default()), |c| {
        c.budget.max_build_attempts = 2;
    })
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.state, RepairState::Aborted);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("build attempt budget exhausted")
    );
    assert_eq!(outcome.build_attempts, 2);
    assert_eq!(outcome.accepted_patches(), 1);
}

const CALCULATOR: &str = r#"class Calculator:
    def add(self, a, b):
        return a + b

    def test_add(self):
        assert self.add(1, 2) == 3
"#;

fn dropping_test(_: u32) -> String {
    "class Calculator:\n    def add(self, a, b):\n        return a + b\n".to_string()
}

fn python_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("calc.py"), CALCULATOR).unwrap();
    dir
}

#[tokio::test]
async fn test_test_only_removal_follows_policy() {
    for ignore_tests in [true, false] {
        let dir = python_project();
        let builder = FlakyBuilder {
            failures: 1,
            calls: Arc::new(AtomicU32::new(0)),
            root: dir.path().to_path_buf(),
        };
        let agent = RewritingAgent {
            path: "calc.py",
            rewrite: dropping_test,
            calls: AtomicU32::new(0),
        };

        let outcome = session(dir.path(), builder, agent, Box::new(PythonParser::default()), |c| {
            c.verify.ignore_test_only_members = ignore_tests;
            c.budget.max_rejections = 1;
        })
        .run()
        .await
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("calc.py")).unwrap();
        if ignore_tests {
            assert!(outcome.is_success());
            assert!(!content.contains("test_add"));
        } else {
            assert_eq!(outcome.state, RepairState::Aborted);
            assert_eq!(content, CALCULATOR);
        }
    }
}

#[tokio::test]
async fn test_parallel_sessions_are_isolated() {
    let first = java_project();
    let second = java_project();

    let make = |root: &Path, rewrite: fn(u32) -> String| {
        session(
            root,
            FlakyBuilder {
                failures: 1,
                calls: Arc::new(AtomicU32::new(0)),
                root: root.to_path_buf(),
            },
            RewritingAgent {
                path: "src/app/Service.java",
                rewrite,
                calls: AtomicU32::new(0),
            },
            Box::new(JavaParser::default()),
            |c| c.budget.max_rejections = 1,
        )
    };

    let outcomes = run_parallel(vec![
        make(first.path(), preserving),
        make(second.path(), deleting_stop),
    ])
    .await;

    let outcomes: Vec<_> = outcomes.into_iter().map(Result::unwrap).collect();
    assert_eq!(outcomes[0].state, RepairState::Success);
    assert_eq!(outcomes[1].state, RepairState::Aborted);
    assert_ne!(outcomes[0].session_id, outcomes[1].session_id);
    assert_eq!(
        std::fs::read_to_string(second.path().join("src/app/Service.java")).unwrap(),
        SERVICE
    );
}
