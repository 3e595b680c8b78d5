//! Repair session: build → diagnose → patch → verify until the project
//! builds or a budget runs out.
//!
//! The session owns one working tree. Every step mutates or observes that
//! tree, so the loop is strictly sequential; independent sessions on
//! different roots can run on separate tasks. Cancellation is honoured only
//! between states, which keeps the tree either fully patched or fully
//! reverted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use repair_core::config::{AgentOverrides, BuilderOverrides, ParserOverrides};
use repair_core::feedback::format_many_with;
use repair_core::registry::{resolve_ast_parser, resolve_builder};
use repair_core::structure::describe_difference;
use repair_core::{
    equivalent, implicated_files, BudgetConfig, BuildContext, BuildExecutor, BuildResult,
    FileWalker, RepairResult, ResolvedConfig, StructuralFingerprint, StructuralIndexer,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::LlmAgent;
use crate::prompts::{build_repair_prompt, FileExcerpt};
use crate::registry::{resolve_agent, AgentContext};
use crate::state_machine::{RepairState, StateMachine, TransitionRecord};
use crate::workspace::{AppliedPatch, Workspace};

/// At most this many implicated files are sent with one prompt.
const MAX_PROMPT_FILES: usize = 8;
/// Output lines shown when the build produced no error entries.
const RAW_TAIL_LINES: usize = 80;

/// Explicit parameters that win over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    pub builder: BuilderOverrides,
    pub parser: ParserOverrides,
    pub agent: AgentOverrides,
}

/// The three pluggable backends of a session.
pub struct SessionComponents {
    pub builder: Box<dyn BuildExecutor>,
    pub indexer: StructuralIndexer,
    pub agent: Box<dyn LlmAgent>,
}

impl SessionComponents {
    /// Resolve every backend through the registry.
    pub fn resolve(config: &ResolvedConfig, overrides: &SessionOverrides) -> RepairResult<Self> {
        let ctx = BuildContext {
            root_dir: config.root_dir.clone(),
            toolchains: config.toolchains.clone(),
            split: config.split,
        };
        let builder = resolve_builder(&config.builder, &ctx, &overrides.builder)?;
        let parser = resolve_ast_parser(&config.ast_parser, &overrides.parser)?;
        let agent = resolve_agent(
            &config.agent,
            &AgentContext::from_config(config),
            &overrides.agent,
        )?;
        Ok(Self {
            builder,
            indexer: StructuralIndexer::new(parser),
            agent,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// One diagnose → patch → verify cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// Build attempt whose failure this cycle answered
    pub attempt_number: u32,
    pub build_result: BuildResult,
    /// Paths relative to the root whose content the patch changed
    pub modified_files: Vec<PathBuf>,
    pub fingerprints_before: BTreeMap<PathBuf, StructuralFingerprint>,
    pub fingerprints_after: BTreeMap<PathBuf, StructuralFingerprint>,
    pub verdict: Verdict,
    pub rejection_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub attempt_number: u32,
    pub reason: String,
    /// An `Unknown` fingerprint forced this rejection
    pub caused_by_unknown: bool,
    pub timestamp: DateTime<Utc>,
}

/// Everything the caller learns about a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub state: RepairState,
    /// Why the session aborted
    pub reason: Option<String>,
    pub last_build: Option<BuildResult>,
    pub attempts: Vec<RepairAttempt>,
    pub rejections: Vec<Rejection>,
    pub build_attempts: u32,
    pub rejection_count: u32,
    pub unknown_rejections: u32,
    pub transitions: Vec<TransitionRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.state == RepairState::Success
    }

    pub fn accepted_patches(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.verdict == Verdict::Accepted)
            .count()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} after {} build(s), {} accepted patch(es), {} rejection(s)",
            self.state,
            self.build_attempts,
            self.accepted_patches(),
            self.rejection_count
        );
        if let Some(reason) = &self.reason {
            out.push_str(&format!(": {reason}"));
        }
        out
    }
}

enum Cycle {
    Accepted(RepairAttempt),
    Rejected {
        attempt: RepairAttempt,
        unknown: bool,
    },
}

/// Mutable bookkeeping of one `run()`.
struct RunState {
    machine: StateMachine,
    reason: Option<String>,
    baseline: BTreeMap<PathBuf, StructuralFingerprint>,
    last_build: Option<BuildResult>,
    previous_errors: Vec<String>,
    /// Rejection reasons and progress notes for the next prompt
    notes: Vec<String>,
    attempts: Vec<RepairAttempt>,
    rejections: Vec<Rejection>,
    build_attempts: u32,
    /// Effective build budget, fixed after the first failed build
    build_limit: u32,
    rejection_count: u32,
    unknown_rejections: u32,
    deadline: Option<Instant>,
}

impl RunState {
    fn new(budget: &BudgetConfig) -> Self {
        Self {
            machine: StateMachine::new(),
            reason: None,
            baseline: BTreeMap::new(),
            last_build: None,
            previous_errors: Vec::new(),
            notes: Vec::new(),
            attempts: Vec::new(),
            rejections: Vec::new(),
            build_attempts: 0,
            build_limit: budget.max_build_attempts,
            rejection_count: 0,
            unknown_rejections: 0,
            deadline: budget
                .session_timeout_secs
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn abort(&mut self, reason: &str) -> Result<()> {
        warn!(reason, state = %self.machine.current(), "Repair session aborted");
        self.machine.abort(reason)?;
        self.reason = Some(reason.to_string());
        Ok(())
    }
}

pub struct RepairSession {
    id: String,
    config: ResolvedConfig,
    components: SessionComponents,
    workspace: Workspace,
    cancel: CancellationToken,
}

impl RepairSession {
    pub fn new(config: ResolvedConfig, components: SessionComponents) -> Self {
        let workspace = Workspace::new(config.root_dir.clone());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            components,
            workspace,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolve all backends from `config` and build a session.
    pub fn from_config(config: ResolvedConfig, overrides: &SessionOverrides) -> Result<Self> {
        let components = SessionComponents::resolve(&config, overrides)
            .context("Failed to resolve repair backends")?;
        Ok(Self::new(config, components))
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drive the session to `Success` or `Aborted`.
    ///
    /// Budget exhaustion and cancellation are outcomes, not errors. `Err` is
    /// reserved for a working tree that could not be restored.
    pub async fn run(self) -> Result<SessionOutcome> {
        let started_at = Utc::now();
        let mut run = RunState::new(&self.config.budget);

        info!(
            session = %self.id,
            root = %self.config.root_dir.display(),
            builder = self.components.builder.name(),
            command = self.components.builder.command(),
            parser = self.components.indexer.parser_name(),
            agent = self.components.agent.name(),
            model = self.components.agent.model(),
            "Repair session started"
        );

        run.baseline = self.index_baseline();
        self.drive(&mut run).await?;

        info!(
            session = %self.id,
            state = %run.machine.current(),
            builds = run.build_attempts,
            rejections = run.rejection_count,
            transitions = %run.machine.summary(),
            "Repair session finished"
        );

        Ok(SessionOutcome {
            session_id: self.id,
            state: run.machine.current(),
            reason: run.reason,
            last_build: run.last_build,
            attempts: run.attempts,
            rejections: run.rejections,
            build_attempts: run.build_attempts,
            rejection_count: run.rejection_count,
            unknown_rejections: run.unknown_rejections,
            transitions: run.machine.into_transitions(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn index_baseline(&self) -> BTreeMap<PathBuf, StructuralFingerprint> {
        let indexer = &self.components.indexer;
        let files = FileWalker::new(&self.config.root_dir).files_matching(|p| indexer.handles(p));
        let baseline: BTreeMap<PathBuf, StructuralFingerprint> = files
            .into_iter()
            .map(|path| {
                let fingerprint = indexer.index_file(&path, None);
                (path, fingerprint)
            })
            .collect();
        let unknown = baseline.values().filter(|f| f.is_unknown()).count();
        info!(files = baseline.len(), unknown, "Indexed baseline");
        baseline
    }

    /// Abort at a state boundary if the token fired or the deadline passed.
    fn check_interrupted(&self, run: &mut RunState) -> Result<bool> {
        if self.cancel.is_cancelled() {
            run.abort("cancelled")?;
            return Ok(true);
        }
        let expired = matches!(run.deadline, Some(deadline) if Instant::now() >= deadline);
        if expired {
            run.abort("deadline exceeded")?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn drive(&self, run: &mut RunState) -> Result<()> {
        run.machine.advance(RepairState::Building, None)?;

        loop {
            if self.check_interrupted(run)? {
                return Ok(());
            }

            run.build_attempts += 1;
            run.machine.set_attempt(run.build_attempts);
            let result = self.components.builder.build().await;
            info!(
                attempt = run.build_attempts,
                success = result.success,
                errors = result.errors().count(),
                duration_ms = result.duration_ms,
                "Build attempt complete"
            );

            if result.success {
                run.last_build = Some(result);
                run.machine
                    .advance(RepairState::Success, Some("build passed"))?;
                return Ok(());
            }

            let progress = self
                .config
                .feedback
                .error_change
                .check(&run.previous_errors, &result.error_entries);
            let error_count = result.errors().count();
            let reason = format!("build failed with {error_count} error entries");
            run.previous_errors = result.error_entries.clone();
            run.last_build = Some(result);
            run.machine
                .advance(RepairState::Diagnosing, Some(&reason))?;

            if run.build_attempts == 1 {
                run.build_limit = self.config.budget.build_limit(error_count);
                debug!(
                    limit = run.build_limit,
                    errors = error_count,
                    "Build budget fixed"
                );
            }
            if run.build_attempts >= run.build_limit {
                run.abort("build attempt budget exhausted")?;
                return Ok(());
            }
            if let Some(note) = progress {
                run.notes.push(note.to_string());
            }

            // Diagnose until a patch is accepted or a budget runs out.
            loop {
                if self.check_interrupted(run)? {
                    return Ok(());
                }
                match self.repair_cycle(run).await? {
                    Cycle::Accepted(attempt) => {
                        info!(
                            attempt = attempt.attempt_number,
                            files = attempt.modified_files.len(),
                            "Patch accepted"
                        );
                        run.attempts.push(attempt);
                        run.machine
                            .advance(RepairState::Building, Some("patch accepted"))?;
                        break;
                    }
                    Cycle::Rejected { attempt, unknown } => {
                        if self.record_rejection(run, attempt, unknown)? {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Count a rejection. Returns `true` when it exhausted a budget.
    fn record_rejection(
        &self,
        run: &mut RunState,
        attempt: RepairAttempt,
        unknown: bool,
    ) -> Result<bool> {
        let budget = &self.config.budget;
        let reason = attempt
            .rejection_reason
            .clone()
            .unwrap_or_else(|| "patch rejected".to_string());

        run.rejection_count += 1;
        if unknown {
            run.unknown_rejections += 1;
        }
        warn!(
            attempt = attempt.attempt_number,
            rejections = run.rejection_count,
            unknown,
            reason = %reason,
            "Patch rejected"
        );

        run.rejections.push(Rejection {
            attempt_number: attempt.attempt_number,
            reason: reason.clone(),
            caused_by_unknown: unknown,
            timestamp: attempt.timestamp,
        });
        run.attempts.push(attempt);
        run.notes
            .push(format!("The previous patch was rejected: {reason}"));

        if run.rejection_count >= budget.max_rejections {
            run.abort("rejection budget exhausted")?;
            return Ok(true);
        }
        if let Some(limit) = budget.max_unknown_rejections {
            if run.unknown_rejections >= limit {
                run.abort("files with unknown structure kept blocking verification")?;
                return Ok(true);
            }
        }

        run.machine
            .advance(RepairState::Diagnosing, Some(&reason))?;
        Ok(false)
    }

    async fn repair_cycle(&self, run: &mut RunState) -> Result<Cycle> {
        let build = run
            .last_build
            .clone()
            .context("Diagnosing without a build result")?;
        let attempt_number = run.build_attempts;
        let rejected = |reason: String, unknown: bool| Cycle::Rejected {
            attempt: RepairAttempt {
                attempt_number,
                build_result: build.clone(),
                modified_files: Vec::new(),
                fingerprints_before: BTreeMap::new(),
                fingerprints_after: BTreeMap::new(),
                verdict: Verdict::Rejected,
                rejection_reason: Some(reason),
                timestamp: Utc::now(),
            },
            unknown,
        };

        // Diagnosing
        let notes = std::mem::take(&mut run.notes);
        let feedback = self.compose_feedback(&build, &notes);
        let files = self.read_implicated(&build);
        let excerpts: Vec<FileExcerpt<'_>> = files
            .iter()
            .map(|(path, content)| FileExcerpt {
                path: path.as_path(),
                content: content.as_str(),
            })
            .collect();
        let prompt = build_repair_prompt(&feedback, &excerpts);
        debug!(
            implicated = files.len(),
            feedback_chars = feedback.len(),
            "Requesting patch"
        );

        let patch = match self.components.agent.propose(&prompt).await {
            Ok(patch) => patch,
            Err(e) => return Ok(rejected(format!("model agent failed: {e}"), false)),
        };
        if let Err(e) = self.workspace.check(&patch) {
            return Ok(rejected(e.to_string(), false));
        }

        // Patching
        run.machine.advance(RepairState::Patching, None)?;
        let applied = match self.workspace.apply(&patch) {
            Ok(applied) => applied,
            Err(e) => return Ok(rejected(e.to_string(), false)),
        };

        // Verifying
        run.machine.advance(RepairState::Verifying, None)?;
        let verification = self.verify(&run.baseline, &applied);
        let modified_files: Vec<PathBuf> = applied
            .modified_files()
            .iter()
            .map(|p| self.workspace.relative(p).to_path_buf())
            .collect();

        let mut attempt = RepairAttempt {
            attempt_number,
            build_result: build,
            modified_files,
            fingerprints_before: relative_keys(&self.workspace, &verification.before),
            fingerprints_after: relative_keys(&self.workspace, &verification.after),
            verdict: Verdict::Accepted,
            rejection_reason: None,
            timestamp: Utc::now(),
        };

        if verification.reasons.is_empty() {
            // Commit: the patched structure is the new baseline.
            run.baseline.extend(verification.after);
            return Ok(Cycle::Accepted(attempt));
        }

        self.workspace
            .revert(applied)
            .context("Failed to revert a rejected patch; working tree needs manual attention")?;
        attempt.verdict = Verdict::Rejected;
        attempt.rejection_reason = Some(verification.reasons.join("; "));
        Ok(Cycle::Rejected {
            attempt,
            unknown: verification.unknown,
        })
    }

    fn verify(
        &self,
        baseline: &BTreeMap<PathBuf, StructuralFingerprint>,
        applied: &AppliedPatch,
    ) -> Verification {
        let indexer = &self.components.indexer;
        let policy = self.config.verify;
        let mut verification = Verification::default();

        for path in applied.modified_files() {
            if !indexer.handles(&path) {
                continue;
            }
            let before = match baseline.get(&path) {
                Some(fingerprint) => fingerprint.clone(),
                None => match applied.previous_content(&path) {
                    Some(previous) => indexer.index_file(&path, Some(previous)),
                    // Created by the patch
                    None => StructuralFingerprint::Known(Vec::new()),
                },
            };
            let after = indexer.index_file(&path, None);

            if !equivalent(&before, &after, policy) {
                if before.is_unknown() || after.is_unknown() {
                    verification.unknown = true;
                }
                verification.reasons.push(format!(
                    "{}: {}",
                    self.workspace.relative(&path).display(),
                    describe_difference(&before, &after, policy)
                ));
            }
            verification.before.insert(path.clone(), before);
            verification.after.insert(path, after);
        }

        verification
    }

    fn compose_feedback(&self, build: &BuildResult, notes: &[String]) -> String {
        let style = self.config.feedback.style;
        let wrap = |m: &str| style.wrap(m);

        let entries: Vec<&str> = build.errors().collect();
        let errors = if entries.is_empty() {
            format_many_with(&[tail_lines(&build.raw_output, RAW_TAIL_LINES)], wrap)
        } else {
            format_many_with(&entries, wrap)
        };

        let mut sections: Vec<String> = errors.into_iter().collect();
        sections.extend(format_many_with(notes, wrap));
        if sections.is_empty() {
            return "The build failed without producing any output.".to_string();
        }
        sections.join("\n\n")
    }

    /// Implicated files that exist inside the root, relative path → content.
    fn read_implicated(&self, build: &BuildResult) -> Vec<(PathBuf, String)> {
        implicated_files(&build.raw_output, &self.config.root_dir)
            .into_iter()
            .filter_map(|path| {
                let absolute = self.workspace.resolve(&path).ok()?;
                let content = std::fs::read_to_string(&absolute).ok()?;
                Some((self.workspace.relative(&absolute).to_path_buf(), content))
            })
            .take(MAX_PROMPT_FILES)
            .collect()
    }
}

#[derive(Default)]
struct Verification {
    before: BTreeMap<PathBuf, StructuralFingerprint>,
    after: BTreeMap<PathBuf, StructuralFingerprint>,
    reasons: Vec<String>,
    unknown: bool,
}

fn relative_keys(
    workspace: &Workspace,
    map: &BTreeMap<PathBuf, StructuralFingerprint>,
) -> BTreeMap<PathBuf, StructuralFingerprint> {
    map.iter()
        .map(|(path, fp)| (workspace.relative(path).to_path_buf(), fp.clone()))
        .collect()
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Run independent sessions on separate tasks. Each must own a distinct root.
pub async fn run_parallel(sessions: Vec<RepairSession>) -> Vec<Result<SessionOutcome>> {
    let handles: Vec<_> = sessions
        .into_iter()
        .map(|session| tokio::spawn(session.run()))
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::Error::new(e).context("Repair session task panicked")),
        });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, ProposedPatch, RepairPrompt};
    use async_trait::async_trait;
    use repair_core::structure::JavaParser;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedBuilder {
        outputs: Mutex<Vec<BuildResult>>,
    }

    impl ScriptedBuilder {
        fn new(mut outputs: Vec<BuildResult>) -> Self {
            outputs.reverse();
            Self {
                outputs: Mutex::new(outputs),
            }
        }
    }

    #[async_trait]
    impl BuildExecutor for ScriptedBuilder {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn command(&self) -> &str {
            "scripted"
        }

        async fn build(&self) -> BuildResult {
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.len() > 1 {
                outputs.pop().unwrap()
            } else {
                outputs[0].clone()
            }
        }
    }

    struct QueueAgent {
        replies: Mutex<Vec<Result<ProposedPatch, AgentError>>>,
        prompts: Mutex<Vec<RepairPrompt>>,
        calls: AtomicU32,
    }

    impl QueueAgent {
        fn new(mut replies: Vec<Result<ProposedPatch, AgentError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmAgent for QueueAgent {
        fn name(&self) -> &'static str {
            "queue"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn complete(&self, _prompt: &RepairPrompt) -> Result<String, AgentError> {
            unreachable!("propose is overridden")
        }

        async fn propose(&self, prompt: &RepairPrompt) -> Result<ProposedPatch, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ProposedPatch::default()))
        }
    }

    const ORIGINAL: &str = "class A {\n  void run() { int x = y; }\n}\n";

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/A.java"), ORIGINAL).unwrap();
        dir
    }

    fn failing(root: &Path) -> BuildResult {
        BuildResult::failed(
            format!("{}/src/A.java:2: error: cannot find symbol", root.display()),
            Default::default(),
        )
    }

    fn session(
        root: &Path,
        builder: ScriptedBuilder,
        agent: QueueAgent,
        max_build_attempts: u32,
        max_rejections: u32,
    ) -> RepairSession {
        let mut config = ResolvedConfig::new(root);
        config.budget.max_build_attempts = max_build_attempts;
        config.budget.max_rejections = max_rejections;
        RepairSession::new(
            config,
            SessionComponents {
                builder: Box::new(builder),
                indexer: StructuralIndexer::new(Box::new(JavaParser::default())),
                agent: Box::new(agent),
            },
        )
    }

    #[tokio::test]
    async fn test_agent_error_counts_as_rejection() {
        let dir = project();
        let builder = ScriptedBuilder::new(vec![failing(dir.path())]);
        let agent = QueueAgent::new(vec![
            Err(AgentError::Transport("connection reset".into())),
            Err(AgentError::Transport("connection reset".into())),
        ]);

        let outcome = session(dir.path(), builder, agent, 5, 2).run().await.unwrap();
        assert_eq!(outcome.state, RepairState::Aborted);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("rejection budget exhausted")
        );
        assert_eq!(outcome.build_attempts, 1);
        assert!(outcome.rejections[0].reason.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_outside_root_patch_refused() {
        let dir = project();
        let builder = ScriptedBuilder::new(vec![failing(dir.path())]);
        let agent = QueueAgent::new(vec![Ok(
            ProposedPatch::default().with_file("../escape.java", "class X {}")
        )]);

        let outcome = session(dir.path(), builder, agent, 5, 1).run().await.unwrap();
        assert_eq!(outcome.rejection_count, 1);
        assert!(outcome.rejections[0].reason.contains("outside the project root"));
        assert!(!dir.path().parent().unwrap().join("escape.java").exists());
        // Refusals never enter Patching.
        assert!(outcome
            .transitions
            .iter()
            .all(|t| t.to != RepairState::Patching));
    }

    #[tokio::test]
    async fn test_rejection_reason_reaches_next_prompt() {
        let dir = project();
        let builder = ScriptedBuilder::new(vec![failing(dir.path()), BuildResult::passed("")]);
        let agent = QueueAgent::new(vec![
            Ok(ProposedPatch::default().with_file("src/A.java", "class A {}\n")),
            Ok(ProposedPatch::default()
                .with_file("src/A.java", "class A {\n  void run() { int x = 1; }\n}\n")),
        ]);
        let session = session(dir.path(), builder, agent, 5, 3);

        let outcome = session.run().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.rejection_count, 1);
        assert!(outcome.rejections[0].reason.contains("removed or renamed: A::run"));
        assert_eq!(outcome.accepted_patches(), 1);
        assert_eq!(
            outcome.attempts[1].modified_files,
            vec![PathBuf::from("src/A.java")]
        );
    }

    #[tokio::test]
    async fn test_prompt_contains_feedback_and_file() {
        let dir = project();
        let builder = ScriptedBuilder::new(vec![failing(dir.path())]);
        let agent = std::sync::Arc::new(QueueAgent::new(vec![]));

        struct Shared(std::sync::Arc<QueueAgent>);

        #[async_trait]
        impl LlmAgent for Shared {
            fn name(&self) -> &'static str {
                "shared"
            }
            fn model(&self) -> &str {
                "test"
            }
            async fn complete(&self, p: &RepairPrompt) -> Result<String, AgentError> {
                self.0.complete(p).await
            }
            async fn propose(&self, p: &RepairPrompt) -> Result<ProposedPatch, AgentError> {
                self.0.propose(p).await
            }
        }

        let mut config = ResolvedConfig::new(dir.path());
        config.budget.max_rejections = 1;
        let session = RepairSession::new(
            config,
            SessionComponents {
                builder: Box::new(builder),
                indexer: StructuralIndexer::new(Box::new(JavaParser::default())),
                agent: Box::new(Shared(agent.clone())),
            },
        );
        let outcome = session.run().await.unwrap();
        assert_eq!(
            outcome.reason.as_deref(),
            Some("rejection budget exhausted")
        );

        let prompts = agent.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.contains("[Feedback Start]"));
        assert!(prompts[0].user.contains("cannot find symbol"));
        assert!(prompts[0].user.contains("<file path=\"src/A.java\">"));
        assert!(prompts[0].user.contains("void run()"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_build() {
        let dir = project();
        let builder = ScriptedBuilder::new(vec![failing(dir.path())]);
        let session = session(dir.path(), builder, QueueAgent::new(vec![]), 5, 3);
        let token = session.cancellation_token();
        token.cancel();

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.state, RepairState::Aborted);
        assert_eq!(outcome.reason.as_deref(), Some("cancelled"));
        assert_eq!(outcome.build_attempts, 0);
    }

    #[tokio::test]
    async fn test_unknown_rejection_threshold() {
        let dir = project();
        let builder = ScriptedBuilder::new(vec![failing(dir.path())]);
        let agent = QueueAgent::new(vec![Ok(
            ProposedPatch::default().with_file("src/A.java", "class A { void run( }\n")
        )]);
        let mut config = ResolvedConfig::new(dir.path());
        config.budget.max_rejections = 10;
        config.budget.max_unknown_rejections = Some(1);
        let session = RepairSession::new(
            config,
            SessionComponents {
                builder: Box::new(builder),
                indexer: StructuralIndexer::new(Box::new(JavaParser::default())),
                agent: Box::new(agent),
            },
        );

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.unknown_rejections, 1);
        assert!(outcome.rejections[0].caused_by_unknown);
        assert!(outcome
            .reason
            .as_deref()
            .unwrap()
            .contains("unknown structure"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/A.java")).unwrap(),
            ORIGINAL
        );
    }

    /// Always fails after a fixed pause.
    struct SlowBuilder {
        result: BuildResult,
        pause: Duration,
    }

    #[async_trait]
    impl BuildExecutor for SlowBuilder {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn command(&self) -> &str {
            "slow"
        }

        async fn build(&self) -> BuildResult {
            tokio::time::sleep(self.pause).await;
            self.result.clone()
        }
    }

    fn keeps_run(n: u32) -> Result<ProposedPatch, AgentError> {
        let content = format!("class A {{\n  void run() {{ int x = {n}; }}\n}}\n");
        Ok(ProposedPatch::default().with_file("src/A.java", content))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_at_next_boundary() {
        let dir = project();
        let builder = SlowBuilder {
            result: failing(dir.path()),
            pause: Duration::from_secs(2),
        };
        let agent = QueueAgent::new((1..=5).map(keeps_run).collect());
        let mut config = ResolvedConfig::new(dir.path());
        config.budget.max_build_attempts = 10;
        config.budget.session_timeout_secs = Some(3);
        let session = RepairSession::new(
            config,
            SessionComponents {
                builder: Box::new(builder),
                indexer: StructuralIndexer::new(Box::new(JavaParser::default())),
                agent: Box::new(agent),
            },
        );

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.state, RepairState::Aborted);
        assert_eq!(outcome.reason.as_deref(), Some("deadline exceeded"));
        assert_eq!(outcome.build_attempts, 2);
        assert_eq!(outcome.accepted_patches(), 1);
        assert_eq!(outcome.rejection_count, 0);
    }

    #[tokio::test]
    async fn test_build_limit_follows_initial_error_count() {
        let dir = project();
        let root = dir.path().display().to_string();
        let four_errors = BuildResult::failed(
            (1..=4)
                .map(|line| format!("{root}/src/A.java:{line}: error: cannot find symbol"))
                .collect::<Vec<_>>()
                .join("\n"),
            Default::default(),
        );
        let builder = ScriptedBuilder::new(vec![four_errors]);
        let agent = QueueAgent::new((1..=5).map(keeps_run).collect());
        let mut config = ResolvedConfig::new(dir.path());
        config.budget.max_build_attempts = 10;
        config.budget.errors_factor = Some(0.5);
        config.budget.min_build_attempts = 1;
        let session = RepairSession::new(
            config,
            SessionComponents {
                builder: Box::new(builder),
                indexer: StructuralIndexer::new(Box::new(JavaParser::default())),
                agent: Box::new(agent),
            },
        );

        let outcome = session.run().await.unwrap();
        assert_eq!(
            outcome.reason.as_deref(),
            Some("build attempt budget exhausted")
        );
        assert_eq!(outcome.build_attempts, 2);
        assert_eq!(outcome.accepted_patches(), 1);
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(tail_lines("a", 5), "a");
    }
}
