//! End-to-end scenarios for the checkpoint engine, exercised against
//! scratch repositories built through the crate's own plumbing.

mod common;

use std::fs;

use common::Scratch;
use entire_core::checkpoint::store::{CheckpointStore, CommittedWriteOpts, TemporaryWriteOpts};
use entire_core::checkpoint::summary::SessionMetadata;
use entire_core::checkpoint::{CheckpointId, META_BRANCH};
use entire_core::config::Settings;
use entire_core::internal::object::trailer;
use entire_core::objects::{ObjectLayer, shadow_branch_name};
use entire_core::session::Phase;
use entire_core::session::store::SessionStateStore;
use entire_core::strategy::auto::AutoCommitStrategy;
use entire_core::strategy::manual::ManualCommitStrategy;
use entire_core::strategy::{
    CheckpointEvent, EngineContext, PromptEvent, SessionEvent, Strategy,
};
use entire_core::sync::merge_metadata_commits;

fn trailer_message(subject: &str, checkpoint_id: &str) -> String {
    trailer::compose_message(
        subject,
        None,
        &[(
            trailer::ENTIRE_CHECKPOINT.to_string(),
            checkpoint_id.to_string(),
        )],
    )
}

fn snapshot(s: &Scratch, session_id: &str, base: &entire_core::hash::ObjectHash, files: &[&str]) {
    CheckpointStore::new(&s.repo)
        .write_temporary(&TemporaryWriteOpts {
            session_id: session_id.to_string(),
            strategy: "manual-commit".to_string(),
            base_commit: base.to_string(),
            worktree_id: s.repo.worktree_id(),
            modified_files: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        })
        .unwrap();
}

/// S1 — a modified file counts as overlap regardless of content: the
/// user rewrote the agent's line, and the session still condenses.
#[test]
fn modified_file_condenses_on_commit() {
    let s = Scratch::new();
    let c1 = s.commit_files(&[("test.txt", "original")], None, "init\n");
    let transcript = s.write_transcript("t-s1.jsonl", &["make it say agent"]);
    s.seed_session("2025-08-01-s1", &c1, &transcript, Phase::Idle, &[]);

    fs::write(s.repo.workdir.join("test.txt"), "agent").unwrap();
    snapshot(&s, "2025-08-01-s1", &c1, &["test.txt"]);

    let session_store = SessionStateStore::new(&s.repo);
    let mut state = session_store.load("2025-08-01-s1").unwrap().unwrap();
    state.touch_files(&["test.txt".to_string()]);
    state.step_count = 1;
    session_store.save(&state).unwrap();

    let c2 = s.commit_files(
        &[("test.txt", "user edit")],
        Some(c1),
        &trailer_message("tweak agent work", "a1b2c3d4e5f6"),
    );

    let settings = Settings::default();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    ManualCommitStrategy.on_git_commit(&ctx).unwrap();

    let store = CheckpointStore::new(&s.repo);
    let read = store
        .read_committed(&CheckpointId::parse("a1b2c3d4e5f6").unwrap(), None)
        .unwrap();
    assert_eq!(read.session.session_id, "2025-08-01-s1");
    assert_eq!(read.summary.files_touched, vec!["test.txt"]);
    assert_eq!(read.prompts, vec!["make it say agent"]);
    let attribution = read.session.initial_attribution.unwrap();
    assert!(attribution.agent_percentage >= 0.0 && attribution.agent_percentage <= 100.0);
    assert!(attribution.total_committed > 0);

    let state = session_store.load("2025-08-01-s1").unwrap().unwrap();
    assert_eq!(state.base_commit, c2.to_string());
    assert_eq!(state.step_count, 0);
    assert!(state.files_touched.is_empty());
    assert_eq!(state.checkpoint_transcript_start, 1);
    assert_eq!(state.last_checkpoint_id, "a1b2c3d4e5f6");

    // The replaced single-line file carries nothing forward and the
    // shadow branch is gone.
    assert!(
        !store
            .shadow_branch_exists(&c1, &s.repo.worktree_id())
            .unwrap()
    );
    assert!(
        !store
            .shadow_branch_exists(&c2, &s.repo.worktree_id())
            .unwrap()
    );
}

/// S2 — a new file the user reverted and replaced is not overlap: the
/// commit does not condense the session.
#[test]
fn replaced_new_file_does_not_condense() {
    let s = Scratch::new();
    let c1 = s.commit_files(&[("README.md", "readme\n")], None, "init\n");
    let transcript = s.write_transcript("t-s2.jsonl", &["create newfile"]);
    s.seed_session("2025-08-01-s2", &c1, &transcript, Phase::Idle, &[]);

    fs::write(s.repo.workdir.join("newfile.txt"), "agent").unwrap();
    snapshot(&s, "2025-08-01-s2", &c1, &["newfile.txt"]);

    let session_store = SessionStateStore::new(&s.repo);
    let mut state = session_store.load("2025-08-01-s2").unwrap().unwrap();
    state.touch_files(&["newfile.txt".to_string()]);
    state.step_count = 1;
    session_store.save(&state).unwrap();

    let c2 = s.commit_files(&[("newfile.txt", "user")], Some(c1), "write my own\n");

    let settings = Settings::default();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    ManualCommitStrategy.on_git_commit(&ctx).unwrap();

    // No condensation was attributed to the session.
    assert!(
        CheckpointStore::new(&s.repo)
            .list_committed()
            .unwrap()
            .is_empty()
    );
    let state = session_store.load("2025-08-01-s2").unwrap().unwrap();
    assert_eq!(state.base_commit, c2.to_string());
    assert_eq!(state.step_count, 1);
}

/// S3 — a partial commit triggers carry-forward: the uncommitted file
/// survives on a fresh shadow branch rooted at the new HEAD.
#[test]
fn partial_commit_carries_forward() {
    let s = Scratch::new();
    let c1 = s.commit_files(
        &[
            ("a.txt", "base a\n"),
            ("b.txt", "base b\n"),
            ("c.txt", "base c\n"),
        ],
        None,
        "init\n",
    );
    let transcript = s.write_transcript("t-s3.jsonl", &["touch all three"]);
    s.seed_session("2025-08-01-s3", &c1, &transcript, Phase::Idle, &[]);

    for name in ["a", "b", "c"] {
        fs::write(
            s.repo.workdir.join(format!("{name}.txt")),
            format!("agent {name}\n"),
        )
        .unwrap();
    }
    snapshot(&s, "2025-08-01-s3", &c1, &["a.txt", "b.txt", "c.txt"]);

    let session_store = SessionStateStore::new(&s.repo);
    let mut state = session_store.load("2025-08-01-s3").unwrap().unwrap();
    state.touch_files(&[
        "a.txt".to_string(),
        "b.txt".to_string(),
        "c.txt".to_string(),
    ]);
    state.step_count = 1;
    session_store.save(&state).unwrap();

    // The user commits only a and b (with the agent's content).
    let c2 = s.commit_files(
        &[("a.txt", "agent a\n"), ("b.txt", "agent b\n")],
        Some(c1),
        &trailer_message("take a and b", "b2c3d4e5f6a1"),
    );

    let settings = Settings::default();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    ManualCommitStrategy.on_git_commit(&ctx).unwrap();

    let store = CheckpointStore::new(&s.repo);
    let read = store
        .read_committed(&CheckpointId::parse("b2c3d4e5f6a1").unwrap(), None)
        .unwrap();
    // Session files are a subset of the summary union.
    for file in &read.session.files_touched {
        assert!(read.summary.files_touched.contains(file));
    }

    let state = session_store.load("2025-08-01-s3").unwrap().unwrap();
    assert_eq!(state.base_commit, c2.to_string());
    assert_eq!(state.files_touched, vec!["c.txt"]);
    assert_eq!(state.step_count, 1);
    assert_eq!(state.checkpoint_transcript_start, 0);
    assert_eq!(state.last_checkpoint_id, "");

    // The fresh shadow branch at the new HEAD holds c.txt's agent content.
    let layer = ObjectLayer::new(&s.repo);
    let new_shadow = shadow_branch_name(&c2, &s.repo.worktree_id());
    let tip = layer.branch_tip(&new_shadow).unwrap().unwrap();
    let commit = s.repo.read_commit(&tip).unwrap();
    assert_eq!(commit.parent_commit_ids, vec![c2]);
    let entries = layer.commit_tree(&tip).unwrap();
    let c_blob = s
        .repo
        .read_blob(&entries.get("c.txt").unwrap().hash)
        .unwrap();
    assert_eq!(c_blob.data, b"agent c\n");
    // Committed files keep their committed content on the new shadow.
    let a_blob = s
        .repo
        .read_blob(&entries.get("a.txt").unwrap().hash)
        .unwrap();
    assert_eq!(a_blob.data, b"agent a\n");
}

/// S4 — two sessions share the base commit: the idle one condenses, the
/// active empty one keeps the shadow branch alive and stays untouched.
#[test]
fn multi_session_retains_shared_shadow() {
    let s = Scratch::new();
    let c1 = s.commit_files(&[("lib.rs", "fn lib() {}\n")], None, "init\n");
    let t1 = s.write_transcript("t-s4-one.jsonl", &["do the work"]);
    let t2 = s.write_transcript("t-s4-two.jsonl", &[]);
    s.seed_session("2025-08-01-one", &c1, &t1, Phase::Idle, &[]);
    s.seed_session("2025-08-01-two", &c1, &t2, Phase::Active, &[]);

    fs::write(s.repo.workdir.join("lib.rs"), "fn lib() { agent() }\n").unwrap();
    snapshot(&s, "2025-08-01-one", &c1, &["lib.rs"]);

    let session_store = SessionStateStore::new(&s.repo);
    let mut one = session_store.load("2025-08-01-one").unwrap().unwrap();
    one.touch_files(&["lib.rs".to_string()]);
    one.step_count = 1;
    session_store.save(&one).unwrap();

    let c2 = s.commit_files(
        &[("lib.rs", "fn lib() { agent() }\n")],
        Some(c1),
        &trailer_message("apply agent work", "a1b2c3d4e5f6"),
    );

    let settings = Settings::default();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    ManualCommitStrategy.on_git_commit(&ctx).unwrap();

    // The metadata branch grew.
    let store = CheckpointStore::new(&s.repo);
    let read = store
        .read_committed(&CheckpointId::parse("a1b2c3d4e5f6").unwrap(), None)
        .unwrap();
    assert_eq!(read.session.session_id, "2025-08-01-one");

    // The shadow branch is retained: the active session still shares it.
    assert!(
        store
            .shadow_branch_exists(&c1, &s.repo.worktree_id())
            .unwrap()
    );

    let one = session_store.load("2025-08-01-one").unwrap().unwrap();
    assert_eq!(one.step_count, 0);
    assert_eq!(one.base_commit, c2.to_string());

    // The active empty session is untouched.
    let two = session_store.load("2025-08-01-two").unwrap().unwrap();
    assert_eq!(two.base_commit, c1.to_string());
    assert_eq!(two.phase, Phase::Active);
    assert_eq!(two.step_count, 0);
}

/// S5 — a session with a reusable checkpoint and no new content is not
/// re-condensed: the commit only advances its base.
#[test]
fn reuse_skips_condensation() {
    let s = Scratch::new();
    let c1 = s.commit_files(&[("main.rs", "fn main() {}\n")], None, "init\n");
    let transcript = s.write_transcript("t-s5.jsonl", &["already condensed"]);

    // Pre-seed the metadata branch with the checkpoint this session
    // already condensed into.
    let checkpoint_id = CheckpointId::parse("a1b2c3d4e5f6").unwrap();
    let store = CheckpointStore::new(&s.repo);
    store
        .write_committed(
            &CommittedWriteOpts {
                checkpoint_id: checkpoint_id.clone(),
                strategy: "manual-commit".to_string(),
                branch: "main".to_string(),
                session: SessionMetadata {
                    session_id: "2025-08-01-s5".to_string(),
                    agent: "claude-code".to_string(),
                    token_usage: Default::default(),
                    files_touched: vec!["main.rs".to_string()],
                    checkpoints_count: 1,
                    initial_attribution: None,
                    ephemeral_branch: None,
                },
                transcript: fs::read(&transcript).unwrap(),
                prompts: vec!["already condensed".to_string()],
                context: None,
                content_hash: None,
                tasks: Vec::new(),
                ephemeral_branch: None,
                base_commit: None,
                subject: None,
            },
            true,
        )
        .unwrap();
    let meta_tip_before = ObjectLayer::new(&s.repo)
        .branch_tip(META_BRANCH)
        .unwrap()
        .unwrap();

    let session_store = SessionStateStore::new(&s.repo);
    let mut state = s.seed_session("2025-08-01-s5", &c1, &transcript, Phase::Idle, &[]);
    state.last_checkpoint_id = "a1b2c3d4e5f6".to_string();
    state.checkpoint_transcript_start = 1; // transcript fully condensed
    session_store.save(&state).unwrap();

    let c2 = s.commit_files(&[("other.rs", "mod other;\n")], Some(c1), "unrelated\n");

    let settings = Settings::default();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    ManualCommitStrategy.on_git_commit(&ctx).unwrap();

    // No new subtree: the metadata tip did not move.
    let meta_tip_after = ObjectLayer::new(&s.repo)
        .branch_tip(META_BRANCH)
        .unwrap()
        .unwrap();
    assert_eq!(meta_tip_before, meta_tip_after);
    let read = store.read_committed(&checkpoint_id, None).unwrap();
    assert_eq!(read.summary.sessions.len(), 1);

    let state = session_store.load("2025-08-01-s5").unwrap().unwrap();
    assert_eq!(state.base_commit, c2.to_string());
}

/// S6 — divergent sessions branches merge by tree union: no checkpoint
/// is lost and the merge commit carries both parents.
#[test]
fn metadata_merge_unions_checkpoints() {
    let s = Scratch::new();
    let store = CheckpointStore::new(&s.repo);
    let layer = ObjectLayer::new(&s.repo);

    let write = |id: &str, session: &str| {
        store
            .write_committed(
                &CommittedWriteOpts {
                    checkpoint_id: CheckpointId::parse(id).unwrap(),
                    strategy: "manual-commit".to_string(),
                    branch: "main".to_string(),
                    session: SessionMetadata {
                        session_id: session.to_string(),
                        agent: "claude-code".to_string(),
                        token_usage: Default::default(),
                        files_touched: Vec::new(),
                        checkpoints_count: 1,
                        initial_attribution: None,
                        ephemeral_branch: None,
                    },
                    transcript: Vec::new(),
                    prompts: Vec::new(),
                    context: None,
                    content_hash: None,
                    tasks: Vec::new(),
                    ephemeral_branch: None,
                    base_commit: None,
                    subject: None,
                },
                true,
            )
            .unwrap()
            .commit
    };

    // Remote lineage holds {c}; rewind and build the local {a, b}.
    let remote_tip = write("cccccccccccc", "2025-08-01-remote");
    s.repo
        .delete_ref("refs/heads/entire/sessions")
        .unwrap();
    write("a1b2c3d4e5f6", "2025-08-01-a");
    let local_tip = write("b2c3d4e5f6a1", "2025-08-01-b");

    let merged = merge_metadata_commits(&s.repo, &local_tip, &remote_tip).unwrap();
    let commit = s.repo.read_commit(&merged).unwrap();
    assert_eq!(commit.parent_commit_ids, vec![local_tip, remote_tip]);

    layer.set_branch(META_BRANCH, &merged).unwrap();
    let ids: Vec<String> = store
        .list_committed()
        .unwrap()
        .iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(ids, vec!["a1b2c3d4e5f6", "b2c3d4e5f6a1", "cccccccccccc"]);
}

/// Full manual-commit turn: prompt → checkpoint → user commit → turn
/// end, including transcript finalization of the turn's checkpoints.
#[test]
fn manual_turn_lifecycle() {
    let s = Scratch::new();
    let c1 = s.commit_files(&[("app.py", "print(1)\n")], None, "init\n");
    let transcript = s.write_transcript("t-turn.jsonl", &["bump the number"]);

    let settings = Settings::default();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    let strategy = ManualCommitStrategy;

    strategy
        .on_user_prompt(
            &ctx,
            &PromptEvent {
                session_id: "2025-08-01-turn".to_string(),
                agent_type: "claude-code".to_string(),
                transcript_path: transcript.to_string_lossy().to_string(),
                untracked_files: Vec::new(),
            },
        )
        .unwrap();

    let session_store = SessionStateStore::new(&s.repo);
    let state = session_store.load("2025-08-01-turn").unwrap().unwrap();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.base_commit, c1.to_string());

    // Agent edits, checkpoint saved.
    fs::write(s.repo.workdir.join("app.py"), "print(2)\n").unwrap();
    strategy
        .on_checkpoint(
            &ctx,
            &CheckpointEvent {
                session_id: "2025-08-01-turn".to_string(),
                modified_files: vec!["app.py".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    let state = session_store.load("2025-08-01-turn").unwrap().unwrap();
    assert_eq!(state.step_count, 1);
    assert_eq!(state.files_touched, vec!["app.py"]);

    // The user commits the agent's change mid-turn.
    s.commit_files(
        &[("app.py", "print(2)\n")],
        Some(c1),
        &trailer_message("apply bump", "b2c3d4e5f6a1"),
    );
    strategy.on_git_commit(&ctx).unwrap();
    let state = session_store.load("2025-08-01-turn").unwrap().unwrap();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.turn_checkpoint_ids.len(), 1);

    // More conversation lands before the turn ends; turn end finalizes
    // the full transcript into the checkpoint.
    let grown = s.write_transcript("t-turn.jsonl", &["bump the number", "thanks"]);
    strategy
        .on_turn_end(
            &ctx,
            &SessionEvent {
                session_id: "2025-08-01-turn".to_string(),
            },
        )
        .unwrap();

    let state = session_store.load("2025-08-01-turn").unwrap().unwrap();
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.turn_checkpoint_ids.is_empty());

    let read = CheckpointStore::new(&s.repo)
        .read_committed(&CheckpointId::parse("b2c3d4e5f6a1").unwrap(), None)
        .unwrap();
    assert_eq!(read.transcript, fs::read(&grown).unwrap());
    assert_eq!(read.prompts.len(), 1); // prompts reflect condensation time
}

/// Auto-commit: a turn becomes a real commit on the working branch with
/// an `Entire-Checkpoint` trailer and direct metadata.
#[test]
fn auto_commit_turn() {
    let s = Scratch::new();
    let c1 = s.commit_files(&[("x.txt", "one\n")], None, "init\n");
    let transcript = s.write_transcript("t-auto.jsonl", &["make it two"]);

    let settings: Settings =
        serde_json::from_str(r#"{"strategy":"auto-commit"}"#).unwrap();
    let ctx = EngineContext {
        repo: &s.repo,
        settings: &settings,
    };
    let strategy = AutoCommitStrategy;

    strategy
        .on_user_prompt(
            &ctx,
            &PromptEvent {
                session_id: "2025-08-01-auto".to_string(),
                agent_type: "claude-code".to_string(),
                transcript_path: transcript.to_string_lossy().to_string(),
                untracked_files: Vec::new(),
            },
        )
        .unwrap();

    fs::write(s.repo.workdir.join("x.txt"), "two\n").unwrap();
    strategy
        .on_checkpoint(
            &ctx,
            &CheckpointEvent {
                session_id: "2025-08-01-auto".to_string(),
                modified_files: vec!["x.txt".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

    strategy
        .on_turn_end(
            &ctx,
            &SessionEvent {
                session_id: "2025-08-01-auto".to_string(),
            },
        )
        .unwrap();

    // The working branch advanced to a commit carrying the trailer.
    let head = s.repo.head().unwrap().unwrap();
    assert_ne!(head, c1);
    let commit = s.repo.read_commit(&head).unwrap();
    assert_eq!(commit.parent_commit_ids, vec![c1]);
    let checkpoint_id = commit
        .trailer(trailer::ENTIRE_CHECKPOINT)
        .and_then(|v| CheckpointId::parse(&v).ok())
        .expect("turn commit carries a checkpoint trailer");

    let read = CheckpointStore::new(&s.repo)
        .read_committed(&checkpoint_id, None)
        .unwrap();
    assert_eq!(read.summary.strategy, "auto-commit");
    assert_eq!(read.session.files_touched, vec!["x.txt"]);
    let attribution = read.session.initial_attribution.unwrap();
    assert_eq!(attribution.agent_lines, 1);
    assert_eq!(attribution.agent_percentage, 100.0);

    let state = SessionStateStore::new(&s.repo)
        .load("2025-08-01-auto")
        .unwrap()
        .unwrap();
    assert_eq!(state.base_commit, head.to_string());
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.files_touched.is_empty());
    assert_eq!(state.last_checkpoint_id, checkpoint_id.to_string());
}
