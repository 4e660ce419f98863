use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use repo_sentinel::{
    AgentConfig, BackoffSettings, CommandOutcome, CommandRunner, CommandSpec, ConfigFile,
    ConfigOverrides, HttpClient, HttpRequest, HttpResponse, RepoKey, Scheduler, TransportError,
    WalkdirWalker,
};
use tempfile::TempDir;
use tokio::sync::watch;

const API: &str = "https://api.github.com/repos";

/// Replays scripted responses per URL; answers `304` once a URL runs dry.
#[derive(Default)]
struct FakeGitHub {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeGitHub {
    fn respond(&self, repo: &str, status: u16, etag: Option<&str>, body: &str) {
        let response = HttpResponse {
            status,
            headers: etag
                .map(|etag| vec![("ETag".to_string(), etag.to_string())])
                .unwrap_or_default(),
            body: body.to_string(),
        };
        self.responses
            .lock()
            .unwrap()
            .entry(format!("{API}/{repo}/events"))
            .or_default()
            .push_back(response);
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpClient for FakeGitHub {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let response = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front);
        Ok(response.unwrap_or(HttpResponse {
            status: 304,
            ..HttpResponse::default()
        }))
    }
}

/// Records every command; `git` fails inside the listed working copies.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failing_pulls: Vec<PathBuf>,
}

impl RecordingRunner {
    fn failing_pull_in(path: PathBuf) -> Self {
        Self {
            failing_pulls: vec![path],
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutcome> {
        self.calls.lock().unwrap().push(command.clone());
        if command.program.as_path() == Path::new("git")
            && self.failing_pulls.contains(&command.working_dir)
        {
            return Ok(CommandOutcome::failure(1, "fatal: could not read from remote"));
        }
        Ok(CommandOutcome::success())
    }
}

type TestScheduler = Scheduler<FakeGitHub, RecordingRunner, WalkdirWalker>;

fn checkout(root: &Path, repo: &str) -> PathBuf {
    let path = root.join(repo);
    fs::create_dir_all(path.join(".git")).unwrap();
    path
}

fn config(root: &Path, file: ConfigFile, dry_run: bool) -> AgentConfig {
    let overrides = ConfigOverrides {
        root: Some(root.to_path_buf()),
        credential: Some("secret".to_string()),
        dry_run,
        ..Default::default()
    };
    AgentConfig::resolve(file, overrides)
        .unwrap()
        .with_intervals(Duration::ZERO, Duration::ZERO)
        .with_backoff(BackoffSettings {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 5,
        })
}

fn scheduler(
    config: AgentConfig,
    github: FakeGitHub,
    runner: RecordingRunner,
) -> (TestScheduler, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(config, github, runner, WalkdirWalker, shutdown_rx);
    (scheduler, shutdown_tx)
}

fn key(repo: &str) -> RepoKey {
    RepoKey::parse(repo).unwrap()
}

#[tokio::test]
async fn push_event_runs_pipeline_once_and_stores_token() {
    let temp = TempDir::new().unwrap();
    let widgets = checkout(temp.path(), "acme/widgets");

    let github = FakeGitHub::default();
    github.respond(
        "acme/widgets",
        200,
        Some("\"v2\""),
        r#"[{"type": "PushEvent", "id": "101"}, {"type": "ForkEvent", "id": "100"}]"#,
    );

    let config = config(temp.path(), ConfigFile::default(), false);
    let (scheduler, _shutdown) = scheduler(config, github, RecordingRunner::default());

    let summary = scheduler.run_cycle().await;

    assert_eq!(summary.repositories_discovered, 1);
    assert_eq!(summary.updated, 1);
    assert!(summary.all_success());

    let calls = scheduler.pipeline().runner().calls();
    let rendered: Vec<String> = calls.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, vec!["git pull", "systemctl restart widgets"]);
    assert!(calls.iter().all(|call| call.working_dir == widgets));

    let repo = scheduler.registry().get(&key("acme/widgets")).unwrap();
    assert_eq!(repo.cache_token, "\"v2\"");
    assert_eq!(repo.last_seen_event.as_deref(), Some("101"));
}

#[tokio::test]
async fn unchanged_repositories_do_nothing() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");
    checkout(temp.path(), "acme/gadgets");

    let config = config(temp.path(), ConfigFile::default(), false);
    let (scheduler, _shutdown) = scheduler(config, FakeGitHub::default(), RecordingRunner::default());

    let summary = scheduler.run_cycle().await;

    assert_eq!(summary.unchanged, 2);
    assert_eq!(scheduler.retry_count(), 0);
    assert!(scheduler.pipeline().runner().calls().is_empty());

    let requests = scheduler.poller().client().requests();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|request| !request.headers.iter().any(|(name, _)| name == "If-None-Match")));
}

#[tokio::test]
async fn preserved_token_is_sent_on_the_next_cycle() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");

    let github = FakeGitHub::default();
    github.respond("acme/widgets", 200, Some("\"v1\""), "[]");

    let file = ConfigFile {
        preserve_token_across_discovery: true,
        ..ConfigFile::default()
    };
    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), file, false),
        github,
        RecordingRunner::default(),
    );

    let first = scheduler.run_cycle().await;
    let second = scheduler.run_cycle().await;

    assert_eq!(first.observed, 1);
    assert_eq!(second.unchanged, 1);

    let requests = scheduler.poller().client().requests();
    assert!(requests[1]
        .headers
        .contains(&("If-None-Match".to_string(), "\"v1\"".to_string())));
}

#[tokio::test]
async fn already_processed_push_is_not_repeated() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");

    let events = r#"[{"type": "PushEvent", "id": "7"}]"#;
    let github = FakeGitHub::default();
    github.respond("acme/widgets", 200, Some("\"v1\""), events);
    github.respond("acme/widgets", 200, Some("\"v2\""), events);

    let file = ConfigFile {
        preserve_token_across_discovery: true,
        ..ConfigFile::default()
    };
    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), file, false),
        github,
        RecordingRunner::default(),
    );

    assert_eq!(scheduler.run_cycle().await.updated, 1);
    let second = scheduler.run_cycle().await;

    assert_eq!(second.updated, 0);
    assert_eq!(second.observed, 1);
    assert_eq!(scheduler.pipeline().runner().calls().len(), 2);
}

#[tokio::test]
async fn failing_repository_does_not_block_others() {
    let temp = TempDir::new().unwrap();
    let gadgets = checkout(temp.path(), "acme/gadgets");
    let widgets = checkout(temp.path(), "acme/widgets");
    checkout(temp.path(), "acme/sprockets");

    let push = r#"[{"type": "PushEvent", "id": "1"}]"#;
    let github = FakeGitHub::default();
    github.respond("acme/gadgets", 200, None, push);
    github.respond("acme/sprockets", 502, None, "bad gateway");
    github.respond("acme/widgets", 200, None, push);

    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), ConfigFile::default(), false),
        github,
        RecordingRunner::failing_pull_in(gadgets.clone()),
    );

    let summary = scheduler.run_cycle().await;

    assert_eq!(summary.repositories_discovered, 3);
    assert_eq!(summary.update_failures, 1);
    assert_eq!(summary.poll_failures, 1);
    assert_eq!(summary.updated, 1);
    assert!(summary.has_failures());

    let calls = scheduler.pipeline().runner().calls();
    assert_eq!(calls.iter().filter(|c| c.working_dir == gadgets).count(), 1);
    assert_eq!(calls.iter().filter(|c| c.working_dir == widgets).count(), 2);
}

#[tokio::test]
async fn failed_pull_skips_remaining_stages() {
    let temp = TempDir::new().unwrap();
    let widgets = checkout(temp.path(), "acme/widgets");
    fs::write(widgets.join("requirements.txt"), "requests\n").unwrap();

    let github = FakeGitHub::default();
    github.respond(
        "acme/widgets",
        200,
        None,
        r#"[{"type": "PushEvent", "id": "1"}]"#,
    );

    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), ConfigFile::default(), false),
        github,
        RecordingRunner::failing_pull_in(widgets),
    );

    let summary = scheduler.run_cycle().await;

    assert_eq!(summary.update_failures, 1);
    let calls = scheduler.pipeline().runner().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].to_string(), "git pull");

    let repo = scheduler.registry().get(&key("acme/widgets")).unwrap();
    assert_eq!(repo.last_seen_event, None);
}

#[tokio::test]
async fn dry_run_never_invokes_pipeline() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");

    let github = FakeGitHub::default();
    github.respond(
        "acme/widgets",
        200,
        None,
        r#"[{"type": "PushEvent", "id": "1"}]"#,
    );

    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), ConfigFile::default(), true),
        github,
        RecordingRunner::default(),
    );

    let summary = scheduler.run_cycle().await;

    assert!(summary.dry_run);
    assert_eq!(summary.updated, 1);
    assert!(scheduler.pipeline().runner().calls().is_empty());
}

#[tokio::test]
async fn poll_failures_accumulate_retries() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");

    let github = FakeGitHub::default();
    github.respond("acme/widgets", 500, None, "");
    github.respond("acme/widgets", 500, None, "");

    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), ConfigFile::default(), false),
        github,
        RecordingRunner::default(),
    );

    scheduler.run_cycle().await;
    scheduler.run_cycle().await;
    assert_eq!(scheduler.retry_count(), 2);

    let summary = scheduler.run_cycle().await;
    assert_eq!(summary.unchanged, 1);
    assert_eq!(scheduler.retry_count(), 0);
}

#[tokio::test]
async fn unreadable_root_skips_the_cycle() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("checkouts");
    checkout(&root, "acme/widgets");

    let (scheduler, _shutdown) = scheduler(
        config(&root, ConfigFile::default(), false),
        FakeGitHub::default(),
        RecordingRunner::default(),
    );
    fs::remove_dir_all(&root).unwrap();

    let summary = scheduler.run_cycle().await;

    assert!(summary.discovery_failed);
    assert!(summary.has_failures());
    assert!(scheduler.poller().client().requests().is_empty());
}

#[tokio::test]
async fn shutdown_interrupts_the_loop() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");

    let config = config(temp.path(), ConfigFile::default(), false)
        .with_intervals(Duration::from_secs(3600), Duration::ZERO);
    let (scheduler, shutdown) = scheduler(config, FakeGitHub::default(), RecordingRunner::default());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.send(true);
    });

    let finished = tokio::time::timeout(Duration::from_secs(5), scheduler.run()).await;

    assert!(finished.is_ok());
    assert_eq!(scheduler.poller().client().requests().len(), 1);
}

#[tokio::test]
async fn cycle_polls_every_repository_without_pausing() {
    let temp = TempDir::new().unwrap();
    checkout(temp.path(), "acme/widgets");
    checkout(temp.path(), "acme/gadgets");
    checkout(temp.path(), "acme/sprockets");

    let config = config(temp.path(), ConfigFile::default(), false)
        .with_intervals(Duration::ZERO, Duration::from_secs(1));
    let (scheduler, _shutdown) = scheduler(config, FakeGitHub::default(), RecordingRunner::default());

    let summary = tokio::time::timeout(Duration::from_millis(900), scheduler.run_cycle())
        .await
        .expect("cycle should not sleep between repositories");

    assert_eq!(summary.unchanged, 3);
    assert_eq!(summary.requested_delay, Duration::from_secs(1));
}

#[tokio::test]
async fn concurrent_polling_handles_every_repository() {
    let temp = TempDir::new().unwrap();
    let gadgets = checkout(temp.path(), "acme/gadgets");
    let widgets = checkout(temp.path(), "acme/widgets");
    checkout(temp.path(), "acme/sprockets");
    checkout(temp.path(), "globex/api");
    checkout(temp.path(), "globex/web");

    let push = r#"[{"type": "PushEvent", "id": "1"}]"#;
    let github = FakeGitHub::default();
    github.respond("acme/gadgets", 200, Some("\"g1\""), push);
    github.respond("acme/widgets", 200, Some("\"w1\""), push);
    github.respond("acme/sprockets", 502, None, "bad gateway");
    github.respond(
        "globex/web",
        200,
        Some("\"x1\""),
        r#"[{"type": "ForkEvent", "id": "2"}]"#,
    );

    let file = ConfigFile {
        concurrency: 3,
        ..ConfigFile::default()
    };
    let (scheduler, _shutdown) = scheduler(
        config(temp.path(), file, false),
        github,
        RecordingRunner::default(),
    );

    let summary = scheduler.run_cycle().await;

    assert_eq!(summary.repositories_discovered, 5);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.observed, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.poll_failures, 1);
    assert_eq!(scheduler.poller().client().requests().len(), 5);

    let calls = scheduler.pipeline().runner().calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls.iter().filter(|c| c.working_dir == gadgets).count(), 2);
    assert_eq!(calls.iter().filter(|c| c.working_dir == widgets).count(), 2);

    let registry = scheduler.registry();
    assert_eq!(registry.get(&key("acme/gadgets")).unwrap().cache_token, "\"g1\"");
    assert_eq!(registry.get(&key("acme/widgets")).unwrap().cache_token, "\"w1\"");
    assert_eq!(registry.get(&key("globex/web")).unwrap().cache_token, "\"x1\"");
    assert_eq!(registry.get(&key("acme/sprockets")).unwrap().cache_token, "");
}
