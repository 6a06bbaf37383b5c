use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use broker_config::{
    Config, DEFAULT_MAX_CONCURRENT_REQUESTS, SocketEndpoint, default_log_filter,
    default_log_format, default_socket_endpoint,
};

// Scenarios run on parallel threads and share the process environment.
static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
struct Sources {
    args: Vec<OsString>,
    restore_env: Vec<(String, Option<OsString>)>,
    outcome: Option<Result<Config, String>>,
}

/// Collects configuration sources for one scenario and loads them once.
struct Harness {
    _env_lock: MutexGuard<'static, ()>,
    dir: TempDir,
    sources: RefCell<Sources>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let sources = Sources {
            args: vec![OsString::from("brokerd")],
            ..Sources::default()
        };
        Self {
            _env_lock: ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner),
            dir,
            sources: RefCell::new(sources),
        }
    }

    fn config_file(&self, toml: &str) {
        let path = self.dir.path().join("brokerd.toml");
        fs::write(&path, toml).unwrap_or_else(|error| panic!("write config: {error}"));
        self.flag("--config-path", path.into_os_string());
    }

    fn flag(&self, name: &str, value: impl Into<OsString>) {
        let args = &mut self.sources.borrow_mut().args;
        args.push(OsString::from(name));
        args.push(value.into());
    }

    fn env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe on edition 2024; `Drop` restores it.
        unsafe { std::env::set_var(key, value) };
        self.sources
            .borrow_mut()
            .restore_env
            .push((key.to_owned(), previous));
    }

    fn loaded(&self) -> Config {
        let mut sources = self.sources.borrow_mut();
        if sources.outcome.is_none() {
            let outcome =
                Config::load_from_iter(sources.args.clone()).map_err(|error| error.to_string());
            sources.outcome = Some(outcome);
        }
        match sources.outcome.as_ref() {
            Some(Ok(config)) => config.clone(),
            Some(Err(error)) => panic!("configuration failed to load: {error}"),
            None => unreachable!("outcome recorded above"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for (key, previous) in self.sources.get_mut().restore_env.drain(..).rev() {
            match previous {
                Some(value) => unsafe { std::env::set_var(&key, value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

fn endpoint(socket: &str) -> SocketEndpoint {
    socket
        .parse()
        .unwrap_or_else(|error| panic!("invalid socket '{socket}': {error}"))
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the daemon socket to \"{socket}\"")]
fn given_configuration_file(harness: &Harness, socket: String) {
    let toml = match endpoint(&socket) {
        SocketEndpoint::Unix { path } => {
            format!("daemon_socket = {{ transport = \"unix\", path = \"{path}\" }}\n")
        }
        SocketEndpoint::Tcp { host, port } => format!(
            "daemon_socket = {{ transport = \"tcp\", host = \"{host}\", port = {port} }}\n"
        ),
    };
    harness.config_file(&toml);
}

#[given("the environment overrides the daemon socket to \"{socket}\"")]
fn given_environment_override(harness: &Harness, socket: String) {
    harness.env("BROKER_DAEMON_SOCKET", &socket);
}

#[when("the CLI sets the daemon socket to \"{socket}\"")]
fn when_cli_override(harness: &Harness, socket: String) {
    harness.flag("--daemon-socket", socket);
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.loaded();
}

#[then("loading the configuration resolves the daemon socket to \"{socket}\"")]
fn then_resolved_socket(harness: &Harness, socket: String) {
    assert_eq!(harness.loaded().daemon_socket(), &endpoint(&socket));
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.loaded();
    assert_eq!(config.daemon_socket(), &default_socket_endpoint());
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(
        config.max_concurrent_requests,
        DEFAULT_MAX_CONCURRENT_REQUESTS
    );
    assert!(!config.cache_include_secrets);
}

#[given("a configuration file limiting concurrency to {limit}")]
fn given_concurrency_file(harness: &Harness, limit: usize) {
    harness.config_file(&format!("max_concurrent_requests = {limit}\n"));
}

#[when("the CLI limits concurrency to {limit}")]
fn when_cli_limits_concurrency(harness: &Harness, limit: usize) {
    harness.flag("--max-concurrent-requests", limit.to_string());
}

#[then("loading the configuration admits {limit} concurrent requests")]
fn then_concurrency_limit(harness: &Harness, limit: usize) {
    assert_eq!(harness.loaded().limits().max_concurrent_requests, limit);
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}
