//! Plain `docker` command lines (outside the compose project)

use crate::remote::shell_quote;

/// Remove dangling images left behind by a pull
pub fn prune_images() -> String {
    "docker image prune -f".to_string()
}

/// Prints `true` when the container is running
pub fn container_running(name: &str) -> String {
    format!(
        "docker inspect -f '{{{{.State.Running}}}}' {}",
        shell_quote(name)
    )
}

/// PostgreSQL liveness inside its container
pub fn pg_isready(container: &str, user: &str) -> String {
    format!(
        "docker exec {} pg_isready -U {}",
        shell_quote(container),
        shell_quote(user)
    )
}

/// Redis liveness inside its container; prints `PONG`
pub fn redis_ping(container: &str) -> String {
    format!("docker exec {} redis-cli ping", shell_quote(container))
}

/// Interpret the output of [`container_running`]
pub fn parse_running(stdout: &str) -> bool {
    stdout.trim() == "true"
}
