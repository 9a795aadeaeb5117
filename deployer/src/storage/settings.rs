//! Settings file management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable naming a settings file
pub const CONFIG_ENV_VAR: &str = "SPARKDEPLOY_CONFIG";

/// Settings file picked up from the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "sparkdeploy.json";

/// sparkdeploy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,

    /// Directory for a rolling log file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Application directory on the target host
    #[serde(default = "default_app_dir")]
    pub app_dir: String,

    /// Registry organisation images are pulled from
    #[serde(default = "default_registry_org")]
    pub registry_org: String,

    /// Default cloud provider
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub compose: ComposeSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub terraform: TerraformSettings,

    #[serde(default)]
    pub checks: CheckSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_app_dir() -> String {
    "/opt/sparknode".to_string()
}

fn default_registry_org() -> String {
    "sparknode".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            app_dir: default_app_dir(),
            registry_org: default_registry_org(),
            provider: None,
            compose: ComposeSettings::default(),
            ssh: SshSettings::default(),
            health: HealthSettings::default(),
            lock: LockSettings::default(),
            terraform: TerraformSettings::default(),
            checks: CheckSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, `SPARKDEPLOY_CONFIG`, or
    /// `./sparkdeploy.json`, falling back to defaults when none exist.
    /// An explicitly named file that is missing is an error.
    pub async fn load(explicit: Option<&Path>) -> Result<Settings, DeployError> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        let named = explicit.map(Path::to_path_buf).or(env_path);

        if let Some(path) = named {
            let file = File::new(&path);
            if !file.exists().await {
                return Err(DeployError::ConfigError(format!(
                    "Settings file not found: {}",
                    path.display()
                )));
            }
            debug!("Loading settings from {}", path.display());
            return file.read_json::<Settings>().await;
        }

        let file = File::new(DEFAULT_CONFIG_FILE);
        if file.exists().await {
            debug!("Loading settings from ./{}", DEFAULT_CONFIG_FILE);
            return file.read_json::<Settings>().await;
        }

        Ok(Settings::default())
    }
}

/// Docker Compose project settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeSettings {
    /// Compose file, relative to the app directory
    #[serde(default = "default_compose_file")]
    pub file: String,

    /// Services whose images are pulled on deploy
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Service the migration command runs in
    #[serde(default = "default_backend_service")]
    pub backend_service: String,

    /// Migration command run inside the backend service
    #[serde(default = "default_migrate_command")]
    pub migrate_command: String,

    /// Database service name
    #[serde(default = "default_db_service")]
    pub db_service: String,

    #[serde(default = "default_db_user")]
    pub db_user: String,

    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// Prune dangling images after a successful deploy
    #[serde(default = "default_true")]
    pub prune_images: bool,
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

fn default_services() -> Vec<String> {
    vec![
        "backend".to_string(),
        "celery".to_string(),
        "frontend".to_string(),
    ]
}

fn default_backend_service() -> String {
    "backend".to_string()
}

fn default_migrate_command() -> String {
    "alembic upgrade head".to_string()
}

fn default_db_service() -> String {
    "postgres".to_string()
}

fn default_db_user() -> String {
    "sparknode".to_string()
}

fn default_db_name() -> String {
    "sparknode".to_string()
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            file: default_compose_file(),
            services: default_services(),
            backend_service: default_backend_service(),
            migrate_command: default_migrate_command(),
            db_service: default_db_service(),
            db_user: default_db_user(),
            db_name: default_db_name(),
            prune_images: true,
        }
    }
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Value passed to `-o StrictHostKeyChecking=`
    #[serde(default = "default_host_key_checking")]
    pub strict_host_key_checking: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: default_host_key_checking(),
            user: None,
            key_path: None,
        }
    }
}

/// Post-restart health gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Endpoint polled from the host itself
    #[serde(default = "default_health_url")]
    pub url: String,

    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_health_url() -> String {
    "http://localhost:8000/health".to_string()
}

fn default_health_attempts() -> u32 {
    12
}

fn default_health_interval() -> u64 {
    10
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            url: default_health_url(),
            attempts: default_health_attempts(),
            interval_secs: default_health_interval(),
        }
    }
}

/// Deployment lease settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// A lease older than this is considered abandoned
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_stale_after() -> u64 {
    3600
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}

/// Terraform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformSettings {
    /// Directory holding one module directory per provider
    #[serde(default = "default_tf_root")]
    pub root_dir: PathBuf,

    /// Environment name used to scope the state path
    #[serde(default = "default_tf_environment")]
    pub environment: String,

    /// Resource address applied when only the VM is targeted
    #[serde(default)]
    pub vm_resource: Option<String>,

    /// Terraform binary
    #[serde(default = "default_tf_binary")]
    pub binary: String,
}

fn default_tf_root() -> PathBuf {
    PathBuf::from("infra/terraform")
}

fn default_tf_environment() -> String {
    "prod".to_string()
}

fn default_tf_binary() -> String {
    "terraform".to_string()
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            root_dir: default_tf_root(),
            environment: default_tf_environment(),
            vm_resource: None,
            binary: default_tf_binary(),
        }
    }
}

/// Standalone health-check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSettings {
    /// Containers that must be running
    #[serde(default = "default_containers")]
    pub containers: Vec<String>,

    #[serde(default = "default_warn_percent")]
    pub disk_warn_percent: f32,

    #[serde(default = "default_crit_percent")]
    pub disk_crit_percent: f32,

    #[serde(default = "default_warn_percent")]
    pub memory_warn_percent: f32,

    #[serde(default = "default_crit_percent")]
    pub memory_crit_percent: f32,

    /// Certificates expiring in fewer days than this warn
    #[serde(default = "default_cert_warn_days")]
    pub cert_warn_days: i64,

    /// Domain whose TLS certificate is checked
    #[serde(default)]
    pub domain: Option<String>,

    /// Base URL for probing `/health` and `/api/v1/health` from this machine.
    /// Unset, the endpoints are curled on the host at `host_base_url`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Application address as seen from the host itself
    #[serde(default = "default_host_base_url")]
    pub host_base_url: String,

    /// Container running PostgreSQL
    #[serde(default = "default_postgres_container")]
    pub postgres_container: String,

    /// Container running Redis
    #[serde(default = "default_redis_container")]
    pub redis_container: String,
}

fn default_containers() -> Vec<String> {
    vec![
        "sparknode-backend".to_string(),
        "sparknode-celery".to_string(),
        "sparknode-frontend".to_string(),
        "sparknode-postgres".to_string(),
        "sparknode-redis".to_string(),
    ]
}

fn default_warn_percent() -> f32 {
    80.0
}

fn default_crit_percent() -> f32 {
    90.0
}

fn default_cert_warn_days() -> i64 {
    14
}

fn default_host_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_postgres_container() -> String {
    "sparknode-postgres".to_string()
}

fn default_redis_container() -> String {
    "sparknode-redis".to_string()
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            containers: default_containers(),
            disk_warn_percent: default_warn_percent(),
            disk_crit_percent: default_crit_percent(),
            memory_warn_percent: default_warn_percent(),
            memory_crit_percent: default_crit_percent(),
            cert_warn_days: default_cert_warn_days(),
            domain: None,
            base_url: None,
            host_base_url: default_host_base_url(),
            postgres_container: default_postgres_container(),
            redis_container: default_redis_container(),
        }
    }
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bearer token required on POST endpoints
    #[serde(default)]
    pub api_token: Option<String>,

    /// Finished attempts kept in memory
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8090
}

fn default_history_limit() -> usize {
    50
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            api_token: None,
            history_limit: default_history_limit(),
        }
    }
}
