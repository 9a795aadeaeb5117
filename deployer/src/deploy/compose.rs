//! Docker Compose command lines run on the target host

use crate::remote::shell_quote;
use crate::storage::settings::ComposeSettings;

/// Builds `docker compose` invocations for the project in `app_dir`
#[derive(Debug, Clone)]
pub struct Compose<'a> {
    app_dir: &'a str,
    settings: &'a ComposeSettings,
}

impl<'a> Compose<'a> {
    pub fn new(app_dir: &'a str, settings: &'a ComposeSettings) -> Self {
        Self { app_dir, settings }
    }

    fn cd(&self) -> String {
        format!("cd {}", shell_quote(self.app_dir))
    }

    fn docker_compose(&self) -> String {
        format!("docker compose -f {}", shell_quote(&self.settings.file))
    }

    fn base(&self) -> String {
        format!("{} && {}", self.cd(), self.docker_compose())
    }

    /// Pull images of the deployable services
    pub fn pull(&self) -> String {
        let services: Vec<String> = self
            .settings
            .services
            .iter()
            .map(|s| shell_quote(s))
            .collect();
        format!("{} pull {}", self.base(), services.join(" "))
    }

    /// Recreate changed containers, leaving unaffected ones running
    pub fn up(&self) -> String {
        format!("{} up -d --remove-orphans", self.base())
    }

    /// Run the schema migration inside the backend service
    pub fn migrate(&self) -> String {
        format!(
            "{} exec -T {} {}",
            self.base(),
            shell_quote(&self.settings.backend_service),
            self.settings.migrate_command
        )
    }

    /// Dump the database into a gzipped file. A failed dump leaves no file
    /// behind.
    pub fn dump_database(&self, backup_path: &str, backups_dir: &str) -> String {
        let pipeline = format!(
            "{} exec -T {} pg_dump -U {} {} | gzip > {}",
            self.base(),
            shell_quote(&self.settings.db_service),
            shell_quote(&self.settings.db_user),
            shell_quote(&self.settings.db_name),
            shell_quote(backup_path)
        );
        format!(
            "mkdir -p {dir} && {{ bash -o pipefail -c {cmd} || {{ rm -f {file}; exit 1; }}; }}",
            dir = shell_quote(backups_dir),
            cmd = shell_quote(&pipeline),
            file = shell_quote(backup_path)
        )
    }

    /// Restore a gzipped dump into the database. The `cd` comes before the
    /// pipe so the dump feeds psql.
    pub fn restore_database(&self, backup_path: &str) -> String {
        let pipeline = format!(
            "{} && gunzip -c {} | {} exec -T {} psql -q -v ON_ERROR_STOP=1 -U {} -d {}",
            self.cd(),
            shell_quote(backup_path),
            self.docker_compose(),
            shell_quote(&self.settings.db_service),
            shell_quote(&self.settings.db_user),
            shell_quote(&self.settings.db_name)
        );
        format!("bash -o pipefail -c {}", shell_quote(&pipeline))
    }
}
