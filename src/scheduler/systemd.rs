//! systemd service and timer units for scheduled backups.
//!
//! Each backup type with an enabled schedule gets a oneshot service that runs
//! `nova-vault backup scheduled --type <key>` and a timer that fires it.

use crate::registry::{BackupTypeConfig, BackupTypeRegistry, ScheduleSpec};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Render a schedule as a systemd `OnCalendar=` expression
pub fn on_calendar(schedule: &ScheduleSpec) -> Result<String> {
    if schedule.hour > 23 {
        return Err(Error::Scheduling {
            reason: format!("hour {} is out of range 0-23", schedule.hour),
        });
    }
    if schedule.minute > 59 {
        return Err(Error::Scheduling {
            reason: format!("minute {} is out of range 0-59", schedule.minute),
        });
    }

    let time = format!("*-*-* {:02}:{:02}:00", schedule.hour, schedule.minute);
    match schedule.day_of_week {
        None => Ok(time),
        Some(day) => match WEEKDAYS.get(day as usize) {
            Some(name) => Ok(format!("{} {}", name, time)),
            None => Err(Error::Scheduling {
                reason: format!("day_of_week {} is out of range 0-6", day),
            }),
        },
    }
}

/// Files written for one backup type
#[derive(Debug)]
pub struct ScheduleOutput {
    pub backup_type: String,
    pub service_path: PathBuf,
    pub timer_path: PathBuf,
    pub install_commands: Vec<String>,
}

/// Generates timer units from the backup-type table
#[derive(Debug)]
pub struct SystemdScheduler {
    output_dir: PathBuf,
    executable_path: PathBuf,
    config_path: Option<PathBuf>,
    randomized_delay_sec: u32,
}

impl SystemdScheduler {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            executable_path: PathBuf::from("/usr/local/bin/nova-vault"),
            config_path: None,
            randomized_delay_sec: 300,
        }
    }

    pub fn with_executable(mut self, executable_path: &Path) -> Self {
        self.executable_path = executable_path.to_path_buf();
        self
    }

    /// Pass `--config <path>` to the scheduled command
    pub fn with_config(mut self, config_path: &Path) -> Self {
        self.config_path = Some(config_path.to_path_buf());
        self
    }

    /// `nova-vault-backup-<key>` with underscores turned into dashes
    pub fn unit_name(backup_type: &str) -> String {
        format!("nova-vault-backup-{}", backup_type.replace('_', "-"))
    }

    /// Write units for every type with an enabled schedule
    pub async fn generate(&self, registry: &BackupTypeRegistry) -> Result<Vec<ScheduleOutput>> {
        let systemd_dir = self.output_dir.join("systemd");
        fs::create_dir_all(&systemd_dir).await?;

        let mut outputs = Vec::new();
        for config in registry.iter() {
            let Some(schedule) = config.schedule.as_ref().filter(|s| s.enabled) else {
                debug!("No schedule for backup type '{}'", config.key);
                continue;
            };

            let name = Self::unit_name(&config.key);
            let service_path = systemd_dir.join(format!("{}.service", name));
            let timer_path = systemd_dir.join(format!("{}.timer", name));

            fs::write(&service_path, self.service_unit(config)).await?;
            fs::write(&timer_path, self.timer_unit(config, schedule)?).await?;
            info!("Generated systemd units for '{}'", config.key);

            outputs.push(ScheduleOutput {
                backup_type: config.key.clone(),
                install_commands: vec![
                    format!("sudo cp {} /etc/systemd/system/", service_path.display()),
                    format!("sudo cp {} /etc/systemd/system/", timer_path.display()),
                    "sudo systemctl daemon-reload".to_string(),
                    format!("sudo systemctl enable --now {}.timer", name),
                ],
                service_path,
                timer_path,
            });
        }

        Ok(outputs)
    }

    fn service_unit(&self, config: &BackupTypeConfig) -> String {
        let config_arg = match &self.config_path {
            Some(path) => format!(" --config {}", path.display()),
            None => String::new(),
        };

        format!(
            r#"[Unit]
Description=nova-vault {} backup
After=network.target

[Service]
Type=oneshot
ExecStart={}{} backup scheduled --type {}

# Logging
StandardOutput=journal
StandardError=journal
SyslogIdentifier={}
"#,
            config.display_name(),
            self.executable_path.display(),
            config_arg,
            config.key,
            Self::unit_name(&config.key)
        )
    }

    fn timer_unit(&self, config: &BackupTypeConfig, schedule: &ScheduleSpec) -> Result<String> {
        Ok(format!(
            r#"[Unit]
Description=Timer for nova-vault {} backup
Requires={}.service

[Timer]
OnCalendar={}
Persistent=true
RandomizedDelaySec={}

[Install]
WantedBy=timers.target
"#,
            config.display_name(),
            Self::unit_name(&config.key),
            on_calendar(schedule)?,
            self.randomized_delay_sec
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn at(hour: u8, minute: u8, day_of_week: Option<u8>) -> ScheduleSpec {
        ScheduleSpec {
            enabled: true,
            hour,
            minute,
            day_of_week,
        }
    }

    #[test]
    fn test_on_calendar() -> Result<()> {
        assert_eq!(on_calendar(&at(3, 0, Some(1)))?, "Mon *-*-* 03:00:00");
        assert_eq!(on_calendar(&at(23, 45, None))?, "*-*-* 23:45:00");
        assert_eq!(on_calendar(&at(0, 5, Some(0)))?, "Sun *-*-* 00:05:00");

        assert!(on_calendar(&at(24, 0, None)).is_err());
        assert!(on_calendar(&at(1, 60, None)).is_err());
        assert!(on_calendar(&at(1, 0, Some(7))).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_only_enabled_schedules() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let types: BTreeMap<String, BackupTypeConfig> = serde_yaml::from_str(
            r#"
essential_data:
  models: [my_app.essential_model]
  schedule: {hour: 3, minute: 0, day_of_week: 1}
all_models:
  models: "*"
paused:
  schedule: {enabled: false, hour: 1}
"#,
        )?;
        let registry = BackupTypeRegistry::new(types, 30);

        let scheduler = SystemdScheduler::new(temp_dir.path()).with_config(Path::new("/etc/nova-vault/config.yaml"));
        let outputs = scheduler.generate(&registry).await?;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].backup_type, "essential_data");

        let service = std::fs::read_to_string(&outputs[0].service_path)?;
        let timer = std::fs::read_to_string(&outputs[0].timer_path)?;
        assert!(service.contains(
            "ExecStart=/usr/local/bin/nova-vault --config /etc/nova-vault/config.yaml backup scheduled --type essential_data"
        ));
        assert!(service.contains("Description=nova-vault Essential Data backup"));
        assert!(timer.contains("OnCalendar=Mon *-*-* 03:00:00"));
        assert!(timer.contains("Requires=nova-vault-backup-essential-data.service"));
        Ok(())
    }
}
