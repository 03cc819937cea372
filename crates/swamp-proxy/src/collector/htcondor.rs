//! HTCondor collector queried through `condor_status`.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use super::error::{CollectorError, CollectorResult};
use super::{ViewerCollector, ViewerData, ViewerInstanceStatus};

const VIEWER_DATA_ATTRIBUTES: &[&str] = &["SWAMP_vmu_viewer_vmip", "SWAMP_vmu_viewer_projectid"];
const VIEWER_INSTANCE_ATTRIBUTES: &[&str] = &[
    "SWAMP_vmu_viewer_state",
    "SWAMP_vmu_viewer_status",
    "SWAMP_vmu_viewer_url_uuid",
];

/// Collector client that shells out to `condor_status`.
#[derive(Debug, Clone)]
pub struct HtCondorCollector {
    /// Path or name of the `condor_status` binary.
    binary: String,
    /// Collector host passed via `-pool`.
    pool_host: String,
    /// Upper bound for a single query.
    timeout: Duration,
}

impl HtCondorCollector {
    pub fn new(binary: impl Into<String>, pool_host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            pool_host: pool_host.into(),
            timeout,
        }
    }

    /// Arguments for an autoformat query of `attributes` on ads matching `attribute == value`.
    fn query_args(&self, attributes: &[&str], attribute: &str, value: &str) -> Vec<String> {
        let mut args = vec![
            "-pool".to_string(),
            self.pool_host.clone(),
            "-any".to_string(),
            "-af:V,".to_string(),
        ];
        args.extend(attributes.iter().map(|a| a.to_string()));
        args.push("-constraint".to_string());
        args.push(format!("{attribute}==\"{value}\""));
        args
    }

    /// Run `condor_status` and return its stdout lines.
    async fn run(&self, args: Vec<String>) -> CollectorResult<Vec<String>> {
        debug!("running {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CollectorError::Timeout {
                command: self.binary.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| CollectorError::Spawn {
                command: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CollectorError::CommandFailed {
                command: self.binary.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl ViewerCollector for HtCondorCollector {
    async fn get_viewer_data(&self, proxy_id: &str) -> CollectorResult<ViewerData> {
        validate_identifier(proxy_id)?;
        let args = self.query_args(VIEWER_DATA_ATTRIBUTES, "SWAMP_vmu_viewer_url_uuid", proxy_id);
        let lines = self.run(args).await?;
        Ok(parse_viewer_data(&lines))
    }

    async fn get_viewer_instance(
        &self,
        viewer_instance_uuid: &str,
    ) -> CollectorResult<Option<ViewerInstanceStatus>> {
        validate_identifier(viewer_instance_uuid)?;
        let args = self.query_args(
            VIEWER_INSTANCE_ATTRIBUTES,
            "SWAMP_vmu_viewer_instance_uuid",
            viewer_instance_uuid,
        );
        let lines = self.run(args).await?;
        parse_viewer_instance(viewer_instance_uuid, &lines)
    }
}

/// Identifiers end up inside a ClassAd string literal.
fn validate_identifier(value: &str) -> CollectorResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(CollectorError::InvalidIdentifier(value.to_string()))
    }
}

/// Split one `-af:V,` line into cleaned fields. Undefined or empty values become `None`.
fn split_fields(line: &str) -> Vec<Option<String>> {
    line.split(',')
        .map(|field| field.trim().replace('"', ""))
        .map(|field| {
            if field.is_empty() || field == "undefined" {
                None
            } else {
                Some(field)
            }
        })
        .collect()
}

fn first_line(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
}

fn parse_viewer_data(lines: &[String]) -> ViewerData {
    let Some(line) = first_line(lines) else {
        return ViewerData::default();
    };

    let mut fields = split_fields(line).into_iter();
    ViewerData {
        vm_address: fields.next().flatten(),
        project_id: fields.next().flatten(),
    }
}

fn parse_viewer_instance(
    viewer_instance_uuid: &str,
    lines: &[String],
) -> CollectorResult<Option<ViewerInstanceStatus>> {
    let Some(line) = first_line(lines) else {
        return Ok(None);
    };

    let fields = split_fields(line);
    if fields.len() != VIEWER_INSTANCE_ATTRIBUTES.len() {
        return Err(CollectorError::MalformedOutput(line.to_string()));
    }

    let mut fields = fields.into_iter();
    Ok(Some(ViewerInstanceStatus {
        viewer_instance_uuid: viewer_instance_uuid.to_string(),
        state: fields.next().flatten(),
        status: fields.next().flatten(),
        proxy_url: fields.next().flatten(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &str) -> Vec<String> {
        raw.lines().map(str::to_string).collect()
    }

    #[test]
    fn builds_constraint_arguments() {
        let collector = HtCondorCollector::new("condor_status", "collector.example", Duration::from_secs(5));
        let args = collector.query_args(VIEWER_DATA_ATTRIBUTES, "SWAMP_vmu_viewer_url_uuid", "proxy-42");
        assert_eq!(
            args,
            vec![
                "-pool",
                "collector.example",
                "-any",
                "-af:V,",
                "SWAMP_vmu_viewer_vmip",
                "SWAMP_vmu_viewer_projectid",
                "-constraint",
                "SWAMP_vmu_viewer_url_uuid==\"proxy-42\"",
            ]
        );
    }

    #[test]
    fn parses_viewer_data_line() {
        let data = parse_viewer_data(&lines("\"10.1.1.1\", \"proj-9\"\n"));
        assert_eq!(data.vm_address.as_deref(), Some("10.1.1.1"));
        assert_eq!(data.project_id.as_deref(), Some("proj-9"));
    }

    #[test]
    fn missing_vm_address_is_none() {
        let data = parse_viewer_data(&lines("undefined, \"proj-9\""));
        assert_eq!(data.vm_address, None);
        assert_eq!(data.project_id.as_deref(), Some("proj-9"));

        let empty = parse_viewer_data(&[]);
        assert_eq!(empty, ViewerData::default());
    }

    #[test]
    fn parses_viewer_instance_line() {
        let status = parse_viewer_instance("inst-1", &lines("\"2\", \"Launching\", \"proxy-abc\""))
            .unwrap()
            .unwrap();
        assert_eq!(status.state.as_deref(), Some("2"));
        assert_eq!(status.status.as_deref(), Some("Launching"));
        assert_eq!(status.proxy_url.as_deref(), Some("proxy-abc"));

        assert!(parse_viewer_instance("inst-1", &[]).unwrap().is_none());
        assert!(matches!(
            parse_viewer_instance("inst-1", &lines("\"2\"")),
            Err(CollectorError::MalformedOutput(_))
        ));
    }

    #[test]
    fn rejects_identifiers_that_break_constraints() {
        assert!(validate_identifier("proxy-1a2b_c.d").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("proxy\" || true || \"").is_err());
        assert!(validate_identifier("proxy 1").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let collector = HtCondorCollector::new(
            "/nonexistent/condor_status",
            "collector.example",
            Duration::from_secs(5),
        );
        let err = collector.get_viewer_data("proxy-1").await.unwrap_err();
        assert!(matches!(err, CollectorError::Spawn { .. }));
    }
}
