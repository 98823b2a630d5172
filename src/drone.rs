//! Drone CI control through the `drone` command line client.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{Result, RhobotError};
use crate::report::parse_build_started;
use crate::utils::run_command;

/// A Drone server address and the token used against it
#[derive(Clone, PartialEq, Eq)]
pub struct DroneServer {
    pub url: String,
    pub token: String,
}

impl fmt::Debug for DroneServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DroneServer")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// A repository's pipeline on a specific Drone server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub repository: String,
    pub server: DroneServer,
}

impl Pipeline {
    pub fn new(repository: &str, server: DroneServer) -> Self {
        Self {
            repository: repository.to_string(),
            server,
        }
    }
}

/// A specific build of a repository on Drone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRef {
    pub repository: String,
    pub number: u64,
}

impl fmt::Display for BuildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

/// Build parameters passed as `--param=KEY=VALUE`
pub type BuildParams = Vec<(String, String)>;

/// Operations on the external CI server.
#[async_trait]
pub trait BuildSystem: Send + Sync {
    /// Most recent build, optionally restricted to one trigger event.
    ///
    /// Fails with [`RhobotError::NoPreviousBuild`] when there is none.
    async fn last_build(&self, pipeline: &Pipeline, event: Option<&str>) -> Result<BuildRef>;

    async fn restart_build(&self, pipeline: &Pipeline, number: u64) -> Result<String>;

    async fn start_build(
        &self,
        pipeline: &Pipeline,
        number: u64,
        params: &BuildParams,
    ) -> Result<String>;

    async fn promote_build(
        &self,
        pipeline: &Pipeline,
        number: u64,
        target: &str,
        params: &BuildParams,
    ) -> Result<String>;
}

/// Parses the output of `drone build ls --format={{.Number}} --limit=1`.
pub fn parse_build_number(repository: &str, output: &str) -> Result<BuildRef> {
    let output = output.trim();
    if output.is_empty() {
        return Err(RhobotError::NoPreviousBuild {
            repository: repository.to_string(),
        });
    }

    let number = output
        .parse::<u64>()
        .map_err(|_| RhobotError::MalformedUpstreamOutput(output.to_string()))?;

    Ok(BuildRef {
        repository: repository.to_string(),
        number,
    })
}

/// Invokes the `drone` executable against the pipeline's server
#[derive(Debug, Clone)]
pub struct DroneCli {
    program: PathBuf,
    timeout: Duration,
}

impl DroneCli {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, pipeline: &Pipeline, args: Vec<String>) -> Result<String> {
        let envs = [
            ("DRONE_SERVER", pipeline.server.url.as_str()),
            ("DRONE_TOKEN", pipeline.server.token.as_str()),
        ];
        run_command(&self.program, &args, envs, self.timeout)
            .await
            .map_err(|message| RhobotError::BuildDispatch {
                repository: pipeline.repository.clone(),
                message,
            })
    }
}

fn with_params(mut args: Vec<String>, params: &BuildParams) -> Vec<String> {
    args.extend(params.iter().map(|(k, v)| format!("--param={}={}", k, v)));
    args
}

#[async_trait]
impl BuildSystem for DroneCli {
    async fn last_build(&self, pipeline: &Pipeline, event: Option<&str>) -> Result<BuildRef> {
        let mut args = vec![
            "build".to_string(),
            "ls".to_string(),
            "--format={{.Number}}".to_string(),
            "--limit=1".to_string(),
        ];
        if let Some(event) = event {
            args.push(format!("--event={}", event));
        }
        args.push(pipeline.repository.clone());

        let output = self.run(pipeline, args).await?;
        parse_build_number(&pipeline.repository, &output)
    }

    async fn restart_build(&self, pipeline: &Pipeline, number: u64) -> Result<String> {
        let args = vec![
            "build".to_string(),
            "restart".to_string(),
            pipeline.repository.clone(),
            number.to_string(),
        ];
        self.run(pipeline, args).await
    }

    async fn start_build(
        &self,
        pipeline: &Pipeline,
        number: u64,
        params: &BuildParams,
    ) -> Result<String> {
        let args = vec![
            "build".to_string(),
            "start".to_string(),
            pipeline.repository.clone(),
            number.to_string(),
        ];
        self.run(pipeline, with_params(args, params)).await
    }

    async fn promote_build(
        &self,
        pipeline: &Pipeline,
        number: u64,
        target: &str,
        params: &BuildParams,
    ) -> Result<String> {
        let args = vec![
            "build".to_string(),
            "promote".to_string(),
            pipeline.repository.clone(),
            number.to_string(),
            target.to_string(),
        ];
        self.run(pipeline, with_params(args, params)).await
    }
}

/// Restarts the latest build of `pipeline`, returning drone's output.
pub async fn restart_latest(builds: &dyn BuildSystem, pipeline: &Pipeline) -> Result<String> {
    let last = builds.last_build(pipeline, None).await?;
    info!("Restarting {}", last);
    builds.restart_build(pipeline, last.number).await
}

/// Promotes the latest `event` build of `pipeline` and returns the new build.
pub async fn promote_latest(
    builds: &dyn BuildSystem,
    pipeline: &Pipeline,
    event: Option<&str>,
    target: &str,
    params: &BuildParams,
) -> Result<BuildRef> {
    let last = builds.last_build(pipeline, event).await?;
    info!("Promoting {} to {}", last, target);
    let output = builds
        .promote_build(pipeline, last.number, target, params)
        .await?;
    parse_build_started(&output)
}

/// Restarts the latest build of every pipeline in order.
///
/// A failure on one pipeline does not stop the others; each outcome is
/// logged and returned alongside its repository.
pub async fn restart_all(
    builds: &dyn BuildSystem,
    pipelines: &[Pipeline],
) -> Vec<(String, Result<String>)> {
    let mut outcomes = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let outcome = restart_latest(builds, pipeline).await;
        match &outcome {
            Ok(output) => info!("Restarted {}: {}", pipeline.repository, output),
            Err(e @ RhobotError::NoPreviousBuild { .. }) => warn!("{}", e),
            Err(e) => error!("Restarting {} failed: {}", pipeline.repository, e),
        }
        outcomes.push((pipeline.repository.clone(), outcome));
    }
    outcomes
}
