//! Turning drone output into a build link and posting it back to GitHub.

use tracing::info;

use crate::drone::BuildRef;
use crate::error::{Result, RhobotError};
use crate::github::GitHubApi;
use crate::webhook::RepoId;

const BUILD_STARTED_PREFIX: &str = "Starting build ";

/// Recovers the build from drone's `Starting build <repo>#<number>` line.
///
/// This text is not a stable contract of the drone client, so anything that
/// does not match exactly is rejected.
pub fn parse_build_started(output: &str) -> Result<BuildRef> {
    let malformed = || RhobotError::MalformedUpstreamOutput(output.to_string());

    let line = output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(BUILD_STARTED_PREFIX))
        .ok_or_else(malformed)?;

    let (repository, number) = line.rsplit_once('#').ok_or_else(malformed)?;
    if repository.is_empty() || repository.contains(char::is_whitespace) {
        return Err(malformed());
    }
    let number = number.parse::<u64>().map_err(|_| malformed())?;

    Ok(BuildRef {
        repository: repository.to_string(),
        number,
    })
}

/// Web UI link of a build: `<base>/<repository>/<number>`.
pub fn build_url(base_url: &str, build: &BuildRef) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        build.repository,
        build.number
    )
}

/// Text of the comment announcing a started build.
pub fn build_comment(build: &BuildRef, url: &str) -> String {
    format!("Started build {}: {}", build, url)
}

/// Posts the build link as a comment on the originating issue and returns the link.
pub async fn report_build(
    github: &dyn GitHubApi,
    repo: &RepoId,
    issue_number: u64,
    base_url: &str,
    build: &BuildRef,
) -> Result<String> {
    let url = build_url(base_url, build);
    github
        .post_comment(repo, issue_number, &build_comment(build, &url))
        .await?;
    info!("Reported {} on {}#{}", url, repo, issue_number);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PullRequestInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CommentRecorder {
        comments: Mutex<Vec<(String, u64, String)>>,
    }

    #[async_trait]
    impl GitHubApi for CommentRecorder {
        async fn is_collaborator(&self, _repo: &RepoId, _username: &str) -> Result<bool> {
            unreachable!("reporting never checks membership")
        }

        async fn pull_request(&self, _url: &str) -> Result<PullRequestInfo> {
            unreachable!("reporting never fetches pull requests")
        }

        async fn post_comment(&self, repo: &RepoId, issue_number: u64, body: &str) -> Result<()> {
            self.comments
                .lock()
                .unwrap()
                .push((repo.to_string(), issue_number, body.to_string()));
            Ok(())
        }
    }

    fn perf_build() -> BuildRef {
        BuildRef {
            repository: "rchain/perf-harness".to_string(),
            number: 42,
        }
    }

    #[test]
    fn parses_started_line() {
        let build = parse_build_started("Starting build rchain/perf-harness#42").unwrap();
        assert_eq!(build.repository, "rchain/perf-harness");
        assert_eq!(build.number, 42);
    }

    #[test]
    fn finds_started_line_among_others() {
        let output = "Promoting build\nStarting build rchain/perf-harness#7\n";
        assert_eq!(parse_build_started(output).unwrap().number, 7);
    }

    #[test]
    fn rejects_unexpected_output() {
        for output in [
            "",
            "Restarting build rchain/perf-harness#42",
            "Starting build rchain/perf-harness",
            "Starting build rchain/perf-harness#",
            "Starting build rchain/perf-harness#forty-two",
            "Starting build #42",
            "Starting build rchain perf#42",
        ] {
            assert!(
                matches!(
                    parse_build_started(output),
                    Err(RhobotError::MalformedUpstreamOutput(_))
                ),
                "accepted {:?}",
                output
            );
        }
    }

    #[test]
    fn url_joins_base_repo_and_number() {
        let build = perf_build();
        assert_eq!(
            build_url("https://drone.example.org/", &build),
            "https://drone.example.org/rchain/perf-harness/42"
        );
        assert_eq!(
            build_url("https://drone.example.org", &build),
            "https://drone.example.org/rchain/perf-harness/42"
        );
    }

    #[tokio::test]
    async fn comment_names_the_build_and_links_it() {
        let github = CommentRecorder::default();
        let repo = RepoId {
            owner: "rchain".to_string(),
            name: "rchain".to_string(),
        };

        let url = report_build(&github, &repo, 7, "https://drone.example.org", &perf_build())
            .await
            .unwrap();

        assert_eq!(url, "https://drone.example.org/rchain/perf-harness/42");
        let comments = github.comments.lock().unwrap();
        assert_eq!(
            comments.as_slice(),
            [(
                "rchain/rchain".to_string(),
                7,
                "Started build rchain/perf-harness#42: \
                 https://drone.example.org/rchain/perf-harness/42"
                    .to_string()
            )]
        );
    }
}
