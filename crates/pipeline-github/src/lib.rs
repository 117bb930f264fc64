//! [`SourceRepoPort`] adapter over GitHub via `octocrab`: branch creation
//! from a base ref, create-or-update file contents, and create-or-update
//! pull request by head branch.

use async_trait::async_trait;
use octocrab::models::repos::Object;
use octocrab::params::repos::Reference;
use octocrab::Octocrab;
use pipeline_core::error::{Error, Result};
use pipeline_core::ports::SourceRepoPort;

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub token: String,
}

impl GitHubConfig {
    pub fn from_env() -> Result<Self> {
        let owner = std::env::var("GITHUB_OWNER")
            .map_err(|_| Error::RepoUnavailable("GITHUB_OWNER is not set".to_string()))?;
        let repo = std::env::var("GITHUB_REPO")
            .map_err(|_| Error::RepoUnavailable("GITHUB_REPO is not set".to_string()))?;
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| Error::RepoUnavailable("GITHUB_TOKEN is not set".to_string()))?;
        let base_branch = std::env::var("GITHUB_BASE_BRANCH").unwrap_or_else(|_| "main".to_string());
        Ok(Self { owner, repo, base_branch, token })
    }
}

pub struct GitHubClient {
    octocrab: Octocrab,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let octocrab = Octocrab::builder()
            .personal_token(config.token.clone())
            .build()
            .map_err(|e| Error::RepoUnavailable(e.to_string()))?;
        Ok(Self { octocrab, config })
    }

    #[cfg(test)]
    fn with_base_uri(config: GitHubConfig, base_uri: &str) -> Result<Self> {
        let octocrab = Octocrab::builder()
            .personal_token(config.token.clone())
            .base_uri(base_uri)
            .map_err(|e| Error::RepoUnavailable(e.to_string()))?
            .build()
            .map_err(|e| Error::RepoUnavailable(e.to_string()))?;
        Ok(Self { octocrab, config })
    }
}

#[async_trait]
impl SourceRepoPort for GitHubClient {
    async fn ensure_branch(&self, name: &str) -> Result<()> {
        let repos = self.octocrab.repos(&self.config.owner, &self.config.repo);

        if repos.get_ref(&Reference::Branch(name.to_string())).await.is_ok() {
            return Ok(());
        }

        let base_ref = repos
            .get_ref(&Reference::Branch(self.config.base_branch.clone()))
            .await
            .map_err(|e| Error::RepoUnavailable(format!("resolving base branch: {e}")))?;

        let sha = match base_ref.object {
            Object::Commit { sha, .. } => sha,
            Object::Tag { sha, .. } => sha,
            _ => return Err(Error::RepoUnavailable("base ref has no resolvable sha".to_string())),
        };

        repos
            .create_ref(&Reference::Branch(name.to_string()), sha)
            .await
            .map_err(|e| Error::RepoUnavailable(format!("creating branch {name}: {e}")))?;
        Ok(())
    }

    async fn put_file(&self, branch: &str, path: &str, content: &str) -> Result<()> {
        let repos = self.octocrab.repos(&self.config.owner, &self.config.repo);
        let message = format!("automation: update {path}");

        let existing_sha = repos
            .get_content()
            .path(path)
            .r#ref(branch)
            .send()
            .await
            .ok()
            .and_then(|page| page.items.into_iter().next())
            .map(|item| item.sha);

        match existing_sha {
            Some(sha) => {
                repos
                    .update_file(path, &message, content, &sha)
                    .branch(branch)
                    .send()
                    .await
                    .map_err(|e| Error::RepoUnavailable(format!("updating {path}: {e}")))?;
            }
            None => {
                repos
                    .create_file(path, &message, content)
                    .branch(branch)
                    .send()
                    .await
                    .map_err(|e| Error::RepoUnavailable(format!("creating {path}: {e}")))?;
            }
        }
        Ok(())
    }

    async fn upsert_pr(&self, branch: &str, base: &str, title: &str, body: &str) -> Result<String> {
        let pulls = self.octocrab.pulls(&self.config.owner, &self.config.repo);
        let head = format!("{}:{}", self.config.owner, branch);

        let open = pulls
            .list()
            .head(head)
            .base(base)
            .send()
            .await
            .map_err(|e| Error::RepoUnavailable(format!("listing pull requests: {e}")))?;

        if let Some(existing) = open.items.into_iter().next() {
            let updated = pulls
                .update(existing.number)
                .title(title)
                .body(body)
                .send()
                .await
                .map_err(|e| Error::RepoUnavailable(format!("updating PR #{}: {e}", existing.number)))?;
            return Ok(updated
                .html_url
                .map(|u| u.to_string())
                .unwrap_or_else(|| format!("pr#{}", updated.number)));
        }

        let created = pulls
            .create(title, branch, base)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::RepoUnavailable(format!("creating pull request: {e}")))?;

        Ok(created
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("pr#{}", created.number)))
    }
}
