pub mod git;
pub mod github;

pub use git::GitCli;
pub use github::GithubClient;
